//! In-memory record of a run, flushed to persistent storage once.

use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::app::ports::RunLogSink;
use crate::error::Result;

/// One sample of the run: `X` (seconds since start), `Y` (block
/// temperature) and the active setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRow {
    pub elapsed_seconds: f64,
    pub temperature: f64,
    pub setpoint: f64,
}

/// Append-only rows of the current run.
#[derive(Debug, Default)]
pub struct RunLog {
    rows: Vec<LogRow>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: LogRow) {
        debug_assert!(
            self.rows
                .last()
                .is_none_or(|last| last.elapsed_seconds <= row.elapsed_seconds),
            "log rows must be time-ordered"
        );
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write every row through `sink` and give up the log.  Consuming
    /// `self` makes a second flush of the same run impossible.
    pub fn flush(
        self,
        run_name: &str,
        timestamp: DateTime<Local>,
        sink: &mut dyn RunLogSink,
    ) -> Result<PathBuf> {
        sink.write_csv(run_name, timestamp, &self.rows)
    }
}
