//! CSV run-log adapter.
//!
//! Writes a completed run to `<dir>/<name> - <ddmmyyHHMMSS>.csv` with the
//! header `X,Y,Set Point`: seconds since start, block temperature, and
//! active setpoint.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use log::debug;

use crate::app::ports::RunLogSink;
use crate::error::{Error, Result, StorageError};
use crate::run_log::LogRow;

pub const CSV_HEADER: [&str; 3] = ["X", "Y", "Set Point"];

/// Writes run logs under one directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct CsvRunLogSink {
    dir: PathBuf,
}

impl CsvRunLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File name for a run of `run_name` finished at `timestamp`.
    pub fn file_name(run_name: &str, timestamp: DateTime<Local>) -> String {
        let safe: String = run_name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        format!("{safe} - {}.csv", timestamp.format("%d%m%y%H%M%S"))
    }
}

impl RunLogSink for CsvRunLogSink {
    fn write_csv(
        &mut self,
        run_name: &str,
        timestamp: DateTime<Local>,
        rows: &[LogRow],
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(run_name, timestamp));

        let mut wtr = csv::Writer::from_path(&path).map_err(csv_error)?;
        wtr.write_record(CSV_HEADER).map_err(csv_error)?;
        for row in rows {
            wtr.write_record([
                row.elapsed_seconds.to_string(),
                row.temperature.to_string(),
                row.setpoint.to_string(),
            ])
            .map_err(csv_error)?;
        }
        wtr.flush()?;

        debug!("CSV: {} rows -> {}", rows.len(), path.display());
        Ok(path)
    }
}

fn csv_error(e: csv::Error) -> Error {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => io.into(),
        _ => StorageError::Corrupted.into(),
    }
}
