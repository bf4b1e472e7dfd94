//! Port traits: the boundary between the run domain and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ CycleController / AppContext (domain)
//! ```
//!
//! Driven adapters (serial writer, clock, event sinks, storage) implement
//! these traits.  The domain consumes them via generics or trait objects,
//! so the control loop never touches the OS directly and tests can swap
//! in a simulated clock and a recording device.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::error::Result;
use crate::experiment::Experiment;
use crate::link::LinkWriter;
use crate::link::codec::ActuatorCommand;
use crate::run_log::LogRow;

// ───────────────────────────────────────────────────────────────
// Command port (domain → device)
// ───────────────────────────────────────────────────────────────

/// Write-side port: the controller sends actuator commands through this.
pub trait CommandPort {
    fn send_command(&mut self, command: &ActuatorCommand) -> Result<()>;
}

impl CommandPort for LinkWriter {
    fn send_command(&mut self, command: &ActuatorCommand) -> Result<()> {
        LinkWriter::send_command(self, &command.to_string())
    }
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time source driving the polling cadence.
pub trait Clock {
    /// Time since an arbitrary, fixed epoch.
    fn now(&self) -> Duration;

    /// Block the calling thread for `period`.
    fn sleep(&self, period: Duration);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → presentation / logging)
// ───────────────────────────────────────────────────────────────

/// The domain emits [`RunEvent`](super::events::RunEvent)s through this
/// port.  Adapters decide where they go (log, terminal, channel).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::RunEvent);
}

// ───────────────────────────────────────────────────────────────
// Run-log sink (domain → persistent storage)
// ───────────────────────────────────────────────────────────────

/// Persists the rows of a completed run.
pub trait RunLogSink {
    /// Write `rows` for `run_name`, stamped with the time the run finished.
    /// Returns where the record was stored.
    fn write_csv(
        &mut self,
        run_name: &str,
        timestamp: DateTime<Local>,
        rows: &[LogRow],
    ) -> Result<PathBuf>;
}

// ───────────────────────────────────────────────────────────────
// Experiment store (domain ↔ persistent experiment list)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the ordered experiment list.
///
/// Implementations MUST return an empty list (not an error) when nothing
/// has been saved yet.
pub trait ExperimentStore: Send {
    fn load(&self) -> Result<Vec<Experiment>>;

    fn save(&self, experiments: &[Experiment]) -> Result<()>;
}
