//! Outbound run events.
//!
//! The [`CycleController`](crate::control::cycle::CycleController) emits
//! these through the [`EventSink`](super::ports::EventSink) port.  Adapters
//! on the other side decide what to do with them: log them, print a
//! progress line, forward them to a UI thread.

use std::path::PathBuf;

use crate::error::Error;
use crate::fsm::RunStatus;
use crate::fsm::context::RunState;
use crate::link::codec::ActuatorCommand;

/// Structured events emitted by the control loop.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A run was accepted and the first step begins.
    Started {
        experiment: String,
        cycles: u32,
        steps: usize,
        estimated_seconds: u64,
    },

    /// A new step (or a new cycle's first step) began.
    StepStarted {
        cycle: u32,
        step_index: usize,
        step_name: String,
        setpoint: f64,
    },

    /// A command was written to the device.
    CommandSent(ActuatorCommand),

    /// Progress after every tick of a running run.
    Progress(RunState),

    /// The run left `Running`.
    Finished {
        status: RunStatus,
        elapsed_seconds: f64,
        fault: Option<Error>,
    },

    /// The run log was written.
    LogSaved(PathBuf),

    /// The run completed but the log could not be written.
    LogFailed(Error),
}
