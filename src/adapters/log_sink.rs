//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing run events to the `log` facade.
//! Per-tick progress is logged at debug level, throttled to one line per
//! `progress_every` ticks, so an `info` console stays readable.

use log::{Level, debug, info, log, warn};

use crate::app::events::RunEvent;
use crate::app::ports::EventSink;
use crate::experiment::format_duration;
use crate::fsm::RunStatus;
use crate::link::codec::ActuatorCommand;

/// Adapter that logs every [`RunEvent`].
pub struct LogEventSink {
    progress_every: u64,
    ticks: u64,
}

impl Default for LogEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::with_progress_every(10)
    }

    pub fn with_progress_every(progress_every: u64) -> Self {
        Self {
            progress_every: progress_every.max(1),
            ticks: 0,
        }
    }
}

/// Drive commands are per-tick noise; switching the element off is not.
fn command_level(cmd: &ActuatorCommand) -> Level {
    if cmd.is_neutral() { Level::Info } else { Level::Debug }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Started {
                experiment,
                cycles,
                steps,
                estimated_seconds,
            } => {
                self.ticks = 0;
                info!(
                    "START | {experiment} | {cycles} cycle(s) x {steps} step(s) | est. {}",
                    format_duration(*estimated_seconds)
                );
            }
            RunEvent::StepStarted {
                cycle,
                step_index,
                step_name,
                setpoint,
            } => {
                info!(
                    "STEP  | cycle {cycle} | step {} {step_name:?} | sp={setpoint:.1}\u{00b0}C",
                    step_index + 1
                );
            }
            RunEvent::CommandSent(cmd) => {
                let note = if cmd.is_neutral() { " (element off)" } else { "" };
                log!(command_level(cmd), "CMD   | {cmd}{note}");
            }
            RunEvent::Progress(state) => {
                self.ticks += 1;
                if self.ticks % self.progress_every == 0 {
                    debug!(
                        "PROG  | cycle {} step {} | sp={:.1}\u{00b0}C | {:.1}s elapsed | {} left",
                        state.current_cycle,
                        state.current_step_index + 1,
                        state.setpoint,
                        state.elapsed_seconds,
                        format_duration(state.remaining_seconds())
                    );
                }
            }
            RunEvent::Finished {
                status,
                elapsed_seconds,
                fault,
            } => match (status, fault) {
                (RunStatus::Faulted, Some(e)) => {
                    warn!("END   | faulted after {elapsed_seconds:.1}s: {e}");
                }
                _ => info!("END   | {status:?} after {elapsed_seconds:.1}s"),
            },
            RunEvent::LogSaved(path) => {
                info!("LOG   | saved {}", path.display());
            }
            RunEvent::LogFailed(e) => {
                warn!("LOG   | not saved: {e}");
            }
        }
    }
}
