//! Cycle controller: executes one experiment against the device.
//!
//! [`CycleController`] owns the run state machine and the run log.  Each
//! tick it samples the shared telemetry, lets the state machine decide,
//! then applies the outputs through the ports:
//!
//! ```text
//!  SharedTelemetry ──▶ ┌──────────────────────┐ ──▶ CommandPort (device)
//!  CancelToken     ──▶ │   CycleController    │ ──▶ EventSink
//!  Clock           ──▶ │  RunStatus FSM · PID │ ──▶ RunLog ──▶ RunLogSink
//!                      └──────────────────────┘
//! ```
//!
//! All I/O flows through port traits, so a run can be replayed against a
//! simulated clock and thermal plant without threads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use log::{error, info, warn};

use crate::app::events::RunEvent;
use crate::app::ports::{Clock, CommandPort, EventSink, RunLogSink};
use crate::config::ControlSettings;
use crate::error::{Error, LinkError, Result};
use crate::experiment::Experiment;
use crate::fsm::context::{RunContext, RunState, TickInputs};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, RunStatus};
use crate::link::codec::ActuatorCommand;
use crate::run_log::RunLog;
use crate::telemetry::SharedTelemetry;

use super::CancelToken;

// ───────────────────────────────────────────────────────────────
// RunReport
// ───────────────────────────────────────────────────────────────

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub experiment: String,
    pub status: RunStatus,
    /// Why the run faulted, if it did.
    pub fault: Option<Error>,
    pub steps_executed: u32,
    pub commands_sent: u64,
    pub log_rows: usize,
    pub elapsed_seconds: f64,
    /// Where the log was written (completed runs only).
    pub log_path: Option<PathBuf>,
    /// Why the log could not be written.  The run still counts as completed.
    pub log_error: Option<Error>,
}

// ───────────────────────────────────────────────────────────────
// CycleController
// ───────────────────────────────────────────────────────────────

pub struct CycleController {
    fsm: Fsm,
    ctx: RunContext,
    log: RunLog,
    telemetry: Arc<SharedTelemetry>,
    cancel: CancelToken,
    fault: Option<Error>,
    commands_sent: u64,
    last_command: Option<ActuatorCommand>,
}

impl CycleController {
    /// Construct an idle controller reading from `telemetry` and watching
    /// `cancel`.
    pub fn new(settings: ControlSettings, telemetry: Arc<SharedTelemetry>, cancel: CancelToken) -> Self {
        Self {
            fsm: Fsm::new(build_state_table(), RunStatus::Idle),
            ctx: RunContext::new(settings),
            log: RunLog::new(),
            telemetry,
            cancel,
            fault: None,
            commands_sent: 0,
            last_command: None,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Validate `experiment`, take a private copy of it and enter the
    /// first step at time `now`.
    ///
    /// Nothing is sent to the device here; the first command goes out on
    /// the first [`tick`](Self::tick).
    pub fn start(
        &mut self,
        experiment: &Experiment,
        now: Duration,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        experiment.validate()?;
        if self.status() == RunStatus::Running {
            return Err(LinkError::Busy.into());
        }

        self.log = RunLog::new();
        self.fault = None;
        self.commands_sent = 0;
        self.last_command = None;
        self.ctx.load(experiment.clone(), now);

        sink.emit(&RunEvent::Started {
            experiment: experiment.name.clone(),
            cycles: experiment.cycle_count,
            steps: experiment.steps.len(),
            estimated_seconds: experiment.estimated_duration_seconds(),
        });
        self.fsm.force_transition(RunStatus::Running, &mut self.ctx);
        self.emit_step(sink);
        Ok(())
    }

    /// Build this tick's inputs from the shared telemetry.  Consumes the
    /// device's ready signal.
    pub fn sample_inputs(&self, now: Duration) -> TickInputs {
        TickInputs {
            now,
            sample_temperature: self.telemetry.sample_temperature(),
            ready_for_next_step: self.telemetry.take_ready(),
            cancel_requested: self.cancel.is_cancelled(),
            link_lost: self.telemetry.is_link_lost(),
        }
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one polling tick: state machine → command → log row → events.
    ///
    /// Returns the status after the tick.  Ticks outside `Running` are
    /// no-ops.
    pub fn tick(
        &mut self,
        inputs: TickInputs,
        port: &mut impl CommandPort,
        sink: &mut impl EventSink,
    ) -> RunStatus {
        if self.status() != RunStatus::Running {
            return self.status();
        }

        self.ctx.clear_outputs();
        self.ctx.inputs = inputs;
        self.fsm.tick(&mut self.ctx);

        if self.status() == RunStatus::Faulted && self.fault.is_none() {
            self.fault = Some(LinkError::Disconnected.into());
        }

        if let Some(command) = self.ctx.outbox.take() {
            match port.send_command(&command) {
                Ok(()) => {
                    self.commands_sent += 1;
                    self.last_command = Some(command);
                    sink.emit(&RunEvent::CommandSent(command));
                }
                Err(e) => {
                    error!("CYCLE: cannot send {command}: {e}");
                    self.fault = Some(e);
                    self.fsm.force_transition(RunStatus::Faulted, &mut self.ctx);
                }
            }
        }

        let status = self.status();
        if status == RunStatus::Running {
            if let Some(row) = self.ctx.log_row.take() {
                self.log.push(row);
            }
            if self.ctx.step_changed {
                self.emit_step(sink);
            }
            sink.emit(&RunEvent::Progress(self.ctx.state.clone()));
        } else {
            sink.emit(&RunEvent::Finished {
                status,
                elapsed_seconds: self.ctx.state.elapsed_seconds,
                fault: self.fault,
            });
        }
        status
    }

    /// Execute `experiment` to the end: tick, sleep one poll interval,
    /// repeat until the run leaves `Running`.  A completed run's log is
    /// flushed through `log_sink`; other outcomes discard it.
    ///
    /// Fails only when the experiment is rejected up front.
    pub fn run(
        &mut self,
        experiment: &Experiment,
        clock: &impl Clock,
        port: &mut impl CommandPort,
        log_sink: &mut dyn RunLogSink,
        sink: &mut impl EventSink,
    ) -> Result<RunReport> {
        self.start(experiment, clock.now(), sink)?;
        // An acknowledgement left over from before the run is stale.
        self.telemetry.take_ready();

        loop {
            let inputs = self.sample_inputs(clock.now());
            if self.tick(inputs, port, sink).is_terminal() {
                break;
            }
            clock.sleep(self.ctx.settings.poll_interval);
        }

        Ok(self.finish(log_sink, sink))
    }

    fn finish(&mut self, log_sink: &mut dyn RunLogSink, sink: &mut impl EventSink) -> RunReport {
        let status = self.status();
        let name = self
            .ctx
            .experiment
            .as_ref()
            .map(|e| e.name.clone())
            .unwrap_or_default();
        let log_rows = self.log.len();

        let (log_path, log_error) = if status == RunStatus::Completed {
            match std::mem::take(&mut self.log).flush(&name, Local::now(), log_sink) {
                Ok(path) => {
                    info!("CYCLE: run log written to {}", path.display());
                    sink.emit(&RunEvent::LogSaved(path.clone()));
                    (Some(path), None)
                }
                Err(e) => {
                    warn!("CYCLE: run log not written: {e}");
                    sink.emit(&RunEvent::LogFailed(e));
                    (None, Some(e))
                }
            }
        } else {
            (None, None)
        };

        RunReport {
            experiment: name,
            status,
            fault: self.fault,
            steps_executed: self.ctx.steps_executed,
            commands_sent: self.commands_sent,
            log_rows,
            elapsed_seconds: self.ctx.state.elapsed_seconds,
            log_path,
            log_error,
        }
    }

    fn emit_step(&self, sink: &mut impl EventSink) {
        let s = &self.ctx.state;
        sink.emit(&RunEvent::StepStarted {
            cycle: s.current_cycle,
            step_index: s.current_step_index,
            step_name: s.current_step_name.clone(),
            setpoint: s.setpoint,
        });
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self) -> RunStatus {
        self.fsm.current_state()
    }

    pub fn state(&self) -> &RunState {
        &self.ctx.state
    }

    /// Rows recorded so far.  Empty after a completed run was flushed.
    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn fault(&self) -> Option<Error> {
        self.fault
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    pub fn last_command(&self) -> Option<ActuatorCommand> {
        self.last_command
    }

    /// Current PID integral accumulator.
    pub fn pid_integral(&self) -> f64 {
        self.ctx.pid.integral()
    }

    /// Time the current step has been stretched beyond its nominal
    /// duration.
    pub fn step_extension(&self) -> Duration {
        let nominal = self
            .ctx
            .experiment
            .as_ref()
            .and_then(|e| e.steps.get(self.ctx.state.current_step_index))
            .map_or(Duration::ZERO, |s| Duration::from_secs(u64::from(s.duration)));
        self.ctx.step.extension(nominal)
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.ctx.settings
    }
}
