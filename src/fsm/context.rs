//! Shared mutable context threaded through every run-state handler.
//!
//! `RunContext` is the blackboard the state handlers read from and write
//! to: the tick inputs sampled by the cycle controller, the experiment
//! being executed, per-step timing, the PID controller, and the outputs
//! (actuator command, log row) the controller applies after each tick.

use std::time::Duration;

use crate::config::ControlSettings;
use crate::control::pid::PidController;
use crate::experiment::Experiment;
use crate::link::codec::ActuatorCommand;
use crate::run_log::LogRow;

// ---------------------------------------------------------------------------
// Tick inputs (written by the cycle controller; read-only to handlers)
// ---------------------------------------------------------------------------

/// Everything a handler may observe about the outside world this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickInputs {
    /// Monotonic time since an arbitrary epoch.
    pub now: Duration,
    /// Latest block temperature (°C).
    pub sample_temperature: f64,
    /// The device consumed the previous command (flag already taken).
    pub ready_for_next_step: bool,
    pub cancel_requested: bool,
    pub link_lost: bool,
}

// ---------------------------------------------------------------------------
// Run state (observable progress)
// ---------------------------------------------------------------------------

/// Progress of the run, as shown to the operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub is_running: bool,
    /// 1-based; 0 before the run starts.
    pub current_cycle: u32,
    pub current_step_index: usize,
    pub current_step_name: String,
    /// Active target temperature (°C).
    pub setpoint: f64,
    /// Wall-clock seconds since the run started, extensions included.
    pub elapsed_seconds: f64,
    /// Nominal run length (cycles × Σ step durations).
    pub estimated_total_seconds: u64,
}

impl RunState {
    /// Nominal seconds left, floored at zero.  Step extensions push the
    /// real end past this estimate.
    pub fn remaining_seconds(&self) -> u64 {
        let elapsed = self.elapsed_seconds.max(0.0) as u64;
        self.estimated_total_seconds.saturating_sub(elapsed)
    }
}

// ---------------------------------------------------------------------------
// Step timing
// ---------------------------------------------------------------------------

/// Timing of the step currently executing.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepClock {
    pub started: Duration,
    /// Moves later while the block is out of the tolerance band.
    pub deadline: Duration,
    /// End of the last interval already charged against the deadline.
    pub last_check: Duration,
    /// Time of the previous PID evaluation, `None` before the first one.
    pub last_pid: Option<Duration>,
    /// Band status sampled at `last_check`.
    pub out_of_band: bool,
}

impl StepClock {
    pub fn begin(now: Duration, duration: Duration) -> Self {
        Self {
            started: now,
            deadline: now + duration,
            last_check: now,
            last_pid: None,
            out_of_band: false,
        }
    }

    /// Time added to the nominal step duration so far.
    pub fn extension(&self, nominal: Duration) -> Duration {
        self.deadline.saturating_sub(self.started + nominal)
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

pub struct RunContext {
    pub settings: ControlSettings,
    pub pid: PidController,
    pub experiment: Option<Experiment>,

    pub inputs: TickInputs,
    pub state: RunState,
    pub step: StepClock,
    pub run_started: Duration,
    /// A command is outstanding and the device has not asked for the next.
    pub awaiting_ack: bool,
    pub steps_executed: u32,

    // ── Outputs, cleared before every tick ───────────────────
    pub outbox: Option<ActuatorCommand>,
    pub log_row: Option<LogRow>,
    pub step_changed: bool,
}

impl RunContext {
    pub fn new(settings: ControlSettings) -> Self {
        let mut pid = PidController::new(settings.kp, settings.ki, settings.kd, 0.0);
        pid.set_limits(-settings.output_limit, settings.output_limit);
        Self {
            settings,
            pid,
            experiment: None,
            inputs: TickInputs::default(),
            state: RunState::default(),
            step: StepClock::default(),
            run_started: Duration::ZERO,
            awaiting_ack: false,
            steps_executed: 0,
            outbox: None,
            log_row: None,
            step_changed: false,
        }
    }

    /// Arm the context for a new run starting at `now`.
    pub fn load(&mut self, experiment: Experiment, now: Duration) {
        self.state = RunState {
            estimated_total_seconds: experiment.estimated_duration_seconds(),
            ..RunState::default()
        };
        self.experiment = Some(experiment);
        self.inputs = TickInputs {
            now,
            ..TickInputs::default()
        };
        self.run_started = now;
        self.awaiting_ack = false;
        self.steps_executed = 0;
        self.pid.reset();
        self.clear_outputs();
    }

    pub fn clear_outputs(&mut self) {
        self.outbox = None;
        self.log_row = None;
        self.step_changed = false;
    }

    /// Position `(cycle, step_index)` following the current one, or
    /// `None` after the last step of the last cycle.
    pub fn next_position(&self) -> Option<(u32, usize)> {
        let exp = self.experiment.as_ref()?;
        let idx = self.state.current_step_index + 1;
        if idx < exp.steps.len() {
            Some((self.state.current_cycle, idx))
        } else if self.state.current_cycle < exp.cycle_count {
            Some((self.state.current_cycle + 1, 0))
        } else {
            None
        }
    }

    /// Enter step `index` of `cycle` at the current tick time.  Resets the
    /// PID so no integral carries over from the previous step.
    pub fn begin_step(&mut self, cycle: u32, index: usize) {
        let Some(step) = self.experiment.as_ref().and_then(|e| e.steps.get(index)) else {
            return;
        };
        let now = self.inputs.now;
        let setpoint = f64::from(step.target_temperature);

        self.pid.reset();
        self.pid.set_target(setpoint);
        self.step = StepClock::begin(now, Duration::from_secs(u64::from(step.duration)));

        self.state.current_cycle = cycle;
        self.state.current_step_index = index;
        self.state.current_step_name.clone_from(&step.name);
        self.state.setpoint = setpoint;
        self.steps_executed += 1;
        self.step_changed = true;
    }

    /// Whether `temperature` lies within the closed tolerance band around
    /// the active setpoint.
    pub fn in_band(&self, temperature: f64) -> bool {
        let tol = self.settings.tolerance_c;
        let sp = self.state.setpoint;
        (sp - tol..=sp + tol).contains(&temperature)
    }

    /// Seconds since the run started at the current tick.
    pub fn elapsed(&self) -> Duration {
        self.inputs.now.saturating_sub(self.run_started)
    }
}
