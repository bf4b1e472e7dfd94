//! Concrete run-state handlers and table builder.
//!
//! Each state is defined by plain `fn` pointers over [`RunContext`].
//!
//! ```text
//!  IDLE ──[start]──▶ RUNNING ──[last step elapsed]──▶ COMPLETED
//!                       │
//!                       ├──[cancel requested]──▶ CANCELLED  (neutral command)
//!                       │
//!                       └──[link lost]─────────▶ FAULTED    (no command)
//!
//!  COMPLETED / CANCELLED / FAULTED ──[start]──▶ RUNNING
//! ```
//!
//! One RUNNING tick, in order: link-loss check, cancel check, charge the
//! previous interval against the step deadline if it began out of band,
//! advance the step when the deadline has passed, issue a PID command if
//! the device asked for one, record the band status and a log row.

use super::context::RunContext;
use super::{RunStatus, StateDescriptor};
use crate::link::codec::ActuatorCommand;
use crate::run_log::LogRow;
use log::{debug, info, warn};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once per controller.
pub fn build_state_table() -> [StateDescriptor; RunStatus::COUNT] {
    [
        // Index 0: Idle
        StateDescriptor {
            id: RunStatus::Idle,
            name: "Idle",
            on_enter: None,
            on_exit: None,
            on_update: stay,
        },
        // Index 1: Running
        StateDescriptor {
            id: RunStatus::Running,
            name: "Running",
            on_enter: Some(running_enter),
            on_exit: Some(running_exit),
            on_update: running_update,
        },
        // Index 2: Completed
        StateDescriptor {
            id: RunStatus::Completed,
            name: "Completed",
            on_enter: Some(completed_enter),
            on_exit: None,
            on_update: stay,
        },
        // Index 3: Cancelled
        StateDescriptor {
            id: RunStatus::Cancelled,
            name: "Cancelled",
            on_enter: Some(cancelled_enter),
            on_exit: None,
            on_update: stay,
        },
        // Index 4: Faulted
        StateDescriptor {
            id: RunStatus::Faulted,
            name: "Faulted",
            on_enter: Some(faulted_enter),
            on_exit: None,
            on_update: stay,
        },
    ]
}

/// Idle and terminal states wait for the controller to start a run.
fn stay(_ctx: &mut RunContext) -> Option<RunStatus> {
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  RUNNING
// ═══════════════════════════════════════════════════════════════════════════

fn running_enter(ctx: &mut RunContext) {
    ctx.state.is_running = true;
    if let Some(exp) = &ctx.experiment {
        info!(
            "RUNNING: experiment {:?}, {} cycle(s) of {} step(s), ~{}s",
            exp.name,
            exp.cycle_count,
            exp.steps.len(),
            ctx.state.estimated_total_seconds
        );
    }
    ctx.begin_step(1, 0);
    log_step(ctx);
}

fn running_exit(ctx: &mut RunContext) {
    ctx.state.is_running = false;
    ctx.state.elapsed_seconds = ctx.elapsed().as_secs_f64();
}

fn running_update(ctx: &mut RunContext) -> Option<RunStatus> {
    if ctx.inputs.link_lost {
        warn!("RUNNING: device link lost");
        return Some(RunStatus::Faulted);
    }
    if ctx.inputs.cancel_requested {
        info!("RUNNING: cancel requested");
        return Some(RunStatus::Cancelled);
    }

    let now = ctx.inputs.now;
    let temperature = ctx.inputs.sample_temperature;

    // Charge the interval since the last tick when it began out of band.
    if ctx.step.out_of_band {
        ctx.step.deadline += now.saturating_sub(ctx.step.last_check);
    }
    ctx.step.last_check = now;

    while now >= ctx.step.deadline {
        match ctx.next_position() {
            Some((cycle, index)) => {
                ctx.begin_step(cycle, index);
                log_step(ctx);
            }
            None => return Some(RunStatus::Completed),
        }
    }

    if !ctx.awaiting_ack || ctx.inputs.ready_for_next_step {
        let dt = ctx
            .step
            .last_pid
            .map_or(0.0, |prev| now.saturating_sub(prev).as_secs_f64());
        ctx.step.last_pid = Some(now);
        let output = ctx.pid.compute(temperature, dt);
        let command = ActuatorCommand::from_output(output, ctx.settings.output_limit);
        debug!("RUNNING: T={temperature:.2} sp={} out={output:.1} -> {command}", ctx.state.setpoint);
        ctx.outbox = Some(command);
        ctx.awaiting_ack = true;
    }

    ctx.step.out_of_band = !ctx.in_band(temperature);
    ctx.state.elapsed_seconds = ctx.elapsed().as_secs_f64();
    ctx.log_row = Some(LogRow {
        elapsed_seconds: ctx.state.elapsed_seconds,
        temperature,
        setpoint: ctx.state.setpoint,
    });
    None
}

fn log_step(ctx: &RunContext) {
    info!(
        "RUNNING: cycle {} step {} ({:?}) -> {}°C",
        ctx.state.current_cycle,
        ctx.state.current_step_index + 1,
        ctx.state.current_step_name,
        ctx.state.setpoint
    );
}

// ═══════════════════════════════════════════════════════════════════════════
//  Terminal states
// ═══════════════════════════════════════════════════════════════════════════

fn completed_enter(ctx: &mut RunContext) {
    info!(
        "COMPLETED: {} step(s) in {:.1}s",
        ctx.steps_executed, ctx.state.elapsed_seconds
    );
    ctx.outbox = Some(ActuatorCommand::NEUTRAL);
}

fn cancelled_enter(ctx: &mut RunContext) {
    info!("CANCELLED: de-energising element");
    ctx.outbox = Some(ActuatorCommand::NEUTRAL);
}

fn faulted_enter(ctx: &mut RunContext) {
    warn!("FAULTED: run aborted after {:.1}s", ctx.state.elapsed_seconds);
    ctx.outbox = None;
    ctx.log_row = None;
}
