//! Full runs of the cycle controller against a simulated device.
//!
//! Everything is single-threaded: the run loop calls `SimClock::sleep`
//! between ticks, and the clock's hook plays the thermal plant, so every
//! timing below is exact.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cetus_pcr::app::events::RunEvent;
use cetus_pcr::config::ControlSettings;
use cetus_pcr::control::CancelToken;
use cetus_pcr::control::cycle::CycleController;
use cetus_pcr::error::{Error, ExperimentError, LinkError};
use cetus_pcr::experiment::Experiment;
use cetus_pcr::fsm::RunStatus;
use cetus_pcr::link::codec::ActuatorCommand;
use cetus_pcr::telemetry::SharedTelemetry;

use super::mock_device::{EventLog, MemoryLog, SimClock, SimDevice};

const POLL: Duration = Duration::from_millis(100);

fn settings() -> ControlSettings {
    ControlSettings {
        kp: 8.0,
        ki: 0.2,
        kd: 1.0,
        tolerance_c: 1.0,
        output_limit: 255.0,
        poll_interval: POLL,
    }
}

struct Rig {
    telemetry: Arc<SharedTelemetry>,
    cancel: CancelToken,
    controller: CycleController,
    device: SimDevice,
    log: MemoryLog,
    events: EventLog,
}

fn rig() -> Rig {
    let telemetry = Arc::new(SharedTelemetry::new());
    let cancel = CancelToken::new();
    Rig {
        controller: CycleController::new(settings(), Arc::clone(&telemetry), cancel.clone()),
        device: SimDevice::new(Arc::clone(&telemetry)),
        telemetry,
        cancel,
        log: MemoryLog::default(),
        events: EventLog::default(),
    }
}

/// Setpoint the run would have at time `t` if every step took exactly its
/// nominal duration.
fn nominal_setpoint(exp: &Experiment, t: Duration) -> f64 {
    let mut at = Duration::ZERO;
    for _ in 0..exp.cycle_count {
        for step in &exp.steps {
            at += Duration::from_secs(u64::from(step.duration));
            if t < at {
                return f64::from(step.target_temperature);
            }
        }
    }
    exp.steps
        .last()
        .map_or(0.0, |s| f64::from(s.target_temperature))
}

fn pcr_test_experiment() -> Experiment {
    Experiment::new("Test", 2, 4)
        .with_step("A", 95, 5)
        .with_step("B", 55, 5)
}

// ── End-to-end ────────────────────────────────────────────────

#[test]
fn test_experiment_runs_four_steps_and_logs_every_tick() {
    let mut r = rig();
    let exp = pcr_test_experiment();

    // The device reports the active setpoint instantly.
    let plant = {
        let telemetry = Arc::clone(&r.telemetry);
        let exp = exp.clone();
        move |now| telemetry.set_sample_temperature(nominal_setpoint(&exp, now))
    };
    r.telemetry.set_sample_temperature(95.0);
    let clock = SimClock::with_hook(plant);

    let report = r
        .controller
        .run(&exp, &clock, &mut r.device, &mut r.log, &mut r.events)
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.steps_executed, 4);
    assert!((report.elapsed_seconds - 20.0).abs() < 1e-9);

    let writes = r.log.writes();
    assert_eq!(writes.len(), 1, "log flushed exactly once");
    let (name, rows) = &writes[0];
    assert_eq!(name, "Test");
    assert_eq!(rows.len(), 200, "one row per 100 ms tick for 4 × 5 s");
    assert_eq!(report.log_rows, 200);

    for (i, row) in rows.iter().enumerate() {
        let expected = if (i / 50) % 2 == 0 { 95.0 } else { 55.0 };
        assert_eq!(row.setpoint, expected, "row {i}");
        assert!((row.elapsed_seconds - i as f64 * 0.1).abs() < 1e-9, "row {i}");
    }

    let steps: Vec<_> = r
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            RunEvent::StepStarted {
                cycle, step_name, ..
            } => Some((cycle, step_name)),
            _ => None,
        })
        .collect();
    assert_eq!(
        steps,
        vec![
            (1, "A".to_string()),
            (1, "B".to_string()),
            (2, "A".to_string()),
            (2, "B".to_string()),
        ]
    );
    assert_eq!(r.device.sent().last(), Some(&ActuatorCommand::NEUTRAL));
    assert!(matches!(
        r.events.events().last(),
        Some(RunEvent::LogSaved(_))
    ));
}

// ── Step timing ───────────────────────────────────────────────

#[test]
fn in_band_steps_take_exactly_their_duration() {
    for duration in [1u32, 2, 5, 12] {
        let mut r = rig();
        let exp = Experiment::new("hold", 1, 4).with_step("h", 60, duration);
        // Inside the band but not on the setpoint.
        r.telemetry.set_sample_temperature(60.0 + 0.9);

        let report = r
            .controller
            .run(&exp, &SimClock::new(), &mut r.device, &mut r.log, &mut r.events)
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert!(
            (report.elapsed_seconds - f64::from(duration)).abs() < 1e-9,
            "D={duration}: took {}",
            report.elapsed_seconds
        );
        assert_eq!(report.log_rows, duration as usize * 10);
        assert_eq!(r.controller.step_extension(), Duration::ZERO);
    }
}

#[test]
fn late_arrival_extends_the_step_by_the_time_outside_the_band() {
    for arrive_ms in [100u64, 700, 2000, 3500] {
        let mut r = rig();
        let exp = Experiment::new("ramp", 1, 4).with_step("h", 60, 5);
        let arrive = Duration::from_millis(arrive_ms);

        r.telemetry.set_sample_temperature(25.0);
        let plant = {
            let telemetry = Arc::clone(&r.telemetry);
            move |now: Duration| {
                if now >= arrive {
                    telemetry.set_sample_temperature(60.0);
                }
            }
        };

        let report = r
            .controller
            .run(&exp, &SimClock::with_hook(plant), &mut r.device, &mut r.log, &mut r.events)
            .unwrap();

        let extension = report.elapsed_seconds - 5.0;
        assert!(
            extension + 1e-9 >= arrive.as_secs_f64(),
            "arrived at {arrive:?}, extended by {extension}"
        );
        assert!(extension <= arrive.as_secs_f64() + POLL.as_secs_f64() + 1e-9);
        assert_eq!(report.status, RunStatus::Completed);
    }
}

#[test]
fn excursion_mid_step_also_extends() {
    let mut r = rig();
    let exp = Experiment::new("dip", 1, 4).with_step("h", 72, 3);
    r.telemetry.set_sample_temperature(72.0);
    let plant = {
        let telemetry = Arc::clone(&r.telemetry);
        move |now: Duration| {
            let t = now.as_millis();
            let temp = if (1000..1500).contains(&t) { 65.0 } else { 72.0 };
            telemetry.set_sample_temperature(temp);
        }
    };

    let report = r
        .controller
        .run(&exp, &SimClock::with_hook(plant), &mut r.device, &mut r.log, &mut r.events)
        .unwrap();

    assert!((report.elapsed_seconds - 3.5).abs() < 1e-9);
}

// ── Command discipline ────────────────────────────────────────

#[test]
fn silent_device_gets_one_command_per_acknowledgement() {
    let telemetry = Arc::new(SharedTelemetry::new());
    let mut controller = CycleController::new(settings(), Arc::clone(&telemetry), CancelToken::new());
    let mut device = SimDevice::silent(Arc::clone(&telemetry));
    let (mut log, mut events) = (MemoryLog::default(), EventLog::default());
    telemetry.set_sample_temperature(40.0);

    // The device answers `nextpls` once per second.
    let plant = {
        let telemetry = Arc::clone(&telemetry);
        move |now: Duration| {
            if now.as_millis() % 1000 == 0 {
                telemetry.signal_ready();
            }
        }
    };
    let exp = Experiment::new("slow", 1, 4).with_step("h", 40, 5);
    let report = controller
        .run(&exp, &SimClock::with_hook(plant), &mut device, &mut log, &mut events)
        .unwrap();

    // Initial command, four acknowledgements at 1..4 s, neutral at the end.
    assert_eq!(device.sent().len(), 6);
    assert_eq!(report.commands_sent, 6);
}

#[test]
fn stale_acknowledgement_before_start_is_ignored() {
    let mut r = rig();
    r.device = SimDevice::silent(Arc::clone(&r.telemetry));
    r.telemetry.set_sample_temperature(50.0);
    r.telemetry.signal_ready();

    let exp = Experiment::new("stale", 1, 4).with_step("h", 50, 1);
    r.controller
        .run(&exp, &SimClock::new(), &mut r.device, &mut r.log, &mut r.events)
        .unwrap();

    // First command plus the closing neutral; the stale ack bought nothing.
    assert_eq!(r.device.sent().len(), 2);
}

#[test]
fn heating_and_cooling_polarity_follow_the_error_sign() {
    let mut r = rig();
    let exp = Experiment::new("two", 1, 4)
        .with_step("hot", 95, 1)
        .with_step("cold", 4, 1);
    r.telemetry.set_sample_temperature(50.0);
    // The block sits at 95 °C until well into the cold step.
    let plant = {
        let telemetry = Arc::clone(&r.telemetry);
        move |now: Duration| {
            let temp = if now < Duration::from_millis(1300) { 95.0 } else { 4.0 };
            telemetry.set_sample_temperature(temp);
        }
    };
    let report = r
        .controller
        .run(&exp, &SimClock::with_hook(plant), &mut r.device, &mut r.log, &mut r.events)
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);

    let sent = r.device.sent();
    assert_eq!(sent[0].to_string(), "<peltier 0 255>");
    assert!(sent.iter().any(|c| c.to_string().starts_with("<peltier 1 ")));
}

// ── Cancellation and faults ───────────────────────────────────

#[test]
fn cancel_at_any_tick_stops_within_one_interval_with_neutral_last() {
    for cancel_tick in [0u64, 1, 7, 33, 49, 50, 51, 99] {
        let mut r = rig();
        r.telemetry.set_sample_temperature(95.0);
        let exp = Experiment::new("Test", 1, 4)
            .with_step("A", 95, 5)
            .with_step("B", 95, 5);
        let cancel_at = POLL * cancel_tick as u32;
        if cancel_tick == 0 {
            r.cancel.cancel();
        }
        let hook = {
            let cancel = r.cancel.clone();
            move |now: Duration| {
                if now >= cancel_at {
                    cancel.cancel();
                }
            }
        };

        let report = r
            .controller
            .run(&exp, &SimClock::with_hook(hook), &mut r.device, &mut r.log, &mut r.events)
            .unwrap();

        assert_eq!(report.status, RunStatus::Cancelled, "tick {cancel_tick}");
        assert_eq!(r.device.sent().last(), Some(&ActuatorCommand::NEUTRAL));
        assert!(report.elapsed_seconds <= cancel_at.as_secs_f64() + POLL.as_secs_f64() + 1e-9);
        assert_eq!(report.log_rows, cancel_tick as usize);
        assert!(r.log.writes().is_empty(), "cancelled runs are not flushed");
    }
}

#[test]
fn link_loss_faults_and_stops_commands() {
    let mut r = rig();
    r.telemetry.set_sample_temperature(95.0);
    let exp = Experiment::new("Test", 2, 4).with_step("A", 95, 5);
    let at_loss = Arc::new(Mutex::new(None));
    let hook = {
        let telemetry = Arc::clone(&r.telemetry);
        let cancel = r.cancel.clone();
        let commands = Arc::clone(&r.device.commands);
        let at_loss = Arc::clone(&at_loss);
        move |now: Duration| {
            if now == Duration::from_secs(3) {
                // What the monitor does on a transport failure.
                telemetry.mark_link_lost();
                cancel.cancel();
                *at_loss.lock().unwrap() = Some(commands.lock().unwrap().len());
            }
        }
    };

    let report = r
        .controller
        .run(&exp, &SimClock::with_hook(hook), &mut r.device, &mut r.log, &mut r.events)
        .unwrap();

    assert_eq!(report.status, RunStatus::Faulted);
    assert_eq!(report.fault, Some(Error::Link(LinkError::Disconnected)));
    assert!((report.elapsed_seconds - 3.0).abs() < 1e-9);
    assert_eq!(Some(r.device.sent().len()), *at_loss.lock().unwrap());
    assert_eq!(report.log_rows, 30);
    assert!(r.log.writes().is_empty());
}

#[test]
fn write_failure_mid_run_faults() {
    let mut r = rig();
    r.device.fail_after = Some(10);
    r.telemetry.set_sample_temperature(95.0);
    let exp = Experiment::new("flaky", 1, 4).with_step("A", 95, 5);

    let report = r
        .controller
        .run(&exp, &SimClock::new(), &mut r.device, &mut r.log, &mut r.events)
        .unwrap();

    assert_eq!(report.status, RunStatus::Faulted);
    assert_eq!(report.commands_sent, 10);
    // The failing tick writes no row.
    assert_eq!(report.log_rows, 10);
}

#[test]
fn invalid_experiments_are_rejected_before_anything_happens() {
    let mut r = rig();
    let no_steps = Experiment::new("empty", 3, 4);
    let no_cycles = Experiment::new("zero", 0, 4).with_step("A", 95, 5);

    let e = r
        .controller
        .run(&no_steps, &SimClock::new(), &mut r.device, &mut r.log, &mut r.events)
        .unwrap_err();
    assert_eq!(e, Error::InvalidExperiment(ExperimentError::NoSteps));
    let e = r
        .controller
        .run(&no_cycles, &SimClock::new(), &mut r.device, &mut r.log, &mut r.events)
        .unwrap_err();
    assert_eq!(e, Error::InvalidExperiment(ExperimentError::ZeroCycles));

    assert!(r.device.sent().is_empty());
    assert!(r.events.events().is_empty());
    assert_eq!(r.controller.status(), RunStatus::Idle);
}

#[test]
fn log_write_failure_still_completes() {
    let mut r = rig();
    r.log = MemoryLog::failing();
    r.telemetry.set_sample_temperature(95.0);
    let exp = Experiment::new("nolog", 1, 4).with_step("A", 95, 1);

    let report = r
        .controller
        .run(&exp, &SimClock::new(), &mut r.device, &mut r.log, &mut r.events)
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.log_error, Some(Error::PermissionDenied));
    assert!(report.log_path.is_none());
}

#[test]
fn controller_can_run_again_after_finishing() {
    let mut r = rig();
    r.telemetry.set_sample_temperature(95.0);
    let exp = Experiment::new("again", 1, 4).with_step("A", 95, 1);

    for _ in 0..2 {
        let report = r
            .controller
            .run(&exp, &SimClock::new(), &mut r.device, &mut r.log, &mut r.events)
            .unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.log_rows, 10);
    }
    assert_eq!(r.log.writes().len(), 2);
}
