//! `AppContext` end to end: experiment list, connection lifecycle, and
//! runs on the controller thread against a mock serial device.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Local};

use cetus_pcr::app::events::RunEvent;
use cetus_pcr::app::ports::RunLogSink;
use cetus_pcr::app::service::AppContext;
use cetus_pcr::config::SystemConfig;
use cetus_pcr::error::{Error, ExperimentError, LinkError};
use cetus_pcr::experiment::Experiment;
use cetus_pcr::fsm::RunStatus;
use cetus_pcr::run_log::LogRow;

use super::link_tests::wait_until;
use super::mock_device::{EventLog, MemoryLog, MemoryStore, MockDevice, MockPorts};

fn fast_config() -> SystemConfig {
    SystemConfig {
        settle_ms: 0,
        read_timeout_ms: 10,
        poll_interval_ms: 5,
        ..SystemConfig::default()
    }
}

fn app_with(experiments: Vec<Experiment>) -> (AppContext, MemoryStore) {
    let store = MemoryStore {
        saved: Arc::new(Mutex::new(experiments)),
        read_only: false,
    };
    let app = AppContext::new(fast_config(), Box::new(store.clone())).unwrap();
    (app, store)
}

/// Connect to a fresh device whose block already sits at `temperature`.
fn connect_at(app: &mut AppContext, temperature: f64) -> MockDevice {
    let device = MockDevice::cetus();
    let ports = MockPorts::new().with("/dev/ttyACM0", "Arduino Uno", Some(device.clone()));
    let state = app.connect(&ports).unwrap();
    assert_eq!(state.port_identifier.as_deref(), Some("/dev/ttyACM0"));

    device.send_line(&format!("tempSample {temperature:.1}"));
    assert!(wait_until(|| app.telemetry().sample_temperature == temperature));
    device
}

// ── Experiment list ───────────────────────────────────────────

#[test]
fn experiments_load_add_remove_and_save() {
    let (mut app, store) = app_with(vec![
        Experiment::new("test", 2, 4).with_step("A", 95, 5),
    ]);
    assert_eq!(app.experiments().len(), 1);
    assert!(app.experiment("test").is_some());
    assert!(app.experiment("Test").is_some());

    app.add_experiment(Experiment::new("pcr", 30, 4).with_step("Denature", 95, 30));
    app.save().unwrap();
    assert_eq!(store.saved.lock().unwrap().len(), 2);

    let removed = app.remove_experiment("pcr").unwrap();
    assert_eq!(removed.name, "Pcr");
    assert!(app.remove_experiment("pcr").is_none());
    app.save().unwrap();
    assert_eq!(store.saved.lock().unwrap().len(), 1);
}

#[test]
fn failed_save_keeps_the_list() {
    let store = MemoryStore {
        read_only: true,
        ..MemoryStore::default()
    };
    let mut app = AppContext::new(fast_config(), Box::new(store)).unwrap();
    app.add_experiment(Experiment::new("keep", 1, 4).with_step("A", 60, 1));

    assert_eq!(app.save(), Err(Error::PermissionDenied));
    assert_eq!(app.experiments().len(), 1);
}

// ── Runs ──────────────────────────────────────────────────────

#[test]
fn completed_run_writes_log_and_ends_neutral() {
    let (mut app, _) = app_with(vec![
        Experiment::new("hold", 1, 4).with_step("Hold", 60, 1),
    ]);
    let device = connect_at(&mut app, 60.0);

    let log = MemoryLog::default();
    let events = EventLog::default();
    let handle = app
        .start_run("hold", Box::new(log.clone()), events.clone())
        .unwrap();
    let report = handle.join().unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.experiment, "Hold");
    assert_eq!(report.steps_executed, 1);
    assert!(report.elapsed_seconds >= 1.0);
    assert!(!app.is_running());

    let writes = log.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, "Hold");
    assert_eq!(writes[0].1.len(), report.log_rows);
    assert!(writes[0].1.iter().all(|r| r.setpoint == 60.0));

    let lines = device.written_lines();
    assert!(lines.len() >= 2);
    assert_eq!(lines.last().map(String::as_str), Some("<peltier 0 0>"));
    assert!(matches!(events.events().first(), Some(RunEvent::Started { .. })));
}

#[test]
fn device_is_exclusive_while_a_run_is_active() {
    let (mut app, _) = app_with(vec![
        Experiment::new("long", 1, 4).with_step("Hold", 60, 60),
    ]);
    let device = connect_at(&mut app, 60.0);

    let handle = app
        .start_run("long", Box::new(MemoryLog::default()), EventLog::default())
        .unwrap();
    assert!(wait_until(|| handle.progress().is_running));
    assert!(app.is_running());

    let link = app.link_mut().unwrap();
    assert_eq!(link.send_command("<peltier 0 99>"), Err(Error::Link(LinkError::Busy)));
    let ports = MockPorts::new().with("/dev/ttyACM1", "Arduino", Some(MockDevice::cetus()));
    assert_eq!(app.connect(&ports).err(), Some(Error::Link(LinkError::Busy)));
    assert!(ports.opened().is_empty());
    assert!(matches!(
        app.start_run("long", Box::new(MemoryLog::default()), EventLog::default()),
        Err(Error::Link(LinkError::Busy))
    ));

    handle.cancel();
    let report = handle.join().unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(!device.written_lines().iter().any(|l| l == "<peltier 0 99>"));

    // The write path is free again.
    app.link_mut().unwrap().send_command("<peltier 0 0>").unwrap();
}

#[test]
fn cancelled_run_sends_neutral_and_skips_the_log() {
    let (mut app, _) = app_with(vec![
        Experiment::new("long", 1, 4).with_step("Hold", 60, 60),
    ]);
    let device = connect_at(&mut app, 60.0);
    let log = MemoryLog::default();

    let handle = app
        .start_run("long", Box::new(log.clone()), EventLog::default())
        .unwrap();
    assert!(wait_until(|| handle.progress().is_running));
    handle.cancel();
    let report = handle.join().unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.elapsed_seconds < 60.0);
    assert_eq!(
        device.written_lines().last().map(String::as_str),
        Some("<peltier 0 0>")
    );
    assert!(log.writes().is_empty());
    assert!(app.is_connected());
}

#[test]
fn unplugging_mid_run_faults_and_requires_reconnect() {
    let (mut app, _) = app_with(vec![
        Experiment::new("long", 1, 4).with_step("Hold", 60, 60),
    ]);
    let device = connect_at(&mut app, 60.0);
    let log = MemoryLog::default();

    let handle = app
        .start_run("long", Box::new(log.clone()), EventLog::default())
        .unwrap();
    assert!(wait_until(|| handle.progress().is_running));
    device.unplug();
    let report = handle.join().unwrap();

    assert_eq!(report.status, RunStatus::Faulted);
    assert_eq!(report.fault, Some(Error::Link(LinkError::Disconnected)));
    assert!(log.writes().is_empty());
    assert!(wait_until(|| app.link_lost()));
    assert!(!app.is_connected());

    // Runs are refused until the operator reconnects.
    assert!(matches!(
        app.start_run("long", Box::new(MemoryLog::default()), EventLog::default()),
        Err(Error::Link(LinkError::Disconnected))
    ));
    connect_at(&mut app, 60.0);
    assert!(!app.link_lost());
    assert!(app.is_connected());
}

#[test]
fn disconnect_during_a_run_stops_it() {
    let (mut app, _) = app_with(vec![
        Experiment::new("long", 1, 4).with_step("Hold", 60, 60),
    ]);
    connect_at(&mut app, 60.0);

    let handle = app
        .start_run("long", Box::new(MemoryLog::default()), EventLog::default())
        .unwrap();
    assert!(wait_until(|| handle.progress().is_running));
    app.disconnect();
    let report = handle.join().unwrap();

    assert!(matches!(report.status, RunStatus::Cancelled | RunStatus::Faulted));
    assert!(!app.is_connected());
}

/// Log sink whose write blows up on the run thread.
struct PanickingLog;

impl RunLogSink for PanickingLog {
    fn write_csv(
        &mut self,
        _run_name: &str,
        _timestamp: DateTime<Local>,
        _rows: &[LogRow],
    ) -> cetus_pcr::error::Result<PathBuf> {
        panic!("log volume vanished");
    }
}

#[test]
fn panicked_run_frees_the_device() {
    let (mut app, _) = app_with(vec![
        Experiment::new("hold", 1, 4).with_step("Hold", 60, 1),
    ]);
    let device = connect_at(&mut app, 60.0);

    let handle = app
        .start_run("hold", Box::new(PanickingLog), EventLog::default())
        .unwrap();
    assert_eq!(handle.join().err(), Some(Error::RunAborted));
    assert!(!app.is_running());

    // The write path is usable again and a new run is accepted.
    app.link_mut().unwrap().send_command("<peltier 0 0>").unwrap();
    assert_eq!(
        device.written_lines().last().map(String::as_str),
        Some("<peltier 0 0>")
    );
    let handle = app
        .start_run("hold", Box::new(MemoryLog::default()), EventLog::default())
        .unwrap();
    assert_eq!(handle.join().unwrap().status, RunStatus::Completed);
}

#[test]
fn runs_are_refused_without_a_usable_experiment_or_link() {
    let (mut app, _) = app_with(vec![
        Experiment::new("hold", 1, 4).with_step("Hold", 60, 1),
        Experiment::new("empty", 1, 4),
    ]);

    assert!(matches!(
        app.start_run("hold", Box::new(MemoryLog::default()), EventLog::default()),
        Err(Error::Link(LinkError::Disconnected))
    ));

    let device = connect_at(&mut app, 60.0);
    assert!(matches!(
        app.start_run("nope", Box::new(MemoryLog::default()), EventLog::default()),
        Err(Error::InvalidExperiment(ExperimentError::NotFound))
    ));
    assert!(matches!(
        app.start_run("empty", Box::new(MemoryLog::default()), EventLog::default()),
        Err(Error::InvalidExperiment(ExperimentError::NoSteps))
    ));
    assert!(!app.is_running());
    assert!(device.written_lines().is_empty());
}

#[test]
fn cooling_finished_notification_is_consumed_once() {
    let (mut app, _) = app_with(Vec::new());
    let device = connect_at(&mut app, 20.0);

    device.send_line("Cooling finished");
    assert!(wait_until(|| app.telemetry().cooling_complete_signal));
    assert!(app.take_cooling_complete());
    assert!(!app.take_cooling_complete());
}
