//! Application context: the explicit owner of everything shared.
//!
//! [`AppContext`] owns the configuration, the experiment list, the device
//! link, the telemetry monitor, and the cancellation token.  Presentation
//! layers (the CLI, a future GUI) hold one `AppContext` and drive it; no
//! component reaches for process-wide state.
//!
//! ```text
//!  PortOpener ──▶ ┌──────────────────────────┐ ──▶ RunHandle (thread)
//!                 │        AppContext        │       CycleController
//!  Experiment- ◀─▶│ link · monitor · cancel  │         ▲ writer lock
//!  Store          │ experiments · telemetry  │         │
//!                 └──────────────────────────┘ ──▶ TelemetryMonitor (thread)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{error, info, warn};

use crate::adapters::time::SystemClock;
use crate::config::SystemConfig;
use crate::control::CancelToken;
use crate::control::cycle::{CycleController, RunReport};
use crate::error::{Error, ExperimentError, LinkError, Result};
use crate::experiment::{Experiment, capitalize};
use crate::fsm::context::RunState;
use crate::link::transport::PortOpener;
use crate::link::{DeviceLink, LinkState};
use crate::telemetry::monitor::{MonitorHandle, TelemetryMonitor};
use crate::telemetry::{SharedTelemetry, TelemetrySample};

use super::events::RunEvent;
use super::ports::{Clock, EventSink, ExperimentStore, RunLogSink};

// ───────────────────────────────────────────────────────────────
// RunHandle
// ───────────────────────────────────────────────────────────────

/// Handle on a run executing on its own thread.
pub struct RunHandle {
    cancel: CancelToken,
    progress: Arc<Mutex<RunState>>,
    join: JoinHandle<Result<RunReport>>,
}

impl RunHandle {
    /// Ask the run to stop.  The controller notices on its next tick,
    /// de-energises the element and ends in `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest progress published by the controller.
    pub fn progress(&self) -> RunState {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end and return its report.
    pub fn join(self) -> Result<RunReport> {
        self.join.join().unwrap_or_else(|_| {
            error!("APP: run thread panicked");
            Err(Error::RunAborted)
        })
    }
}

/// Clears the run-active flag when the run thread ends, however it ends.
struct ActiveRun(Arc<AtomicBool>);

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Forwards events and mirrors `Progress` into the handle's slot.
struct ProgressTap<E> {
    inner: E,
    progress: Arc<Mutex<RunState>>,
}

impl<E: EventSink> EventSink for ProgressTap<E> {
    fn emit(&mut self, event: &RunEvent) {
        if let RunEvent::Progress(state) = event {
            *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        }
        self.inner.emit(event);
    }
}

// ───────────────────────────────────────────────────────────────
// AppContext
// ───────────────────────────────────────────────────────────────

pub struct AppContext {
    config: SystemConfig,
    store: Box<dyn ExperimentStore>,
    experiments: Vec<Experiment>,
    link: Option<DeviceLink>,
    monitor: Option<MonitorHandle>,
    telemetry: Arc<SharedTelemetry>,
    cancel: CancelToken,
    run_active: Arc<AtomicBool>,
}

impl AppContext {
    /// Build the context and load the saved experiments.
    pub fn new(config: SystemConfig, store: Box<dyn ExperimentStore>) -> Result<Self> {
        let experiments = store.load()?;
        info!("APP: {} experiment(s) loaded", experiments.len());
        Ok(Self {
            config,
            store,
            experiments,
            link: None,
            monitor: None,
            telemetry: Arc::new(SharedTelemetry::new()),
            cancel: CancelToken::new(),
            run_active: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    // ── Experiment list ───────────────────────────────────────

    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    /// First experiment called `name` (names are matched after the same
    /// capitalisation [`Experiment::new`] applies).
    pub fn experiment(&self, name: &str) -> Option<&Experiment> {
        let wanted = capitalize(name);
        self.experiments.iter().find(|e| e.name == wanted)
    }

    pub fn add_experiment(&mut self, experiment: Experiment) {
        info!("APP: added experiment {:?}", experiment.name);
        self.experiments.push(experiment);
    }

    /// Remove the first experiment called `name`.
    pub fn remove_experiment(&mut self, name: &str) -> Option<Experiment> {
        let wanted = capitalize(name);
        let idx = self.experiments.iter().position(|e| e.name == wanted)?;
        Some(self.experiments.remove(idx))
    }

    /// Persist the list.  A failure leaves the in-memory list as it is.
    pub fn save(&self) -> Result<()> {
        self.store.save(&self.experiments).inspect_err(|e| {
            warn!("APP: experiments not saved: {e}");
        })
    }

    // ── Device link ───────────────────────────────────────────

    /// Find the device, handshake, and start the telemetry monitor.
    /// Replaces any previous connection.  Refused while a run is active.
    pub fn connect(&mut self, opener: &dyn PortOpener) -> Result<LinkState> {
        if self.is_running() {
            return Err(LinkError::Busy.into());
        }
        self.disconnect();

        let mut link = DeviceLink::connect(opener, &self.config.link_settings())?;
        self.telemetry.reset_signals();
        self.cancel.reset();

        let reader = link.take_reader().ok_or(Error::Link(LinkError::Busy))?;
        let monitor = TelemetryMonitor::new(reader, Arc::clone(&self.telemetry), self.cancel.clone())
            .spawn()
            .map_err(|e| Error::Link(LinkError::from_io(&e)))?;

        let state = link.state();
        self.link = Some(link);
        self.monitor = Some(monitor);
        Ok(state)
    }

    /// Tear down the link and wait for the monitor thread to exit.  An
    /// active run is cancelled.
    pub fn disconnect(&mut self) {
        if self.is_running() {
            warn!("APP: disconnecting during a run; cancelling it");
            self.cancel.cancel();
        }
        if let Some(mut link) = self.link.take() {
            link.disconnect();
        }
        if let Some(monitor) = self.monitor.take() {
            let exit = monitor.join();
            info!("APP: monitor exited: {exit:?}");
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link.as_ref().map(DeviceLink::state).unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(DeviceLink::is_connected) && !self.link_lost()
    }

    /// The monitor saw the transport fail; the operator must reconnect.
    pub fn link_lost(&self) -> bool {
        self.telemetry.is_link_lost()
    }

    /// Mutable access to the link for manual commands between runs.
    pub fn link_mut(&mut self) -> Option<&mut DeviceLink> {
        self.link.as_mut()
    }

    // ── Telemetry ─────────────────────────────────────────────

    pub fn telemetry(&self) -> TelemetrySample {
        self.telemetry.snapshot()
    }

    /// Consume the device's "cooling finished" notification.
    pub fn take_cooling_complete(&self) -> bool {
        self.telemetry.take_cooling_complete()
    }

    // ── Runs ──────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.run_active.load(Ordering::Acquire)
    }

    /// Start the experiment called `name` on a background thread.
    pub fn start_run(
        &mut self,
        name: &str,
        log_sink: Box<dyn RunLogSink + Send>,
        events: impl EventSink + Send + 'static,
    ) -> Result<RunHandle> {
        let experiment = self
            .experiment(name)
            .cloned()
            .ok_or(ExperimentError::NotFound)?;
        self.spawn_run(experiment, SystemClock::new(), log_sink, events)
    }

    /// Drive the block to the configured cooling temperature.
    pub fn start_cooling(
        &mut self,
        log_sink: Box<dyn RunLogSink + Send>,
        events: impl EventSink + Send + 'static,
    ) -> Result<RunHandle> {
        let experiment = Experiment::cooling(self.config.cooling_temp_c);
        self.spawn_run(experiment, SystemClock::new(), log_sink, events)
    }

    /// Start `experiment` with an explicit clock.
    ///
    /// The run thread holds the link's writer lock until it ends, so no
    /// other command can reach the device meanwhile.
    pub fn spawn_run<C>(
        &mut self,
        experiment: Experiment,
        clock: C,
        mut log_sink: Box<dyn RunLogSink + Send>,
        events: impl EventSink + Send + 'static,
    ) -> Result<RunHandle>
    where
        C: Clock + Send + 'static,
    {
        experiment.validate()?;
        if self.is_running() {
            return Err(LinkError::Busy.into());
        }
        if !self.is_connected() {
            return Err(LinkError::Disconnected.into());
        }
        let writer = self
            .link
            .as_ref()
            .map(DeviceLink::writer)
            .ok_or(Error::Link(LinkError::Disconnected))?;

        self.cancel.reset();
        let progress = Arc::new(Mutex::new(RunState::default()));
        let mut tap = ProgressTap {
            inner: events,
            progress: Arc::clone(&progress),
        };
        let mut controller = CycleController::new(
            self.config.control_settings(),
            Arc::clone(&self.telemetry),
            self.cancel.clone(),
        );
        let active = Arc::clone(&self.run_active);
        active.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("cycle-controller".into())
            .spawn(move || {
                let _active = ActiveRun(active);
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                controller.run(&experiment, &clock, &mut *writer, log_sink.as_mut(), &mut tap)
            });
        match spawned {
            Ok(join) => Ok(RunHandle {
                cancel: self.cancel.clone(),
                progress,
                join,
            }),
            Err(e) => {
                self.run_active.store(false, Ordering::Release);
                Err(LinkError::from_io(&e).into())
            }
        }
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.disconnect();
    }
}
