//! Telemetry shared between the monitor thread and the control loop.
//!
//! Single writer (the [`monitor`]), many readers (cycle controller, run
//! log, presentation layer).  The two temperatures sit behind one lock so
//! a reader never sees a half-applied update; the signal flags are
//! independent atomics.

pub mod monitor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// A point-in-time copy of the device telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySample {
    /// Block/sample temperature (°C).
    pub sample_temperature: f64,
    /// Heated lid temperature (°C).
    pub lid_temperature: f64,
    /// The device consumed the last actuator command.
    pub ready_for_next_step: bool,
    /// The device reported the end of its cooling routine.
    pub cooling_complete_signal: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Temperatures {
    sample: f64,
    lid: f64,
}

/// Latest telemetry plus the device signals.
#[derive(Debug, Default)]
pub struct SharedTelemetry {
    temperatures: Mutex<Temperatures>,
    ready_for_next_step: AtomicBool,
    cooling_complete: AtomicBool,
    link_lost: AtomicBool,
}

impl SharedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Writer side (telemetry monitor) ──────────────────────

    pub fn set_sample_temperature(&self, celsius: f64) {
        self.lock().sample = celsius;
    }

    pub fn set_lid_temperature(&self, celsius: f64) {
        self.lock().lid = celsius;
    }

    pub fn signal_ready(&self) {
        self.ready_for_next_step.store(true, Ordering::Release);
    }

    pub fn signal_cooling_complete(&self) {
        self.cooling_complete.store(true, Ordering::Release);
    }

    /// Raise the "link lost, reconnect required" flag.
    pub fn mark_link_lost(&self) {
        self.link_lost.store(true, Ordering::Release);
    }

    // ── Reader side ──────────────────────────────────────────

    pub fn snapshot(&self) -> TelemetrySample {
        let t = *self.lock();
        TelemetrySample {
            sample_temperature: t.sample,
            lid_temperature: t.lid,
            ready_for_next_step: self.ready_for_next_step.load(Ordering::Acquire),
            cooling_complete_signal: self.cooling_complete.load(Ordering::Acquire),
        }
    }

    pub fn sample_temperature(&self) -> f64 {
        self.lock().sample
    }

    /// Consume the ready signal.  Returns whether it was set.
    pub fn take_ready(&self) -> bool {
        self.ready_for_next_step.swap(false, Ordering::AcqRel)
    }

    /// Consume the cooling-complete signal.  Returns whether it was set.
    pub fn take_cooling_complete(&self) -> bool {
        self.cooling_complete.swap(false, Ordering::AcqRel)
    }

    pub fn is_link_lost(&self) -> bool {
        self.link_lost.load(Ordering::Acquire)
    }

    /// Clear all signals before a new connection.
    pub fn reset_signals(&self) {
        self.ready_for_next_step.store(false, Ordering::Release);
        self.cooling_complete.store(false, Ordering::Release);
        self.link_lost.store(false, Ordering::Release);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Temperatures> {
        // Plain values, always consistent; a panicked writer cannot leave
        // them half-updated.
        self.temperatures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
