//! Closed-loop temperature control.

pub mod cycle;
pub mod pid;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag.
///
/// Set by the presentation layer or by the telemetry monitor on link
/// loss; polled (never forced) by the cycle controller once per tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Re-arm before a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}
