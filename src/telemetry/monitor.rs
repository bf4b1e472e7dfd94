//! Telemetry monitor: the serial reader thread.
//!
//! One iteration per received line for the lifetime of the connection:
//!
//! ```text
//!  read_line ──▶ parse_line ──▶ SharedTelemetry
//!      │                          (sample, lid, ready, cooling)
//!      └── LinkError ──▶ link_lost + CancelToken::cancel()
//!          (raised by either link half)
//! ```
//!
//! The blocking read is bounded by the link's read timeout, so the loop
//! notices an external disconnect within one timeout.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info, warn};

use crate::control::CancelToken;
use crate::error::{Error, LinkError};
use crate::link::LinkReader;
use crate::link::codec::{TelemetryEvent, parse_line};

use super::SharedTelemetry;

/// Why the monitor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The link was torn down from outside.
    Disconnected,
    /// The transport failed; the link was marked lost.
    LinkLost(Error),
}

/// Reader loop state.
pub struct TelemetryMonitor {
    reader: LinkReader,
    telemetry: Arc<SharedTelemetry>,
    cancel: CancelToken,
    lines: u64,
}

impl TelemetryMonitor {
    pub fn new(reader: LinkReader, telemetry: Arc<SharedTelemetry>, cancel: CancelToken) -> Self {
        Self {
            reader,
            telemetry,
            cancel,
            lines: 0,
        }
    }

    /// Spawn the loop on a dedicated named thread.
    pub fn spawn(self) -> io::Result<MonitorHandle> {
        let join = thread::Builder::new()
            .name("telemetry-monitor".into())
            .spawn(move || self.run())?;
        Ok(MonitorHandle { join })
    }

    /// Run until the link is disconnected or lost.
    pub fn run(mut self) -> MonitorExit {
        info!("SM: serial monitor started");
        while self.reader.is_connected() {
            match self.reader.read_line() {
                Ok(Some(line)) => self.handle_line(&line),
                Ok(None) => {}
                Err(e) if self.reader.transport_failed() => return self.on_link_lost(e),
                Err(_) => break,
            }
        }
        if self.reader.transport_failed() {
            // The write half saw the failure and cleared `connected` first.
            return self.on_link_lost(LinkError::Disconnected.into());
        }
        info!("SM: serial monitor stopped after {} lines", self.lines);
        MonitorExit::Disconnected
    }

    /// Apply one line to the shared telemetry.
    pub fn handle_line(&mut self, line: &str) {
        self.lines += 1;
        let line = line.trim();
        let parsed = parse_line(line);

        for event in &parsed.events {
            match *event {
                TelemetryEvent::SampleTemperature(c) => self.telemetry.set_sample_temperature(c),
                TelemetryEvent::LidTemperature(c) => self.telemetry.set_lid_temperature(c),
                TelemetryEvent::ReadyForNextStep => self.telemetry.signal_ready(),
                TelemetryEvent::CoolingFinished => {
                    info!("SM: cooling routine finished");
                    self.telemetry.signal_cooling_complete();
                }
            }
        }
        if parsed.malformed {
            warn!("SM: unparsable telemetry {line:?}");
        }
        if parsed.informational {
            info!("(SM) {line:?}");
        }
    }

    fn on_link_lost(&self, e: Error) -> MonitorExit {
        error!("SM: device link lost ({e}); reconnect required");
        self.telemetry.mark_link_lost();
        self.cancel.cancel();
        MonitorExit::LinkLost(e)
    }
}

/// Join handle for a running monitor.
pub struct MonitorHandle {
    join: JoinHandle<MonitorExit>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to end.  The caller must first disconnect the
    /// link (or the device must drop it), otherwise this blocks.
    pub fn join(self) -> MonitorExit {
        match self.join.join() {
            Ok(exit) => exit,
            Err(_) => {
                error!("SM: monitor thread panicked");
                MonitorExit::Disconnected
            }
        }
    }
}
