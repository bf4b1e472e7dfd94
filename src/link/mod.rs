//! Device link: owns the serial channel to the Cetus PCR.
//!
//! ```text
//!                 ┌──────────────┐   read_line()   ┌──────────────────┐
//!   transport ───▶│  LinkReader  │────────────────▶│ TelemetryMonitor │
//!      │          └──────────────┘                 └──────────────────┘
//!      │ try_clone
//!      ▼          ┌──────────────┐  send_command() ┌──────────────────┐
//!   transport ◀───│  LinkWriter  │◀────────────────│ CycleController  │
//!                 └──────────────┘                 └──────────────────┘
//! ```
//!
//! The reader and writer are two handles on the same port so the blocking
//! read never stalls the control loop.  Both share one `connected` flag;
//! whichever side sees the transport fail clears it and raises the shared
//! `failed` flag, which tells the monitor the link was lost rather than
//! closed.

pub mod codec;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use log::{debug, info, warn};

use crate::config::LinkSettings;
use crate::error::{Error, LinkError, Result};
use codec::{LineDecoder, encode_command};
use transport::{PortOpener, Transport, is_timeout};

const READ_BUF_SIZE: usize = 256;

// ---------------------------------------------------------------------------
// Link state
// ---------------------------------------------------------------------------

/// Observable link state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkState {
    pub connected: bool,
    pub port_identifier: Option<String>,
    pub last_error: Option<Error>,
}

// ---------------------------------------------------------------------------
// Reader half
// ---------------------------------------------------------------------------

/// Receiving half: turns raw bytes into lines.
pub struct LinkReader {
    transport: Box<dyn Transport>,
    decoder: LineDecoder,
    connected: Arc<AtomicBool>,
    /// Set by either half when the transport fails (as opposed to an
    /// external disconnect).
    failed: Arc<AtomicBool>,
}

impl LinkReader {
    fn new(transport: Box<dyn Transport>, connected: Arc<AtomicBool>, failed: Arc<AtomicBool>) -> Self {
        Self {
            transport,
            decoder: LineDecoder::new(),
            connected,
            failed,
        }
    }

    /// Block until a full line is available or the read timeout elapses.
    ///
    /// Returns `Ok(None)` on timeout.  A transport failure marks the link
    /// disconnected and returns [`LinkError`].
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            if let Some(line) = self.decoder.next_line() {
                return Ok(Some(line));
            }
            if !self.is_connected() {
                return Err(LinkError::Disconnected.into());
            }
            match self.transport.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => self.decoder.feed(&buf[..n]),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => {
                    self.failed.store(true, Ordering::Release);
                    self.connected.store(false, Ordering::Release);
                    return Err(LinkError::from_io(&e).into());
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether the transport itself failed under either half.
    pub fn transport_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Writer half
// ---------------------------------------------------------------------------

/// Sending half: frames and writes commands.
pub struct LinkWriter {
    transport: Box<dyn Transport>,
    connected: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl LinkWriter {
    /// Write one command terminated by CRLF.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(LinkError::Disconnected.into());
        }
        debug!("LINK >> {command}");
        let frame = encode_command(command);
        let result = self
            .transport
            .write_all(&frame)
            .and_then(|()| self.transport.flush());
        result.map_err(|e| {
            warn!("LINK: write failed: {e}");
            self.failed.store(true, Ordering::Release);
            self.connected.store(false, Ordering::Release);
            Error::from(LinkError::from_io(&e))
        })
    }
}

// ---------------------------------------------------------------------------
// DeviceLink
// ---------------------------------------------------------------------------

/// Owns both halves of the serial channel and the connect/disconnect
/// lifecycle.
pub struct DeviceLink {
    port_identifier: String,
    connected: Arc<AtomicBool>,
    reader: Option<LinkReader>,
    writer: Arc<Mutex<LinkWriter>>,
    last_error: Option<Error>,
}

impl DeviceLink {
    /// Probe every available port until one answers with the handshake.
    ///
    /// Ports whose description does not contain `settings.port_filter`
    /// are skipped.  Fails fast with [`Error::NoDeviceFound`] when no port
    /// is present at all.
    pub fn connect(opener: &dyn PortOpener, settings: &LinkSettings) -> Result<Self> {
        let ports = opener.available_ports().map_err(|e| {
            warn!("LINK: port enumeration failed: {e}");
            Error::NoDeviceFound
        })?;
        if ports.is_empty() {
            info!("LINK: no serial ports present");
            return Err(Error::NoDeviceFound);
        }

        let mut saw_mismatch = false;
        for port in ports
            .iter()
            .filter(|p| p.description.contains(settings.port_filter.as_str()))
        {
            let transport = match opener.open(&port.name, settings.baud_rate, settings.read_timeout) {
                Ok(t) => t,
                Err(e) => {
                    warn!("LINK: cannot open {}: {e}", port.name);
                    continue;
                }
            };
            match Self::handshake(transport, &port.name, settings) {
                Ok(link) => return Ok(link),
                Err(Error::HandshakeMismatch) => saw_mismatch = true,
                Err(e) => warn!("LINK: {} failed during handshake: {e}", port.name),
            }
        }

        if saw_mismatch {
            Err(Error::HandshakeMismatch)
        } else {
            Err(Error::NoDeviceFound)
        }
    }

    /// Wrap an already-open transport, waiting for the ready literal.
    pub fn handshake(
        transport: Box<dyn Transport>,
        port: &str,
        settings: &LinkSettings,
    ) -> Result<Self> {
        let writer_transport = transport
            .try_clone()
            .map_err(|e| Error::from(LinkError::from_io(&e)))?;
        let connected = Arc::new(AtomicBool::new(true));
        let failed = Arc::new(AtomicBool::new(false));
        let mut reader = LinkReader::new(transport, Arc::clone(&connected), Arc::clone(&failed));

        if !settings.settle.is_zero() {
            std::thread::sleep(settings.settle);
        }
        let greeting = reader.read_line()?;
        if greeting.as_deref().map(str::trim) != Some(settings.handshake.as_str()) {
            info!("LINK: {port} answered {greeting:?}, expected {:?}", settings.handshake);
            connected.store(false, Ordering::Release);
            return Err(Error::HandshakeMismatch);
        }

        info!("LINK: connected to Cetus PCR on {port}");
        Ok(Self {
            port_identifier: port.to_string(),
            writer: Arc::new(Mutex::new(LinkWriter {
                transport: writer_transport,
                connected: Arc::clone(&connected),
                failed,
            })),
            connected,
            reader: Some(reader),
            last_error: None,
        })
    }

    /// Send one command.  Fails with [`LinkError::Busy`] while a run owns
    /// the write half.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        let result = match self.writer.try_lock() {
            Ok(mut w) => w.send_command(command),
            Err(TryLockError::WouldBlock) => Err(LinkError::Busy.into()),
            Err(TryLockError::Poisoned(p)) => p.into_inner().send_command(command),
        };
        self.record(result)
    }

    /// Read one line directly.  Only available while the reader has not
    /// been handed to a telemetry monitor.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let result = match self.reader.as_mut() {
            Some(r) => r.read_line(),
            None => Err(LinkError::Busy.into()),
        };
        self.record(result)
    }

    /// Hand the receiving half to a monitor.
    pub fn take_reader(&mut self) -> Option<LinkReader> {
        self.reader.take()
    }

    /// Shared handle on the sending half.  Holding its lock gives the
    /// holder exclusive use of the write path.
    pub fn writer(&self) -> Arc<Mutex<LinkWriter>> {
        Arc::clone(&self.writer)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Mark the link disconnected.  A monitor holding the reader stops
    /// at its next read timeout.
    pub fn disconnect(&mut self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("LINK: disconnected from {}", self.port_identifier);
        }
        self.reader = None;
    }

    pub fn state(&self) -> LinkState {
        let connected = self.is_connected();
        LinkState {
            connected,
            port_identifier: connected.then(|| self.port_identifier.clone()),
            last_error: self.last_error,
        }
    }

    pub fn port_identifier(&self) -> &str {
        &self.port_identifier
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(*e);
        }
        result
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::Release);
    }
}
