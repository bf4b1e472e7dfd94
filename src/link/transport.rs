//! Transport abstraction: any byte-oriented serial channel.
//!
//! Concrete implementations:
//! - `Box<dyn serialport::SerialPort>` (USB CDC on the Arduino)
//! - in-memory scripted devices in the test suite
//!
//! The device link is generic over `Transport`, so a simulated device
//! requires zero changes to the link or monitor logic.

use std::io::{self, Read, Write};
use std::time::Duration;

/// Byte-oriented transport channel.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes into `buf`, blocking for at most the
    /// transport's read timeout.  A timeout surfaces as
    /// `io::ErrorKind::TimedOut` or `Ok(0)`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data` to the transport.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush any buffered output.
    fn flush(&mut self) -> io::Result<()>;

    /// Open a second handle on the same channel, so reads and writes can
    /// live on different threads.
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

impl Transport for Box<dyn serialport::SerialPort> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(self, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port = serialport::SerialPort::try_clone(self.as_ref())?;
        Ok(Box::new(port))
    }
}

/// An available serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS identifier, e.g. `/dev/ttyACM0` or `COM3`.
    pub name: String,
    /// Human-readable description (USB manufacturer/product when known).
    pub description: String,
}

/// Enumerates and opens serial ports.
pub trait PortOpener {
    fn available_ports(&self) -> io::Result<Vec<PortInfo>>;

    fn open(&self, port: &str, baud_rate: u32, timeout: Duration) -> io::Result<Box<dyn Transport>>;
}

/// Whether a read error only means "nothing arrived in time".
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
