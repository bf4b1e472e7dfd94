//! Serial port adapter.
//!
//! Implements [`PortOpener`] with the `serialport` crate.  Port
//! descriptions are built from the USB manufacturer and product strings,
//! which is what the device link filters on.

use std::io;
use std::time::Duration;

use serialport::{SerialPortInfo, SerialPortType};

use crate::link::transport::{PortInfo, PortOpener, Transport};

/// The host's real serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl SystemPorts {
    pub fn new() -> Self {
        Self
    }
}

impl PortOpener for SystemPorts {
    fn available_ports(&self) -> io::Result<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = serialport::available_ports()?
            .into_iter()
            .map(describe)
            .collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ports)
    }

    fn open(&self, port: &str, baud_rate: u32, timeout: Duration) -> io::Result<Box<dyn Transport>> {
        let port = serialport::new(port, baud_rate).timeout(timeout).open()?;
        Ok(Box::new(port))
    }
}

fn describe(p: SerialPortInfo) -> PortInfo {
    let description = match p.port_type {
        SerialPortType::UsbPort(info) => {
            let parts: Vec<String> = [info.manufacturer, info.product]
                .into_iter()
                .flatten()
                .collect();
            if parts.is_empty() {
                "USB Serial".to_string()
            } else {
                parts.join(" ")
            }
        }
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::Unknown => String::new(),
    };
    PortInfo {
        name: p.port_name,
        description,
    }
}
