//! System configuration parameters
//!
//! All tunable parameters for the Cetus PCR controller, read once at
//! startup from `settings.json` and injected into the link and the cycle
//! controller as plain values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Literal the device prints once its firmware is ready.
pub const DEFAULT_HANDSHAKE: &str = "Cetus is ready.";

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Process constants (original key names) ---
    /// Target temperature of the cooling routine (°C)
    #[serde(rename = "COOLING_TEMP_C")]
    pub cooling_temp_c: i32,
    /// Proportional gain
    #[serde(rename = "KP")]
    pub kp: f64,
    /// Integral gain
    #[serde(rename = "KI")]
    pub ki: f64,
    /// Derivative gain
    #[serde(rename = "KD")]
    pub kd: f64,
    /// Half-width of the "at target" band around the setpoint (°C)
    #[serde(rename = "TOLERANCE")]
    pub tolerance_c: f64,

    // --- Serial link ---
    pub baud_rate: u32,
    /// Blocking read timeout (milliseconds)
    pub read_timeout_ms: u64,
    /// Delay between opening a port and reading the handshake (milliseconds)
    pub settle_ms: u64,
    /// Ready literal expected from the device
    pub handshake: String,
    /// Substring matched against the port description; empty = any port
    pub port_filter: String,

    // --- Control loop ---
    /// Controller polling interval (milliseconds)
    pub poll_interval_ms: u64,
    /// Absolute actuator output limit (PWM magnitude)
    pub output_limit: u8,

    // --- Files ---
    pub experiments_path: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            cooling_temp_c: 4,
            kp: 8.0,
            ki: 0.2,
            kd: 1.0,
            tolerance_c: 1.0,

            baud_rate: 9600,
            read_timeout_ms: 1000,
            settle_ms: 2000,
            handshake: DEFAULT_HANDSHAKE.to_string(),
            port_filter: String::new(),

            poll_interval_ms: 100, // 10 Hz
            output_limit: 255,

            experiments_path: PathBuf::from("experiments.json"),
            log_dir: PathBuf::from("experiment logs"),
        }
    }
}

impl SystemConfig {
    /// Load and validate the settings file.
    ///
    /// A missing file yields [`SystemConfig::default`]; malformed JSON and
    /// out-of-range values are rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} not found, using default settings", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self =
            serde_json::from_str(&text).map_err(|_| Error::Config("settings file is not valid JSON"))?;
        config.validate()?;
        info!("Settings loaded from {}", path.display());
        Ok(config)
    }

    /// Reject values the controller cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance_c > 0.0) {
            return Err(Error::Config("TOLERANCE must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive"));
        }
        if self.output_limit == 0 {
            return Err(Error::Config("output_limit must be in 1..=255"));
        }
        if self.read_timeout_ms == 0 {
            return Err(Error::Config("read_timeout_ms must be positive"));
        }
        if self.baud_rate == 0 {
            return Err(Error::Config("baud_rate must be positive"));
        }
        if !(self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()) {
            return Err(Error::Config("PID gains must be finite"));
        }
        Ok(())
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            port_filter: self.port_filter.clone(),
            handshake: self.handshake.clone(),
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }

    pub fn control_settings(&self) -> ControlSettings {
        ControlSettings {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
            tolerance_c: self.tolerance_c,
            output_limit: f64::from(self.output_limit),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// Parameters for [`DeviceLink::connect`](crate::link::DeviceLink::connect).
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub port_filter: String,
    pub handshake: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub settle: Duration,
}

/// Parameters injected into the cycle controller.
#[derive(Debug, Clone, Copy)]
pub struct ControlSettings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub tolerance_c: f64,
    pub output_limit: f64,
    pub poll_interval: Duration,
}

impl Default for ControlSettings {
    fn default() -> Self {
        SystemConfig::default().control_settings()
    }
}
