//! Line codec for the Cetus serial protocol.
//!
//! Wire format:
//! ```text
//! host   ──▶ device   <peltier {0|1} {0-255}>\r\n
//! device ──▶ host     tempSample 94.5\r\n
//!                     tempLid 105.0\r\n
//!                     nextpls\r\n
//!                     Cooling finished\r\n
//! ```
//!
//! Inbound lines are matched by substring, not strictly framed.  The
//! decoder accumulates incoming bytes and yields complete lines; a single
//! transport read may return part of a line or several lines at once.

use std::collections::VecDeque;

use core::fmt;

use log::warn;

/// Maximum line length (protects against a device streaming garbage
/// without terminators).
pub const MAX_LINE_LEN: usize = 256;

/// Maximum number of events a single line can carry.
const MAX_EVENTS_PER_LINE: usize = 4;

pub const SAMPLE_MARKER: &str = "tempSample";
pub const LID_MARKER: &str = "tempLid";
pub const READY_SENTINEL: &str = "nextpls";
pub const COOLING_FINISHED_MARKER: &str = "Cooling finished";

// ---------------------------------------------------------------------------
// Outbound: actuator command
// ---------------------------------------------------------------------------

/// Peltier polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Polarity {
    Heating = 0,
    Cooling = 1,
}

/// A direction + magnitude instruction for the heating/cooling element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub polarity: Polarity,
    pub magnitude: u8,
}

impl ActuatorCommand {
    /// Element off.
    pub const NEUTRAL: Self = Self {
        polarity: Polarity::Heating,
        magnitude: 0,
    };

    /// Map a signed controller output to a command.  Non-negative output
    /// heats, negative output cools; the magnitude is truncated toward zero
    /// and clamped to `limit` (itself at most 255).
    pub fn from_output(output: f64, limit: f64) -> Self {
        let limit = limit.clamp(0.0, 255.0);
        let polarity = if output < 0.0 {
            Polarity::Cooling
        } else {
            Polarity::Heating
        };
        let magnitude = if output.is_finite() {
            output.abs().min(limit).trunc() as u8
        } else {
            0
        };
        Self { polarity, magnitude }
    }

    pub fn is_neutral(&self) -> bool {
        self.magnitude == 0
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<peltier {} {}>", self.polarity as u8, self.magnitude)
    }
}

/// Frame a command string for transmission.
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.len() + 2);
    out.extend_from_slice(command.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

// ---------------------------------------------------------------------------
// Inbound: line decoder
// ---------------------------------------------------------------------------

/// Streaming line decoder.
pub struct LineDecoder {
    buf: heapless::Vec<u8, MAX_LINE_LEN>,
    /// Set while skipping the remainder of an over-long line.
    discarding: bool,
    ready: VecDeque<String>,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            discarding: false,
            ready: VecDeque::new(),
        }
    }

    /// Feed bytes into the decoder.  Completed lines are queued for
    /// [`next_line`](Self::next_line).
    pub fn feed(&mut self, data: &[u8]) {
        for &b in data {
            if b == b'\n' {
                if !self.discarding {
                    let line = String::from_utf8_lossy(&self.buf);
                    self.ready.push_back(line.trim_end_matches('\r').to_string());
                }
                self.buf.clear();
                self.discarding = false;
            } else if !self.discarding && self.buf.push(b).is_err() {
                warn!("LINK: line exceeds {MAX_LINE_LEN} bytes, discarding");
                self.buf.clear();
                self.discarding = true;
            }
        }
    }

    /// Pop the oldest complete line, if any.
    pub fn next_line(&mut self) -> Option<String> {
        self.ready.pop_front()
    }
}

// ---------------------------------------------------------------------------
// Inbound: telemetry parsing
// ---------------------------------------------------------------------------

/// A typed event extracted from one device line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryEvent {
    SampleTemperature(f64),
    LidTemperature(f64),
    ReadyForNextStep,
    CoolingFinished,
}

/// Result of parsing one trimmed line.
#[derive(Debug, Clone, Default)]
pub struct ParsedLine {
    pub events: heapless::Vec<TelemetryEvent, MAX_EVENTS_PER_LINE>,
    /// The line mentions heating or cooling and should be echoed to the log.
    pub informational: bool,
    /// A marker was present but its numeric payload did not parse.
    pub malformed: bool,
}

/// Parse one line (already stripped of its terminator).
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim();
    let mut parsed = ParsedLine::default();

    if line.contains(SAMPLE_MARKER) {
        match marker_value(line, SAMPLE_MARKER) {
            Some(v) => push_event(&mut parsed, TelemetryEvent::SampleTemperature(v)),
            None => parsed.malformed = true,
        }
    }
    if line.contains(LID_MARKER) {
        match marker_value(line, LID_MARKER) {
            Some(v) => push_event(&mut parsed, TelemetryEvent::LidTemperature(v)),
            None => parsed.malformed = true,
        }
    }

    if line == READY_SENTINEL {
        push_event(&mut parsed, TelemetryEvent::ReadyForNextStep);
    }
    if line.contains(COOLING_FINISHED_MARKER) {
        push_event(&mut parsed, TelemetryEvent::CoolingFinished);
    }
    parsed.informational = line.contains("Heat") || line.contains("Cooling");

    parsed
}

fn push_event(parsed: &mut ParsedLine, event: TelemetryEvent) {
    // Capacity matches the number of distinct markers.
    let _ = parsed.events.push(event);
}

/// The first whitespace-separated token after `marker`, as a float.
fn marker_value(line: &str, marker: &str) -> Option<f64> {
    let idx = line.find(marker)?;
    line[idx + marker.len()..]
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}
