//! Fuzz target: `parse_line`
//!
//! Any UTF-8 line must parse without panicking, and every temperature it
//! extracts must be finite.
//!
//! cargo fuzz run fuzz_telemetry_parse

#![no_main]

use cetus_pcr::link::codec::{TelemetryEvent, parse_line};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|line: &str| {
    let parsed = parse_line(line);
    for event in &parsed.events {
        match *event {
            TelemetryEvent::SampleTemperature(c) | TelemetryEvent::LidTemperature(c) => {
                assert!(c.is_finite());
            }
            TelemetryEvent::ReadyForNextStep | TelemetryEvent::CoolingFinished => {}
        }
    }
});
