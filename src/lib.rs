//! Cetus PCR host controller library.
//!
//! Drives a Peltier-based thermal cycler over a USB serial link: finds and
//! handshakes the device, mirrors its telemetry, runs experiments through a
//! PID loop with ready-gated commands and tolerance-stretched steps, and
//! records each completed run to CSV.
//!
//! The pure-logic modules (`experiment`, `control`, `fsm`, `link::codec`)
//! are exposed for integration testing against simulated devices.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod experiment;
pub mod fsm;
pub mod link;
pub mod run_log;
pub mod telemetry;

pub use error::{Error, Result};
