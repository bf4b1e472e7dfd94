//! Unified error types for the Cetus PCR controller.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! application context's error handling uniform.  All variants are `Copy`
//! so they can be stored in link state, run reports, and events without
//! allocation.

use core::fmt;
use std::io;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No serial port is present, or none matched the configured filter.
    NoDeviceFound,
    /// A port opened but the device did not send the ready literal.
    HandshakeMismatch,
    /// Mid-session transport failure.
    Link(LinkError),
    /// Persistence I/O was refused by the operating system.
    PermissionDenied,
    /// The experiment cannot be run as defined.
    InvalidExperiment(ExperimentError),
    /// Any other persistence failure.
    Storage(StorageError),
    /// Configuration is invalid or could not be parsed.
    Config(&'static str),
    /// The run thread panicked before producing a report.
    RunAborted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDeviceFound => write!(f, "no Cetus PCR device found"),
            Self::HandshakeMismatch => write!(f, "device did not complete the ready handshake"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::InvalidExperiment(e) => write!(f, "invalid experiment: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::RunAborted => write!(f, "run aborted unexpectedly"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            kind => Self::Storage(StorageError::Io(kind)),
        }
    }
}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The link is not connected (never opened, torn down, or lost).
    Disconnected,
    /// The write half is owned by an active run.
    Busy,
    /// The transport reported an I/O failure.
    Io(io::ErrorKind),
}

impl LinkError {
    /// Classify a transport error.  Timeouts are not link errors; callers
    /// filter them out before converting.
    pub fn from_io(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotFound => Self::Disconnected,
            kind => Self::Io(kind),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "device disconnected"),
            Self::Busy => write!(f, "link is owned by an active run"),
            Self::Io(kind) => write!(f, "transport error ({kind})"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Experiment errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentError {
    /// The step list is empty.
    NoSteps,
    /// `cycle_count` is zero.
    ZeroCycles,
    /// No saved experiment has the requested name.
    NotFound,
}

impl fmt::Display for ExperimentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSteps => write!(f, "experiment has no steps"),
            Self::ZeroCycles => write!(f, "experiment has zero cycles"),
            Self::NotFound => write!(f, "no experiment with that name"),
        }
    }
}

impl From<ExperimentError> for Error {
    fn from(e: ExperimentError) -> Self {
        Self::InvalidExperiment(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Generic I/O error from the filesystem.
    Io(io::ErrorKind),
    /// Stored data failed deserialization.
    Corrupted,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(kind) => write!(f, "I/O error ({kind})"),
            Self::Corrupted => write!(f, "stored data is corrupted"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
