//! Experiment model: named step sequences repeated for a number of cycles.
//!
//! Plain value objects.  The cycle controller takes its own copy for the
//! lifetime of a run, so editing an experiment never affects a run in
//! progress.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, Result};

/// One phase of a thermal cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Target temperature (°C).
    pub target_temperature: i32,
    /// Minimum time spent inside the tolerance band (seconds).
    pub duration: u32,
}

impl Step {
    pub fn new(name: impl Into<String>, target_temperature: i32, duration: u32) -> Self {
        Self {
            name: name.into(),
            target_temperature,
            duration,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PCR step \"{}\": {}\u{00b0}C, {}s",
            self.name, self.target_temperature, self.duration
        )
    }
}

/// A named, ordered step sequence with a cycle count and final hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub cycle_count: u32,
    /// Temperature the device is left at after the last cycle (°C).
    pub final_hold_temperature: i32,
    pub steps: Vec<Step>,
}

impl Experiment {
    /// Create an experiment with no steps.  The name is capitalized.
    pub fn new(name: &str, cycle_count: u32, final_hold_temperature: i32) -> Self {
        Self {
            name: capitalize(name),
            cycle_count,
            final_hold_temperature,
            steps: Vec::new(),
        }
    }

    /// Builder form of [`add_step`](Self::add_step).
    pub fn with_step(mut self, name: impl Into<String>, temperature: i32, duration: u32) -> Self {
        self.add_step(name, temperature, duration);
        self
    }

    /// The built-in cooling routine: one 5 s step at `cooling_temp_c`.
    pub fn cooling(cooling_temp_c: i32) -> Self {
        Self::new("Cooling", 1, 25).with_step("1", cooling_temp_c, 5)
    }

    /// Append a step.  Ranges are not validated here.
    pub fn add_step(&mut self, name: impl Into<String>, temperature: i32, duration: u32) {
        self.steps.push(Step::new(name, temperature, duration));
    }

    /// Sum of step durations times the cycle count.
    pub fn estimated_duration_seconds(&self) -> u64 {
        let per_cycle: u64 = self.steps.iter().map(|s| u64::from(s.duration)).sum();
        per_cycle * u64::from(self.cycle_count)
    }

    /// Check the preconditions for running this experiment.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(ExperimentError::NoSteps.into());
        }
        if self.cycle_count == 0 {
            return Err(ExperimentError::ZeroCycles.into());
        }
        Ok(())
    }

    /// Total number of step executions a full run performs.
    pub fn total_step_executions(&self) -> u64 {
        self.steps.len() as u64 * u64::from(self.cycle_count)
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Experiment \"{}\"", self.name)?;
        writeln!(f, "-> cycles: {}", self.cycle_count)?;
        writeln!(f, "-> final hold: {}\u{00b0}C", self.final_hold_temperature)?;
        for step in &self.steps {
            writeln!(f, "-{step}")?;
        }
        Ok(())
    }
}

/// Upper-case the first character, lower-case the rest.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Render a duration as `"1h 2m 3s"`, `"2m 3s"` or `"3s"`.
pub fn format_duration(secs: u64) -> String {
    let (m, s) = (secs / 60, secs % 60);
    let (h, m) = (m / 60, m % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Accept an empty string (field being edited) or an integer of at most
/// three characters.
pub fn validate_entry(text: &str) -> bool {
    text.is_empty() || (text.len() <= 3 && text.parse::<i32>().is_ok())
}
