//! JSON experiment store adapter.
//!
//! Implements [`ExperimentStore`] as a single pretty-printed JSON array.
//! Saves go to a sibling temp file that is then renamed over the target,
//! so a crash mid-write leaves the previous list intact.

use std::fs;
use std::io;
use std::path::PathBuf;

use log::{debug, warn};

use crate::app::ports::ExperimentStore;
use crate::error::{Result, StorageError};
use crate::experiment::Experiment;

/// Experiment list persisted at one path.
#[derive(Debug, Clone)]
pub struct JsonExperimentStore {
    path: PathBuf,
}

impl JsonExperimentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExperimentStore for JsonExperimentStore {
    fn load(&self) -> Result<Vec<Experiment>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("STORE: {} not found, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            warn!("STORE: {} is corrupted: {e}", self.path.display());
            StorageError::Corrupted.into()
        })
    }

    fn save(&self, experiments: &[Experiment]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(experiments).map_err(|_| StorageError::Corrupted)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        debug!("STORE: saved {} experiment(s) to {}", experiments.len(), self.path.display());
        Ok(())
    }
}
