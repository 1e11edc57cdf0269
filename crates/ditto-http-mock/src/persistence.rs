//! Writes the active expectations to disk after API changes.

use crate::expectation::{Cause, ExpectationListener, RegistrySnapshot};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Registry listener that mirrors API-created expectations to a JSON file.
///
/// Changes caused by the file initialiser are not written back.
pub struct ExpectationPersistence {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ExpectationPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let expectations = snapshot.active_expectations(None);
        let json = serde_json::to_string_pretty(&expectations).context("Failed to serialize expectations")?;

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write expectations to {}", self.path.display()))?;
        debug!("Persisted {} expectation(s) to {}", expectations.len(), self.path.display());
        Ok(())
    }
}

impl ExpectationListener for ExpectationPersistence {
    fn updated(&self, snapshot: &RegistrySnapshot, cause: Cause) {
        if cause != Cause::Api {
            return;
        }
        if let Err(e) = self.write(snapshot) {
            error!("{:#}", e);
        }
    }
}
