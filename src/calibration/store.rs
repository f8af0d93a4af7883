// ProfileStore - key/value persistence for calibration profiles

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use super::CalibrationProfile;
use crate::error::DetectionError;

/// Persistent key/value storage for calibration profiles
pub trait ProfileStore: Send + Sync {
    /// Load the profile stored under `key`, `Ok(None)` if absent
    fn get(&self, key: &str) -> Result<Option<CalibrationProfile>, DetectionError>;

    fn set(&self, key: &str, profile: &CalibrationProfile) -> Result<(), DetectionError>;
}

/// Process-local store, used by tests and the CLI
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<String, CalibrationProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, CalibrationProfile>>, DetectionError>
    {
        self.profiles.lock().map_err(|_| DetectionError::CalibrationStore {
            reason: "profile store lock poisoned".to_string(),
        })
    }
}

impl ProfileStore for MemoryProfileStore {
    fn get(&self, key: &str) -> Result<Option<CalibrationProfile>, DetectionError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, profile: &CalibrationProfile) -> Result<(), DetectionError> {
        self.lock()?.insert(key.to_string(), profile.clone());
        Ok(())
    }
}

/// JSON file holding a `{ key: profile }` map
///
/// The whole file is rewritten on every `set`; a missing file reads as empty.
pub struct JsonFileProfileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileProfileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, CalibrationProfile>, DetectionError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| {
            DetectionError::CalibrationStore {
                reason: format!("failed to read {}: {}", self.path.display(), e),
            }
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl ProfileStore for JsonFileProfileStore {
    fn get(&self, key: &str) -> Result<Option<CalibrationProfile>, DetectionError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, profile: &CalibrationProfile) -> Result<(), DetectionError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| DetectionError::CalibrationStore {
                reason: "profile file lock poisoned".to_string(),
            })?;

        let mut all = self.read_all()?;
        all.insert(key.to_string(), profile.clone());
        let json = serde_json::to_string_pretty(&all)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| DetectionError::CalibrationStore {
                    reason: format!("failed to create {}: {}", parent.display(), e),
                })?;
            }
        }
        fs::write(&self.path, json).map_err(|e| DetectionError::CalibrationStore {
            reason: format!("failed to write {}: {}", self.path.display(), e),
        })?;

        debug!("[ProfileStore] Saved '{}' to {}", key, self.path.display());
        Ok(())
    }
}
