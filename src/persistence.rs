//! Persistence layer for controller state
//!
//! Best-effort JSON state file so the auto-control flag and the last applied
//! power target survive restarts. Writes go to a sibling temp file that is
//! then renamed over the target, so a crash never leaves a half-written file.

use crate::error::Result;
use crate::logging::get_logger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persistent state structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentState {
    /// Auto-control enabled
    pub autocontrol: bool,

    /// Last power target successfully applied
    pub target_power_pct: Option<u8>,

    /// "running" or "stopped" as last commanded
    pub miner_power_state: Option<String>,

    /// When any field last changed
    pub last_updated: Option<DateTime<Utc>>,
}

/// Persistence manager
pub struct PersistenceManager {
    file_path: PathBuf,
    state: PersistentState,
    logger: crate::logging::StructuredLogger,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            state: PersistentState::default(),
            logger: get_logger("persistence"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub const fn state(&self) -> &PersistentState {
        &self.state
    }

    /// Load state from disk. A missing file keeps defaults; a corrupt one
    /// is logged and replaced with defaults rather than failing startup.
    pub fn load(&mut self) -> Result<()> {
        if !self.file_path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(&self.file_path)?;
        match serde_json::from_str(&contents) {
            Ok(state) => {
                self.state = state;
                self.logger.info("Loaded persistent state from disk");
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Ignoring unreadable state file: {e}"));
                self.state = PersistentState::default();
            }
        }
        Ok(())
    }

    /// Save state to disk atomically
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.state)?;
        let mut tmp = self.file_path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.file_path)?;
        self.logger.debug("Saved persistent state to disk");
        Ok(())
    }

    /// Apply an edit, stamp it and save; errors are logged, not returned.
    pub fn update_and_save<F>(&mut self, edit: F)
    where
        F: FnOnce(&mut PersistentState),
    {
        edit(&mut self.state);
        self.state.last_updated = Some(Utc::now());
        if let Err(e) = self.save() {
            self.logger
                .warn(&format!("Failed to persist state: {e}"));
        }
    }

    /// Get a single field by name
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        let value = serde_json::to_value(&self.state).ok()?;
        let field = value.get(key)?.clone();
        serde_json::from_value(field).ok()
    }

    /// Set a single field by name
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let mut fields = serde_json::Map::new();
        fields.insert(key.to_string(), serde_json::to_value(value)?);
        self.update(serde_json::Value::Object(fields))
    }

    /// Merge a JSON object of fields into the state
    pub fn update(&mut self, updates: serde_json::Value) -> Result<()> {
        let mut current = serde_json::to_value(&self.state)?;
        if let (Some(dst), Some(src)) = (current.as_object_mut(), updates.as_object()) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
        self.state = serde_json::from_value(current)?;
        Ok(())
    }
}
