#![forbid(unsafe_code)]

//! Configuration for the history tracker.
//!
//! [`HistoryConfig`] can be built in code or loaded from TOML (with the
//! `config-file` feature) or JSON:
//!
//! ```toml
//! reserved_keys = ["$__history", "$__toolbar"]
//! export_undo_limit = 5
//! export_redo_limit = 3
//! unit_id = "$__history"
//! data_version = "0.1"
//! ```
//!
//! Missing fields fall back to [`HistoryConfig::default`].

#[cfg(feature = "config-file")]
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, Result};
use crate::store::StateTree;

/// Default id of the history serialization unit.
pub const DEFAULT_UNIT_ID: &str = "$__history";

/// Default data-format version of exported history.
pub const DEFAULT_DATA_VERSION: &str = "0.1";

/// Top-level key holding the toolbar plugin's UI state.
pub const TOOLBAR_KEY: &str = "$__toolbar";

/// Configuration for [`HistoryTracker`](crate::HistoryTracker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Top-level state keys excluded from every snapshot and delta.
    pub reserved_keys: Vec<String>,
    /// Most recent undo entries kept by `export_state`.
    pub export_undo_limit: usize,
    /// Most recent redo entries kept by `export_state`.
    pub export_redo_limit: usize,
    /// Id the tracker registers its serialization unit under.
    pub unit_id: String,
    /// Version tag stored alongside exported history.
    pub data_version: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            reserved_keys: vec![DEFAULT_UNIT_ID.to_string(), TOOLBAR_KEY.to_string()],
            export_undo_limit: 5,
            export_redo_limit: 3,
            unit_id: DEFAULT_UNIT_ID.to_string(),
            data_version: DEFAULT_DATA_VERSION.to_string(),
        }
    }
}

impl HistoryConfig {
    /// Replace the reserved-key set.
    #[must_use]
    pub fn with_reserved_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.reserved_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set how many undo and redo entries survive export.
    #[must_use]
    pub fn with_export_limits(mut self, undo: usize, redo: usize) -> Self {
        self.export_undo_limit = undo;
        self.export_redo_limit = redo;
        self
    }

    /// Set the serialization unit id and data version.
    #[must_use]
    pub fn with_unit(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.unit_id = id.into();
        self.data_version = version.into();
        self
    }

    /// Whether `key` is excluded from tracking.
    #[must_use]
    pub fn is_reserved(&self, key: &str) -> bool {
        self.reserved_keys.iter().any(|k| k == key)
    }

    /// Drop reserved top-level keys from `tree`. Non-object roots pass through.
    #[must_use]
    pub fn strip_reserved(&self, mut tree: StateTree) -> StateTree {
        if let StateTree::Object(members) = &mut tree {
            members.retain(|key, _| !self.is_reserved(key));
        }
        tree
    }

    /// Check that the unit id and version are usable.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.unit_id.trim().is_empty() {
            errors.push("unit_id must not be empty");
        }
        if self.data_version.trim().is_empty() {
            errors.push("data_version must not be empty");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HistoryError::Config(errors.join("; ")))
        }
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| HistoryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| HistoryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HistoryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }
}
