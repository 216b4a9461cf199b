#![forbid(unsafe_code)]

//! Versioned serialization units and the registry that collects them.
//!
//! A plugin that wants part of its in-memory state to survive a session
//! implements [`PersistentState`] and registers with a [`StateRegistry`].
//! The registry gathers every unit into [`SavedStates`] (a map from unit id
//! to version-tagged text) and restores them later, skipping units whose
//! saved version no longer matches.
//!
//! # Saved Format
//!
//! ```json
//! {
//!   "$__history": { "version": "0.1", "data": "eyJ1bmRvU3RhY2siOltdLCJyZWRvU3RhY2siOltdfQ==" }
//! }
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::diff::Delta;
use crate::error::{HistoryError, Result};

/// A named, versioned piece of state that can be exported and imported.
pub trait PersistentState {
    /// Stable id the unit is saved under.
    fn id(&self) -> &str;

    /// Version tag of the format produced by [`export_state`](Self::export_state).
    fn data_version(&self) -> &str;

    /// Encode the unit's state as self-contained text.
    fn export_state(&self) -> Result<String>;

    /// Replace the unit's state from text produced by `export_state`.
    ///
    /// On error the unit must be left unchanged.
    fn import_state(&mut self, data: &str) -> Result<()>;
}

/// Shared handle to a registered unit.
pub type SharedUnit = Rc<RefCell<dyn PersistentState>>;

// ============================================================================
// History record
// ============================================================================

/// Undo/redo stacks as they travel inside an exported blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Undo entries, oldest first.
    pub undo_stack: Vec<Delta>,
    /// Redo entries, oldest first.
    pub redo_stack: Vec<Delta>,
}

impl HistoryRecord {
    /// Keep only the `undo` most recent undo entries and `redo` most recent
    /// redo entries, preserving their order.
    #[must_use]
    pub fn from_tails(undo_stack: &[Delta], redo_stack: &[Delta], undo: usize, redo: usize) -> Self {
        Self {
            undo_stack: tail(undo_stack, undo).to_vec(),
            redo_stack: tail(redo_stack, redo).to_vec(),
        }
    }

    /// JSON-encode, then base64 the result.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    /// Reverse of [`encode`](Self::encode).
    pub fn decode(blob: &str) -> Result<Self> {
        let json = STANDARD.decode(blob.trim())?;
        Ok(serde_json::from_slice(&json)?)
    }
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

// ============================================================================
// Registry
// ============================================================================

/// One unit's saved state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedUnit {
    /// `data_version` of the unit at export time.
    pub version: String,
    /// Output of `export_state`.
    pub data: String,
}

/// Saved state of every registered unit, keyed by unit id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavedStates(BTreeMap<String, SavedUnit>);

impl SavedStates {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved entry for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SavedUnit> {
        self.0.get(id)
    }

    /// Insert or overwrite the entry for `id`.
    pub fn insert(&mut self, id: impl Into<String>, unit: SavedUnit) {
        self.0.insert(id.into(), unit);
    }

    /// Number of saved units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize as a JSON object.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON object produced by [`to_json`](Self::to_json).
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Outcome of [`StateRegistry::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Units whose state was imported.
    pub restored: Vec<String>,
    /// Units skipped because the saved version differs.
    pub version_mismatch: Vec<String>,
    /// Units with no saved entry.
    pub missing: Vec<String>,
}

/// Collects [`PersistentState`] units for saving and restoring.
#[derive(Default)]
pub struct StateRegistry {
    units: Vec<SharedUnit>,
}

impl std::fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegistry")
            .field("units", &self.ids())
            .finish()
    }
}

impl StateRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit. Ids must be unique.
    pub fn register(&mut self, unit: SharedUnit) -> Result<()> {
        let id = unit.borrow().id().to_string();
        if self.units.iter().any(|u| u.borrow().id() == id) {
            return Err(HistoryError::DuplicateUnit(id));
        }
        tracing::debug!(target: "sketch.persist", unit = %id, "state unit registered");
        self.units.push(unit);
        Ok(())
    }

    /// Ids of registered units, in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.units.iter().map(|u| u.borrow().id().to_string()).collect()
    }

    /// Export every registered unit.
    pub fn save(&self) -> Result<SavedStates> {
        let mut saved = SavedStates::new();
        for unit in &self.units {
            let unit = unit.borrow();
            let data = unit.export_state()?;
            tracing::debug!(
                target: "sketch.persist",
                unit = %unit.id(),
                version = %unit.data_version(),
                bytes = data.len(),
                "state unit saved"
            );
            saved.insert(
                unit.id(),
                SavedUnit {
                    version: unit.data_version().to_string(),
                    data,
                },
            );
        }
        Ok(saved)
    }

    /// Import every registered unit that has a matching saved entry.
    ///
    /// Stops at the first import error; units restored before it stay
    /// restored.
    pub fn load(&self, saved: &SavedStates) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        for unit in &self.units {
            let mut unit = unit.borrow_mut();
            let id = unit.id().to_string();
            let Some(entry) = saved.get(&id) else {
                report.missing.push(id);
                continue;
            };
            if entry.version != unit.data_version() {
                tracing::warn!(
                    target: "sketch.persist",
                    unit = %id,
                    saved_version = %entry.version,
                    expected_version = %unit.data_version(),
                    "skipping state unit with mismatched version"
                );
                report.version_mismatch.push(id);
                continue;
            }
            unit.import_state(&entry.data)?;
            tracing::debug!(target: "sketch.persist", unit = %id, "state unit restored");
            report.restored.push(id);
        }
        Ok(report)
    }
}
