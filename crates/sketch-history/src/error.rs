#![forbid(unsafe_code)]

//! Error taxonomy for history tracking.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Errors raised by the history tracker and its serialization unit.
///
/// Empty undo/redo stacks are not errors; those operations report
/// `Ok(false)` instead.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A history operation arrived before the baseline was captured.
    #[error("history requested before application finished loading")]
    InvalidSequence,

    /// Exported history blob is not valid base64.
    #[error("history blob is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// JSON encoding or decoding failed.
    #[error("history JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A delta does not fit the tree it was applied to.
    #[error("delta does not apply at {path}: {reason}")]
    Patch {
        /// JSON-pointer-like location of the mismatch.
        path: String,
        /// What was expected there.
        reason: String,
    },

    /// Two serialization units were registered under one id.
    #[error("state unit {0:?} is already registered")]
    DuplicateUnit(String),

    /// Configuration failed to parse or validate.
    #[error("invalid history config: {0}")]
    Config(String),
}

impl HistoryError {
    pub(crate) fn patch(path: &str, reason: impl Into<String>) -> Self {
        Self::Patch {
            path: if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            },
            reason: reason.into(),
        }
    }
}
