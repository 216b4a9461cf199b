#![forbid(unsafe_code)]

//! Sketch History
//!
//! Undo/redo for the Sketch plugin host. Instead of storing a full copy of
//! the application state per step, the tracker records structural deltas
//! between successive snapshots and walks them backward and forward.
//!
//! # Key Components
//!
//! - [`HistoryTracker`] - Undo/redo stacks, baseline snapshot and checkpoint logic
//! - [`StructuralDiff`] / [`JsonDiff`] - Invertible deltas between JSON trees
//! - [`EventChannel`] / [`MessageBus`] - Synchronous pub/sub the tracker listens on
//! - [`StateStore`] / [`MemoryStateStore`] - Canonical state the tracker reads and restores
//! - [`PersistentState`] / [`StateRegistry`] - Versioned export/import of bounded history
//! - [`HistoryConfig`] - Reserved keys, export bounds and unit identity
//!
//! # Wiring
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use sketch_history::{
//!     HistoryConfig, HistoryTracker, MemoryStateStore, MessageBus, StateRegistry, Topic,
//! };
//!
//! let store = MemoryStateStore::new(serde_json::json!({"shapes": []})).shared();
//! let tracker = Rc::new(RefCell::new(HistoryTracker::new(
//!     Rc::clone(&store),
//!     HistoryConfig::default(),
//! )));
//!
//! let mut bus = MessageBus::new();
//! HistoryTracker::attach(&tracker, &mut bus);
//! let mut registry = StateRegistry::new();
//! registry.register(tracker.clone())?;
//!
//! bus.emit(Topic::ApplicationReady)?;
//! store.borrow_mut().set("shapes", serde_json::json!(["circle"]));
//! bus.emit(Topic::CheckpointRequested)?;
//! bus.emit(Topic::UndoRequested)?;
//! assert_eq!(store.borrow().get("shapes"), Some(&serde_json::json!([])));
//!
//! let saved = registry.save()?;
//! assert!(saved.get("$__history").is_some());
//! # Ok::<(), sketch_history::HistoryError>(())
//! ```

pub mod bus;
pub mod config;
pub mod diff;
pub mod error;
pub mod persist;
pub mod store;
pub mod tracker;

pub use bus::{Event, EventChannel, Handler, MessageBus, Topic};
pub use config::{DEFAULT_DATA_VERSION, DEFAULT_UNIT_ID, HistoryConfig, TOOLBAR_KEY};
pub use diff::{Delta, JsonDiff, StructuralDiff};
pub use error::{HistoryError, Result};
pub use persist::{
    HistoryRecord, LoadReport, PersistentState, SavedStates, SavedUnit, SharedUnit, StateRegistry,
};
pub use store::{MemoryStateStore, StateStore, StateTree};
pub use tracker::HistoryTracker;
