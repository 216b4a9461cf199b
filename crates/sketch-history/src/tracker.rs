#![forbid(unsafe_code)]

//! Delta-based undo/redo tracking.
//!
//! [`HistoryTracker`] keeps a baseline snapshot of the state store and two
//! stacks of [`Delta`]s. A checkpoint diffs the baseline against the store
//! and pushes the delta; undo and redo walk the baseline along those deltas
//! and write the result back to the store.
//!
//! ```text
//! checkpoint() x3          S0 --d1--> S1 --d2--> S2 --d3--> S3
//! ┌──────────────────────────────────────────────┐
//! │ Undo: [d1, d2, d3]   Redo: []   Baseline: S3 │
//! └──────────────────────────────────────────────┘
//!
//! undo() x2                unpatch(S3, d3) = S2, unpatch(S2, d2) = S1
//! ┌──────────────────────────────────────────────┐
//! │ Undo: [d1]   Redo: [d3, d2]     Baseline: S1 │
//! └──────────────────────────────────────────────┘
//!
//! checkpoint()             new timeline, redo cleared
//! ┌──────────────────────────────────────────────┐
//! │ Undo: [d1, d4]   Redo: []       Baseline: S4 │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! 1. No checkpoint, undo or redo is accepted before the baseline is
//!    captured; a rejected call changes nothing.
//! 2. The baseline equals the store's tracked state after every
//!    checkpoint, undo and redo.
//! 3. Every checkpoint clears the redo stack.
//! 4. Reserved keys never appear in the baseline, in a recorded delta or in
//!    a store write.
//! 5. Stacks are unbounded in memory; only `export_state` truncates.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::bus::{EventChannel, Topic};
use crate::config::HistoryConfig;
use crate::diff::{Delta, JsonDiff, StructuralDiff};
use crate::error::{HistoryError, Result};
use crate::persist::{HistoryRecord, PersistentState};
use crate::store::{StateStore, StateTree};

const TARGET: &str = "sketch.history";

/// Undo/redo history over a [`StateStore`].
pub struct HistoryTracker<S, D = JsonDiff> {
    store: S,
    differ: D,
    config: HistoryConfig,
    /// Tracked state as of the last checkpoint/undo/redo; `None` until loaded.
    baseline: Option<StateTree>,
    /// Newest at the back.
    undo_stack: Vec<Delta>,
    /// Newest at the back.
    redo_stack: Vec<Delta>,
}

impl<S, D> fmt::Debug for HistoryTracker<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryTracker")
            .field("ready", &self.baseline.is_some())
            .field("undo_depth", &self.undo_stack.len())
            .field("redo_depth", &self.redo_stack.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<S: StateStore> HistoryTracker<S, JsonDiff> {
    /// Create a tracker over `store` using the built-in [`JsonDiff`].
    #[must_use]
    pub fn new(store: S, config: HistoryConfig) -> Self {
        Self::with_differ(store, JsonDiff, config)
    }
}

impl<S: StateStore, D: StructuralDiff> HistoryTracker<S, D> {
    /// Create a tracker with a custom diff implementation.
    #[must_use]
    pub fn with_differ(store: S, differ: D, config: HistoryConfig) -> Self {
        Self {
            store,
            differ,
            config,
            baseline: None,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// (Re)capture the baseline from the store.
    ///
    /// Runs on application-ready and on external state replacement. Stacks
    /// are left alone.
    pub fn capture_baseline(&mut self) {
        let snapshot = self.config.strip_reserved(self.store.read());
        self.baseline = Some(snapshot);
        tracing::debug!(
            target: TARGET,
            undo_depth = self.undo_stack.len(),
            redo_depth = self.redo_stack.len(),
            "baseline captured"
        );
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Record the store's current state as a new undo point.
    ///
    /// Fails with [`HistoryError::InvalidSequence`] before the baseline has
    /// been captured.
    pub fn checkpoint(&mut self) -> Result<()> {
        let _span = tracing::debug_span!("history.checkpoint").entered();
        let Some(baseline) = self.baseline.as_ref() else {
            return Err(rejected("checkpoint"));
        };

        let current = self.config.strip_reserved(self.store.read());
        let delta = self.differ.diff(baseline, &current);
        let changed = !delta.is_empty();

        self.undo_stack.push(delta);
        self.redo_stack.clear();
        self.baseline = Some(current);

        tracing::debug!(
            target: TARGET,
            changed,
            undo_depth = self.undo_stack.len(),
            "checkpoint recorded"
        );
        Ok(())
    }

    /// Step back one undo point and write the restored state to the store.
    ///
    /// Returns `Ok(false)` without touching the store when there is nothing
    /// to undo.
    pub fn undo(&mut self) -> Result<bool> {
        let _span = tracing::debug_span!("history.undo").entered();
        let Some(delta) = self.undo_stack.last() else {
            tracing::trace!(target: TARGET, "nothing to undo");
            return Ok(false);
        };
        let Some(baseline) = self.baseline.as_ref() else {
            return Err(rejected("undo"));
        };

        let restored = self.differ.unpatch(baseline, delta)?;
        if let Some(delta) = self.undo_stack.pop() {
            self.redo_stack.push(delta);
        }
        self.commit(restored);

        tracing::debug!(
            target: TARGET,
            undo_depth = self.undo_stack.len(),
            redo_depth = self.redo_stack.len(),
            "undo applied"
        );
        Ok(true)
    }

    /// Step forward one undo point and write the restored state to the store.
    ///
    /// Returns `Ok(false)` without touching the store when there is nothing
    /// to redo.
    pub fn redo(&mut self) -> Result<bool> {
        let _span = tracing::debug_span!("history.redo").entered();
        let Some(delta) = self.redo_stack.last() else {
            tracing::trace!(target: TARGET, "nothing to redo");
            return Ok(false);
        };
        let Some(baseline) = self.baseline.as_ref() else {
            return Err(rejected("redo"));
        };

        let restored = self.differ.patch(baseline, delta)?;
        if let Some(delta) = self.redo_stack.pop() {
            self.undo_stack.push(delta);
        }
        self.commit(restored);

        tracing::debug!(
            target: TARGET,
            undo_depth = self.undo_stack.len(),
            redo_depth = self.redo_stack.len(),
            "redo applied"
        );
        Ok(true)
    }

    fn commit(&mut self, restored: StateTree) {
        let restored = self.config.strip_reserved(restored);
        self.store.replace(restored.clone());
        self.baseline = Some(restored);
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Whether the baseline has been captured.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.baseline.is_some()
    }

    /// Check if undo is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Get the undo stack depth.
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Get the redo stack depth.
    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Undo entries, oldest first.
    #[must_use]
    pub fn undo_stack(&self) -> &[Delta] {
        &self.undo_stack
    }

    /// Redo entries, oldest first.
    #[must_use]
    pub fn redo_stack(&self) -> &[Delta] {
        &self.redo_stack
    }

    /// The tracked state the tracker believes the store holds.
    #[must_use]
    pub fn baseline(&self) -> Option<&StateTree> {
        self.baseline.as_ref()
    }

    /// Get the current configuration.
    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Borrow the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutably borrow the store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Drop all undo and redo entries. The baseline is kept.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl<S, D> HistoryTracker<S, D>
where
    S: StateStore + 'static,
    D: StructuralDiff + 'static,
{
    /// Subscribe `tracker` to the five history topics on `channel`.
    pub fn attach<C: EventChannel + ?Sized>(tracker: &Rc<RefCell<Self>>, channel: &mut C) {
        let t = Rc::clone(tracker);
        channel.subscribe(
            Topic::CheckpointRequested,
            Box::new(move |_| t.borrow_mut().checkpoint()),
        );

        let t = Rc::clone(tracker);
        channel.subscribe(
            Topic::UndoRequested,
            Box::new(move |_| t.borrow_mut().undo().map(drop)),
        );

        let t = Rc::clone(tracker);
        channel.subscribe(
            Topic::RedoRequested,
            Box::new(move |_| t.borrow_mut().redo().map(drop)),
        );

        for topic in [Topic::ApplicationReady, Topic::StateExternallyReplaced] {
            let t = Rc::clone(tracker);
            channel.subscribe(
                topic,
                Box::new(move |_| {
                    t.borrow_mut().capture_baseline();
                    Ok(())
                }),
            );
        }
    }
}

impl<S, D> PersistentState for HistoryTracker<S, D> {
    fn id(&self) -> &str {
        &self.config.unit_id
    }

    fn data_version(&self) -> &str {
        &self.config.data_version
    }

    fn export_state(&self) -> Result<String> {
        let record = HistoryRecord::from_tails(
            &self.undo_stack,
            &self.redo_stack,
            self.config.export_undo_limit,
            self.config.export_redo_limit,
        );
        let blob = record.encode()?;
        tracing::debug!(
            target: TARGET,
            undo_exported = record.undo_stack.len(),
            redo_exported = record.redo_stack.len(),
            undo_dropped = self.undo_stack.len() - record.undo_stack.len(),
            redo_dropped = self.redo_stack.len() - record.redo_stack.len(),
            "history exported"
        );
        Ok(blob)
    }

    fn import_state(&mut self, data: &str) -> Result<()> {
        let record = HistoryRecord::decode(data)?;
        self.undo_stack = record.undo_stack;
        self.redo_stack = record.redo_stack;
        tracing::debug!(
            target: TARGET,
            undo_depth = self.undo_stack.len(),
            redo_depth = self.redo_stack.len(),
            "history imported"
        );
        Ok(())
    }
}

fn rejected(operation: &'static str) -> HistoryError {
    tracing::warn!(
        target: TARGET,
        operation,
        "history requested before application finished loading"
    );
    HistoryError::InvalidSequence
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::store::MemoryStateStore;
    use serde_json::json;

    fn tracker_with(tree: StateTree) -> HistoryTracker<MemoryStateStore> {
        HistoryTracker::new(MemoryStateStore::new(tree), HistoryConfig::default())
    }

    fn ready_tracker() -> HistoryTracker<MemoryStateStore> {
        let mut tracker = tracker_with(json!({"shapes": []}));
        tracker.capture_baseline();
        tracker
    }

    fn add_shape(tracker: &mut HistoryTracker<MemoryStateStore>, shape: &str) {
        let mut shapes = tracker.store().get("shapes").cloned().unwrap_or(json!([]));
        if let Some(list) = shapes.as_array_mut() {
            list.push(json!(shape));
        }
        tracker.store_mut().set("shapes", shapes);
        tracker.checkpoint().unwrap();
    }

    #[test]
    fn new_tracker_is_uninitialized() {
        let tracker = tracker_with(json!({}));
        assert!(!tracker.is_ready());
        assert!(!tracker.can_undo());
        assert!(!tracker.can_redo());
        assert!(tracker.baseline().is_none());
    }

    #[test]
    fn checkpoint_before_ready_is_rejected() {
        let mut tracker = tracker_with(json!({"a": 1}));
        let err = tracker.checkpoint().unwrap_err();
        assert!(matches!(err, HistoryError::InvalidSequence));
        assert_eq!(tracker.undo_depth(), 0);
        assert_eq!(tracker.redo_depth(), 0);
        assert!(!tracker.is_ready());
    }

    #[test]
    fn rejected_checkpoint_does_not_poison_tracker() {
        let mut tracker = tracker_with(json!({"a": 1}));
        assert!(tracker.checkpoint().is_err());
        tracker.capture_baseline();
        tracker.store_mut().set("a", json!(2));
        assert!(tracker.checkpoint().is_ok());
        assert_eq!(tracker.undo_depth(), 1);
    }

    #[test]
    fn capture_strips_reserved_keys() {
        let mut tracker = tracker_with(json!({"$__toolbar": "pen", "$__history": "x", "a": 1}));
        tracker.capture_baseline();
        assert_eq!(tracker.baseline(), Some(&json!({"a": 1})));
    }

    #[test]
    fn checkpoint_pushes_delta_and_moves_baseline() {
        let mut tracker = ready_tracker();
        add_shape(&mut tracker, "circle");
        assert_eq!(tracker.undo_depth(), 1);
        assert_eq!(tracker.baseline(), Some(&json!({"shapes": ["circle"]})));
        assert_eq!(tracker.store().write_count(), 0);
    }

    #[test]
    fn unchanged_checkpoint_still_records_a_step() {
        let mut tracker = ready_tracker();
        tracker.checkpoint().unwrap();
        assert_eq!(tracker.undo_depth(), 1);
        assert!(tracker.undo_stack()[0].is_empty());
        assert!(tracker.undo().unwrap());
        assert_eq!(tracker.store().writes(), &[json!({"shapes": []})]);
    }

    #[test]
    fn undo_then_redo_walks_states() {
        let mut tracker = ready_tracker();
        add_shape(&mut tracker, "circle");
        add_shape(&mut tracker, "square");

        assert!(tracker.undo().unwrap());
        assert_eq!(tracker.store().read(), json!({"shapes": ["circle"]}));
        assert!(tracker.undo().unwrap());
        assert_eq!(tracker.store().read(), json!({"shapes": []}));
        assert!(!tracker.can_undo());
        assert_eq!(tracker.redo_depth(), 2);

        assert!(tracker.redo().unwrap());
        assert_eq!(tracker.store().read(), json!({"shapes": ["circle"]}));
        assert!(tracker.redo().unwrap());
        assert_eq!(tracker.store().read(), json!({"shapes": ["circle", "square"]}));
        assert!(!tracker.can_redo());
    }

    #[test]
    fn checkpoint_clears_redo() {
        let mut tracker = ready_tracker();
        add_shape(&mut tracker, "circle");
        add_shape(&mut tracker, "square");
        tracker.undo().unwrap();
        assert!(tracker.can_redo());

        add_shape(&mut tracker, "star");
        assert!(!tracker.can_redo());
        let writes = tracker.store().write_count();
        assert!(!tracker.redo().unwrap());
        assert_eq!(tracker.store().write_count(), writes);
        assert_eq!(tracker.store().read(), json!({"shapes": ["circle", "star"]}));
    }

    #[test]
    fn empty_stacks_are_silent_noops() {
        let mut tracker = ready_tracker();
        assert!(!tracker.undo().unwrap());
        assert!(!tracker.redo().unwrap());
        assert_eq!(tracker.store().write_count(), 0);
    }

    #[test]
    fn empty_stacks_are_noops_even_before_ready() {
        let mut tracker = tracker_with(json!({}));
        assert!(!tracker.undo().unwrap());
        assert!(!tracker.redo().unwrap());
    }

    #[test]
    fn imported_history_before_ready_is_rejected() {
        let mut source = ready_tracker();
        add_shape(&mut source, "circle");
        let blob = source.export_state().unwrap();

        let mut tracker = tracker_with(json!({"shapes": ["circle"]}));
        tracker.import_state(&blob).unwrap();
        assert!(matches!(tracker.undo(), Err(HistoryError::InvalidSequence)));
        assert_eq!(tracker.undo_depth(), 1);
        assert_eq!(tracker.store().write_count(), 0);

        tracker.capture_baseline();
        assert!(tracker.undo().unwrap());
        assert_eq!(tracker.store().read(), json!({"shapes": []}));
    }

    #[test]
    fn failed_patch_changes_nothing() {
        let mut tracker = ready_tracker();
        add_shape(&mut tracker, "circle");
        // Someone rewrote the store without telling the tracker.
        tracker.store_mut().load(json!({"shapes": 7}));
        tracker.capture_baseline();

        let err = tracker.undo().unwrap_err();
        assert!(matches!(err, HistoryError::Patch { .. }));
        assert_eq!(tracker.undo_depth(), 1);
        assert_eq!(tracker.redo_depth(), 0);
        assert_eq!(tracker.baseline(), Some(&json!({"shapes": 7})));
        assert_eq!(tracker.store().write_count(), 0);
    }

    #[test]
    fn undo_never_writes_reserved_keys() {
        let store = MemoryStateStore::new(json!({"$__toolbar": {"tool": "pen"}, "a": 1}))
            .retain_on_replace(["$__toolbar"]);
        let mut tracker = HistoryTracker::new(store, HistoryConfig::default());
        tracker.capture_baseline();

        tracker.store_mut().set("a", json!(2));
        tracker.store_mut().set("$__toolbar", json!({"tool": "eraser"}));
        tracker.checkpoint().unwrap();
        assert!(!tracker.undo_stack()[0].references_key("$__toolbar"));

        tracker.undo().unwrap();
        assert_eq!(tracker.store().writes(), &[json!({"a": 1})]);
        assert_eq!(
            tracker.store().read(),
            json!({"$__toolbar": {"tool": "eraser"}, "a": 1})
        );
    }

    #[test]
    fn custom_reserved_keys_are_honored() {
        let config = HistoryConfig::default().with_reserved_keys(["viewport"]);
        let mut tracker =
            HistoryTracker::new(MemoryStateStore::new(json!({"viewport": 1, "a": 1})), config);
        tracker.capture_baseline();
        tracker.store_mut().set("viewport", json!(2));
        tracker.checkpoint().unwrap();
        assert!(tracker.undo_stack()[0].is_empty());
    }

    #[test]
    fn recapture_keeps_stacks() {
        let mut tracker = ready_tracker();
        add_shape(&mut tracker, "circle");
        tracker.capture_baseline();
        assert_eq!(tracker.undo_depth(), 1);
    }

    #[test]
    fn clear_drops_history_but_keeps_baseline() {
        let mut tracker = ready_tracker();
        add_shape(&mut tracker, "circle");
        tracker.undo().unwrap();
        tracker.clear();
        assert!(!tracker.can_undo());
        assert!(!tracker.can_redo());
        assert!(tracker.is_ready());
    }

    #[test]
    fn export_truncates_to_configured_tails() {
        let mut tracker = ready_tracker();
        for i in 0..10 {
            add_shape(&mut tracker, &format!("s{i}"));
        }
        for _ in 0..5 {
            tracker.undo().unwrap();
        }
        assert_eq!(tracker.undo_depth(), 5);
        assert_eq!(tracker.redo_depth(), 5);

        let blob = tracker.export_state().unwrap();
        let record = HistoryRecord::decode(&blob).unwrap();
        assert_eq!(record.undo_stack, tracker.undo_stack().to_vec());
        assert_eq!(record.redo_stack, tracker.redo_stack()[2..].to_vec());
        // Live stacks are untouched by export.
        assert_eq!(tracker.redo_depth(), 5);
    }

    #[test]
    fn import_replaces_stacks_and_keeps_baseline() {
        let mut source = ready_tracker();
        add_shape(&mut source, "circle");
        add_shape(&mut source, "square");
        source.undo().unwrap();
        let blob = source.export_state().unwrap();

        let mut target = ready_tracker();
        add_shape(&mut target, "other");
        let baseline = target.baseline().cloned();
        target.import_state(&blob).unwrap();

        assert_eq!(target.undo_stack(), source.undo_stack());
        assert_eq!(target.redo_stack(), source.redo_stack());
        assert_eq!(target.baseline().cloned(), baseline);
    }

    #[test]
    fn malformed_import_leaves_tracker_untouched() {
        let mut tracker = ready_tracker();
        add_shape(&mut tracker, "circle");
        let before = tracker.undo_stack().to_vec();

        assert!(matches!(
            tracker.import_state("%%%"),
            Err(HistoryError::Decode(_))
        ));
        assert!(matches!(
            tracker.import_state("bm90IGpzb24="),
            Err(HistoryError::Json(_))
        ));
        assert_eq!(tracker.undo_stack(), before.as_slice());
    }

    #[test]
    fn persistent_state_identity_comes_from_config() {
        let tracker = HistoryTracker::new(
            MemoryStateStore::default(),
            HistoryConfig::default().with_unit("hist", "7"),
        );
        assert_eq!(tracker.id(), "hist");
        assert_eq!(tracker.data_version(), "7");
    }

    #[test]
    fn attach_wires_all_topics() {
        let store = MemoryStateStore::new(json!({"n": 0})).shared();
        let tracker = Rc::new(RefCell::new(HistoryTracker::new(
            Rc::clone(&store),
            HistoryConfig::default(),
        )));
        let mut bus = MessageBus::new();
        HistoryTracker::attach(&tracker, &mut bus);

        for topic in [
            Topic::CheckpointRequested,
            Topic::UndoRequested,
            Topic::RedoRequested,
            Topic::ApplicationReady,
            Topic::StateExternallyReplaced,
        ] {
            assert_eq!(bus.subscriber_count(&topic), 1, "{topic}");
        }

        assert!(matches!(
            bus.emit(Topic::CheckpointRequested),
            Err(HistoryError::InvalidSequence)
        ));
        bus.emit(Topic::ApplicationReady).unwrap();
        store.borrow_mut().set("n", json!(1));
        bus.emit(Topic::CheckpointRequested).unwrap();
        bus.emit(Topic::UndoRequested).unwrap();
        assert_eq!(store.borrow().read(), json!({"n": 0}));
        bus.emit(Topic::RedoRequested).unwrap();
        assert_eq!(store.borrow().read(), json!({"n": 1}));
    }

    #[test]
    fn debug_impl() {
        let tracker = ready_tracker();
        let debug = format!("{tracker:?}");
        assert!(debug.contains("HistoryTracker"));
        assert!(debug.contains("undo_depth"));
        assert!(debug.contains("ready: true"));
    }
}
