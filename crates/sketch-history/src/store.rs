#![forbid(unsafe_code)]

//! State store collaborator.
//!
//! The store owns the canonical application tree. Other plugins mutate it
//! freely; the history tracker only reads snapshots at checkpoints and
//! writes restored trees on undo/redo.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use serde_json::{Map, Value};

/// The application's mutable state, as a JSON-compatible tree.
pub type StateTree = Value;

/// Read/replace access to the canonical state tree.
pub trait StateStore {
    /// Snapshot the current tree.
    fn read(&self) -> StateTree;

    /// Replace the tracked portion of the tree with `tree`.
    ///
    /// The tracker never includes reserved keys in `tree`; whether the store
    /// keeps its own copies of them is up to the store.
    fn replace(&mut self, tree: StateTree);
}

impl<S: StateStore + ?Sized> StateStore for Rc<RefCell<S>> {
    fn read(&self) -> StateTree {
        self.borrow().read()
    }

    fn replace(&mut self, tree: StateTree) {
        self.borrow_mut().replace(tree);
    }
}

/// In-memory [`StateStore`] that records every write.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    tree: StateTree,
    retained: BTreeSet<String>,
    writes: Vec<StateTree>,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl MemoryStateStore {
    /// Create a store holding `tree`.
    #[must_use]
    pub fn new(tree: StateTree) -> Self {
        Self {
            tree,
            retained: BTreeSet::new(),
            writes: Vec::new(),
        }
    }

    /// Keep these top-level keys when [`replace`](StateStore::replace)
    /// receives a tree without them.
    #[must_use]
    pub fn retain_on_replace<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.retained.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Wrap the store for sharing between the tracker and other plugins.
    #[must_use]
    pub fn shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    /// Borrow the current tree.
    #[must_use]
    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// Look up a top-level member.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.tree.get(key)
    }

    /// Set a top-level member, as a plugin mutating its own state would.
    ///
    /// A non-object root is replaced by an object first.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if !self.tree.is_object() {
            self.tree = Value::Object(Map::new());
        }
        if let Value::Object(members) = &mut self.tree {
            members.insert(key.into(), value);
        }
    }

    /// Remove a top-level member.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match &mut self.tree {
            Value::Object(members) => members.remove(key),
            _ => None,
        }
    }

    /// Replace the entire tree without recording a write, as a host loading
    /// a document would.
    pub fn load(&mut self, tree: StateTree) {
        self.tree = tree;
    }

    /// Every tree passed to [`replace`](StateStore::replace), oldest first.
    #[must_use]
    pub fn writes(&self) -> &[StateTree] {
        &self.writes
    }

    /// Number of writes received.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self) -> StateTree {
        self.tree.clone()
    }

    fn replace(&mut self, tree: StateTree) {
        self.writes.push(tree.clone());

        let kept: Vec<(String, Value)> = match &self.tree {
            Value::Object(members) => members
                .iter()
                .filter(|(key, _)| self.retained.contains(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => Vec::new(),
        };

        self.tree = tree;
        if let Value::Object(members) = &mut self.tree {
            for (key, value) in kept {
                members.entry(key).or_insert(value);
            }
        }
    }
}
