#![forbid(unsafe_code)]

//! Synchronous publish/subscribe channel.
//!
//! Plugins talk to each other by publishing [`Event`]s on a shared
//! [`EventChannel`]. Delivery is synchronous: every handler subscribed to
//! the event's [`Topic`] runs to completion, in subscription order, before
//! `publish` returns. A handler error stops delivery of that event and is
//! returned to the publisher.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::Result;

/// Name of an event on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Record a new undo point.
    CheckpointRequested,
    /// Step back one undo point.
    UndoRequested,
    /// Step forward one undo point.
    RedoRequested,
    /// The host finished loading plugins and initial state.
    ApplicationReady,
    /// The whole state tree was replaced from outside (e.g. a file load).
    StateExternallyReplaced,
    /// Any other plugin-defined event.
    Custom(String),
}

impl Topic {
    /// Wire name of the topic.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::CheckpointRequested => "checkpointRequested",
            Self::UndoRequested => "undoRequested",
            Self::RedoRequested => "redoRequested",
            Self::ApplicationReady => "applicationReady",
            Self::StateExternallyReplaced => "stateExternallyReplaced",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A published event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// What happened.
    pub topic: Topic,
    /// Optional data; `Null` when the topic carries none.
    pub payload: Value,
}

impl Event {
    /// An event without payload.
    #[must_use]
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            payload: Value::Null,
        }
    }

    /// An event carrying `payload`.
    #[must_use]
    pub fn with_payload(topic: Topic, payload: Value) -> Self {
        Self { topic, payload }
    }
}

/// Subscriber callback.
pub type Handler = Box<dyn FnMut(&Event) -> Result<()>>;

/// A synchronous pub/sub channel.
pub trait EventChannel {
    /// Register `handler` for `topic`.
    fn subscribe(&mut self, topic: Topic, handler: Handler);

    /// Deliver `event` to every handler of its topic.
    fn publish(&mut self, event: Event) -> Result<()>;
}

/// In-memory [`EventChannel`].
///
/// Handlers must not publish onto the bus that is dispatching them.
#[derive(Default)]
pub struct MessageBus {
    handlers: HashMap<Topic, Vec<Handler>>,
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut topics: Vec<(&str, usize)> = self
            .handlers
            .iter()
            .map(|(topic, list)| (topic.name(), list.len()))
            .collect();
        topics.sort_unstable();
        f.debug_struct("MessageBus").field("topics", &topics).finish()
    }
}

impl MessageBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers registered for `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.handlers.get(topic).map_or(0, Vec::len)
    }

    /// Publish a payload-free event for `topic`.
    pub fn emit(&mut self, topic: Topic) -> Result<()> {
        self.publish(Event::new(topic))
    }
}

impl EventChannel for MessageBus {
    fn subscribe(&mut self, topic: Topic, handler: Handler) {
        self.handlers.entry(topic).or_default().push(handler);
    }

    fn publish(&mut self, event: Event) -> Result<()> {
        let Some(handlers) = self.handlers.get_mut(&event.topic) else {
            tracing::trace!(target: "sketch.bus", topic = %event.topic, "no subscribers");
            return Ok(());
        };
        tracing::trace!(
            target: "sketch.bus",
            topic = %event.topic,
            handlers = handlers.len(),
            "dispatch"
        );
        for handler in handlers.iter_mut() {
            handler(&event)?;
        }
        Ok(())
    }
}
