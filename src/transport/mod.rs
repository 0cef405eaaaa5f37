//! Transport abstraction: the message bus buffers talk through.
//!
//! Osmosis does not implement discovery, reconnection, or cross-host
//! delivery itself; it consumes a pub/sub bus through the [`Transport`]
//! trait and expects at-least-once delivery with per-publisher-per-topic
//! FIFO ordering. Anything offering those guarantees can carry units.
//!
//! The in-process [`LocalBus`] implementation makes single-process
//! deployments (and the test suite) work without any external broker.

mod local;

pub use local::LocalBus;

use bytes::Bytes;
use std::sync::Arc;

use crate::error::Result;

/// Callback invoked with each message delivered to a subscription.
///
/// Receives the concrete topic the message was published on and the raw
/// message bytes. Invoked on the transport's dispatch thread; it must not
/// block indefinitely.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// A pub/sub message bus.
///
/// Required guarantees: delivery is at-least-once (duplicates allowed,
/// silent loss not), and messages from one publisher on one topic arrive
/// in publish order. No ordering is required across topics or publishers.
pub trait Transport: Send + Sync + 'static {
    /// Publish a message on a topic.
    ///
    /// Hands the message to the transport and returns; it does not wait
    /// for delivery or remote acknowledgement.
    fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to all topics matching a pattern.
    ///
    /// A pattern is either a literal topic or a prefix ending in `*`
    /// (see [`topic_matches`]). The subscription is cancelled when the
    /// returned handle is dropped.
    fn subscribe(&self, pattern: &str, handler: MessageHandler) -> Result<Subscription>;
}

/// Handle to an active subscription; cancels on drop.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription handle from a cancel action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancel the subscription explicitly.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Check whether a topic matches a subscription pattern.
///
/// A pattern matches its literal topic; a pattern ending in `*` matches
/// every topic starting with the part before the `*`.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}
