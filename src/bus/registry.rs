//! Topic → handler registry
//!
//! Handlers are identified by the id handed out at subscription time, never by
//! comparing the handlers themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::topics;

/// Maintains `topic -> [(id, handler)]` in subscription order.
pub struct HandlerRegistry<H: ?Sized> {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(u64, Arc<H>)>>>,
}

impl<H: ?Sized> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a topic and return its id.
    pub fn subscribe(&self, topic: &str, handler: Arc<H>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, topic: &str, id: u64) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = handlers.get_mut(topic) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            handlers.remove(topic);
        }
        removed
    }

    /// Snapshot of the handlers for one topic.
    pub fn handlers(&self, topic: &str) -> Vec<Arc<H>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the handlers for `topic` followed by the wildcard handlers.
    ///
    /// A message published on the wildcard topic itself is delivered once.
    pub fn matching(&self, topic: &str) -> Vec<Arc<H>> {
        let mut handlers = self.handlers(topic);
        if topic != topics::ALL {
            handlers.extend(self.handlers(topics::ALL));
        }
        handlers
    }
}

impl<H: ?Sized> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
