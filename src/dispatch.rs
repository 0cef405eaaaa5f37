//! Handler registries: per-buffer callback subscriptions.
//!
//! Both buffer kinds keep an ordered list of `(callback, event mask,
//! locality mask)` subscriptions. Dispatch runs in registration order;
//! a panicking handler is caught and logged, never aborting dispatch to
//! the handlers after it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::event::{EventMask, LocalityMask, UnitEvent};

/// Identifier of a registered handler, used to unregister it.
///
/// Returned by `register_handler`; closures have no identity of their
/// own to unregister by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct HandlerEntry<U> {
    id: u64,
    events: EventMask,
    locality: LocalityMask,
    callback: Box<dyn Fn(&U, &UnitEvent) + Send + Sync>,
}

/// Ordered list of handler subscriptions for one buffer.
///
/// `U` is the unit handle type passed to callbacks: the owned unit for
/// output buffers, the mirror for input buffers.
pub(crate) struct HandlerRegistry<U> {
    entries: Mutex<Vec<Arc<HandlerEntry<U>>>>,
    next_id: AtomicU64,
}

impl<U> HandlerRegistry<U> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Append a handler subscription, returning its id.
    pub(crate) fn register(
        &self,
        events: EventMask,
        locality: LocalityMask,
        callback: impl Fn(&U, &UnitEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().push(Arc::new(HandlerEntry {
            id,
            events,
            locality,
            callback: Box::new(callback),
        }));
        HandlerId(id)
    }

    /// Remove a handler subscription. Returns false if the id is unknown.
    pub(crate) fn unregister(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.id != id.0);
        entries.len() != before
    }

    /// Invoke all matching handlers, in registration order.
    ///
    /// Handlers run on the calling thread. A panic in one handler is
    /// caught and logged; the remaining handlers still run.
    pub(crate) fn dispatch(&self, unit: &U, event: &UnitEvent) {
        // Snapshot so handlers may register/unregister from a callback.
        let entries: Vec<Arc<HandlerEntry<U>>> =
            self.entries.lock().unwrap().iter().cloned().collect();

        for entry in entries {
            if !entry.events.accepts(event.kind) || !entry.locality.accepts(event.locality) {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| (entry.callback)(unit, event)));
            if result.is_err() {
                tracing::error!(
                    uid = %event.uid,
                    kind = event.kind.name(),
                    error = %Error::Handler(entry.id),
                    "event handler panicked, continuing dispatch"
                );
            }
        }
    }
}

impl<U> std::fmt::Debug for HandlerRegistry<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.entries.lock().unwrap().len())
            .finish()
    }
}
