//! Input buffers: the mirroring side of unit exchange.

use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::buffer::allocate_unique_name;
use crate::config::BufferConfig;
use crate::context::Context;
use crate::dispatch::{HandlerId, HandlerRegistry};
use crate::error::{Error, Result};
use crate::event::{EventKind, EventMask, Locality, LocalityMask, UnitEvent};
use crate::transport::Subscription;
use crate::uid::Uid;
use crate::unit::{RemoteUnit, UnitRead, WriteRequestSink};
use crate::wire::{
    category_topic, node_topic, ResyncRequest, UnitSnapshot, WireMessage, WriteRequest,
};

/// A named buffer that mirrors units owned by other buffers.
///
/// The buffer subscribes to the categories it was given and keeps a
/// read-only [`RemoteUnit`] proxy per mirrored unit. Updates are applied
/// under revision fencing: the exactly-next revision applies immediately,
/// duplicates are dropped, and gaps are held in a bounded per-unit
/// reorder queue until they become contiguous, or until the buffer asks
/// the owner for a full-state snapshot. Handlers therefore only ever see
/// a consistent, monotonically-advancing view of each unit.
pub struct InputBuffer {
    inner: Arc<InputInner>,
}

/// Out-of-order messages held back for one unit.
#[derive(Default)]
struct PendingQueue {
    queued: BTreeMap<u64, WireMessage>,
    resync_requested: bool,
}

struct InputInner {
    component: String,
    unique_name: String,
    config: BufferConfig,
    context: Context,
    units: Mutex<IndexMap<Uid, RemoteUnit>>,
    handlers: HandlerRegistry<RemoteUnit>,
    pending: Mutex<HashMap<Uid, PendingQueue>>,
    categories: Mutex<IndexSet<String>>,
    subs: Mutex<Vec<Subscription>>,
    closed: AtomicBool,
}

impl InputBuffer {
    /// Create an input buffer mirroring the given categories.
    pub fn new<I, S>(component: impl Into<String>, categories: I, context: Context) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(component, categories, context, BufferConfig::default())
    }

    /// Create an input buffer with an explicit configuration.
    pub fn with_config<I, S>(
        component: impl Into<String>,
        categories: I,
        context: Context,
        config: BufferConfig,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let component = component.into();
        let unique_name = allocate_unique_name(&component, "IB");
        let inner = Arc::new(InputInner {
            component,
            unique_name,
            config,
            context,
            units: Mutex::new(IndexMap::new()),
            handlers: HandlerRegistry::new(),
            pending: Mutex::new(HashMap::new()),
            categories: Mutex::new(IndexSet::new()),
            subs: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        // Resync snapshots addressed to this buffer arrive here.
        let weak = Arc::downgrade(&inner);
        let sub = inner.context.transport().subscribe(
            &node_topic(&inner.unique_name),
            Arc::new(move |_topic, bytes| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_message(bytes);
                }
            }),
        )?;
        inner.subs.lock().unwrap().push(sub);

        let buffer = Self { inner };
        for category in categories {
            buffer.add_category_interest(category)?;
        }
        Ok(buffer)
    }

    /// The component name this buffer was created with.
    pub fn name(&self) -> &str {
        &self.inner.component
    }

    /// The process-unique name of this buffer.
    pub fn unique_name(&self) -> &str {
        &self.inner.unique_name
    }

    /// Categories this buffer mirrors.
    pub fn category_interests(&self) -> Vec<String> {
        self.inner
            .categories
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    /// Start mirroring an additional category.
    ///
    /// Idempotent: a category already subscribed is left untouched.
    pub fn add_category_interest(&self, category: impl Into<String>) -> Result<()> {
        self.inner.ensure_open()?;
        let category = category.into();
        {
            let mut categories = self.inner.categories.lock().unwrap();
            if !categories.insert(category.clone()) {
                return Ok(());
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let topic = category_topic(&self.inner.config.channel, &category);
        let sub = self.inner.context.transport().subscribe(
            &topic,
            Arc::new(move |_topic, bytes| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_message(bytes);
                }
            }),
        )?;
        self.inner.subs.lock().unwrap().push(sub);
        tracing::debug!(buffer = %self.inner.unique_name, category = %category, "category interest added");
        Ok(())
    }

    /// Get a mirrored unit by uid.
    pub fn get(&self, uid: &Uid) -> Option<RemoteUnit> {
        self.inner.units.lock().unwrap().get(uid).cloned()
    }

    /// All units currently mirrored.
    pub fn units(&self) -> Vec<RemoteUnit> {
        self.inner.units.lock().unwrap().values().cloned().collect()
    }

    /// Number of units currently mirrored.
    pub fn len(&self) -> usize {
        self.inner.units.lock().unwrap().len()
    }

    /// Check whether no units are mirrored.
    pub fn is_empty(&self) -> bool {
        self.inner.units.lock().unwrap().is_empty()
    }

    /// Register an event handler.
    ///
    /// The callback receives the mirror and the event; it runs on the
    /// transport dispatch thread and must not block indefinitely, since
    /// it delays delivery for every unit of this buffer.
    pub fn register_handler(
        &self,
        events: EventMask,
        locality: LocalityMask,
        callback: impl Fn(&RemoteUnit, &UnitEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.handlers.register(events, locality, callback)
    }

    /// Unregister a handler. Returns false if the id is unknown.
    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.unregister(id)
    }

    /// Close the buffer: cancel subscriptions and drop all mirrors.
    ///
    /// Idempotent. Called automatically on drop.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.subs.lock().unwrap().clear();
        inner.units.lock().unwrap().clear();
        inner.pending.lock().unwrap().clear();
        tracing::debug!(buffer = %inner.unique_name, "input buffer closed");
    }
}

impl Drop for InputBuffer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for InputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBuffer")
            .field("unique_name", &self.inner.unique_name)
            .field("categories", &self.category_interests())
            .field("units", &self.len())
            .finish()
    }
}

impl InputInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClosedBuffer(self.unique_name.clone()));
        }
        Ok(())
    }

    /// Entry point for everything arriving over the transport.
    ///
    /// Runs on the transport dispatch thread.
    fn handle_message(self: &Arc<Self>, bytes: &[u8]) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let message = match WireMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable message");
                return;
            }
        };
        match message {
            WireMessage::Added(snapshot) => self.handle_added(snapshot),
            WireMessage::Snapshot(snapshot) => self.handle_snapshot(snapshot),
            WireMessage::PayloadUpdate(_) | WireMessage::LinkUpdate(_) | WireMessage::Committed(_) => {
                self.apply_or_queue(message)
            }
            WireMessage::Retracted(retraction) => {
                self.handle_retracted(&retraction.uid, retraction.revision)
            }
            other @ (WireMessage::WriteRequest(_) | WireMessage::ResyncRequest(_)) => {
                tracing::debug!(kind = other.name(), "ignoring request not meant for a mirror");
            }
        }
    }

    /// Mirror a newly published unit.
    fn handle_added(self: &Arc<Self>, snapshot: UnitSnapshot) {
        let uid = snapshot.uid.clone();
        let mirror = {
            let mut units = self.units.lock().unwrap();
            if units.contains_key(&uid) {
                tracing::trace!(uid = %uid, "duplicate added message dropped");
                return;
            }
            let writeback: Weak<dyn WriteRequestSink> =
                Arc::downgrade(self) as Weak<dyn WriteRequestSink>;
            let mirror = RemoteUnit::from_snapshot(&snapshot, writeback);
            units.insert(uid.clone(), mirror.clone());
            mirror
        };
        tracing::debug!(uid = %uid, category = %snapshot.category, "unit mirrored");
        self.handlers.dispatch(
            &mirror,
            &UnitEvent::bare(
                uid.clone(),
                EventKind::Added,
                Locality::Remote,
                snapshot.revision,
            ),
        );
        if snapshot.committed {
            // Mirrored after the fact (late join or resync): deliver the
            // commit notification the observer would otherwise never see.
            self.handlers.dispatch(
                &mirror,
                &UnitEvent::bare(
                    uid.clone(),
                    EventKind::Committed,
                    Locality::Remote,
                    snapshot.revision,
                ),
            );
            if mirror.is_one_shot() {
                self.drop_unit(&uid);
                return;
            }
        }
        // Updates may have raced ahead of the added message.
        self.drain_pending(&mirror);
    }

    /// Apply an update if it is the exactly-next revision, queue it if it
    /// ran ahead, drop it if it is a duplicate.
    fn apply_or_queue(self: &Arc<Self>, message: WireMessage) {
        let uid = message.uid().clone();
        let (revision, origin) = match &message {
            WireMessage::PayloadUpdate(u) => (u.revision, u.origin.clone()),
            WireMessage::LinkUpdate(u) => (u.revision, u.origin.clone()),
            WireMessage::Committed(c) => (c.revision, c.origin.clone()),
            _ => return,
        };

        let mirror = self.units.lock().unwrap().get(&uid).cloned();
        let Some(mirror) = mirror else {
            // Update for a unit we never fully received.
            tracing::debug!(uid = %uid, "update for unmirrored unit");
            self.request_resync(&uid, &origin, 0);
            return;
        };

        let have = mirror.revision();
        if revision <= have {
            tracing::trace!(uid = %uid, revision, have, "duplicate update dropped");
            return;
        }
        if revision == have + 1 {
            self.apply_update(&mirror, message);
            self.drain_pending(&mirror);
            return;
        }

        // Revision gap: hold the update back until it becomes contiguous.
        tracing::debug!(
            error = %Error::OutOfOrderUpdate { uid: uid.clone(), have, got: revision },
            "queueing out-of-order update"
        );
        let overflow = {
            let mut pending = self.pending.lock().unwrap();
            let queue = pending.entry(uid.clone()).or_default();
            queue.queued.insert(revision, message);
            queue.queued.len() > self.config.pending_limit
        };
        if overflow {
            if self.config.resync {
                self.request_resync(&uid, &origin, have);
            } else {
                self.pending.lock().unwrap().remove(&uid);
                tracing::warn!(
                    uid = %uid,
                    "reorder queue overflow with resync disabled, dropping queued updates"
                );
            }
        }
    }

    /// Apply a revision-contiguous update and notify handlers.
    fn apply_update(self: &Arc<Self>, mirror: &RemoteUnit, message: WireMessage) {
        match message {
            WireMessage::PayloadUpdate(update) => {
                let deltas = mirror.apply_payload_update(update.revision, &update.change);
                let mut event = UnitEvent::bare(
                    update.uid,
                    EventKind::PayloadUpdated,
                    Locality::Remote,
                    update.revision,
                );
                event.payload_delta = deltas;
                self.handlers.dispatch(mirror, &event);
            }
            WireMessage::LinkUpdate(update) => {
                mirror.apply_link_update(update.revision, &update.deltas);
                let mut event = UnitEvent::bare(
                    update.uid,
                    EventKind::LinksUpdated,
                    Locality::Remote,
                    update.revision,
                );
                event.link_delta = update.deltas;
                self.handlers.dispatch(mirror, &event);
            }
            WireMessage::Committed(commission) => {
                mirror.apply_commission(commission.revision);
                self.handlers.dispatch(
                    mirror,
                    &UnitEvent::bare(
                        commission.uid.clone(),
                        EventKind::Committed,
                        Locality::Remote,
                        commission.revision,
                    ),
                );
                if mirror.is_one_shot() {
                    // One-shot mirrors do not outlive their commit.
                    self.drop_unit(&commission.uid);
                }
            }
            _ => {}
        }
    }

    /// Apply queued updates that have become contiguous.
    fn drain_pending(self: &Arc<Self>, mirror: &RemoteUnit) {
        let Some(uid) = mirror.uid() else { return };
        loop {
            let next = {
                let mut pending = self.pending.lock().unwrap();
                let Some(queue) = pending.get_mut(&uid) else {
                    return;
                };
                // Anything at or below the applied revision is stale now.
                let have = mirror.revision();
                queue.queued.retain(|revision, _| *revision > have);
                let message = queue.queued.remove(&(have + 1));
                if message.is_none() && queue.queued.is_empty() && !queue.resync_requested {
                    pending.remove(&uid);
                }
                message
            };
            match next {
                Some(message) => self.apply_update(mirror, message),
                None => return,
            }
        }
    }

    /// Adopt a full-state snapshot from the owner.
    ///
    /// The state jump is reported to handlers as ordinary update events
    /// carrying the net difference, keeping the observed view consistent.
    fn handle_snapshot(self: &Arc<Self>, snapshot: UnitSnapshot) {
        let uid = snapshot.uid.clone();
        let existing = self.units.lock().unwrap().get(&uid).cloned();

        let Some(mirror) = existing else {
            // Resync for a unit we never mirrored: treat as a late add.
            {
                let mut pending = self.pending.lock().unwrap();
                if let Some(queue) = pending.get_mut(&uid) {
                    queue.resync_requested = false;
                    queue.queued.retain(|revision, _| *revision > snapshot.revision);
                }
            }
            self.handle_added(snapshot);
            return;
        };

        if snapshot.revision <= mirror.revision() {
            tracing::trace!(uid = %uid, "stale resync snapshot dropped");
            self.clear_resync_flag(&uid);
            return;
        }

        let (payload_deltas, link_deltas, newly_committed) = mirror.apply_snapshot(&snapshot);
        {
            let mut pending = self.pending.lock().unwrap();
            if let Some(queue) = pending.get_mut(&uid) {
                queue.resync_requested = false;
                queue.queued.retain(|revision, _| *revision > snapshot.revision);
            }
        }
        tracing::debug!(uid = %uid, revision = snapshot.revision, "mirror resynced");

        if !payload_deltas.is_empty() {
            let mut event = UnitEvent::bare(
                uid.clone(),
                EventKind::PayloadUpdated,
                Locality::Remote,
                snapshot.revision,
            );
            event.payload_delta = payload_deltas;
            self.handlers.dispatch(&mirror, &event);
        }
        if !link_deltas.is_empty() {
            let mut event = UnitEvent::bare(
                uid.clone(),
                EventKind::LinksUpdated,
                Locality::Remote,
                snapshot.revision,
            );
            event.link_delta = link_deltas;
            self.handlers.dispatch(&mirror, &event);
        }
        if newly_committed {
            self.handlers.dispatch(
                &mirror,
                &UnitEvent::bare(
                    uid.clone(),
                    EventKind::Committed,
                    Locality::Remote,
                    snapshot.revision,
                ),
            );
            if mirror.is_one_shot() {
                self.drop_unit(&uid);
                return;
            }
        }
        self.drain_pending(&mirror);
    }

    /// Mark a mirror retracted, drop it, and notify handlers.
    fn handle_retracted(self: &Arc<Self>, uid: &Uid, revision: u64) {
        let mirror = self.units.lock().unwrap().shift_remove(uid);
        self.pending.lock().unwrap().remove(uid);
        let Some(mirror) = mirror else {
            tracing::trace!(uid = %uid, "retraction for unmirrored unit dropped");
            return;
        };
        mirror.apply_retraction(revision);
        self.handlers.dispatch(
            &mirror,
            &UnitEvent::bare(uid.clone(), EventKind::Retracted, Locality::Remote, revision),
        );
    }

    /// Ask the owner for a full-state snapshot (once per outage).
    fn request_resync(&self, uid: &Uid, origin: &str, have_revision: u64) {
        if !self.config.resync {
            tracing::warn!(uid = %uid, "resync disabled, cannot recover missing state");
            return;
        }
        {
            let mut pending = self.pending.lock().unwrap();
            let queue = pending.entry(uid.clone()).or_default();
            if queue.resync_requested {
                return;
            }
            queue.resync_requested = true;
        }
        tracing::debug!(uid = %uid, origin = %origin, have_revision, "requesting resync");
        let request = WireMessage::ResyncRequest(ResyncRequest {
            uid: uid.clone(),
            requester: self.unique_name.clone(),
            have_revision,
        });
        let result = request
            .encode()
            .and_then(|bytes| self.context.transport().publish(&node_topic(origin), bytes));
        if let Err(e) = result {
            tracing::warn!(error = %e, uid = %uid, "failed to send resync request");
            self.clear_resync_flag(uid);
        }
    }

    fn clear_resync_flag(&self, uid: &Uid) {
        if let Some(queue) = self.pending.lock().unwrap().get_mut(uid) {
            queue.resync_requested = false;
        }
    }

    fn drop_unit(&self, uid: &Uid) {
        self.units.lock().unwrap().shift_remove(uid);
        self.pending.lock().unwrap().remove(uid);
    }
}

impl WriteRequestSink for InputInner {
    fn unique_name(&self) -> String {
        self.unique_name.clone()
    }

    fn send_write_request(&self, origin: &str, request: WriteRequest) -> Result<()> {
        self.ensure_open()?;
        let message = WireMessage::WriteRequest(request);
        self.context
            .transport()
            .publish(&node_topic(origin), message.encode()?)
    }
}
