//! Output buffers: the owning side of unit exchange.

use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::allocate_unique_name;
use crate::config::BufferConfig;
use crate::context::Context;
use crate::dispatch::{HandlerId, HandlerRegistry};
use crate::error::{Error, Result};
use crate::event::{EventKind, EventMask, Locality, LocalityMask, UnitEvent};
use crate::links::LinkDelta;
use crate::uid::Uid;
use crate::unit::{OriginSink, Unit, UnitRead};
use crate::wire::{
    category_topic, node_topic, Commission, LinkUpdate, PayloadChange, PayloadUpdate,
    ResyncRequest, Retraction, WireMessage, WriteOp, WriteRequest,
};

/// A named buffer that originates and owns units.
///
/// Adding a unit registers ownership, assigns a uid if the unit has none,
/// and publishes it; from then on every accepted mutation of the unit is
/// broadcast to mirroring input buffers. The buffer also serves the
/// owner-side half of remote write arbitration: write requests arriving
/// on its node topic are applied through the normal local mutation path
/// and republished like any other change.
///
/// Closing the buffer retracts all units it still owns.
pub struct OutputBuffer {
    inner: Arc<OutputInner>,
}

pub(crate) struct OutputInner {
    component: String,
    unique_name: String,
    config: BufferConfig,
    context: Context,
    units: Mutex<IndexMap<Uid, Unit>>,
    handlers: HandlerRegistry<Unit>,
    closed: AtomicBool,
    request_sub: Mutex<Option<crate::transport::Subscription>>,
}

impl OutputBuffer {
    /// Create an output buffer with the default configuration.
    pub fn new(component: impl Into<String>, context: Context) -> Result<Self> {
        Self::with_config(component, context, BufferConfig::default())
    }

    /// Create an output buffer with an explicit configuration.
    pub fn with_config(
        component: impl Into<String>,
        context: Context,
        config: BufferConfig,
    ) -> Result<Self> {
        let component = component.into();
        let unique_name = allocate_unique_name(&component, "OB");
        let inner = Arc::new(OutputInner {
            component,
            unique_name,
            config,
            context,
            units: Mutex::new(IndexMap::new()),
            handlers: HandlerRegistry::new(),
            closed: AtomicBool::new(false),
            request_sub: Mutex::new(None),
        });

        // Write and resync requests from non-owners arrive here.
        let weak = Arc::downgrade(&inner);
        let sub = inner.context.transport().subscribe(
            &node_topic(&inner.unique_name),
            Arc::new(move |_topic, bytes| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_request(bytes);
                }
            }),
        )?;
        *inner.request_sub.lock().unwrap() = Some(sub);

        Ok(Self { inner })
    }

    /// The component name this buffer was created with.
    pub fn name(&self) -> &str {
        &self.inner.component
    }

    /// The process-unique name of this buffer.
    pub fn unique_name(&self) -> &str {
        &self.inner.unique_name
    }

    /// The channel this buffer publishes on.
    pub fn channel(&self) -> &str {
        &self.inner.config.channel
    }

    /// Add a unit, taking ownership and publishing it.
    ///
    /// Assigns a generated uid if the unit has none. Returns the uid.
    /// Fails with [`Error::DuplicateUid`] if the unit is already attached
    /// to a buffer or its uid is already owned in this process. A one-shot
    /// [`Message`](crate::Message) is committed immediately after
    /// publication.
    pub fn add(&self, unit: &Unit) -> Result<Uid> {
        self.inner.ensure_open()?;
        let inner = &self.inner;

        let origin: Arc<dyn OriginSink> = Arc::clone(inner) as Arc<dyn OriginSink>;
        let (uid, revision) =
            unit.attach(Arc::downgrade(&origin), &inner.unique_name, |snapshot| {
                let bytes = WireMessage::Added(snapshot.clone()).encode()?;
                inner.context.claim_uid(&snapshot.uid, &inner.unique_name)?;
                inner
                    .units
                    .lock()
                    .unwrap()
                    .insert(snapshot.uid.clone(), unit.clone());
                let topic = category_topic(&inner.config.channel, &snapshot.category);
                if let Err(e) = inner.context.transport().publish(&topic, bytes) {
                    inner.units.lock().unwrap().shift_remove(&snapshot.uid);
                    inner.context.release_uid(&snapshot.uid);
                    return Err(e);
                }
                Ok(())
            })?;

        tracing::debug!(uid = %uid, category = unit.category(), "unit published");
        inner.handlers.dispatch(
            unit,
            &UnitEvent::bare(uid.clone(), EventKind::Added, Locality::Local, revision),
        );

        if unit.is_one_shot() && !unit.is_committed() {
            unit.commit()?;
        }
        Ok(uid)
    }

    /// Retract a unit: detach it and notify all observers.
    ///
    /// Only the buffer of origin may retract; fails with
    /// [`Error::UnknownUnit`] otherwise. The retracted unit stays
    /// inspectable in memory but rejects all further mutation.
    pub fn remove(&self, unit: &Unit) -> Result<()> {
        self.inner.ensure_open()?;
        let inner = &self.inner;

        let uid = match unit.uid() {
            Some(uid) if inner.units.lock().unwrap().contains_key(&uid) => uid,
            Some(uid) => return Err(Error::UnknownUnit(uid)),
            None => return Err(Error::UnknownUnit(Uid::from("unassigned"))),
        };

        let topic = category_topic(&inner.config.channel, unit.category());
        let (uid, revision) = unit.retract(|uid, revision| {
            let message = WireMessage::Retracted(Retraction {
                uid: uid.clone(),
                revision,
            });
            inner.context.transport().publish(&topic, message.encode()?)
        })?;

        inner.units.lock().unwrap().shift_remove(&uid);
        inner.context.release_uid(&uid);
        tracing::debug!(uid = %uid, "unit retracted");
        inner.handlers.dispatch(
            unit,
            &UnitEvent::bare(uid, EventKind::Retracted, Locality::Local, revision),
        );
        Ok(())
    }

    /// Get an owned unit by uid.
    pub fn get(&self, uid: &Uid) -> Option<Unit> {
        self.inner.units.lock().unwrap().get(uid).cloned()
    }

    /// All units currently owned by this buffer.
    pub fn units(&self) -> Vec<Unit> {
        self.inner.units.lock().unwrap().values().cloned().collect()
    }

    /// Number of units currently owned.
    pub fn len(&self) -> usize {
        self.inner.units.lock().unwrap().len()
    }

    /// Check whether the buffer owns no units.
    pub fn is_empty(&self) -> bool {
        self.inner.units.lock().unwrap().is_empty()
    }

    /// Register an event handler.
    ///
    /// The callback receives the affected unit and the event; it runs on
    /// the thread the change was made on (local events) or the transport
    /// dispatch thread (remote-triggered events, e.g. applied write
    /// requests), and must not block indefinitely.
    pub fn register_handler(
        &self,
        events: EventMask,
        locality: LocalityMask,
        callback: impl Fn(&Unit, &UnitEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.handlers.register(events, locality, callback)
    }

    /// Unregister a handler. Returns false if the id is unknown.
    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.unregister(id)
    }

    /// Close the buffer: stop serving requests and retract all units.
    ///
    /// Idempotent. Called automatically on drop.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.request_sub.lock().unwrap().take();

        let units: Vec<Unit> = {
            let mut store = inner.units.lock().unwrap();
            store.drain(..).map(|(_, unit)| unit).collect()
        };
        for unit in units {
            let topic = category_topic(&inner.config.channel, unit.category());
            let result = unit.retract(|uid, revision| {
                let message = WireMessage::Retracted(Retraction {
                    uid: uid.clone(),
                    revision,
                });
                inner.context.transport().publish(&topic, message.encode()?)
            });
            match result {
                Ok((uid, revision)) => {
                    inner.context.release_uid(&uid);
                    inner.handlers.dispatch(
                        &unit,
                        &UnitEvent::bare(uid, EventKind::Retracted, Locality::Local, revision),
                    );
                }
                Err(e) => tracing::warn!(error = %e, "failed to retract unit on close"),
            }
        }
        tracing::debug!(buffer = %inner.unique_name, "output buffer closed");
    }
}

impl Drop for OutputBuffer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("unique_name", &self.inner.unique_name)
            .field("units", &self.len())
            .finish()
    }
}

impl OutputInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClosedBuffer(self.unique_name.clone()));
        }
        Ok(())
    }

    fn publish_on_category(&self, category: &str, message: &WireMessage) -> Result<()> {
        self.ensure_open()?;
        let topic = category_topic(&self.config.channel, category);
        self.context.transport().publish(&topic, message.encode()?)
    }

    /// Handle a directed message on this buffer's node topic.
    fn handle_request(&self, bytes: &[u8]) {
        let message = match WireMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable node message");
                return;
            }
        };
        match message {
            WireMessage::WriteRequest(request) => self.handle_write_request(request),
            WireMessage::ResyncRequest(request) => self.handle_resync_request(request),
            other => {
                tracing::debug!(kind = other.name(), "ignoring unexpected node message");
            }
        }
    }

    /// Apply a non-owner's mutation through the normal local path.
    ///
    /// Serializes concurrent remote writers through this single owner; a
    /// request for a committed, retracted, or read-only unit is rejected
    /// here and logged, not propagated (the bus carries no reply channel).
    fn handle_write_request(&self, request: WriteRequest) {
        let unit = self.units.lock().unwrap().get(&request.uid).cloned();
        let Some(unit) = unit else {
            tracing::warn!(
                error = %Error::UnknownUnit(request.uid),
                requester = %request.requester,
                "write request for unit this buffer does not own"
            );
            return;
        };
        if unit.is_read_only() {
            tracing::warn!(
                uid = %request.uid,
                requester = %request.requester,
                "write request for read-only unit rejected"
            );
            return;
        }

        let writer = Some(request.requester.as_str());
        let result = match request.op {
            WriteOp::SetPayload { key, value } => unit.set_with_writer(key, value, writer),
            WriteOp::DeletePayload { key } => unit.delete_with_writer(&key, writer),
            WriteOp::ReplacePayload { entries } => unit.replace_with_writer(entries, writer),
            WriteOp::AddLinks { relation, targets } => {
                unit.add_links_with_writer(&relation, &targets, writer)
            }
            WriteOp::RemoveLinks { relation, targets } => {
                unit.remove_links_with_writer(&relation, &targets, writer)
            }
            WriteOp::Commit => unit.commit_with_writer(writer),
        };
        if let Err(e) = result {
            tracing::debug!(
                error = %e,
                requester = %request.requester,
                "write request rejected"
            );
        }
    }

    /// Reply to a resync request with a full-state snapshot.
    fn handle_resync_request(&self, request: ResyncRequest) {
        let unit = self.units.lock().unwrap().get(&request.uid).cloned();
        let Some(unit) = unit else {
            tracing::warn!(
                error = %Error::UnknownUnit(request.uid),
                requester = %request.requester,
                "resync request for unit this buffer does not own"
            );
            return;
        };
        let Some(snapshot) = unit.snapshot(&self.unique_name) else {
            return;
        };
        tracing::debug!(
            uid = %snapshot.uid,
            revision = snapshot.revision,
            requester = %request.requester,
            "serving resync snapshot"
        );
        let reply = WireMessage::Snapshot(snapshot);
        match reply.encode() {
            Ok(bytes) => {
                if let Err(e) = self
                    .context
                    .transport()
                    .publish(&node_topic(&request.requester), bytes)
                {
                    tracing::warn!(error = %e, "failed to send resync snapshot");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode resync snapshot"),
        }
    }
}

impl OriginSink for OutputInner {
    fn publish_payload_update(
        &self,
        uid: &Uid,
        revision: u64,
        writer: Option<&str>,
        category: &str,
        change: PayloadChange,
    ) -> Result<()> {
        let message = WireMessage::PayloadUpdate(PayloadUpdate {
            uid: uid.clone(),
            revision,
            origin: self.unique_name.clone(),
            writer: writer.unwrap_or(&self.unique_name).to_owned(),
            change,
        });
        self.publish_on_category(category, &message)
    }

    fn publish_link_update(
        &self,
        uid: &Uid,
        revision: u64,
        writer: Option<&str>,
        category: &str,
        deltas: Vec<LinkDelta>,
    ) -> Result<()> {
        let message = WireMessage::LinkUpdate(LinkUpdate {
            uid: uid.clone(),
            revision,
            origin: self.unique_name.clone(),
            writer: writer.unwrap_or(&self.unique_name).to_owned(),
            deltas,
        });
        self.publish_on_category(category, &message)
    }

    fn publish_commission(
        &self,
        uid: &Uid,
        revision: u64,
        writer: Option<&str>,
        category: &str,
    ) -> Result<()> {
        let message = WireMessage::Committed(Commission {
            uid: uid.clone(),
            revision,
            origin: self.unique_name.clone(),
            writer: writer.unwrap_or(&self.unique_name).to_owned(),
        });
        self.publish_on_category(category, &message)
    }

    fn dispatch_local(&self, event: UnitEvent) {
        let unit = self.units.lock().unwrap().get(&event.uid).cloned();
        if let Some(unit) = unit {
            self.handlers.dispatch(&unit, &event);
        }
    }
}
