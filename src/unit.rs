//! Incremental units: the addressable entities buffers exchange.
//!
//! A [`Unit`] is created by application code, filled with payload and
//! links, and added to an [`OutputBuffer`](crate::buffer::OutputBuffer),
//! which owns it from then on. Mutations are accepted while the unit is
//! uncommitted, each one bumping the revision counter and notifying
//! observers; [`commit`](Unit::commit) is the single irrevocable
//! transition after which the unit is frozen.
//!
//! A [`Message`] is a one-shot unit that auto-commits when added: one
//! added notification carrying the full payload, one committed
//! notification, nothing in between.
//!
//! A [`RemoteUnit`] is the read-only proxy an
//! [`InputBuffer`](crate::buffer::InputBuffer) keeps for a unit owned
//! elsewhere. Its mutating calls do not touch the mirror; they send write
//! requests to the owner, which applies and republishes them.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::{Error, Result};
use crate::event::{EventKind, Locality, UnitEvent};
use crate::links::{LinkDelta, LinkMap};
use crate::payload::{Payload, PayloadDelta};
use crate::uid::Uid;
use crate::wire::{PayloadChange, UnitSnapshot, WriteOp, WriteRequest};

/// Read access shared by owned units and remote mirrors.
pub trait UnitRead {
    /// The unit's uid; `None` until an owned unit is added to a buffer.
    fn uid(&self) -> Option<Uid>;

    /// The unit's category tag.
    fn category(&self) -> &str;

    /// Current revision counter.
    fn revision(&self) -> u64;

    /// Whether the unit has been committed.
    fn is_committed(&self) -> bool;

    /// Whether the unit has been retracted.
    fn is_retracted(&self) -> bool;

    /// Whether the unit rejects the remote-write path.
    fn is_read_only(&self) -> bool;

    /// Get one payload value.
    fn get(&self, key: &str) -> Option<String>;

    /// Snapshot of the payload (supports `payload()["key"]` indexing).
    fn payload(&self) -> Payload;

    /// Ordered targets of one link relation.
    fn links(&self, relation: &str) -> Vec<Uid>;

    /// Snapshot of all link relations.
    fn all_links(&self) -> LinkMap;
}

/// Publish surface an owned unit reaches its buffer of origin through.
///
/// Implemented by the output buffer internals. The `publish_*` methods
/// are invoked while the unit's state lock is held, so the per-unit wire
/// order always matches revision order; `dispatch_local` is invoked after
/// the lock is released.
pub(crate) trait OriginSink: Send + Sync {
    fn publish_payload_update(
        &self,
        uid: &Uid,
        revision: u64,
        writer: Option<&str>,
        category: &str,
        change: PayloadChange,
    ) -> Result<()>;
    fn publish_link_update(
        &self,
        uid: &Uid,
        revision: u64,
        writer: Option<&str>,
        category: &str,
        deltas: Vec<LinkDelta>,
    ) -> Result<()>;
    fn publish_commission(
        &self,
        uid: &Uid,
        revision: u64,
        writer: Option<&str>,
        category: &str,
    ) -> Result<()>;
    fn dispatch_local(&self, event: UnitEvent);
}

/// Write-request surface a mirror reaches its owner through.
///
/// Implemented by the input buffer internals.
pub(crate) trait WriteRequestSink: Send + Sync {
    fn unique_name(&self) -> String;
    fn send_write_request(&self, origin: &str, request: WriteRequest) -> Result<()>;
}

struct UnitState {
    uid: Option<Uid>,
    revision: u64,
    committed: bool,
    retracted: bool,
    payload: Payload,
    links: LinkMap,
    origin: Option<Weak<dyn OriginSink>>,
}

struct UnitInner {
    category: String,
    read_only: bool,
    one_shot: bool,
    state: Mutex<UnitState>,
}

/// An incremental unit owned by this process.
///
/// Cloning is cheap and yields another handle to the same unit. The unit
/// is freely mutable before it is added to a buffer (revision counting
/// starts immediately, publication starts at `add`).
#[derive(Clone)]
pub struct Unit {
    inner: Arc<UnitInner>,
}

impl Unit {
    /// Create a new, unattached unit with the given category.
    pub fn new(category: impl Into<String>) -> Self {
        Self::build(category.into(), false, false)
    }

    fn build(category: String, read_only: bool, one_shot: bool) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                category,
                read_only,
                one_shot,
                state: Mutex::new(UnitState {
                    uid: None,
                    revision: 0,
                    committed: false,
                    retracted: false,
                    payload: Payload::new(),
                    links: LinkMap::new(),
                    origin: None,
                }),
            }),
        }
    }

    /// Use a caller-chosen uid instead of one generated at `add` time.
    pub fn with_uid(self, uid: impl Into<Uid>) -> Self {
        self.state().uid = Some(uid.into());
        self
    }

    /// Mark the unit read-only: mirrors will reject the remote-write path.
    pub fn with_read_only(self) -> Self {
        // Unit handles are freely cloneable, so the flag lives outside the
        // state lock and is only settable before the first clone escapes.
        let inner = Arc::into_inner(self.inner)
            .expect("with_read_only must be called before the unit is shared");
        Self {
            inner: Arc::new(UnitInner {
                read_only: true,
                ..inner
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, UnitState> {
        self.inner.state.lock().unwrap()
    }

    fn uid_for_errors(state: &UnitState) -> Uid {
        state
            .uid
            .clone()
            .unwrap_or_else(|| Uid::from("unassigned"))
    }

    fn check_writable(state: &UnitState) -> Result<()> {
        if state.committed {
            return Err(Error::not_writable(
                Self::uid_for_errors(state),
                "unit is committed",
            ));
        }
        if state.retracted {
            return Err(Error::not_writable(
                Self::uid_for_errors(state),
                "unit is retracted",
            ));
        }
        Ok(())
    }

    /// Insert or update one payload key.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.set_with_writer(key.into(), value.into(), None)
    }

    pub(crate) fn set_with_writer(
        &self,
        key: String,
        value: String,
        writer: Option<&str>,
    ) -> Result<()> {
        let mut pending = None;
        {
            let mut state = self.state();
            Self::check_writable(&state)?;
            let delta = state.payload.set(key, value);
            state.revision += 1;
            self.publish_payload(
                &mut state,
                writer,
                PayloadChange::Delta(vec![delta.clone()]),
                vec![delta],
                &mut pending,
            )?;
        }
        self.flush(pending);
        Ok(())
    }

    /// Delete one payload key. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.delete_with_writer(key, None)
    }

    pub(crate) fn delete_with_writer(&self, key: &str, writer: Option<&str>) -> Result<()> {
        let mut pending = None;
        {
            let mut state = self.state();
            Self::check_writable(&state)?;
            let Some(delta) = state.payload.remove(key) else {
                return Ok(());
            };
            state.revision += 1;
            self.publish_payload(
                &mut state,
                writer,
                PayloadChange::Delta(vec![delta.clone()]),
                vec![delta],
                &mut pending,
            )?;
        }
        self.flush(pending);
        Ok(())
    }

    /// Replace the whole payload atomically.
    ///
    /// Observers receive one payload-update event carrying the batched
    /// deltas, never a flicker of per-key intermediate states.
    pub fn replace<K, V, I>(&self, entries: I) -> Result<()>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let entries: Vec<(String, String)> = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.replace_with_writer(entries, None)
    }

    pub(crate) fn replace_with_writer(
        &self,
        entries: Vec<(String, String)>,
        writer: Option<&str>,
    ) -> Result<()> {
        let mut pending = None;
        {
            let mut state = self.state();
            Self::check_writable(&state)?;
            let deltas = state.payload.replace(entries.clone());
            state.revision += 1;
            self.publish_payload(
                &mut state,
                writer,
                PayloadChange::Replace(entries),
                deltas,
                &mut pending,
            )?;
        }
        self.flush(pending);
        Ok(())
    }

    /// Append targets to a link relation, deduplicating.
    pub fn add_links<I>(&self, relation: &str, targets: I) -> Result<()>
    where
        I: IntoIterator<Item = Uid>,
    {
        let targets: Vec<Uid> = targets.into_iter().collect();
        self.add_links_with_writer(relation, &targets, None)
    }

    pub(crate) fn add_links_with_writer(
        &self,
        relation: &str,
        targets: &[Uid],
        writer: Option<&str>,
    ) -> Result<()> {
        let mut pending = None;
        {
            let mut state = self.state();
            Self::check_writable(&state)?;
            let Some(delta) = state.links.add(relation, targets) else {
                return Ok(());
            };
            state.revision += 1;
            self.publish_links(&mut state, writer, vec![delta], &mut pending)?;
        }
        self.flush(pending);
        Ok(())
    }

    /// Remove targets from a link relation.
    pub fn remove_links<I>(&self, relation: &str, targets: I) -> Result<()>
    where
        I: IntoIterator<Item = Uid>,
    {
        let targets: Vec<Uid> = targets.into_iter().collect();
        self.remove_links_with_writer(relation, &targets, None)
    }

    pub(crate) fn remove_links_with_writer(
        &self,
        relation: &str,
        targets: &[Uid],
        writer: Option<&str>,
    ) -> Result<()> {
        let mut pending = None;
        {
            let mut state = self.state();
            Self::check_writable(&state)?;
            let Some(delta) = state.links.remove(relation, targets) else {
                return Ok(());
            };
            state.revision += 1;
            self.publish_links(&mut state, writer, vec![delta], &mut pending)?;
        }
        self.flush(pending);
        Ok(())
    }

    /// Irrevocably commit the unit.
    ///
    /// All earlier events of this unit are already on the wire when the
    /// committed notification goes out (emission happens inside the same
    /// per-unit critical section as the mutation), so observers can never
    /// see the commit race ahead of the state it finalizes. After commit,
    /// every mutation fails with [`Error::NotWritable`] and a second
    /// `commit` fails with [`Error::AlreadyCommitted`].
    pub fn commit(&self) -> Result<()> {
        self.commit_with_writer(None)
    }

    pub(crate) fn commit_with_writer(&self, writer: Option<&str>) -> Result<()> {
        let mut pending = None;
        {
            let mut state = self.state();
            if state.committed {
                return Err(Error::AlreadyCommitted(Self::uid_for_errors(&state)));
            }
            if state.retracted {
                return Err(Error::not_writable(
                    Self::uid_for_errors(&state),
                    "unit is retracted",
                ));
            }
            state.revision += 1;
            state.committed = true;
            if let (Some(uid), Some(origin)) = (state.uid.clone(), Self::origin(&state)) {
                origin.publish_commission(&uid, state.revision, writer, &self.inner.category)?;
                pending = Some((
                    origin,
                    UnitEvent::bare(
                        uid,
                        EventKind::Committed,
                        Self::locality_of(writer),
                        state.revision,
                    ),
                ));
            }
        }
        self.flush(pending);
        Ok(())
    }

    /// Changes made by this process are local; changes applied on behalf
    /// of a remote write requester originated remotely.
    fn locality_of(writer: Option<&str>) -> Locality {
        if writer.is_some() {
            Locality::Remote
        } else {
            Locality::Local
        }
    }

    fn origin(state: &UnitState) -> Option<Arc<dyn OriginSink>> {
        state.origin.as_ref().and_then(Weak::upgrade)
    }

    fn publish_payload(
        &self,
        state: &mut UnitState,
        writer: Option<&str>,
        change: PayloadChange,
        deltas: Vec<PayloadDelta>,
        pending: &mut Option<(Arc<dyn OriginSink>, UnitEvent)>,
    ) -> Result<()> {
        if let (Some(uid), Some(origin)) = (state.uid.clone(), Self::origin(state)) {
            origin.publish_payload_update(
                &uid,
                state.revision,
                writer,
                &self.inner.category,
                change,
            )?;
            let mut event = UnitEvent::bare(
                uid,
                EventKind::PayloadUpdated,
                Self::locality_of(writer),
                state.revision,
            );
            event.payload_delta = deltas;
            *pending = Some((origin, event));
        }
        Ok(())
    }

    fn publish_links(
        &self,
        state: &mut UnitState,
        writer: Option<&str>,
        deltas: Vec<LinkDelta>,
        pending: &mut Option<(Arc<dyn OriginSink>, UnitEvent)>,
    ) -> Result<()> {
        if let (Some(uid), Some(origin)) = (state.uid.clone(), Self::origin(state)) {
            origin.publish_link_update(
                &uid,
                state.revision,
                writer,
                &self.inner.category,
                deltas.clone(),
            )?;
            let mut event = UnitEvent::bare(
                uid,
                EventKind::LinksUpdated,
                Self::locality_of(writer),
                state.revision,
            );
            event.link_delta = deltas;
            *pending = Some((origin, event));
        }
        Ok(())
    }

    /// Run local handler dispatch outside the unit's critical section.
    fn flush(&self, pending: Option<(Arc<dyn OriginSink>, UnitEvent)>) {
        if let Some((origin, event)) = pending {
            origin.dispatch_local(event);
        }
    }

    /// Whether this unit auto-commits on buffer attachment.
    pub fn is_one_shot(&self) -> bool {
        self.inner.one_shot
    }

    /// Whether this unit has been added to an output buffer.
    pub fn is_published(&self) -> bool {
        self.state().origin.is_some()
    }

    /// Attach the unit to its buffer of origin, assigning a uid if absent.
    ///
    /// `register` runs inside the unit's critical section with the
    /// publication snapshot: it claims the uid, stores the unit, and
    /// publishes the added message, so no concurrent mutation can reach
    /// the wire ahead of it. The unit only becomes attached if `register`
    /// succeeds. Fails with [`Error::DuplicateUid`] if already attached.
    pub(crate) fn attach(
        &self,
        origin: Weak<dyn OriginSink>,
        origin_name: &str,
        register: impl FnOnce(&UnitSnapshot) -> Result<()>,
    ) -> Result<(Uid, u64)> {
        let mut state = self.state();
        if state.origin.is_some() {
            return Err(Error::DuplicateUid(Self::uid_for_errors(&state)));
        }
        let uid = state.uid.get_or_insert_with(Uid::generate).clone();
        let snapshot = self.snapshot_locked(&state, uid.clone(), origin_name);
        register(&snapshot)?;
        state.origin = Some(origin);
        Ok((uid, state.revision))
    }

    /// Mark the unit retracted and detach it from its buffer.
    ///
    /// `publish` runs inside the unit's critical section with the uid and
    /// the retraction revision. Returns the same pair for the local event.
    pub(crate) fn retract(
        &self,
        publish: impl FnOnce(&Uid, u64) -> Result<()>,
    ) -> Result<(Uid, u64)> {
        let mut state = self.state();
        let uid = Self::uid_for_errors(&state);
        state.revision += 1;
        state.retracted = true;
        state.origin = None;
        publish(&uid, state.revision)?;
        Ok((uid, state.revision))
    }

    /// Snapshot the full unit state for the wire.
    pub(crate) fn snapshot(&self, origin_name: &str) -> Option<UnitSnapshot> {
        let state = self.state();
        let uid = state.uid.clone()?;
        Some(self.snapshot_locked(&state, uid, origin_name))
    }

    fn snapshot_locked(&self, state: &UnitState, uid: Uid, origin_name: &str) -> UnitSnapshot {
        UnitSnapshot {
            uid,
            category: self.inner.category.clone(),
            origin: origin_name.to_owned(),
            revision: state.revision,
            committed: state.committed,
            read_only: self.inner.read_only,
            one_shot: self.inner.one_shot,
            payload: state.payload.to_entries(),
            links: state.links.to_entries(),
        }
    }
}

impl UnitRead for Unit {
    fn uid(&self) -> Option<Uid> {
        self.state().uid.clone()
    }

    fn category(&self) -> &str {
        &self.inner.category
    }

    fn revision(&self) -> u64 {
        self.state().revision
    }

    fn is_committed(&self) -> bool {
        self.state().committed
    }

    fn is_retracted(&self) -> bool {
        self.state().retracted
    }

    fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    fn get(&self, key: &str) -> Option<String> {
        self.state().payload.get(key).map(str::to_owned)
    }

    fn payload(&self) -> Payload {
        self.state().payload.clone()
    }

    fn links(&self, relation: &str) -> Vec<Uid> {
        self.state().links.links(relation).cloned().collect()
    }

    fn all_links(&self) -> LinkMap {
        self.state().links.clone()
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Unit")
            .field("uid", &state.uid)
            .field("category", &self.inner.category)
            .field("revision", &state.revision)
            .field("committed", &state.committed)
            .finish()
    }
}

/// A one-shot unit that auto-commits when added to a buffer.
///
/// Observers receive exactly one added notification carrying the full
/// initial payload, immediately followed by one committed notification:
/// the general two-phase lifecycle collapsed into a single atomic publish
/// for fire-and-forget events. Dereferences to [`Unit`] for payload and
/// link access before publication.
#[derive(Clone)]
pub struct Message {
    unit: Unit,
}

impl Message {
    /// Create a new one-shot unit with the given category.
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            unit: Unit::build(category.into(), false, true),
        }
    }

    /// The underlying unit handle.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }
}

impl std::ops::Deref for Message {
    type Target = Unit;

    fn deref(&self) -> &Unit {
        &self.unit
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Message").field(&self.unit).finish()
    }
}

struct MirrorState {
    revision: u64,
    committed: bool,
    retracted: bool,
    payload: Payload,
    links: LinkMap,
}

struct RemoteUnitInner {
    uid: Uid,
    category: String,
    origin: String,
    read_only: bool,
    one_shot: bool,
    state: Mutex<MirrorState>,
    writeback: Weak<dyn WriteRequestSink>,
}

/// Read-only proxy for a unit owned by another process.
///
/// Mutating calls never modify the mirror directly; they send a write
/// request to the unit's owner, which applies the change through its
/// normal local path and republishes the resulting delta. The mirror then
/// catches up like any other observer. Mutations are rejected locally
/// when the mirror already knows the unit is committed, retracted, or
/// read-only.
#[derive(Clone)]
pub struct RemoteUnit {
    inner: Arc<RemoteUnitInner>,
}

impl RemoteUnit {
    pub(crate) fn from_snapshot(
        snapshot: &UnitSnapshot,
        writeback: Weak<dyn WriteRequestSink>,
    ) -> Self {
        let mut payload = Payload::new();
        payload.overwrite(snapshot.payload.clone());
        let mut links = LinkMap::new();
        links.overwrite(snapshot.links.clone());
        Self {
            inner: Arc::new(RemoteUnitInner {
                uid: snapshot.uid.clone(),
                category: snapshot.category.clone(),
                origin: snapshot.origin.clone(),
                read_only: snapshot.read_only,
                one_shot: snapshot.one_shot,
                state: Mutex::new(MirrorState {
                    revision: snapshot.revision,
                    committed: snapshot.committed,
                    retracted: false,
                    payload,
                    links,
                }),
                writeback,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MirrorState> {
        self.inner.state.lock().unwrap()
    }

    /// Unique name of the output buffer owning the mirrored unit.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    /// Whether the mirrored unit is a one-shot message.
    pub fn is_one_shot(&self) -> bool {
        self.inner.one_shot
    }

    fn check_requestable(&self) -> Result<()> {
        if self.inner.read_only {
            return Err(Error::not_writable(
                self.inner.uid.clone(),
                "unit is read-only for non-owners",
            ));
        }
        let state = self.state();
        if state.committed {
            return Err(Error::not_writable(
                self.inner.uid.clone(),
                "unit is committed",
            ));
        }
        if state.retracted {
            return Err(Error::not_writable(
                self.inner.uid.clone(),
                "unit is retracted",
            ));
        }
        Ok(())
    }

    fn request(&self, op: WriteOp) -> Result<()> {
        let sink = self
            .inner
            .writeback
            .upgrade()
            .ok_or_else(|| Error::ClosedBuffer("input buffer dropped".into()))?;
        sink.send_write_request(
            &self.inner.origin,
            WriteRequest {
                uid: self.inner.uid.clone(),
                requester: sink.unique_name(),
                op,
            },
        )
    }

    /// Ask the owner to insert or update one payload key.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.check_requestable()?;
        self.request(WriteOp::SetPayload {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Ask the owner to delete one payload key.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.check_requestable()?;
        self.request(WriteOp::DeletePayload { key: key.into() })
    }

    /// Ask the owner to replace the whole payload.
    pub fn replace<K, V, I>(&self, entries: I) -> Result<()>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.check_requestable()?;
        self.request(WriteOp::ReplacePayload {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Ask the owner to append link targets.
    pub fn add_links<I>(&self, relation: &str, targets: I) -> Result<()>
    where
        I: IntoIterator<Item = Uid>,
    {
        self.check_requestable()?;
        self.request(WriteOp::AddLinks {
            relation: relation.to_owned(),
            targets: targets.into_iter().collect(),
        })
    }

    /// Ask the owner to remove link targets.
    pub fn remove_links<I>(&self, relation: &str, targets: I) -> Result<()>
    where
        I: IntoIterator<Item = Uid>,
    {
        self.check_requestable()?;
        self.request(WriteOp::RemoveLinks {
            relation: relation.to_owned(),
            targets: targets.into_iter().collect(),
        })
    }

    /// Ask the owner to commit the unit.
    pub fn commit(&self) -> Result<()> {
        if self.state().committed {
            return Err(Error::AlreadyCommitted(self.inner.uid.clone()));
        }
        self.check_requestable()?;
        self.request(WriteOp::Commit)
    }

    /// Apply a payload update from the owner, returning the event deltas.
    pub(crate) fn apply_payload_update(
        &self,
        revision: u64,
        change: &PayloadChange,
    ) -> Vec<PayloadDelta> {
        let mut state = self.state();
        state.revision = revision;
        match change {
            PayloadChange::Delta(deltas) => {
                for delta in deltas {
                    state.payload.apply(delta);
                }
                deltas.clone()
            }
            PayloadChange::Replace(entries) => {
                let deltas = state.payload.diff_against(entries);
                state.payload.overwrite(entries.clone());
                deltas
            }
        }
    }

    /// Apply a link update from the owner.
    pub(crate) fn apply_link_update(&self, revision: u64, deltas: &[LinkDelta]) {
        let mut state = self.state();
        state.revision = revision;
        for delta in deltas {
            state.links.apply(delta);
        }
    }

    /// Apply a commit notification from the owner.
    pub(crate) fn apply_commission(&self, revision: u64) {
        let mut state = self.state();
        state.revision = revision;
        state.committed = true;
    }

    /// Apply a retraction notification from the owner.
    pub(crate) fn apply_retraction(&self, revision: u64) {
        let mut state = self.state();
        state.revision = revision;
        state.retracted = true;
    }

    /// Replace the mirror state wholesale from a resync snapshot.
    ///
    /// Returns the net payload and link deltas of the transition plus
    /// whether the snapshot committed the unit, so the caller can report
    /// the jump as ordinary update events.
    pub(crate) fn apply_snapshot(
        &self,
        snapshot: &UnitSnapshot,
    ) -> (Vec<PayloadDelta>, Vec<LinkDelta>, bool) {
        let mut state = self.state();
        let payload_deltas = state.payload.diff_against(&snapshot.payload);
        let link_deltas = state.links.diff_against(&snapshot.links);
        let newly_committed = snapshot.committed && !state.committed;

        state.payload.overwrite(snapshot.payload.clone());
        state.links.overwrite(snapshot.links.clone());
        state.revision = snapshot.revision;
        state.committed = snapshot.committed;
        (payload_deltas, link_deltas, newly_committed)
    }
}

impl UnitRead for RemoteUnit {
    fn uid(&self) -> Option<Uid> {
        Some(self.inner.uid.clone())
    }

    fn category(&self) -> &str {
        &self.inner.category
    }

    fn revision(&self) -> u64 {
        self.state().revision
    }

    fn is_committed(&self) -> bool {
        self.state().committed
    }

    fn is_retracted(&self) -> bool {
        self.state().retracted
    }

    fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    fn get(&self, key: &str) -> Option<String> {
        self.state().payload.get(key).map(str::to_owned)
    }

    fn payload(&self) -> Payload {
        self.state().payload.clone()
    }

    fn links(&self, relation: &str) -> Vec<Uid> {
        self.state().links.links(relation).cloned().collect()
    }

    fn all_links(&self) -> LinkMap {
        self.state().links.clone()
    }
}

impl std::fmt::Debug for RemoteUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("RemoteUnit")
            .field("uid", &self.inner.uid)
            .field("category", &self.inner.category)
            .field("origin", &self.inner.origin)
            .field("revision", &state.revision)
            .field("committed", &state.committed)
            .finish()
    }
}
