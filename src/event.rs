//! Unit change events and subscription filters.
//!
//! Every accepted mutation of a unit is reported as a [`UnitEvent`]:
//! to local handlers on the owning side, and to remote handlers on every
//! mirroring side. Handlers subscribe with an [`EventMask`] (which kinds)
//! and a [`LocalityMask`] (did the change originate in this process).

use crate::links::LinkDelta;
use crate::payload::PayloadDelta;
use crate::uid::Uid;

/// Kind of a unit change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A unit became visible in the buffer (published or mirrored).
    Added,
    /// One payload-update: a set, a delete, or one batched replace.
    PayloadUpdated,
    /// One link-update: an add_links or remove_links call.
    LinksUpdated,
    /// The unit was irrevocably committed.
    Committed,
    /// The unit was retracted by its buffer of origin.
    Retracted,
}

impl EventKind {
    /// The mask bit selecting this kind.
    pub const fn mask(self) -> EventMask {
        match self {
            EventKind::Added => EventMask::ADDED,
            EventKind::PayloadUpdated => EventMask::PAYLOAD_UPDATED,
            EventKind::LinksUpdated => EventMask::LINKS_UPDATED,
            EventKind::Committed => EventMask::COMMITTED,
            EventKind::Retracted => EventMask::RETRACTED,
        }
    }

    /// Get a human-readable name for this event kind.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::PayloadUpdated => "payload-updated",
            EventKind::LinksUpdated => "links-updated",
            EventKind::Committed => "committed",
            EventKind::Retracted => "retracted",
        }
    }
}

/// Bit mask selecting event kinds for a handler subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMask(u32);

impl EventMask {
    /// Unit added / mirrored.
    pub const ADDED: Self = Self(1 << 0);
    /// Payload updated.
    pub const PAYLOAD_UPDATED: Self = Self(1 << 1);
    /// Links updated.
    pub const LINKS_UPDATED: Self = Self(1 << 2);
    /// Unit committed.
    pub const COMMITTED: Self = Self(1 << 3);
    /// Unit retracted.
    pub const RETRACTED: Self = Self(1 << 4);
    /// All event kinds.
    pub const ALL: Self = Self(0b11111);

    /// Create an empty mask.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Check if empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if the mask contains all bits of `other`.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of two masks.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Check whether events of `kind` pass this mask.
    pub const fn accepts(self, kind: EventKind) -> bool {
        self.contains(kind.mask())
    }
}

impl std::ops::BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Where a change originated, relative to the observing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locality {
    /// The change was made by this process.
    Local,
    /// The change arrived over the transport.
    Remote,
}

/// Filter selecting event localities for a handler subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalityMask(u32);

impl LocalityMask {
    /// Only locally-originated events.
    pub const LOCAL: Self = Self(1 << 0);
    /// Only remotely-originated events.
    pub const REMOTE: Self = Self(1 << 1);
    /// Events of either origin.
    pub const ANY: Self = Self(0b11);

    /// Check whether events with `locality` pass this mask.
    pub const fn accepts(self, locality: Locality) -> bool {
        match locality {
            Locality::Local => (self.0 & Self::LOCAL.0) != 0,
            Locality::Remote => (self.0 & Self::REMOTE.0) != 0,
        }
    }
}

impl std::ops::BitOr for LocalityMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// An observed change to one unit.
///
/// Events are immutable records; the deltas describe exactly what changed
/// in the transition to `revision`. A batched `replace` produces a single
/// event with several payload deltas, never one event per key.
#[derive(Debug, Clone)]
pub struct UnitEvent {
    /// Uid of the affected unit.
    pub uid: Uid,
    /// What happened.
    pub kind: EventKind,
    /// Whether the change originated in this process.
    pub locality: Locality,
    /// Unit revision after the change was applied.
    pub revision: u64,
    /// Payload changes carried by this event, if any.
    pub payload_delta: Vec<PayloadDelta>,
    /// Link changes carried by this event, if any.
    pub link_delta: Vec<LinkDelta>,
}

impl UnitEvent {
    /// Create an event without deltas (added, committed, retracted).
    pub(crate) fn bare(uid: Uid, kind: EventKind, locality: Locality, revision: u64) -> Self {
        Self {
            uid,
            kind,
            locality,
            revision,
            payload_delta: Vec::new(),
            link_delta: Vec::new(),
        }
    }

    /// Check whether the change originated in this process.
    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mask_accepts() {
        let mask = EventMask::PAYLOAD_UPDATED | EventMask::COMMITTED;
        assert!(mask.accepts(EventKind::PayloadUpdated));
        assert!(mask.accepts(EventKind::Committed));
        assert!(!mask.accepts(EventKind::Added));
        assert!(!mask.accepts(EventKind::LinksUpdated));
    }

    #[test]
    fn test_all_mask_covers_every_kind() {
        for kind in [
            EventKind::Added,
            EventKind::PayloadUpdated,
            EventKind::LinksUpdated,
            EventKind::Committed,
            EventKind::Retracted,
        ] {
            assert!(EventMask::ALL.accepts(kind), "missing {}", kind.name());
        }
    }

    #[test]
    fn test_locality_mask() {
        assert!(LocalityMask::LOCAL.accepts(Locality::Local));
        assert!(!LocalityMask::LOCAL.accepts(Locality::Remote));
        assert!(LocalityMask::REMOTE.accepts(Locality::Remote));
        assert!(LocalityMask::ANY.accepts(Locality::Local));
        assert!(LocalityMask::ANY.accepts(Locality::Remote));
    }

    #[test]
    fn test_empty_mask_accepts_nothing() {
        let mask = EventMask::empty();
        assert!(mask.is_empty());
        assert!(!mask.accepts(EventKind::Added));
    }
}
