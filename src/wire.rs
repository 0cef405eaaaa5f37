//! Wire messages exchanged between buffers.
//!
//! Every message is a versioned, self-describing JSON document. Unit
//! events travel on category topics; directed control messages (write
//! requests, resync requests, snapshots) travel on the addressee's node
//! topic.
//!
//! ## Topics
//!
//! ```text
//! osmosis/channel/<channel>/category/<category>   unit events
//! osmosis/node/<buffer-unique-name>               directed control messages
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::links::LinkDelta;
use crate::payload::PayloadDelta;
use crate::uid::Uid;

/// Version of the wire protocol; bumped on incompatible changes.
pub const PROTOCOL_VERSION: u16 = 1;

/// Full state of a unit at one revision.
///
/// Sent when a unit is first published and as the reply to a resync
/// request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Unit identifier.
    pub uid: Uid,
    /// Category tag of the unit.
    pub category: String,
    /// Unique name of the output buffer that owns the unit.
    pub origin: String,
    /// Revision at the time of the snapshot.
    pub revision: u64,
    /// Whether the unit is committed.
    pub committed: bool,
    /// Whether the unit rejects the remote-write path.
    pub read_only: bool,
    /// Whether the unit is a one-shot message.
    pub one_shot: bool,
    /// Payload entries in insertion order.
    pub payload: Vec<(String, String)>,
    /// Link relations and their ordered targets.
    pub links: Vec<(String, Vec<Uid>)>,
}

/// Payload content carried by a payload-update message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PayloadChange {
    /// Apply these deltas in order.
    Delta(Vec<PayloadDelta>),
    /// Discard the current payload and adopt these entries in order.
    Replace(Vec<(String, String)>),
}

/// A payload mutation republished by the owning buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadUpdate {
    /// Affected unit.
    pub uid: Uid,
    /// Revision after the mutation.
    pub revision: u64,
    /// Unique name of the owning buffer (resync address).
    pub origin: String,
    /// Unique name of the buffer the change is attributed to.
    pub writer: String,
    /// The change itself.
    pub change: PayloadChange,
}

/// A link mutation republished by the owning buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkUpdate {
    /// Affected unit.
    pub uid: Uid,
    /// Revision after the mutation.
    pub revision: u64,
    /// Unique name of the owning buffer (resync address).
    pub origin: String,
    /// Unique name of the buffer the change is attributed to.
    pub writer: String,
    /// Link deltas to apply in order.
    pub deltas: Vec<LinkDelta>,
}

/// Notification that a unit was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    /// Affected unit.
    pub uid: Uid,
    /// Revision of the commit transition.
    pub revision: u64,
    /// Unique name of the owning buffer (resync address).
    pub origin: String,
    /// Unique name of the buffer the commit is attributed to.
    pub writer: String,
}

/// Notification that a unit was retracted by its buffer of origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retraction {
    /// Affected unit.
    pub uid: Uid,
    /// Revision of the retraction.
    pub revision: u64,
}

/// A mutation a non-owning process asks the owner to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert or update one payload key.
    SetPayload {
        /// Key to write.
        key: String,
        /// New value.
        value: String,
    },
    /// Delete one payload key.
    DeletePayload {
        /// Key to delete.
        key: String,
    },
    /// Replace the whole payload.
    ReplacePayload {
        /// New payload entries in order.
        entries: Vec<(String, String)>,
    },
    /// Append link targets to a relation.
    AddLinks {
        /// Relation name.
        relation: String,
        /// Targets to append.
        targets: Vec<Uid>,
    },
    /// Remove link targets from a relation.
    RemoveLinks {
        /// Relation name.
        relation: String,
        /// Targets to remove.
        targets: Vec<Uid>,
    },
    /// Commit the unit.
    Commit,
}

/// Write request sent to the owner's node topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Unit to mutate.
    pub uid: Uid,
    /// Unique name of the requesting buffer, for attribution.
    pub requester: String,
    /// Requested mutation.
    pub op: WriteOp,
}

/// Request for a full-state snapshot, sent to the owner's node topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncRequest {
    /// Unit to resync.
    pub uid: Uid,
    /// Unique name of the requesting buffer; the snapshot is sent to its
    /// node topic.
    pub requester: String,
    /// Revision the requester currently holds (0 = never seen).
    pub have_revision: u64,
}

/// All messages that travel over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// A unit became visible (first publication).
    Added(UnitSnapshot),
    /// A payload mutation.
    PayloadUpdate(PayloadUpdate),
    /// A link mutation.
    LinkUpdate(LinkUpdate),
    /// A commit.
    Committed(Commission),
    /// A retraction.
    Retracted(Retraction),
    /// A remote-write request (node topic only).
    WriteRequest(WriteRequest),
    /// A resync request (node topic only).
    ResyncRequest(ResyncRequest),
    /// A resync reply (node topic only).
    Snapshot(UnitSnapshot),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u16,
    msg: WireMessage,
}

impl WireMessage {
    /// Encode into transport bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let envelope = Envelope {
            v: PROTOCOL_VERSION,
            msg: self.clone(),
        };
        Ok(Bytes::from(serde_json::to_vec(&envelope)?))
    }

    /// Decode from transport bytes, validating the protocol version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.v != PROTOCOL_VERSION {
            return Err(Error::Transport(format!(
                "unsupported protocol version {}",
                envelope.v
            )));
        }
        Ok(envelope.msg)
    }

    /// Uid of the unit this message concerns.
    pub fn uid(&self) -> &Uid {
        match self {
            WireMessage::Added(s) | WireMessage::Snapshot(s) => &s.uid,
            WireMessage::PayloadUpdate(u) => &u.uid,
            WireMessage::LinkUpdate(u) => &u.uid,
            WireMessage::Committed(c) => &c.uid,
            WireMessage::Retracted(r) => &r.uid,
            WireMessage::WriteRequest(w) => &w.uid,
            WireMessage::ResyncRequest(r) => &r.uid,
        }
    }

    /// Get a human-readable name for this message type.
    pub fn name(&self) -> &'static str {
        match self {
            WireMessage::Added(_) => "added",
            WireMessage::PayloadUpdate(_) => "payload-update",
            WireMessage::LinkUpdate(_) => "link-update",
            WireMessage::Committed(_) => "committed",
            WireMessage::Retracted(_) => "retracted",
            WireMessage::WriteRequest(_) => "write-request",
            WireMessage::ResyncRequest(_) => "resync-request",
            WireMessage::Snapshot(_) => "snapshot",
        }
    }
}

/// Topic carrying unit events for one category on one channel.
pub fn category_topic(channel: &str, category: &str) -> String {
    format!("osmosis/channel/{channel}/category/{category}")
}

/// Topic carrying directed control messages for one buffer.
pub fn node_topic(unique_name: &str) -> String {
    format!("osmosis/node/{unique_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> UnitSnapshot {
        UnitSnapshot {
            uid: Uid::from("u1"),
            category: "utterance".into(),
            origin: "comp/abc/OB".into(),
            revision: 1,
            committed: false,
            read_only: false,
            one_shot: false,
            payload: vec![("a".into(), "a1".into())],
            links: vec![("sameold".into(), vec![Uid::from("u2")])],
        }
    }

    #[test]
    fn test_roundtrip_added() {
        let msg = WireMessage::Added(sample_snapshot());
        let bytes = msg.encode().unwrap();
        let decoded = WireMessage::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.uid(), &Uid::from("u1"));
        assert_eq!(decoded.name(), "added");
    }

    #[test]
    fn test_roundtrip_payload_update() {
        let msg = WireMessage::PayloadUpdate(PayloadUpdate {
            uid: Uid::from("u1"),
            revision: 3,
            origin: "comp/abc/OB".into(),
            writer: "comp/abc/OB".into(),
            change: PayloadChange::Delta(vec![PayloadDelta::set(
                "a",
                Some("a1".into()),
                "a2",
            )]),
        });
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "v": 99,
            "msg": { "Retracted": { "uid": "u1", "revision": 2 } },
        }))
        .unwrap();
        let err = WireMessage::decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(WireMessage::decode(b"not json").is_err());
    }

    #[test]
    fn test_topics() {
        assert_eq!(
            category_topic("default", "utterance"),
            "osmosis/channel/default/category/utterance"
        );
        assert_eq!(node_topic("comp/abc/IB"), "osmosis/node/comp/abc/IB");
    }
}
