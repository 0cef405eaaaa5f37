//! Error types for Osmosis.

use thiserror::Error;

use crate::uid::Uid;

/// Result type alias using Osmosis's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Osmosis operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Mutation attempted on a unit that cannot be written: it is
    /// committed, retracted, read-only, or owned elsewhere.
    #[error("unit {uid} is not writable: {reason}")]
    NotWritable {
        /// Unit that rejected the write.
        uid: Uid,
        /// Why the write was rejected.
        reason: String,
    },

    /// `commit()` called on an already-committed unit.
    #[error("unit {0} is already committed")]
    AlreadyCommitted(Uid),

    /// `add()` found the unit's UID already registered.
    #[error("unit {0} is already registered in a buffer")]
    DuplicateUid(Uid),

    /// Operation referenced a UID not present in the buffer.
    #[error("unknown unit {0}")]
    UnknownUnit(Uid),

    /// A remote update arrived with a revision gap.
    ///
    /// Never surfaced to application code: the input buffer recovers by
    /// queueing the update or requesting a resync.
    #[error("out-of-order update for unit {uid}: have revision {have}, got {got}")]
    OutOfOrderUpdate {
        /// Affected unit.
        uid: Uid,
        /// Revision the mirror currently holds.
        have: u64,
        /// Revision carried by the update.
        got: u64,
    },

    /// A registered handler panicked during dispatch.
    ///
    /// Caught and logged per handler; dispatch continues with the next one.
    #[error("handler {0} panicked during event dispatch")]
    Handler(u64),

    /// Operation on a buffer that has been closed.
    #[error("buffer {0} is closed")]
    ClosedBuffer(String),

    /// The transport rejected a publish or subscribe.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire message encoding or decoding failed.
    #[error("wire format error: {0}")]
    Wire(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::NotWritable`] with a reason.
    pub(crate) fn not_writable(uid: Uid, reason: impl Into<String>) -> Self {
        Error::NotWritable {
            uid,
            reason: reason.into(),
        }
    }
}
