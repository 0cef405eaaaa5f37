//! Process-scoped context shared by buffers.
//!
//! The context bundles the transport handle with the process-wide
//! registry of owned uids. It is created explicitly and passed to buffer
//! constructors; there are no ambient singletons. Buffers claim uids in
//! the registry when units are added and release them when units are
//! retracted or the buffer closes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::uid::Uid;

/// Process-scoped context for buffer construction.
///
/// Cheap to clone; all clones share the same transport and uid registry.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    transport: Arc<dyn Transport>,
    /// Uids owned by output buffers of this process, with the unique
    /// name of the owning buffer.
    owned_uids: Mutex<HashMap<Uid, String>>,
}

impl Context {
    /// Create a context around a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                transport,
                owned_uids: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The transport buffers publish and subscribe through.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Number of uids currently owned by this process.
    pub fn owned_unit_count(&self) -> usize {
        self.inner.owned_uids.lock().unwrap().len()
    }

    /// Claim ownership of a uid for a buffer.
    ///
    /// Fails with [`Error::DuplicateUid`] if any buffer of this process
    /// already owns the uid.
    pub(crate) fn claim_uid(&self, uid: &Uid, owner: &str) -> Result<()> {
        let mut owned = self.inner.owned_uids.lock().unwrap();
        if owned.contains_key(uid) {
            return Err(Error::DuplicateUid(uid.clone()));
        }
        owned.insert(uid.clone(), owner.to_owned());
        Ok(())
    }

    /// Release a uid claimed by [`claim_uid`](Self::claim_uid).
    pub(crate) fn release_uid(&self, uid: &Uid) {
        self.inner.owned_uids.lock().unwrap().remove(uid);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("owned_units", &self.owned_unit_count())
            .finish()
    }
}
