//! Unit payloads: ordered key-value stores with delta tracking.
//!
//! A [`Payload`] is the data content of a unit: string keys mapped to
//! string values, in insertion order. The map is never handed out mutably;
//! every mutation goes through the owning unit, which funnels it through a
//! single apply-and-notify path and reports the change as one or more
//! [`PayloadDelta`]s.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single observed change to one payload key.
///
/// `old == None` means the key was absent before, `new == None` means the
/// key was removed. Applying a sequence of deltas in order reproduces the
/// net effect of the mutations that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDelta {
    /// Affected key.
    pub key: String,
    /// Value before the change, if the key was present.
    pub old: Option<String>,
    /// Value after the change, if the key remains present.
    pub new: Option<String>,
}

impl PayloadDelta {
    /// Create a delta for an inserted or updated key.
    pub fn set(key: impl Into<String>, old: Option<String>, new: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            old,
            new: Some(new.into()),
        }
    }

    /// Create a delta for a removed key.
    pub fn removed(key: impl Into<String>, old: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            old: Some(old.into()),
            new: None,
        }
    }
}

/// Ordered key-value content of a unit.
///
/// Read access is public; mutation is crate-internal and only reachable
/// through the owning unit, which enforces commit state and write
/// ownership before anything lands here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    entries: IndexMap<String, String>,
}

impl Payload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a payload from key-value entries, keeping their order.
    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get the value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate over currently-present keys in insertion order.
    ///
    /// The iterator is lazy; calling `keys()` again restarts from the
    /// beginning of the current state.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy out the entries as an ordered vector, e.g. for a snapshot.
    pub fn to_entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Insert or update a key, returning the observed delta.
    pub(crate) fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> PayloadDelta {
        let key = key.into();
        let value = value.into();
        let old = self.entries.insert(key.clone(), value.clone());
        PayloadDelta {
            key,
            old,
            new: Some(value),
        }
    }

    /// Remove a key, returning the observed delta if it was present.
    ///
    /// Removing an absent key is a no-op and produces no delta.
    pub(crate) fn remove(&mut self, key: &str) -> Option<PayloadDelta> {
        // shift_remove keeps the insertion order of the remaining keys.
        self.entries
            .shift_remove(key)
            .map(|old| PayloadDelta::removed(key, old))
    }

    /// Replace the whole payload, returning the batched deltas.
    ///
    /// Removals are reported first, then updates and insertions in the
    /// order of the new mapping. The deltas compose to the same net effect
    /// as the replacement itself.
    pub(crate) fn replace(&mut self, new_entries: Vec<(String, String)>) -> Vec<PayloadDelta> {
        let deltas = self.diff_against(&new_entries);
        self.entries = new_entries.into_iter().collect();
        deltas
    }

    /// Compute the deltas that would turn the current state into
    /// `new_entries`. Shared between the owning side (replace) and the
    /// mirroring side (snapshot application), so both report identical
    /// deltas for the same transition.
    pub(crate) fn diff_against(&self, new_entries: &[(String, String)]) -> Vec<PayloadDelta> {
        let mut deltas = Vec::new();
        for (key, old) in &self.entries {
            if !new_entries.iter().any(|(k, _)| k == key) {
                deltas.push(PayloadDelta::removed(key.clone(), old.clone()));
            }
        }
        for (key, new) in new_entries {
            match self.entries.get(key) {
                Some(old) if old == new => {}
                old => deltas.push(PayloadDelta {
                    key: key.clone(),
                    old: old.cloned(),
                    new: Some(new.clone()),
                }),
            }
        }
        deltas
    }

    /// Apply a single delta, e.g. from a remote update.
    pub(crate) fn apply(&mut self, delta: &PayloadDelta) {
        match &delta.new {
            Some(value) => {
                self.entries.insert(delta.key.clone(), value.clone());
            }
            None => {
                self.entries.shift_remove(&delta.key);
            }
        }
    }

    /// Drop all entries and insert `new_entries` in order.
    pub(crate) fn overwrite(&mut self, new_entries: Vec<(String, String)>) {
        self.entries = new_entries.into_iter().collect();
    }
}

impl std::ops::Index<&str> for Payload {
    type Output = str;

    /// Mapping-style access; panics if the key is absent.
    fn index(&self, key: &str) -> &Self::Output {
        self.get(key)
            .unwrap_or_else(|| panic!("no payload entry for key {key:?}"))
    }
}

impl<'a> IntoIterator for &'a Payload {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut payload = Payload::new();
        let delta = payload.set("a", "a1");
        assert_eq!(delta.old, None);
        assert_eq!(delta.new.as_deref(), Some("a1"));
        assert_eq!(payload.get("a"), Some("a1"));

        let delta = payload.set("a", "a2");
        assert_eq!(delta.old.as_deref(), Some("a1"));
        assert_eq!(payload.get("a"), Some("a2"));
    }

    #[test]
    fn test_keys_in_insertion_order() {
        let mut payload = Payload::new();
        payload.set("b", "1");
        payload.set("a", "2");
        payload.set("c", "3");
        payload.remove("a");
        payload.set("a", "4");

        let keys: Vec<_> = payload.keys().collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
        // Restartable: a second call yields the same sequence.
        let again: Vec<_> = payload.keys().collect();
        assert_eq!(keys, again);
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let mut payload = Payload::new();
        payload.set("a", "1");
        assert!(payload.remove("missing").is_none());
        assert_eq!(payload.len(), 1);
    }

    #[test]
    fn test_replace_emits_batched_deltas() {
        let mut payload = Payload::from_entries([("a", "a1"), ("b", "b1")]);
        let deltas = payload.replace(vec![
            ("a".into(), "a2".into()),
            ("c".into(), "c1".into()),
        ]);

        assert_eq!(
            deltas,
            vec![
                PayloadDelta::removed("b", "b1"),
                PayloadDelta::set("a", Some("a1".into()), "a2"),
                PayloadDelta::set("c", None, "c1"),
            ]
        );
        assert_eq!(payload.to_entries().len(), 2);
        assert_eq!(payload.get("a"), Some("a2"));
        assert_eq!(payload.get("b"), None);
        assert_eq!(payload.get("c"), Some("c1"));
    }

    #[test]
    fn test_replace_skips_unchanged_keys() {
        let mut payload = Payload::from_entries([("a", "a1")]);
        let deltas = payload.replace(vec![("a".into(), "a1".into())]);
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_deltas_compose_to_net_effect() {
        let mut owner = Payload::from_entries([("a", "a1")]);
        let mut mirror = owner.clone();

        let mut deltas = Vec::new();
        deltas.push(owner.set("a", "a2"));
        deltas.push(owner.set("b", "b1"));
        deltas.extend(owner.remove("b"));
        deltas.push(owner.set("c", "c1"));
        deltas.push(owner.set("a", "a3"));

        for delta in &deltas {
            mirror.apply(delta);
        }
        assert_eq!(mirror, owner);
        assert_eq!(mirror.get("a"), Some("a3"));
        assert_eq!(mirror.get("b"), None);
        assert_eq!(mirror.get("c"), Some("c1"));
    }

    #[test]
    fn test_index_access() {
        let payload = Payload::from_entries([("a", "a1")]);
        assert_eq!(&payload["a"], "a1");
    }

    #[test]
    #[should_panic(expected = "no payload entry")]
    fn test_index_access_missing_key_panics() {
        let payload = Payload::new();
        let _ = &payload["missing"];
    }
}
