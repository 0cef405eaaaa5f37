//! Link relations between units.
//!
//! Units point at other units through named relations ("grounded-in",
//! "successor", ...). Each relation holds an ordered, deduplicated set of
//! target uids. Targets are opaque: they may live in another buffer or
//! another process, or not exist yet; resolution is the caller's concern.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::uid::Uid;

/// A single observed change to one link relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDelta {
    /// Affected relation name.
    pub relation: String,
    /// Targets appended by this change.
    pub added: Vec<Uid>,
    /// Targets removed by this change.
    pub removed: Vec<Uid>,
}

impl LinkDelta {
    /// Check whether this delta changes anything.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The link relations of one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkMap {
    relations: IndexMap<String, IndexSet<Uid>>,
}

impl LinkMap {
    /// Create an empty link map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate over the targets of a relation in append order.
    ///
    /// An unknown relation yields an empty sequence.
    pub fn links(&self, relation: &str) -> impl Iterator<Item = &Uid> {
        self.relations.get(relation).into_iter().flatten()
    }

    /// Iterate over all relation names that currently have targets.
    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.relations
            .iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(name, _)| name.as_str())
    }

    /// Check whether a relation contains a target.
    pub fn contains(&self, relation: &str, target: &Uid) -> bool {
        self.relations
            .get(relation)
            .is_some_and(|targets| targets.contains(target))
    }

    /// Check whether no relation has any target.
    pub fn is_empty(&self) -> bool {
        self.relations.values().all(IndexSet::is_empty)
    }

    /// Copy out all relations and their targets, e.g. for a snapshot.
    pub fn to_entries(&self) -> Vec<(String, Vec<Uid>)> {
        self.relations
            .iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(name, targets)| (name.clone(), targets.iter().cloned().collect()))
            .collect()
    }

    /// Append targets to a relation, deduplicating.
    ///
    /// Returns the delta of targets actually appended; `None` if every
    /// target was already present.
    pub(crate) fn add(&mut self, relation: &str, targets: &[Uid]) -> Option<LinkDelta> {
        let set = self.relations.entry(relation.to_owned()).or_default();
        let mut added = Vec::new();
        for target in targets {
            if set.insert(target.clone()) {
                added.push(target.clone());
            }
        }
        if added.is_empty() {
            return None;
        }
        Some(LinkDelta {
            relation: relation.to_owned(),
            added,
            removed: Vec::new(),
        })
    }

    /// Remove targets from a relation.
    ///
    /// Returns the delta of targets actually removed; `None` if none of
    /// them were present.
    pub(crate) fn remove(&mut self, relation: &str, targets: &[Uid]) -> Option<LinkDelta> {
        let set = self.relations.get_mut(relation)?;
        let mut removed = Vec::new();
        for target in targets {
            if set.shift_remove(target) {
                removed.push(target.clone());
            }
        }
        if removed.is_empty() {
            return None;
        }
        Some(LinkDelta {
            relation: relation.to_owned(),
            added: Vec::new(),
            removed,
        })
    }

    /// Apply a delta, e.g. from a remote update.
    pub(crate) fn apply(&mut self, delta: &LinkDelta) {
        let set = self.relations.entry(delta.relation.clone()).or_default();
        for target in &delta.removed {
            set.shift_remove(target);
        }
        for target in &delta.added {
            set.insert(target.clone());
        }
    }

    /// Drop all relations and insert `entries` in order.
    pub(crate) fn overwrite(&mut self, entries: Vec<(String, Vec<Uid>)>) {
        self.relations = entries
            .into_iter()
            .map(|(name, targets)| (name, targets.into_iter().collect()))
            .collect();
    }

    /// Compute the deltas that would turn the current state into `entries`.
    pub(crate) fn diff_against(&self, entries: &[(String, Vec<Uid>)]) -> Vec<LinkDelta> {
        let mut deltas = Vec::new();
        for (relation, targets) in &self.relations {
            let new_targets = entries
                .iter()
                .find(|(name, _)| name == relation)
                .map(|(_, t)| t.as_slice())
                .unwrap_or(&[]);
            let removed: Vec<Uid> = targets
                .iter()
                .filter(|t| !new_targets.contains(t))
                .cloned()
                .collect();
            if !removed.is_empty() {
                deltas.push(LinkDelta {
                    relation: relation.clone(),
                    added: Vec::new(),
                    removed,
                });
            }
        }
        for (relation, new_targets) in entries {
            let added: Vec<Uid> = new_targets
                .iter()
                .filter(|t| !self.contains(relation, t))
                .cloned()
                .collect();
            if !added.is_empty() {
                deltas.push(LinkDelta {
                    relation: relation.clone(),
                    added,
                    removed: Vec::new(),
                });
            }
        }
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> Uid {
        Uid::from(s)
    }

    #[test]
    fn test_add_links_deduplicates() {
        let mut links = LinkMap::new();
        let delta = links
            .add("sameold", &[uid("u1"), uid("u2"), uid("u1")])
            .unwrap();
        assert_eq!(delta.added, vec![uid("u1"), uid("u2")]);

        // Re-adding an existing target changes nothing.
        assert!(links.add("sameold", &[uid("u2")]).is_none());

        let targets: Vec<_> = links.links("sameold").cloned().collect();
        assert_eq!(targets, vec![uid("u1"), uid("u2")]);
    }

    #[test]
    fn test_remove_links() {
        let mut links = LinkMap::new();
        links.add("rel", &[uid("a"), uid("b"), uid("c")]);

        let delta = links.remove("rel", &[uid("b"), uid("x")]).unwrap();
        assert_eq!(delta.removed, vec![uid("b")]);

        let targets: Vec<_> = links.links("rel").cloned().collect();
        assert_eq!(targets, vec![uid("a"), uid("c")]);

        assert!(links.remove("rel", &[uid("x")]).is_none());
        assert!(links.remove("unknown", &[uid("a")]).is_none());
    }

    #[test]
    fn test_unknown_relation_is_empty() {
        let links = LinkMap::new();
        assert_eq!(links.links("nope").count(), 0);
        assert!(links.is_empty());
    }

    #[test]
    fn test_apply_mirrors_owner_state() {
        let mut owner = LinkMap::new();
        let mut mirror = LinkMap::new();

        let d1 = owner.add("rel", &[uid("a"), uid("b")]).unwrap();
        let d2 = owner.remove("rel", &[uid("a")]).unwrap();
        let d3 = owner.add("other", &[uid("c")]).unwrap();

        for delta in [&d1, &d2, &d3] {
            mirror.apply(delta);
        }
        assert_eq!(mirror, owner);
    }

    #[test]
    fn test_diff_against() {
        let mut links = LinkMap::new();
        links.add("rel", &[uid("a"), uid("b")]);

        let target = vec![("rel".to_owned(), vec![uid("b"), uid("c")])];
        let deltas = links.diff_against(&target);

        let mut mirror = links.clone();
        for delta in &deltas {
            mirror.apply(delta);
        }
        let targets: Vec<_> = mirror.links("rel").cloned().collect();
        assert_eq!(targets, vec![uid("b"), uid("c")]);
    }
}
