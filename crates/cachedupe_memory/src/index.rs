// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Two-way index between storage keys and references.

use std::collections::{BTreeSet, HashMap, HashSet};

/// Keeps `key -> references` and `reference -> keys` as exact inverses.
///
/// Keys without references and references without keys are never stored, so the index only
/// grows with edges that actually exist.
#[derive(Debug, Default)]
pub(crate) struct ReferenceIndex {
    key_to_references: HashMap<String, BTreeSet<String>>,
    reference_to_keys: HashMap<String, HashSet<String>>,
}

impl ReferenceIndex {
    /// Replaces the reference set of `key` with `references`.
    ///
    /// Only the difference between the previous and the new set is touched, so buckets shared by
    /// both sets are left as they are.
    pub(crate) fn relink(&mut self, key: &str, references: BTreeSet<String>) {
        let previous = self.key_to_references.remove(key).unwrap_or_default();

        for reference in previous.difference(&references) {
            self.unlink(reference, key);
        }

        for reference in references.difference(&previous) {
            self.reference_to_keys
                .entry(reference.clone())
                .or_default()
                .insert(key.to_owned());
        }

        if !references.is_empty() {
            self.key_to_references.insert(key.to_owned(), references);
        }
    }

    /// Drops every edge of `key`.
    pub(crate) fn unlink_key(&mut self, key: &str) {
        self.relink(key, BTreeSet::new());
    }

    /// Drops every edge of every key in `keys` in a single pass over the affected buckets.
    pub(crate) fn prune<'a>(&mut self, keys: impl IntoIterator<Item = &'a String>) {
        let mut affected: HashMap<String, Vec<&'a String>> = HashMap::new();
        for key in keys {
            if let Some(references) = self.key_to_references.remove(key.as_str()) {
                for reference in references {
                    affected.entry(reference).or_default().push(key);
                }
            }
        }

        for (reference, keys) in affected {
            if let Some(bucket) = self.reference_to_keys.get_mut(&reference) {
                for key in keys {
                    bucket.remove(key.as_str());
                }
                if bucket.is_empty() {
                    self.reference_to_keys.remove(&reference);
                }
            }
        }
    }

    /// Returns the keys tagged with `reference`.
    pub(crate) fn keys_of(&self, reference: &str) -> Option<&HashSet<String>> {
        self.reference_to_keys.get(reference)
    }

    /// Returns the references `key` is tagged with.
    pub(crate) fn references_of(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.key_to_references.get(key)
    }

    pub(crate) fn reference_count(&self) -> usize {
        self.reference_to_keys.len()
    }

    pub(crate) fn clear(&mut self) {
        self.key_to_references.clear();
        self.reference_to_keys.clear();
    }

    fn unlink(&mut self, reference: &str, key: &str) {
        if let Some(bucket) = self.reference_to_keys.get_mut(reference) {
            bucket.remove(key);
            if bucket.is_empty() {
                self.reference_to_keys.remove(reference);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_symmetric(&self) {
        for (key, references) in &self.key_to_references {
            assert!(!references.is_empty(), "{key} kept an empty reference set");
            for reference in references {
                assert!(
                    self.reference_to_keys.get(reference).is_some_and(|keys| keys.contains(key)),
                    "{reference} does not list {key}"
                );
            }
        }
        for (reference, keys) in &self.reference_to_keys {
            assert!(!keys.is_empty(), "{reference} kept an empty bucket");
            for key in keys {
                assert!(
                    self.key_to_references.get(key).is_some_and(|refs| refs.contains(reference)),
                    "{key} does not list {reference}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn keys(index: &ReferenceIndex, reference: &str) -> Vec<String> {
        let mut keys: Vec<String> = index.keys_of(reference).into_iter().flatten().cloned().collect();
        keys.sort();
        keys
    }

    #[test]
    fn relink_moves_key_between_buckets() {
        let mut index = ReferenceIndex::default();
        index.relink("k", set(&["a", "b"]));
        index.relink("other", set(&["b"]));

        index.relink("k", set(&["b", "c"]));

        assert!(index.keys_of("a").is_none());
        assert_eq!(keys(&index, "b"), vec!["k", "other"]);
        assert_eq!(keys(&index, "c"), vec!["k"]);
        assert_eq!(index.references_of("k"), Some(&set(&["b", "c"])));
        index.assert_symmetric();
    }

    #[test]
    fn unlink_key_drops_emptied_buckets() {
        let mut index = ReferenceIndex::default();
        index.relink("k", set(&["a"]));
        index.relink("j", set(&["a", "b"]));

        index.unlink_key("j");

        assert_eq!(keys(&index, "a"), vec!["k"]);
        assert!(index.keys_of("b").is_none());
        assert!(index.references_of("j").is_none());
        assert_eq!(index.reference_count(), 1);
        index.assert_symmetric();
    }

    #[test]
    fn empty_reference_set_leaves_no_record() {
        let mut index = ReferenceIndex::default();
        index.relink("k", BTreeSet::new());
        assert!(index.references_of("k").is_none());
        assert_eq!(index.reference_count(), 0);
    }

    #[test]
    fn prune_handles_keys_shared_by_several_references() {
        let mut index = ReferenceIndex::default();
        index.relink("k1", set(&["a", "b"]));
        index.relink("k2", set(&["b"]));
        index.relink("k3", set(&["c"]));

        let removed = vec!["k1".to_string(), "k2".to_string(), "k1".to_string()];
        index.prune(&removed);

        assert!(index.keys_of("a").is_none());
        assert!(index.keys_of("b").is_none());
        assert_eq!(keys(&index, "c"), vec!["k3"]);
        index.assert_symmetric();
    }

    #[test]
    fn clear_forgets_everything() {
        let mut index = ReferenceIndex::default();
        index.relink("k", set(&["a"]));
        index.clear();
        assert_eq!(index.reference_count(), 0);
        assert!(index.references_of("k").is_none());
    }
}
