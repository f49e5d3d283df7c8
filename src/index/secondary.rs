use std::collections::{HashMap, HashSet};
use parking_lot::RwLock;
use tracing::debug;
use crate::core::types::Value;

/// Indexed field values of one record: `(index name, value)` pairs
pub type FieldSnapshot = Vec<(String, Value)>;

/// Insertion-ordered, duplicate-free set of record keys
#[derive(Debug, Clone, Default)]
struct KeySet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl KeySet {
    fn insert(&mut self, key: &str) {
        if self.members.insert(key.to_string()) {
            self.order.push(key.to_string());
        }
    }

    fn remove(&mut self, key: &str) {
        if self.members.remove(key) {
            self.order.retain(|k| k != key);
        }
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// What one `update_index` or `remove_from_index` call replaced.
///
/// Handed back to `restore` when the matching store write fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexUndo {
    pub previous: Option<FieldSnapshot>,
    // revision the change left on the key; None when it left the key unindexed
    revision: Option<u64>,
}

#[derive(Debug, Default)]
struct BucketIndex {
    fields: HashMap<String, HashMap<Value, KeySet>>,
    // what each key was indexed under, for exact removal
    snapshots: HashMap<String, FieldSnapshot>,
    revisions: HashMap<String, u64>,
    next_revision: u64,
    complete: bool,
}

impl BucketIndex {
    fn complete() -> Self {
        BucketIndex {
            complete: true,
            ..BucketIndex::default()
        }
    }

    fn insert(&mut self, key: &str, snapshot: FieldSnapshot) -> u64 {
        for (field, value) in &snapshot {
            self.fields
                .entry(field.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(key);
        }
        self.snapshots.insert(key.to_string(), snapshot);
        self.next_revision += 1;
        self.revisions.insert(key.to_string(), self.next_revision);
        self.next_revision
    }

    fn unlink(&mut self, key: &str, entries: &[(String, Value)]) {
        for (field, value) in entries {
            let Some(values) = self.fields.get_mut(field) else {
                continue;
            };
            if let Some(keys) = values.get_mut(value) {
                keys.remove(key);
                if keys.is_empty() {
                    values.remove(value);
                }
            }
            if values.is_empty() {
                self.fields.remove(field);
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<FieldSnapshot> {
        let previous = self.snapshots.remove(key)?;
        self.revisions.remove(key);
        self.unlink(key, &previous);
        Some(previous)
    }
}

/// Per-field shape of one bucket's index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub fields: Vec<String>,
    pub distinct_values: usize,
    pub keys: usize,
    pub complete: bool,
}

/// In-memory secondary index: bucket → field → value → keys.
///
/// One instance per `Database`. A single lock guards every bucket; lookups
/// share it, mutations take it exclusively. Only hashable values are kept.
#[derive(Debug, Default)]
pub struct SecondaryIndex {
    buckets: RwLock<HashMap<String, BucketIndex>>,
}

impl SecondaryIndex {
    pub fn new() -> Self {
        SecondaryIndex::default()
    }

    /// Index `key` under every value in `fields`, replacing whatever it was
    /// indexed under before
    pub fn update_index(&self, bucket: &str, key: &str, fields: FieldSnapshot) -> IndexUndo {
        let snapshot: FieldSnapshot = fields.into_iter().filter(|(_, v)| v.is_hashable()).collect();

        let mut buckets = self.buckets.write();
        let index = buckets
            .entry(bucket.to_string())
            .or_insert_with(BucketIndex::complete);
        let previous = index.remove(key);
        let revision = index.insert(key, snapshot);
        IndexUndo {
            previous,
            revision: Some(revision),
        }
    }

    /// Drop `key` from every value it was indexed under and prune empty sets.
    ///
    /// `fallback` is only consulted for keys with no stored snapshot.
    pub fn remove_from_index(&self, bucket: &str, key: &str, fallback: &[(String, Value)]) -> IndexUndo {
        let mut buckets = self.buckets.write();
        let Some(index) = buckets.get_mut(bucket) else {
            return IndexUndo::default();
        };
        let previous = index.remove(key);
        if previous.is_none() {
            index.unlink(key, fallback);
        }
        IndexUndo {
            previous,
            revision: None,
        }
    }

    /// Put `key` back the way it was before a failed write.
    ///
    /// Only applies when nothing touched `key` since the change `undo`
    /// describes. Otherwise the bucket is marked incomplete and served by
    /// scan until rebuilt. Returns true when the entry was restored.
    pub fn restore(&self, bucket: &str, key: &str, undo: IndexUndo) -> bool {
        let mut buckets = self.buckets.write();
        let Some(index) = buckets.get_mut(bucket) else {
            return false;
        };
        if index.revisions.get(key).copied() != undo.revision {
            index.complete = false;
            debug!(bucket, key, "index entry changed after the failed write, bucket marked incomplete");
            return false;
        }

        index.remove(key);
        if let Some(snapshot) = undo.previous {
            index.insert(key, snapshot);
        }
        debug!(bucket, key, "index entry restored");
        true
    }

    /// Keys indexed under `field == value`, in insertion order.
    ///
    /// `None` when the bucket has no complete index, the field was never
    /// indexed or no record carries the value.
    pub fn get_indexed_keys(&self, bucket: &str, field: &str, value: &Value) -> Option<Vec<String>> {
        let buckets = self.buckets.read();
        let index = buckets.get(bucket).filter(|i| i.complete)?;
        let keys = index.fields.get(field)?.get(value)?;
        if keys.is_empty() {
            return None;
        }
        Some(keys.order.clone())
    }

    /// True once a write went through `update_index` and nothing has since
    /// bypassed it
    pub fn has_index(&self, bucket: &str) -> bool {
        self.buckets
            .read()
            .get(bucket)
            .map(|i| i.complete)
            .unwrap_or(false)
    }

    /// Stop serving `bucket` from the index until it is rebuilt
    pub fn mark_incomplete(&self, bucket: &str) {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .complete = false;
        debug!(bucket, "index marked incomplete");
    }

    /// Swap in a freshly built index for `bucket` and mark it complete
    pub fn rebuild(&self, bucket: &str, entries: Vec<(String, FieldSnapshot)>) {
        let mut fresh = BucketIndex::complete();
        for (key, fields) in entries {
            let snapshot = fields.into_iter().filter(|(_, v)| v.is_hashable()).collect();
            fresh.insert(&key, snapshot);
        }
        self.buckets.write().insert(bucket.to_string(), fresh);
    }

    /// Empty bucket: nothing indexed and nothing missing
    pub fn clear_bucket(&self, bucket: &str) {
        self.buckets.write().insert(bucket.to_string(), BucketIndex::complete());
    }

    pub fn drop_bucket(&self, bucket: &str) {
        self.buckets.write().remove(bucket);
    }

    pub fn stats(&self, bucket: &str) -> Option<IndexStats> {
        let buckets = self.buckets.read();
        let index = buckets.get(bucket)?;

        let mut fields: Vec<String> = index.fields.keys().cloned().collect();
        fields.sort();
        Some(IndexStats {
            fields,
            distinct_values: index.fields.values().map(|v| v.len()).sum(),
            keys: index.snapshots.len(),
            complete: index.complete,
        })
    }

    /// Total number of keys sharing `field == value`; 0 when unknown
    pub fn cardinality(&self, bucket: &str, field: &str, value: &Value) -> usize {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|i| i.fields.get(field))
            .and_then(|v| v.get(value))
            .map(KeySet::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(pairs: &[(&str, Value)]) -> FieldSnapshot {
        pairs.iter().map(|(f, v)| (f.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_update_is_idempotent() {
        let index = SecondaryIndex::new();
        let fields = snap(&[("email", Value::from("a@x")), ("age", Value::from(30))]);

        index.update_index("users", "u1", fields.clone());
        index.update_index("users", "u1", fields);

        let keys = index.get_indexed_keys("users", "email", &Value::from("a@x")).unwrap();
        assert_eq!(keys, vec!["u1".to_string()]);
        assert_eq!(index.cardinality("users", "age", &Value::from(30)), 1);
    }

    #[test]
    fn test_keys_keep_insertion_order() {
        let index = SecondaryIndex::new();
        for key in ["c", "a", "b"] {
            index.update_index("t", key, snap(&[("x", Value::from(1))]));
        }
        let keys = index.get_indexed_keys("t", "x", &Value::from(1)).unwrap();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_changed_value_moves_key() {
        let index = SecondaryIndex::new();
        index.update_index("users", "u1", snap(&[("city", Value::from("Hanoi"))]));
        index.update_index("users", "u1", snap(&[("city", Value::from("Hue"))]));

        assert!(index.get_indexed_keys("users", "city", &Value::from("Hanoi")).is_none());
        assert_eq!(
            index.get_indexed_keys("users", "city", &Value::from("Hue")).unwrap(),
            vec!["u1"]
        );
    }

    #[test]
    fn test_remove_prunes_empty_sets() {
        let index = SecondaryIndex::new();
        index.update_index("users", "u1", snap(&[("x", Value::from(1))]));
        index.update_index("users", "u2", snap(&[("x", Value::from(1))]));

        index.remove_from_index("users", "u1", &[]);
        assert_eq!(index.get_indexed_keys("users", "x", &Value::from(1)).unwrap(), vec!["u2"]);

        index.remove_from_index("users", "u2", &[]);
        assert!(index.get_indexed_keys("users", "x", &Value::from(1)).is_none());
        let stats = index.stats("users").unwrap();
        assert!(stats.fields.is_empty());
        assert_eq!(stats.keys, 0);
    }

    #[test]
    fn test_remove_uses_snapshot_not_caller_values() {
        let index = SecondaryIndex::new();
        index.update_index("users", "u1", snap(&[("x", Value::from(1))]));

        // caller passes a stale record; the stored snapshot still wins
        index.remove_from_index("users", "u1", &snap(&[("x", Value::from(99))]));
        assert!(index.get_indexed_keys("users", "x", &Value::from(1)).is_none());
    }

    #[test]
    fn test_unhashable_values_are_skipped() {
        let index = SecondaryIndex::new();
        index.update_index(
            "users",
            "u1",
            snap(&[
                ("tags", Value::from(vec!["a", "b"])),
                ("name", Value::from("bob")),
            ]),
        );

        assert!(index.get_indexed_keys("users", "tags", &Value::from(vec!["a", "b"])).is_none());
        assert_eq!(index.stats("users").unwrap().fields, vec!["name".to_string()]);
    }

    #[test]
    fn test_incomplete_bucket_serves_nothing() {
        let index = SecondaryIndex::new();
        index.update_index("users", "u1", snap(&[("x", Value::from(1))]));
        assert!(index.has_index("users"));

        index.mark_incomplete("users");
        assert!(!index.has_index("users"));
        assert!(index.get_indexed_keys("users", "x", &Value::from(1)).is_none());

        index.rebuild("users", vec![("u1".to_string(), snap(&[("x", Value::from(1))]))]);
        assert!(index.has_index("users"));
        assert!(index.get_indexed_keys("users", "x", &Value::from(1)).is_some());
    }

    #[test]
    fn test_restore_reverts_update() {
        let index = SecondaryIndex::new();
        index.update_index("users", "u1", snap(&[("x", Value::from(1))]));
        let undo = index.update_index("users", "u1", snap(&[("x", Value::from(2))]));

        assert!(index.restore("users", "u1", undo));
        assert!(index.get_indexed_keys("users", "x", &Value::from(2)).is_none());
        assert_eq!(index.get_indexed_keys("users", "x", &Value::from(1)).unwrap(), vec!["u1"]);

        let new_key = index.update_index("users", "u2", snap(&[("x", Value::from(1))]));
        assert!(index.restore("users", "u2", new_key));
        assert_eq!(index.get_indexed_keys("users", "x", &Value::from(1)).unwrap(), vec!["u1"]);
        assert!(index.has_index("users"));
    }

    #[test]
    fn test_restore_skips_key_rewritten_since() {
        let index = SecondaryIndex::new();
        index.update_index("users", "u1", snap(&[("x", Value::from(1))]));

        // first writer's change, then a second writer saves the same key
        let first = index.update_index("users", "u1", snap(&[("x", Value::from(2))]));
        index.update_index("users", "u1", snap(&[("x", Value::from(2))]));

        assert!(!index.restore("users", "u1", first));
        assert!(!index.has_index("users"));
        assert_eq!(index.cardinality("users", "x", &Value::from(2)), 1);
        assert_eq!(index.cardinality("users", "x", &Value::from(1)), 0);
    }

    #[test]
    fn test_restore_after_remove_skips_resaved_key() {
        let index = SecondaryIndex::new();
        index.update_index("users", "u1", snap(&[("x", Value::from(1))]));

        let removed = index.remove_from_index("users", "u1", &[]);
        assert_eq!(removed.previous, Some(snap(&[("x", Value::from(1))])));
        index.update_index("users", "u1", snap(&[("x", Value::from(3))]));

        assert!(!index.restore("users", "u1", removed));
        assert!(!index.has_index("users"));
    }

    #[test]
    fn test_unknown_bucket() {
        let index = SecondaryIndex::new();
        assert!(!index.has_index("nope"));
        assert!(index.get_indexed_keys("nope", "x", &Value::Null).is_none());
        assert_eq!(index.remove_from_index("nope", "k", &[]), IndexUndo::default());
    }
}
