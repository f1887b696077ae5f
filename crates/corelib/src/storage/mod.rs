//! Local key-value storage with primary/backup separation.
//!
//! Each node keeps two stores:
//!
//! - **Primary**: authoritative data for keys this node is responsible for.
//! - **Backup**: replicas held for other primaries, bucketed by the primary
//!   node's id. The bucket tag is mandatory: during churn the same key can
//!   legitimately exist under several primaries at once, and hinted-handoff
//!   recovery must return exactly the entries filed for the rejoining node.
//!
//! When persistence is enabled every write is mirrored to one file per key
//! (see [`persist`]); writes are best-effort and never fail the in-memory
//! operation.

pub mod persist;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

use crate::id::{in_arc_open_closed, Id, KeySpace};
use crate::version::{Value, VectorClock, VersionedValue};
use crate::Result;

use persist::DiskStore;

#[derive(Default)]
struct StoreMaps {
    primary: HashMap<String, VersionedValue>,
    backups: HashMap<Id, HashMap<String, VersionedValue>>,
}

/// The dual store of one node.
///
/// All methods take `&self`; interior mutability is a single `RwLock` so
/// compound operations (promotion, handoff collection) are atomic with
/// respect to concurrent handlers.
pub struct NodeStorage {
    node_id: Id,
    space: KeySpace,
    maps: RwLock<StoreMaps>,
    disk: Option<DiskStore>,
}

impl NodeStorage {
    /// In-memory storage only.
    pub fn new(node_id: Id, space: KeySpace) -> Self {
        Self {
            node_id,
            space,
            maps: RwLock::new(StoreMaps::default()),
            disk: None,
        }
    }

    /// Storage mirrored under `<base>/node_<id>/`.
    pub fn with_persistence(node_id: Id, space: KeySpace, base: &Path) -> Result<Self> {
        Ok(Self {
            node_id,
            space,
            maps: RwLock::new(StoreMaps::default()),
            disk: Some(DiskStore::open(base, node_id)?),
        })
    }

    pub fn node_id(&self) -> Id {
        self.node_id
    }

    /// Store a primary entry.
    ///
    /// With an explicit `version` the entry is stored as given (replica
    /// propagation, key transfer). Without one, the entry is a fresh client
    /// write: the prior version (or the empty clock) is copied and this
    /// node's counter is bumped.
    pub fn put(
        &self,
        key: &str,
        value: impl Into<Value>,
        version: Option<VectorClock>,
    ) -> VectorClock {
        let mut maps = self.maps.write();
        let version = version.unwrap_or_else(|| {
            let mut next = maps
                .primary
                .get(key)
                .map(|entry| entry.version.clone())
                .unwrap_or_default();
            next.increment(self.node_id);
            next
        });
        let entry = VersionedValue::new(value, version.clone());
        if let Some(disk) = &self.disk {
            disk.save_primary(key, &entry);
        }
        maps.primary.insert(key.to_owned(), entry);
        version
    }

    pub fn get(&self, key: &str) -> Option<VersionedValue> {
        self.maps.read().primary.get(key).cloned()
    }

    /// Store a backup entry for `primary`.
    ///
    /// The stored version is the join of the existing and incoming clocks
    /// plus a fresh increment of this node's counter, so it strictly
    /// dominates the incoming version.
    pub fn put_backup(
        &self,
        key: &str,
        value: impl Into<Value>,
        incoming: &VectorClock,
        primary: Id,
    ) -> VectorClock {
        let mut maps = self.maps.write();
        let bucket = maps.backups.entry(primary).or_default();
        let mut version = bucket
            .get(key)
            .map(|entry| entry.version.clone())
            .unwrap_or_default()
            .merged(incoming);
        version.increment(self.node_id);
        let entry = VersionedValue::new(value, version.clone());
        if let Some(disk) = &self.disk {
            disk.save_backup(key, &entry, primary);
        }
        bucket.insert(key.to_owned(), entry);
        version
    }

    /// Store a backup entry exactly as given, no merge and no increment.
    ///
    /// Used when a recovered primary pushes its authoritative version
    /// forward: installing it verbatim keeps repeated recovery runs at a
    /// fixed point instead of inflating counters.
    pub fn install_backup(
        &self,
        key: &str,
        value: impl Into<Value>,
        version: VectorClock,
        primary: Id,
    ) {
        let mut maps = self.maps.write();
        let entry = VersionedValue::new(value, version);
        if let Some(disk) = &self.disk {
            disk.save_backup(key, &entry, primary);
        }
        maps.backups
            .entry(primary)
            .or_default()
            .insert(key.to_owned(), entry);
    }

    pub fn get_backup(&self, key: &str, primary: Id) -> Option<VersionedValue> {
        self.maps
            .read()
            .backups
            .get(&primary)
            .and_then(|bucket| bucket.get(key))
            .cloned()
    }

    /// Search every backup bucket for `key`, preferring none in particular.
    pub fn any_backup(&self, key: &str) -> Option<(Id, VersionedValue)> {
        let maps = self.maps.read();
        maps.backups
            .iter()
            .find_map(|(primary, bucket)| bucket.get(key).map(|e| (*primary, e.clone())))
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.maps.write().primary.remove(key).is_some();
        if removed {
            if let Some(disk) = &self.disk {
                disk.remove_primary(key);
            }
        }
        removed
    }

    pub fn delete_backup(&self, key: &str, primary: Id) -> bool {
        let mut maps = self.maps.write();
        let removed = maps
            .backups
            .get_mut(&primary)
            .is_some_and(|bucket| bucket.remove(key).is_some());
        if removed {
            if let Some(disk) = &self.disk {
                disk.remove_backup(key, primary);
            }
        }
        removed
    }

    /// Snapshot of the primary store.
    pub fn all_primary(&self) -> HashMap<String, VersionedValue> {
        self.maps.read().primary.clone()
    }

    pub fn primary_len(&self) -> usize {
        self.maps.read().primary.len()
    }

    /// Snapshot of the backup bucket held for `primary`.
    pub fn all_backups_for(&self, primary: Id) -> HashMap<String, VersionedValue> {
        self.maps
            .read()
            .backups
            .get(&primary)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove and return the backup bucket held for `primary` (hinted
    /// handoff: the entries are being returned to their owner).
    pub fn take_backups_for(&self, primary: Id) -> HashMap<String, VersionedValue> {
        let taken = self
            .maps
            .write()
            .backups
            .remove(&primary)
            .unwrap_or_default();
        if let Some(disk) = &self.disk {
            for key in taken.keys() {
                disk.remove_backup(key, primary);
            }
        }
        taken
    }

    /// Promote every backup held for `primary` into the primary store.
    ///
    /// A promoted entry wins only when it strictly dominates the local one;
    /// on concurrency the local value is kept but the clocks are joined, so
    /// the resulting primary version always dominates the backup's. The
    /// bucket is purged afterwards. Returns the number of keys examined.
    pub fn promote_backups(&self, primary: Id) -> usize {
        let mut maps = self.maps.write();
        let Some(bucket) = maps.backups.remove(&primary) else {
            return 0;
        };
        let count = bucket.len();
        for (key, backup) in bucket {
            let merged = match maps.primary.get(&key) {
                None => backup,
                Some(local) if local.version.happens_before(&backup.version) => backup,
                Some(local) => {
                    VersionedValue::new(local.value.clone(), local.version.merged(&backup.version))
                }
            };
            if let Some(disk) = &self.disk {
                disk.save_primary(&key, &merged);
                disk.remove_backup(&key, primary);
            }
            maps.primary.insert(key, merged);
        }
        count
    }

    /// Primary entries whose key hashes into the arc `(start, end]`, the
    /// range a joiner at `end` takes over from its successors.
    pub fn keys_in_range(&self, start: Id, end: Id) -> Vec<(String, VersionedValue)> {
        self.maps
            .read()
            .primary
            .iter()
            .filter(|(key, _)| in_arc_open_closed(self.space.hash_key(key), start, end))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Merge transferred entries into the primary store. An entry is
    /// accepted only when the key is absent locally or the incoming version
    /// strictly dominates. Returns the number accepted.
    pub fn receive_keys(
        &self,
        entries: impl IntoIterator<Item = (String, VersionedValue)>,
    ) -> usize {
        let mut maps = self.maps.write();
        let mut accepted = 0;
        for (key, incoming) in entries {
            let take = match maps.primary.get(&key) {
                None => true,
                Some(local) => local.version.happens_before(&incoming.version),
            };
            if take {
                if let Some(disk) = &self.disk {
                    disk.save_primary(&key, &incoming);
                }
                maps.primary.insert(key, incoming);
                accepted += 1;
            }
        }
        accepted
    }

    /// Load every persisted record into memory. Returns
    /// `(primary_count, backup_count)`; a node without persistence loads
    /// nothing.
    pub fn load(&self) -> (usize, usize) {
        let Some(disk) = &self.disk else {
            return (0, 0);
        };
        let primary = disk.load_primary();
        let backups = disk.load_backups();
        let counts = (primary.len(), backups.len());
        let mut maps = self.maps.write();
        for (key, entry) in primary {
            maps.primary.entry(key).or_insert(entry);
        }
        for (primary_id, key, entry) in backups {
            maps.backups
                .entry(primary_id)
                .or_default()
                .entry(key)
                .or_insert(entry);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> NodeStorage {
        NodeStorage::new(Id(50), KeySpace::new(6).unwrap())
    }

    #[test]
    fn test_put_increments_own_counter() {
        let storage = store();
        let v1 = storage.put("k", "a", None);
        assert_eq!(v1.counter(Id(50)), 1);
        let v2 = storage.put("k", "b", None);
        assert_eq!(v2.counter(Id(50)), 2);
        assert!(v1.happens_before(&v2));
        assert_eq!(storage.get("k").unwrap().value, Value::from("b"));
    }

    #[test]
    fn test_put_with_explicit_version_stores_as_given() {
        let storage = store();
        let version = VectorClock::from_entries([(9, 4)]);
        storage.put("k", "v", Some(version.clone()));
        assert_eq!(storage.get("k").unwrap().version, version);
    }

    #[test]
    fn test_backup_dominance() {
        let storage = store();
        let incoming = VectorClock::from_entries([(7, 2)]);
        let stored = storage.put_backup("k", "v", &incoming, Id(7));
        // Stored version strictly dominates the incoming one via a fresh
        // increment of this node's counter.
        assert!(incoming.happens_before(&stored));
        assert_eq!(stored.counter(Id(50)), 1);

        let newer = VectorClock::from_entries([(7, 3)]);
        let stored2 = storage.put_backup("k", "v2", &newer, Id(7));
        assert!(stored.happens_before(&stored2));
        assert_eq!(stored2.counter(Id(50)), 2);
    }

    #[test]
    fn test_backup_buckets_are_independent() {
        let storage = store();
        storage.put_backup("k", "for-seven", &VectorClock::new(), Id(7));
        storage.put_backup("k", "for-nine", &VectorClock::new(), Id(9));
        assert_eq!(
            storage.get_backup("k", Id(7)).unwrap().value,
            Value::from("for-seven")
        );
        assert_eq!(
            storage.get_backup("k", Id(9)).unwrap().value,
            Value::from("for-nine")
        );
        assert!(storage.get_backup("k", Id(11)).is_none());
    }

    #[test]
    fn test_install_backup_is_verbatim_and_idempotent() {
        let storage = store();
        let version = VectorClock::from_entries([(7, 1), (50, 1)]);
        storage.install_backup("k", "v", version.clone(), Id(7));
        storage.install_backup("k", "v", version.clone(), Id(7));
        let stored = storage.get_backup("k", Id(7)).unwrap();
        assert_eq!(stored.version, version);
    }

    #[test]
    fn test_take_backups_empties_bucket() {
        let storage = store();
        storage.put_backup("a", "1", &VectorClock::new(), Id(7));
        storage.put_backup("b", "2", &VectorClock::new(), Id(7));
        let taken = storage.take_backups_for(Id(7));
        assert_eq!(taken.len(), 2);
        assert!(storage.take_backups_for(Id(7)).is_empty());
        assert!(storage.get_backup("a", Id(7)).is_none());
    }

    #[test]
    fn test_promotion_keeps_dominating_version() {
        let storage = store();
        // Local primary write, then a strictly newer backup for node 7.
        let local = storage.put("k", "old", None);
        let mut newer = local.clone();
        newer.increment(Id(7));
        storage.put_backup("k", "new", &newer, Id(7));
        let backup_version = storage.get_backup("k", Id(7)).unwrap().version;

        storage.promote_backups(Id(7));
        let promoted = storage.get("k").unwrap();
        assert_eq!(promoted.value, Value::from("new"));
        assert!(promoted.version.dominates(&backup_version));
        assert!(storage.get_backup("k", Id(7)).is_none());
    }

    #[test]
    fn test_promotion_on_concurrency_keeps_local_value_joins_clocks() {
        let storage = store();
        storage.put("k", "local", None); // {50:1}
        // Seed the bucket with a clock concurrent to the local one
        // (put_backup would merge it and hide the join path).
        let concurrent = VectorClock::from_entries([(7, 1)]);
        storage.install_backup("k", "remote", concurrent.clone(), Id(7));

        storage.promote_backups(Id(7));
        let kept = storage.get("k").unwrap();
        assert_eq!(kept.value, Value::from("local"));
        assert!(kept.version.dominates(&concurrent));
        assert_eq!(kept.version.counter(Id(50)), 1);
    }

    #[test]
    fn test_keys_in_range_uses_key_hash() {
        let storage = store();
        let space = KeySpace::new(6).unwrap();
        storage.put("alpha", "1", None);
        storage.put("beta", "2", None);
        let alpha_hash = space.hash_key("alpha");

        // An arc containing only alpha's hash.
        let start = Id(alpha_hash.0.wrapping_sub(1) & (space.size() - 1));
        let found = storage.keys_in_range(start, alpha_hash);
        let names: Vec<_> = found.iter().map(|(k, _)| k.as_str()).collect();
        assert!(names.contains(&"alpha"));
        assert!(!names.contains(&"beta") || space.hash_key("beta") == alpha_hash);
    }

    #[test]
    fn test_receive_keys_respects_dominance() {
        let storage = store();
        let v_local = storage.put("k", "local", None); // {50:1}

        // Stale transfer: ignored.
        let stale = VersionedValue::new("stale", VectorClock::new());
        assert_eq!(storage.receive_keys([("k".to_owned(), stale)]), 0);
        assert_eq!(storage.get("k").unwrap().value, Value::from("local"));

        // Strictly newer transfer: accepted.
        let mut newer = v_local.clone();
        newer.increment(Id(8));
        let entry = VersionedValue::new("newer", newer);
        assert_eq!(storage.receive_keys([("k".to_owned(), entry)]), 1);
        assert_eq!(storage.get("k").unwrap().value, Value::from("newer"));
    }

    #[test]
    fn test_delete_backup_targets_one_bucket() {
        let storage = store();
        storage.put_backup("k", "v", &VectorClock::new(), Id(7));
        storage.put_backup("k", "v", &VectorClock::new(), Id(9));
        assert!(storage.delete_backup("k", Id(7)));
        assert!(!storage.delete_backup("k", Id(7)));
        assert!(storage.get_backup("k", Id(7)).is_none());
        assert!(storage.get_backup("k", Id(9)).is_some());
    }

    #[test]
    fn test_delete() {
        let storage = store();
        storage.put("k", "v", None);
        assert!(storage.delete("k"));
        assert!(!storage.delete("k"));
        assert!(storage.get("k").is_none());
    }
}
