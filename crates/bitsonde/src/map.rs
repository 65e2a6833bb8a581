//! Sharded concurrent map keyed by an object's string identity.
//!
//! The map is partitioned into independently locked shards; the shard for a
//! key is selected by a 32-bit FNV-1a hash modulo the shard count. Iteration
//! snapshots each shard under its read lock, so callers never run external
//! code while a lock is held.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Default number of shards.
const DEFAULT_SHARDS: u32 = 32;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv32a(key: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Types stored in a [`ShardedMap`]; the key is the object's string identity.
pub trait Keyed {
    fn key(&self) -> String;
}

/// A key-to-object map partitioned into independently locked shards.
#[derive(Debug)]
pub struct ShardedMap<V> {
    shards: Vec<RwLock<HashMap<String, V>>>,
}

impl<V: Keyed + Clone> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl<V: Keyed + Clone> ShardedMap<V> {
    /// Creates a map with the given number of shards (minimum 1).
    pub fn new(shards: u32) -> Self {
        let count = shards.max(1) as usize;
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, V>> {
        let index = fnv32a(key) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Inserts an object, replacing any previous object under the same key.
    pub fn insert(&self, value: V) {
        let key = value.key();
        self.shard(&key).write().insert(key, value);
    }

    /// Inserts the object only if its key is absent; returns whether it was
    /// inserted. The presence check and the insert happen under one shard
    /// write lock, so concurrent callers see exactly one winner per key.
    pub fn insert_if_absent(&self, value: V) -> bool {
        let key = value.key();
        let mut shard = self.shard(&key).write();
        if shard.contains_key(&key) {
            return false;
        }
        shard.insert(key, value);
        true
    }

    /// Returns a clone of the object stored under `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        self.shard(key).read().get(key).cloned()
    }

    /// Whether `key` is present.
    pub fn has_key(&self, key: &str) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Whether an object with the same string identity is present.
    pub fn has(&self, value: &V) -> bool {
        self.has_key(&value.key())
    }

    /// Removes the object stored under `key`, if any.
    pub fn remove_key(&self, key: &str) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    /// Removes the object with the same string identity, if present.
    pub fn remove(&self, value: &V) -> Option<V> {
        self.remove_key(&value.key())
    }

    /// Total number of objects, summed shard by shard under read locks.
    pub fn count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Iterates over a point-in-time snapshot of the map.
    ///
    /// Each shard is copied under its read lock before the iterator yields
    /// anything. An object present for the whole iteration appears exactly
    /// once; concurrent inserts and removes may or may not be observed.
    pub fn iter(&self) -> impl Iterator<Item = V> + use<V> {
        let mut snapshot = Vec::with_capacity(self.count());
        for shard in &self.shards {
            snapshot.extend(shard.read().values().cloned());
        }
        snapshot.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        payload: u64,
    }

    impl Item {
        fn new(id: &str, payload: u64) -> Self {
            Self {
                id: id.to_string(),
                payload,
            }
        }
    }

    impl Keyed for Item {
        fn key(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let map = ShardedMap::default();
        map.insert(Item::new("a", 1));
        map.insert(Item::new("b", 2));

        assert!(map.has_key("a"));
        assert!(map.has(&Item::new("b", 0)));
        assert_eq!(map.get("a").unwrap().payload, 1);
        assert_eq!(map.count(), 2);

        map.remove_key("a");
        assert!(!map.has_key("a"));
        assert_eq!(map.count(), 1);

        map.remove(&Item::new("b", 0));
        assert_eq!(map.count(), 0);
        assert!(map.get("b").is_none());
    }

    #[test]
    fn test_insert_overwrites() {
        let map = ShardedMap::default();
        map.insert(Item::new("a", 1));
        map.insert(Item::new("a", 9));

        assert_eq!(map.count(), 1);
        assert_eq!(map.get("a").unwrap().payload, 9);
    }

    #[test]
    fn test_insert_if_absent_keeps_first() {
        let map = ShardedMap::default();
        assert!(map.insert_if_absent(Item::new("a", 1)));
        assert!(!map.insert_if_absent(Item::new("a", 9)));

        assert_eq!(map.count(), 1);
        assert_eq!(map.get("a").unwrap().payload, 1);
    }

    #[test]
    fn test_iter_yields_each_item_once() {
        let map = ShardedMap::new(4);
        for i in 0..100 {
            map.insert(Item::new(&format!("key-{i}"), i));
        }

        let mut seen: Vec<u64> = map.iter().map(|item| item.payload).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert_eq!(map.count(), 100);
    }

    #[test]
    fn test_single_shard_still_works() {
        let map = ShardedMap::new(1);
        map.insert(Item::new("x", 7));
        map.insert(Item::new("y", 8));
        assert_eq!(map.count(), 2);
        assert_eq!(map.iter().count(), 2);
    }

    #[test]
    fn test_concurrent_access() {
        let map = Arc::new(ShardedMap::new(8));
        let mut handles = Vec::new();

        for t in 0..4 {
            let map = Arc::clone(&map);
            handles.push(std::thread::spawn(move || {
                for i in 0..250 {
                    map.insert(Item::new(&format!("t{t}-{i}"), i));
                    // iterate while other threads mutate; must not panic
                    let _ = map.iter().count();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.count(), 4 * 250);
    }

    #[test]
    fn test_fnv_reference_vector() {
        // FNV-1a("a") per the published reference values.
        assert_eq!(fnv32a("a"), 0xe40c292c);
        assert_eq!(fnv32a(""), FNV_OFFSET);
    }
}
