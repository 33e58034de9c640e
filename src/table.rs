//! Chained string-keyed hash table.
//!
//! The same structure serves as the server's pair store, the per-value reply
//! tally of a quorum read, the address dedup set of key placement and the
//! per-server status table of a liveness probe.

use crate::error::ErrorKind;

#[derive(Debug, Clone)]
pub struct HashTable<V> {
    buckets: Vec<Option<Box<Entry<V>>>>,
    len: usize,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    key: String,
    value: V,
    next: Option<Box<Entry<V>>>,
}

/// Jenkins one-at-a-time, reduced to a bucket index.
pub fn bucket_index(key: &str, buckets: usize) -> usize {
    let mut hash = 0u32;
    for &byte in key.as_bytes() {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash as usize % buckets
}

impl<V> HashTable<V> {
    pub fn new(buckets: usize) -> crate::Result<Self> {
        if buckets == 0 {
            return Err(ErrorKind::BadParameter.with("hash table needs at least one bucket"));
        }
        let mut table = Vec::new();
        table
            .try_reserve_exact(buckets)
            .map_err(|err| ErrorKind::OutOfMemory.with(err))?;
        table.resize_with(buckets, || None);
        Ok(Self {
            buckets: table,
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut Entry<V>> {
        let index = bucket_index(key, self.buckets.len());
        let mut cursor = self.buckets[index].as_deref_mut();
        while let Some(entry) = cursor {
            if entry.key == key {
                return Some(entry);
            }
            cursor = entry.next.as_deref_mut()
        }
        None
    }

    fn entry(&self, key: &str) -> Option<&Entry<V>> {
        let index = bucket_index(key, self.buckets.len());
        let mut cursor = self.buckets[index].as_deref();
        while let Some(entry) = cursor {
            if entry.key == key {
                return Some(entry);
            }
            cursor = entry.next.as_deref()
        }
        None
    }

    /// Stores `value` under `key`, replacing the previous value if any.
    pub fn insert(&mut self, key: &str, value: V) -> crate::Result<()> {
        if let Some(entry) = self.entry_mut(key) {
            entry.value = value;
            return Ok(());
        }
        let mut owned = String::new();
        owned
            .try_reserve_exact(key.len())
            .map_err(|err| ErrorKind::OutOfMemory.with(err))?;
        owned.push_str(key);
        let index = bucket_index(key, self.buckets.len());
        let next = self.buckets[index].take();
        self.buckets[index] = Some(Box::new(Entry {
            key: owned,
            value,
            next,
        }));
        self.len += 1;
        Ok(())
    }

    pub fn lookup(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.entry(key).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    pub fn snapshot(&self) -> Vec<(String, V)>
    where
        V: Clone,
    {
        let mut pairs = Vec::with_capacity(self.len);
        for bucket in &self.buckets {
            let mut cursor = bucket.as_deref();
            while let Some(entry) = cursor {
                pairs.push((entry.key.clone(), entry.value.clone()));
                cursor = entry.next.as_deref()
            }
        }
        pairs
    }

    pub fn delete_all(&mut self) {
        for bucket in &mut self.buckets {
            // unlink iteratively, a long chain would otherwise recurse in drop
            let mut cursor = bucket.take();
            while let Some(mut entry) = cursor {
                cursor = entry.next.take()
            }
        }
        self.len = 0
    }
}

impl<V> Drop for HashTable<V> {
    fn drop(&mut self) {
        self.delete_all()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn overwrite() {
        let mut table = HashTable::new(8).unwrap();
        table.insert("k", "v1".to_string()).unwrap();
        table.insert("k", "v2".to_string()).unwrap();
        assert_eq!(table.lookup("k").as_deref(), Some("v2"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("missing"), None);
    }

    #[test]
    fn single_bucket_chains() {
        let mut table = HashTable::new(1).unwrap();
        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            table.insert(key, i).unwrap()
        }
        assert_eq!(table.lookup("a"), Some(0));
        assert_eq!(table.lookup("c"), Some(2));
        let mut pairs = table.snapshot();
        pairs.sort();
        assert_eq!(
            pairs,
            [
                ("a".to_string(), 0),
                ("b".to_string(), 1),
                ("c".to_string(), 2)
            ]
        );
    }

    #[test]
    fn delete_all_is_idempotent() {
        let mut table = HashTable::new(4).unwrap();
        table.insert("x", ()).unwrap();
        table.delete_all();
        table.delete_all();
        assert!(table.is_empty());
        assert!(!table.contains("x"));
        assert!(table.snapshot().is_empty());
        table.insert("x", ()).unwrap();
        assert_eq!(table.len(), 1)
    }

    #[test]
    fn zero_buckets() {
        assert!(HashTable::<()>::new(0).is_err())
    }

    #[test]
    fn one_at_a_time_reference() {
        // published test vector of the one-at-a-time hash
        assert_eq!(bucket_index("a", usize::MAX), 0xca2e9442);
        assert_eq!(bucket_index("", usize::MAX), 0);
        assert_eq!(bucket_index("a", 2), 0);
    }

    proptest! {
        #[test]
        fn len_tracks_distinct_keys(keys in prop::collection::vec("[a-d]{0,3}", 0..64)) {
            let mut table = HashTable::new(7).unwrap();
            for (i, key) in keys.iter().enumerate() {
                table.insert(key, i).unwrap();
            }
            let distinct = keys.iter().collect::<std::collections::HashSet<_>>();
            prop_assert_eq!(table.len(), distinct.len());
            prop_assert_eq!(table.snapshot().len(), distinct.len());
            for key in distinct {
                let last = keys.iter().rposition(|k| k == key).unwrap();
                prop_assert_eq!(table.lookup(key), Some(last));
            }
        }
    }
}
