//! Session-scoped reference tables.
//!
//! A [`RefTable`] interns keys to small positive ids. The writer side calls
//! [`RefTable::assign`] (insert-or-lookup); the reader side pre-registers
//! instances with [`RefTable::insert`] before their fields are populated and
//! resolves later occurrences with [`RefTable::lookup`]. Id 0 is never valid.
//!
//! The table is an open hash over parallel entry storage: each entry carries
//! its key, its cached hash and a `next` link forming the bucket chain. When
//! `len` passes `threshold` the bucket array grows by `expand_ratio` and every
//! live entry is re-bucketed in place; entry storage grows by doubling, which
//! `Vec` already provides.

use crate::{CodecError, Result};

/// Default number of buckets when the session config does not say otherwise.
pub const DEFAULT_INITIAL_SIZE: usize = 32;
/// Default bucket-array growth factor.
pub const DEFAULT_EXPAND_RATIO: f64 = 2.0;
/// Default occupancy fraction that triggers growth.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.75;

struct Entry<K> {
    key: K,
    hash: u64,
    /// Bucket chain link: the id of the next entry in the chain, 0 for end.
    next: u32,
}

/// An interning map from a key to a small positive integer id.
pub struct RefTable<K> {
    buckets: Vec<u32>,
    /// Entry for id `i` lives at slot `i - 1`. Slots may be empty: the
    /// reader accepts sparse ids rather than enforcing that they arrive
    /// densely.
    entries: Vec<Option<Entry<K>>>,
    len: usize,
    threshold: usize,
    load_factor: f64,
    expand_ratio: f64,
}

impl<K> RefTable<K> {
    /// Creates a table with the default sizing.
    pub fn new() -> Self {
        Self::with_config(DEFAULT_INITIAL_SIZE, DEFAULT_EXPAND_RATIO, DEFAULT_LOAD_FACTOR)
    }

    /// Creates a table with explicit initial bucket count, growth factor and
    /// load factor.
    pub fn with_config(initial: usize, expand_ratio: f64, load_factor: f64) -> Self {
        let buckets = initial.max(4);
        let load_factor = if load_factor > 0.0 { load_factor } else { DEFAULT_LOAD_FACTOR };
        let expand_ratio = if expand_ratio > 1.0 { expand_ratio } else { DEFAULT_EXPAND_RATIO };
        RefTable {
            buckets: vec![0; buckets],
            entries: Vec::new(),
            len: 0,
            threshold: (buckets as f64 * load_factor) as usize,
            load_factor,
            expand_ratio,
        }
    }

    /// Number of interned entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no entry has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert-or-lookup with a self-assigned id (next free slot). Returns the
    /// positive id when the key was new, or the negation of the existing id.
    pub fn assign(&mut self, key: K, hash: u64, eq: impl Fn(&K, &K) -> bool) -> i32 {
        let id = self.entries.len() as u32 + 1;
        self.assign_at(key, hash, eq, id)
    }

    /// Insert-or-lookup under a caller-chosen id. Used when several tables
    /// share one id sequence. The id must not be lower than any id this table
    /// has already stored.
    pub fn assign_at(&mut self, key: K, hash: u64, eq: impl Fn(&K, &K) -> bool, id: u32) -> i32 {
        if let Some(existing) = self.probe(hash, &key, &eq) {
            return -(existing as i32);
        }
        self.place(id, key, hash);
        id as i32
    }

    /// Pre-registers a key under an id taken from the stream. Fails when the
    /// id is 0 or already occupied.
    pub fn insert(&mut self, key: K, hash: u64, id: u32) -> Result<()> {
        if id == 0 {
            return Err(CodecError::Corrupt("reference id 0".into()));
        }
        let slot = (id - 1) as usize;
        if self.entries.get(slot).map(|e| e.is_some()).unwrap_or(false) {
            return Err(CodecError::Corrupt(format!("reference id {id} registered twice")));
        }
        self.place(id, key, hash);
        Ok(())
    }

    /// Replaces the key stored under `id`, keeping its id and bucket position.
    /// Used when read-resolution substitutes an instance.
    pub fn replace(&mut self, id: u32, key: K) -> Result<()> {
        let slot = (id as usize).checked_sub(1);
        match slot.and_then(|s| self.entries.get_mut(s)).and_then(|e| e.as_mut()) {
            Some(entry) => {
                entry.key = key;
                Ok(())
            }
            None => Err(CodecError::Corrupt(format!("re-registering unknown id {id}"))),
        }
    }

    /// Returns the key interned under `id`.
    pub fn lookup(&self, id: u32) -> Option<&K> {
        let slot = (id as usize).checked_sub(1)?;
        self.entries.get(slot)?.as_ref().map(|e| &e.key)
    }

    fn probe(&self, hash: u64, key: &K, eq: &impl Fn(&K, &K) -> bool) -> Option<u32> {
        let mut id = self.buckets[(hash % self.buckets.len() as u64) as usize];
        while id != 0 {
            let entry = self.entries[(id - 1) as usize]
                .as_ref()
                .unwrap_or_else(|| unreachable!("bucket chain points at empty slot"));
            if entry.hash == hash && eq(&entry.key, key) {
                return Some(id);
            }
            id = entry.next;
        }
        None
    }

    fn place(&mut self, id: u32, key: K, hash: u64) {
        let slot = (id - 1) as usize;
        if slot >= self.entries.len() {
            self.entries.resize_with(slot + 1, || None);
        }
        let bucket = (hash % self.buckets.len() as u64) as usize;
        self.entries[slot] = Some(Entry { key, hash, next: self.buckets[bucket] });
        self.buckets[bucket] = id;
        self.len += 1;
        if self.len > self.threshold {
            self.grow();
        }
    }

    /// Grows the bucket array and re-buckets every live entry. Skipping this
    /// would break lookups for graphs that outgrow the initial capacity.
    fn grow(&mut self) {
        let new_len = ((self.buckets.len() as f64 * self.expand_ratio) as usize)
            .max(self.buckets.len() + 1);
        log::trace!("reference table grows to {new_len} buckets at {} entries", self.len);
        self.buckets = vec![0; new_len];
        self.threshold = (new_len as f64 * self.load_factor) as usize;
        for slot in 0..self.entries.len() {
            if let Some(entry) = self.entries[slot].as_mut() {
                let bucket = (entry.hash % new_len as u64) as usize;
                entry.next = self.buckets[bucket];
                self.buckets[bucket] = slot as u32 + 1;
            }
        }
    }
}

impl<K> Default for RefTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// 64-bit finalizer used for integer and pointer keys.
pub fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(a: &i32, b: &i32) -> bool {
        a == b
    }

    #[test]
    fn assign_then_assign_negates() {
        let mut t = RefTable::new();
        let first = t.assign(7, mix64(7), eq);
        assert_eq!(first, 1);
        let second = t.assign(7, mix64(7), eq);
        assert_eq!(second, -1);
    }

    #[test]
    fn ids_are_slot_plus_one() {
        let mut t = RefTable::new();
        for v in 0..10 {
            assert_eq!(t.assign(v, mix64(v as u64), eq), v + 1);
        }
        for v in 0..10 {
            assert_eq!(t.lookup(v as u32 + 1), Some(&v));
        }
    }

    #[test]
    fn lookups_survive_growth() {
        let mut t = RefTable::with_config(4, 2.0, 0.75);
        for v in 0..500 {
            assert!(t.assign(v, mix64(v as u64), eq) > 0);
        }
        // Every earlier key must still be found by hash probe after several
        // bucket-array expansions.
        for v in 0..500 {
            let r = t.assign(v, mix64(v as u64), eq);
            assert_eq!(r, -(v + 1));
        }
        assert_eq!(t.len(), 500);
    }

    #[test]
    fn insert_then_lookup() {
        let mut t = RefTable::new();
        t.insert("a".to_string(), 0, 1).unwrap();
        t.insert("b".to_string(), 0, 2).unwrap();
        assert_eq!(t.lookup(2).map(String::as_str), Some("b"));
        assert!(t.lookup(3).is_none());
        assert!(t.insert("dup".to_string(), 0, 1).is_err());
    }

    #[test]
    fn insert_with_gap_and_replace() {
        let mut t = RefTable::new();
        t.insert(10, 0, 1).unwrap();
        // Id 2 never arrives; id 3 comes next.
        t.insert(30, 0, 3).unwrap();
        assert_eq!(t.lookup(2), None);
        assert_eq!(t.lookup(3), Some(&30));
        t.replace(3, 31).unwrap();
        assert_eq!(t.lookup(3), Some(&31));
        assert!(t.replace(2, 99).is_err());
    }

    #[test]
    fn shared_sequence_across_tables() {
        let mut a = RefTable::new();
        let mut b = RefTable::new();
        assert_eq!(a.assign_at(1, mix64(1), eq, 1), 1);
        assert_eq!(b.assign_at(9, mix64(9), eq, 2), 2);
        assert_eq!(a.assign_at(2, mix64(2), eq, 3), 3);
        assert_eq!(a.assign_at(1, mix64(1), eq, 4), -1);
        assert_eq!(b.assign_at(9, mix64(9), eq, 4), -2);
    }
}
