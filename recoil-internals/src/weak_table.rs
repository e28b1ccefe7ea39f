//! Interning table with weak retention and a bounded strong working set.
//!
//! [`WeakTable`] maps keys to [`Weak`] handles. Holding a value in the table
//! never keeps it alive on its own: once every [`Arc`] handed out for a value
//! is dropped, the entry is dead and the next lookup for its key is a miss.
//!
//! To keep frequently used values resident even while no caller holds them,
//! the table also keeps up to `strong_capacity` strong handles. Every
//! successful resolution (a hit, or the insertion that follows a miss) marks
//! the entry as most recently resolved. When the strong set is full, the
//! least recently resolved entry loses its strong handle; this is counted as
//! an eviction.
//!
//! The strong set is kept in resolution order, oldest first, so eviction
//! takes the front entry.
//!
//! Lookups accept any borrowed form `Q` of the key that implements
//! [`Equivalent<K>`] and hashes identically to `K`, so hits never allocate an
//! owned key. The key is cloned only when it joins the strong set.

use core::hash::Hash;
use std::sync::{Arc, Weak};

use indexmap::{Equivalent, IndexMap};
use rustc_hash::FxBuildHasher;

/// Counters describing the activity of a [`WeakTable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeakTableStats {
    /// Lookups that returned a live value.
    pub hits: u64,
    /// Lookups that found no entry or a dead entry.
    pub misses: u64,
    /// Strong handles dropped to make room for more recently resolved
    /// entries.
    pub evictions: u64,
    /// Number of entries in the weak map, dead or alive.
    pub len: usize,
    /// Number of entries currently held strongly.
    pub strong_len: usize,
}

impl WeakTableStats {
    /// Fraction of lookups that were hits, or `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// An interning table holding values weakly, with a bounded strong LRU set.
///
/// # Examples
///
/// ```
/// use recoil_internals::WeakTable;
///
/// let mut table: WeakTable<String, String> = WeakTable::new(2);
///
/// let first = table.insert("k".to_string(), "value".to_string());
/// let again = table.lookup("k").expect("entry is alive");
/// assert!(std::sync::Arc::ptr_eq(&first, &again));
/// assert_eq!(table.stats().hits, 1);
/// ```
#[derive(Debug)]
pub struct WeakTable<K, V> {
    /// Weak handles for every interned value.
    entries: IndexMap<K, Weak<V>, FxBuildHasher>,
    /// Strong handles for the most recently resolved values, least recent
    /// first.
    strong: IndexMap<K, Arc<V>, FxBuildHasher>,
    /// Maximum size of `strong`.
    strong_capacity: usize,
    /// Weak map size that triggers a sweep of dead entries.
    sweep_threshold: usize,
    /// Activity counters.
    hits: u64,
    /// Activity counters.
    misses: u64,
    /// Activity counters.
    evictions: u64,
}

impl<K, V> WeakTable<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Creates an empty table keeping at most `strong_capacity` values
    /// resident.
    pub fn new(strong_capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_hasher(FxBuildHasher),
            strong: IndexMap::with_hasher(FxBuildHasher),
            strong_capacity,
            sweep_threshold: strong_capacity.saturating_mul(4).max(64),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Returns the maximum number of strongly held entries.
    pub fn strong_capacity(&self) -> usize {
        self.strong_capacity
    }

    /// Looks up a live value for `key`, marking it as most recently resolved.
    pub fn lookup<Q>(&mut self, key: &Q) -> Option<Arc<V>>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        let Some(value) = self.entries.get(key).and_then(Weak::upgrade) else {
            self.misses += 1;
            return None;
        };
        self.hits += 1;
        if !self.refresh(key)
            && let Some(owned_key) = self.entries.get_key_value(key).map(|(k, _)| k.clone())
        {
            self.promote(owned_key, &value);
        }
        Some(value)
    }

    /// Interns `value` under `key`, replacing any dead entry, and returns the
    /// shared handle.
    ///
    /// If a live value already exists for `key`, the existing value is kept
    /// and returned instead.
    pub fn insert(&mut self, key: K, value: V) -> Arc<V> {
        if let Some(existing) = self.entries.get(&key).and_then(Weak::upgrade) {
            if !self.refresh(&key) {
                self.promote(key, &existing);
            }
            return existing;
        }

        if self.entries.len() >= self.sweep_threshold {
            self.purge();
        }

        let value = Arc::new(value);
        self.entries.insert(key.clone(), Arc::downgrade(&value));
        self.promote(key, &value);
        value
    }

    /// Looks up `key` and interns the value produced by `make` on a miss.
    pub fn get_or_insert_with<Q>(&mut self, key: &Q, make: impl FnOnce() -> (K, V)) -> Arc<V>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        match self.lookup(key) {
            Some(value) => value,
            None => {
                let (key, value) = make();
                self.insert(key, value)
            }
        }
    }

    /// Removes every entry whose value is no longer alive.
    ///
    /// Returns the number of removed entries.
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }

    /// Drops every entry, strong and weak. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.strong.clear();
    }

    /// Returns a snapshot of the table counters.
    pub fn stats(&self) -> WeakTableStats {
        WeakTableStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            len: self.entries.len(),
            strong_len: self.strong.len(),
        }
    }

    /// Moves an existing strong entry to the most recent position. Returns
    /// `false` if `key` is not held strongly.
    fn refresh<Q>(&mut self, key: &Q) -> bool
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        match self.strong.get_index_of(key) {
            Some(index) => {
                let last = self.strong.len() - 1;
                self.strong.move_index(index, last);
                true
            }
            None => false,
        }
    }

    /// Adds a strong handle for `key`, evicting the least recently resolved
    /// entry if the strong set is full.
    fn promote(&mut self, key: K, value: &Arc<V>) {
        if self.strong_capacity == 0 {
            return;
        }
        if self.strong.len() >= self.strong_capacity && self.strong.shift_remove_index(0).is_some() {
            self.evictions += 1;
        }
        self.strong.insert(key, value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_table_send_sync() {
        static_assertions::assert_impl_all!(WeakTable<String, String>: Send, Sync);
        static_assertions::assert_impl_all!(WeakTableStats: Send, Sync, Copy);
    }

    #[test]
    fn test_hit_returns_same_allocation() {
        let mut table = WeakTable::new(4);
        let a = table.insert(String::from("a"), 1u32);
        let b = table.lookup("a").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let stats = table.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.len, 1);
        assert_eq!(stats.strong_len, 1);
    }

    #[test]
    fn test_miss_counts() {
        let mut table: WeakTable<String, u32> = WeakTable::new(4);
        assert!(table.lookup("missing").is_none());
        assert_eq!(table.stats().misses, 1);
        assert_eq!(table.stats().hit_rate(), 0.0);
    }

    #[test]
    fn test_lru_eviction_prefers_least_recently_resolved() {
        let mut table = WeakTable::new(2);
        drop(table.insert(String::from("a"), 1u32));
        drop(table.insert(String::from("b"), 2u32));

        // Resolve "a" again so that "b" becomes the oldest.
        drop(table.lookup("a"));
        drop(table.insert(String::from("c"), 3u32));

        let stats = table.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.strong_len, 2);

        // "b" lost its strong handle and nobody else held it.
        assert!(table.lookup("b").is_none());
        assert!(table.lookup("a").is_some());
        assert!(table.lookup("c").is_some());
    }

    #[test]
    fn test_hit_refreshes_strong_order_in_place() {
        let mut table = WeakTable::new(3);
        drop(table.insert(String::from("a"), 1u32));
        drop(table.insert(String::from("b"), 2u32));
        drop(table.insert(String::from("c"), 3u32));

        drop(table.lookup("a"));
        drop(table.lookup("a"));
        drop(table.lookup("b"));

        let order: Vec<&str> = table.strong.keys().map(String::as_str).collect();
        assert_eq!(order, ["c", "a", "b"]);
        assert_eq!(table.stats().strong_len, 3);
        assert_eq!(table.stats().evictions, 0);

        drop(table.insert(String::from("d"), 4u32));
        let order: Vec<&str> = table.strong.keys().map(String::as_str).collect();
        assert_eq!(order, ["a", "b", "d"]);
        assert_eq!(table.stats().evictions, 1);
    }

    #[test]
    fn test_evicted_value_survives_while_externally_held() {
        let mut table = WeakTable::new(1);
        let held = table.insert(String::from("a"), 1u32);
        drop(table.insert(String::from("b"), 2u32));

        let again = table.lookup("a").expect("still alive through `held`");
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[test]
    fn test_zero_capacity_holds_nothing_strongly() {
        let mut table = WeakTable::new(0);
        drop(table.insert(String::from("a"), 1u32));
        assert_eq!(table.stats().strong_len, 0);
        assert!(table.lookup("a").is_none());
        assert_eq!(table.purge(), 1);
        assert_eq!(table.stats().len, 0);
    }

    #[test]
    fn test_insert_keeps_live_value() {
        let mut table = WeakTable::new(2);
        let first = table.insert(String::from("k"), 1u32);
        let second = table.insert(String::from("k"), 2u32);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 1);
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut table = WeakTable::new(2);
        let a = table.get_or_insert_with("x", || (String::from("x"), 10u32));
        let b = table.get_or_insert_with("x", || unreachable!("value is interned"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.stats().hits, 1);
        assert_eq!(table.stats().misses, 1);
        assert_eq!(table.stats().hit_rate(), 0.5);
    }

    #[test]
    fn test_clear_keeps_counters() {
        let mut table = WeakTable::new(2);
        drop(table.insert(String::from("a"), 1u32));
        drop(table.lookup("a"));
        table.clear();
        let stats = table.stats();
        assert_eq!(stats.len, 0);
        assert_eq!(stats.strong_len, 0);
        assert_eq!(stats.hits, 1);
    }
}
