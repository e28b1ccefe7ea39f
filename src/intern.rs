//! Sharing of identical record fragments.
//!
//! Services that fail the same way many times produce many records with the
//! same kind, message and location. With
//! [`Config::interning`](crate::config::Config::interning) enabled, such
//! records share one [`Fragment`] allocation through the
//! [`global_intern_table`].

use core::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use recoil_internals::{Equivalent, WeakTable, WeakTableStats};

use crate::{Kind, callsite::CallSite, failure::Fragment};

/// Strong capacity of the global intern table.
const GLOBAL_STRONG_CAPACITY: usize = 512;

/// Owned lookup key of an interned fragment.
#[derive(Clone, PartialEq, Eq)]
struct FragmentKey {
    kind: Kind,
    message: String,
    location: Option<CallSite>,
}

impl Hash for FragmentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_fragment(self.kind.as_str(), &self.message, self.location.as_ref(), state);
    }
}

fn hash_fragment<H: Hasher>(kind: &str, message: &str, location: Option<&CallSite>, state: &mut H) {
    kind.hash(state);
    message.hash(state);
    match location {
        Some(site) => {
            state.write_u8(1);
            site.hash(state);
        }
        None => state.write_u8(0),
    }
}

/// Borrowed lookup key; hashes identically to [`FragmentKey`].
struct FragmentRef<'a> {
    kind: &'a str,
    message: &'a str,
    location: Option<&'a CallSite>,
}

impl Hash for FragmentRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_fragment(self.kind, self.message, self.location, state);
    }
}

impl Equivalent<FragmentKey> for FragmentRef<'_> {
    fn equivalent(&self, key: &FragmentKey) -> bool {
        self.kind == key.kind.as_str()
            && self.message == key.message
            && self.location == key.location.as_ref()
    }
}

/// Counters describing the activity of an [`InternTable`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InternStats {
    /// Lookups that found a live fragment.
    pub hits: u64,
    /// Lookups that had to allocate a fragment.
    pub misses: u64,
    /// Fraction of lookups that were hits.
    pub hit_rate: f64,
    /// Fragments that lost their place in the strong working set.
    pub evictions: u64,
    /// Fragments currently kept resident.
    pub strong_len: usize,
    /// Entries in the table, including dead ones not yet purged.
    pub len: usize,
}

impl From<WeakTableStats> for InternStats {
    fn from(stats: WeakTableStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            hit_rate: stats.hit_rate(),
            evictions: stats.evictions,
            strong_len: stats.strong_len,
            len: stats.len,
        }
    }
}

/// A table of shared kind/message/location fragments.
///
/// Fragments are held weakly: a fragment stays in the table for as long as a
/// record uses it. The most recently resolved `strong_capacity` fragments are
/// additionally kept alive by the table itself.
///
/// ```
/// use std::sync::Arc;
///
/// use recoil::{Kind, intern::InternTable};
///
/// let table = InternTable::new(16);
/// let a = table.intern(&Kind::TIMEOUT, "upstream timed out", None);
/// let b = table.intern(&Kind::TIMEOUT, "upstream timed out", None);
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(table.stats().hits, 1);
/// ```
#[derive(Debug)]
pub struct InternTable {
    table: spin::Mutex<WeakTable<FragmentKey, Fragment>>,
}

impl core::fmt::Debug for FragmentKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl InternTable {
    /// Creates a table keeping at most `strong_capacity` fragments resident.
    pub fn new(strong_capacity: usize) -> Self {
        Self {
            table: spin::Mutex::new(WeakTable::new(strong_capacity)),
        }
    }

    /// Returns the shared fragment for the triple, creating it on first use.
    pub fn intern(&self, kind: &Kind, message: &str, location: Option<&CallSite>) -> Arc<Fragment> {
        let lookup = FragmentRef {
            kind: kind.as_str(),
            message,
            location,
        };
        self.table.lock().get_or_insert_with(&lookup, || {
            let key = FragmentKey {
                kind: kind.clone(),
                message: message.to_owned(),
                location: location.cloned(),
            };
            let fragment = Fragment::new(kind.clone(), message.to_owned().into(), location.cloned());
            (key, fragment)
        })
    }

    /// Returns a snapshot of the table counters.
    pub fn stats(&self) -> InternStats {
        self.table.lock().stats().into()
    }

    /// Drops entries whose fragment is no longer used. Returns the number of
    /// dropped entries.
    pub fn purge(&self) -> usize {
        let purged = self.table.lock().purge();
        if purged > 0 {
            tracing::debug!(purged, "purged dead intern entries");
        }
        purged
    }

    /// Drops every entry. Fragments still used by records stay valid.
    pub fn clear(&self) {
        self.table.lock().clear();
    }
}

/// Returns the process-wide table used by the factory.
pub fn global_intern_table() -> &'static InternTable {
    static TABLE: OnceLock<InternTable> = OnceLock::new();
    TABLE.get_or_init(|| InternTable::new(GLOBAL_STRONG_CAPACITY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_table_send_sync() {
        static_assertions::assert_impl_all!(InternTable: Send, Sync);
    }

    #[test]
    fn test_identical_triples_share() {
        let table = InternTable::new(4);
        let site = CallSite::new("src/lib.rs", 3, Some(1));
        let a = table.intern(&Kind::IO, "closed", Some(&site));
        let b = table.intern(&Kind::IO, "closed", Some(&site));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.location(), Some(&site));
    }

    #[test]
    fn test_different_triples_do_not_share() {
        let table = InternTable::new(4);
        let site = CallSite::new("src/lib.rs", 3, Some(1));
        let base = table.intern(&Kind::IO, "closed", Some(&site));
        let other_kind = table.intern(&Kind::ERROR, "closed", Some(&site));
        let other_message = table.intern(&Kind::IO, "open", Some(&site));
        let no_location = table.intern(&Kind::IO, "closed", None);
        for other in [&other_kind, &other_message, &no_location] {
            assert!(!Arc::ptr_eq(&base, other));
        }
        assert_eq!(table.stats().misses, 4);
    }

    #[test]
    fn test_unused_fragments_are_purged() {
        let table = InternTable::new(1);
        drop(table.intern(&Kind::IO, "a", None));
        drop(table.intern(&Kind::IO, "b", None));
        let stats = table.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.strong_len, 1);
        assert_eq!(table.purge(), 1);
        assert_eq!(table.stats().len, 1);
        table.clear();
        assert_eq!(table.stats().len, 0);
    }
}
