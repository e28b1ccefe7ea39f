//! Reuse of failure record storage.
//!
//! Under heavy failure rates, allocating and freeing one record per failure
//! shows up in profiles. A [`RecordPool`] keeps a bounded free list of
//! cleared records. The factory draws from the [`global_pool`] when
//! [`Config::pool_capacity`](crate::config::Config::pool_capacity) is
//! non-zero; callers return records with [`RecordPool::release`] once they
//! are done with them.
//!
//! Release consumes the handle. If other clones of the handle are still
//! alive, the record cannot be reused and is discarded instead, so a record
//! that someone can still read is never cleared.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use triomphe::UniqueArc;

use crate::{
    Kind,
    authenticity::Tag,
    callsite::CallSite,
    failure::{Cause, Context, Failure, FailureData, Fragment},
};

/// Counters describing the activity of a [`RecordPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquisitions served from the free list.
    pub hits: u64,
    /// Acquisitions that had to allocate.
    pub misses: u64,
    /// Records currently in the free list.
    pub pool_size: usize,
    /// Shells handed out and not yet released.
    pub active_count: usize,
    /// Releases that could not return storage to the free list.
    pub discarded: u64,
}

/// A bounded free list of cleared failure records.
///
/// ```
/// use recoil::pool::RecordPool;
///
/// let pool = RecordPool::new(4);
/// let failure = pool.acquire().into_failure("TestError", "first");
/// assert!(pool.release(failure));
///
/// let shell = pool.acquire();
/// assert_eq!(shell.message(), "");
/// assert!(shell.context().is_empty());
/// assert_eq!(pool.stats().hits, 1);
/// ```
pub struct RecordPool {
    /// Marker stamped on storage handed out by this pool.
    id: usize,
    free: spin::Mutex<Vec<UniqueArc<FailureData>>>,
    capacity: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    discarded: AtomicU64,
    active: AtomicUsize,
}

impl RecordPool {
    /// Creates a pool keeping at most `capacity` cleared records.
    pub fn new(capacity: usize) -> Self {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            free: spin::Mutex::new(Vec::new()),
            capacity: AtomicUsize::new(capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            active: AtomicUsize::new(0),
        }
    }

    /// The maximum number of cleared records kept.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Changes the capacity. Records beyond the new capacity are freed.
    pub fn set_capacity(&self, capacity: usize) {
        if self.capacity.swap(capacity, Ordering::Relaxed) > capacity {
            let surplus = {
                let mut free = self.free.lock();
                let keep = free.len().min(capacity);
                free.split_off(keep)
            };
            drop(surplus);
        }
    }

    /// Takes a cleared record shell from the free list, or allocates one.
    pub fn acquire(&self) -> RecordShell {
        let reused = self.free.lock().pop();
        self.active.fetch_add(1, Ordering::Relaxed);
        let mut data = match reused {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                UniqueArc::new(FailureData::empty())
            }
        };
        data.pool = self.id;
        RecordShell { data }
    }

    /// Returns a record's storage to the pool.
    ///
    /// Returns `true` if the storage was cleared and kept for reuse. Returns
    /// `false` and discards the handle if other handles to the record are
    /// alive, or if the pool is full.
    ///
    /// Records allocated elsewhere are accepted too, but only records this
    /// pool handed out count against its active shells.
    pub fn release(&self, failure: Failure) -> bool {
        if failure.pool_id() == self.id {
            self.active
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .ok();
        }

        let mut data = match failure.try_into_unique() {
            Ok(data) => data,
            Err(shared) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = %shared.kind(), "released record is still shared, discarding");
                return false;
            }
        };
        data.reset();

        let mut free = self.free.lock();
        if free.len() < self.capacity() {
            free.push(data);
            true
        } else {
            drop(free);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            pool_size: self.free.lock().len(),
            active_count: self.active.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// Frees every pooled record. Counters are kept.
    pub fn clear(&self) {
        let drained = core::mem::take(&mut *self.free.lock());
        drop(drained);
    }
}

impl core::fmt::Debug for RecordPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecordPool")
            .field("capacity", &self.capacity())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for RecordPool {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Returns the process-wide pool used by the factory.
///
/// Its capacity follows
/// [`Config::pool_capacity`](crate::config::Config::pool_capacity) of the
/// configuration that last produced a pooled record.
pub fn global_pool() -> &'static RecordPool {
    static POOL: OnceLock<RecordPool> = OnceLock::new();
    POOL.get_or_init(RecordPool::default)
}

/// Returns a record to the [`global_pool`].
pub fn release(failure: Failure) -> bool {
    global_pool().release(failure)
}

/// Cleared storage for one failure record.
///
/// A shell is not a failure record: it carries no authenticity tag until it
/// is turned into one.
pub struct RecordShell {
    data: UniqueArc<FailureData>,
}

impl RecordShell {
    /// The kind currently stored in the shell.
    pub fn kind(&self) -> &Kind {
        &self.data.fragment.kind
    }

    /// The message currently stored in the shell.
    pub fn message(&self) -> &str {
        &self.data.fragment.message
    }

    /// The context currently stored in the shell.
    pub fn context(&self) -> &Context {
        self.data.context.get()
    }

    /// The location currently stored in the shell.
    pub fn location(&self) -> Option<&CallSite> {
        self.data.location.peek().and_then(Option::as_ref)
    }

    /// The cause currently stored in the shell.
    pub fn cause(&self) -> Option<&Cause> {
        self.data.cause.as_ref()
    }

    /// Turns the shell into a record with only a kind and a message.
    pub fn into_failure(
        self,
        kind: impl Into<Kind>,
        message: impl Into<alloc::borrow::Cow<'static, str>>,
    ) -> Failure {
        let fragment = std::sync::Arc::new(Fragment::new(kind.into(), message.into(), None));
        self.fill(|data| data.fragment = fragment)
    }

    /// Fills the shell and stamps it with a fresh tag.
    pub(crate) fn fill(mut self, f: impl FnOnce(&mut FailureData)) -> Failure {
        f(&mut self.data);
        self.data.tag = Tag::issue();
        Failure::from_unique(self.data)
    }
}

impl core::fmt::Debug for RecordShell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecordShell")
            .field("kind", self.kind())
            .field("message", &self.message())
            .finish_non_exhaustive()
    }
}
