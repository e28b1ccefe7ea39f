//! Write-once cells resolved by a thunk on first read.
//!
//! A [`Deferred<T>`] starts in one of two states:
//!
//! - **Resolved**: created with [`Deferred::resolved`], the value is already
//!   present and reads are plain loads.
//! - **Unresolved**: created with [`Deferred::new`], the cell holds a thunk.
//!   The first call to [`Deferred::get`] runs the thunk, stores the value and
//!   drops the thunk. Every later read returns the stored value.
//!
//! The thunk runs at most once even under concurrent first reads. If the
//! thunk panics, the panic propagates to the reader that triggered it and the
//! cell resolves to `T::default()` on the next read; the thunk is never run a
//! second time.

use core::fmt;
use std::sync::OnceLock;

/// Boxed thunk stored by an unresolved cell.
type Thunk<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// A lazily computed value with run-once semantics.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use recoil_internals::Deferred;
///
/// static CALLS: AtomicUsize = AtomicUsize::new(0);
///
/// let cell = Deferred::new(|| {
///     CALLS.fetch_add(1, Ordering::SeqCst);
///     String::from("expensive")
/// });
/// assert!(!cell.is_resolved());
/// assert_eq!(cell.get(), "expensive");
/// assert_eq!(cell.get(), "expensive");
/// assert!(cell.is_resolved());
/// assert_eq!(CALLS.load(Ordering::SeqCst), 1);
/// ```
pub struct Deferred<T> {
    /// The memoized value, set exactly once.
    value: OnceLock<T>,
    /// The pending thunk; `None` once taken.
    thunk: spin::Mutex<Option<Thunk<T>>>,
}

impl<T: Default> Default for Deferred<T> {
    fn default() -> Self {
        Self::resolved(T::default())
    }
}

impl<T> Deferred<T> {
    /// Creates an unresolved cell that computes its value with `thunk` on
    /// first read.
    pub fn new<F>(thunk: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            value: OnceLock::new(),
            thunk: spin::Mutex::new(Some(Box::new(thunk))),
        }
    }

    /// Creates a cell that is already resolved to `value`.
    pub fn resolved(value: T) -> Self {
        Self {
            value: OnceLock::from(value),
            thunk: spin::Mutex::new(None),
        }
    }

    /// Returns `true` if the value has been computed.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }

    /// Returns the value if it has already been computed, without running
    /// the thunk.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.value.get()
    }

    /// Replaces the content of the cell with an already resolved value,
    /// dropping any pending thunk.
    pub fn set(&mut self, value: T) {
        *self.thunk.get_mut() = None;
        self.value = OnceLock::from(value);
    }

    /// Replaces the content of the cell with a new thunk.
    pub fn defer<F>(&mut self, thunk: F)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        *self.thunk.get_mut() = Some(Box::new(thunk));
        self.value = OnceLock::new();
    }
}

impl<T: Default> Deferred<T> {
    /// Returns the value, computing it on the first call.
    pub fn get(&self) -> &T {
        self.value.get_or_init(|| self.take_thunk_value())
    }

    /// Returns a mutable reference to the value, computing it first if
    /// necessary.
    pub fn get_mut(&mut self) -> &mut T {
        if self.value.get().is_none() {
            let value = self.take_thunk_value();
            let _ = self.value.set(value);
        }
        match self.value.get_mut() {
            Some(value) => value,
            None => unreachable!("deferred value was initialized above"),
        }
    }

    /// Resolves the cell now. Equivalent to calling [`get`](Self::get) and
    /// discarding the reference.
    #[inline]
    pub fn force(&self) {
        let _ = self.get();
    }

    /// Resets the cell to a resolved state while keeping the existing value's
    /// allocation where possible.
    ///
    /// If a value is present, `clear` is applied to it in place. Otherwise the
    /// pending thunk is dropped without running and the cell resolves to
    /// `T::default()`.
    pub fn reset_with(&mut self, clear: impl FnOnce(&mut T)) {
        *self.thunk.get_mut() = None;
        match self.value.get_mut() {
            Some(value) => clear(value),
            None => self.value = OnceLock::from(T::default()),
        }
    }

    /// Consumes the cell and returns its value, computing it if necessary.
    pub fn into_inner(mut self) -> T {
        match self.value.take() {
            Some(value) => value,
            None => self.take_thunk_value(),
        }
    }

    /// Takes the thunk out of the cell and runs it, falling back to the
    /// default value if the thunk is gone.
    fn take_thunk_value(&self) -> T {
        let thunk = self.thunk.lock().take();
        match thunk {
            Some(thunk) => thunk(),
            None => T::default(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(value) => f.debug_tuple("Resolved").field(value).finish(),
            None => f.write_str("Unresolved"),
        }
    }
}
