#![forbid(
    missing_docs,
    unsafe_code,
    clippy::missing_docs_in_private_items,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
#![allow(rustdoc::private_intra_doc_links)]
//! Internal implementation crate for [`recoil`].
//!
//! # Overview
//!
//! This crate contains the low-level storage primitives that the [`recoil`]
//! failure-record engine is built from. None of them know anything about
//! failure records; they are generic containers with the exact memoization
//! and retention semantics the engine relies on.
//!
//! **This crate is an implementation detail.** No semantic versioning
//! guarantees are provided. Users should depend on the [`recoil`] crate, not
//! this one.
//!
//! # Architecture
//!
//! - **[`deferred`]**: A write-once cell whose value is produced by a thunk
//!   on first read
//!   - [`Deferred`]: Either `Unresolved(thunk)` or `Resolved(value)`; the
//!     transition happens at most once and the thunk is dropped afterwards
//!
//! - **[`weak_table`]**: An interning table with weak retention
//!   - [`WeakTable`]: Maps keys to [`Weak`] handles so that the table never
//!     keeps an otherwise unreachable value alive, plus a bounded set of
//!     strong handles that keeps the most recently resolved values resident
//!   - [`WeakTableStats`]: Hit, miss and eviction counters
//!   - [`Equivalent`]: The borrowed-key trait accepted by lookups
//!
//! # Thread Safety
//!
//! [`Deferred`] is `Sync` when its value is `Send + Sync`: concurrent first
//! reads race on a [`OnceLock`] and exactly one of them runs the thunk.
//! [`WeakTable`] takes `&mut self` for every operation and is meant to be
//! wrapped in a lock by its owner.
//!
//! [`recoil`]: https://docs.rs/recoil/latest/recoil/
//! [`Deferred`]: deferred::Deferred
//! [`WeakTable`]: weak_table::WeakTable
//! [`WeakTableStats`]: weak_table::WeakTableStats
//! [`Weak`]: std::sync::Weak
//! [`OnceLock`]: std::sync::OnceLock

pub mod deferred;
pub mod weak_table;

pub use indexmap::Equivalent;

pub use self::{
    deferred::Deferred,
    weak_table::{WeakTable, WeakTableStats},
};
