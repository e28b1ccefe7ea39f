#![deny(
    missing_docs,
    clippy::missing_safety_doc,
    clippy::undocumented_unsafe_blocks,
    clippy::as_ptr_cast_mut,
    clippy::ptr_as_ptr,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    unused_doc_comments
)]
// Make docs.rs generate better docs
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Structured, tamper-evident failure records for Rust services.
//!
//! ## Overview
//!
//! This crate turns errors, panics and arbitrary thrown values into
//! [`Failure`] records: cheap, cloneable handles carrying a [`Kind`], a
//! message, the call site where the failure originated, optionally a stack
//! trace, free-form JSON [`Context`] and a [`Cause`] chain.
//!
//! Records can only be produced by this crate. [`is_failure`] recognizes them
//! by an authenticity tag, never by the shape of their fields, so a struct or
//! a JSON object that looks like a record is not mistaken for one.
//!
//! ## Quick Example
//!
//! ```
//! use recoil::prelude::*;
//!
//! fn load(raw: &str) -> Result<serde_json::Value, Failure> {
//!     try_sync(|| serde_json::from_str(raw))
//! }
//!
//! assert_eq!(load(r#"{"a":1}"#).unwrap()["a"], 1);
//!
//! let failure = load("bad").unwrap_err();
//! assert_eq!(failure.kind(), &Kind::SYNTAX);
//! assert!(recoil::is_failure(&failure));
//! ```
//!
//! ## Core Concepts
//!
//! - The **factory** ([`create_error`], [`wrap_error`], [`from_thrown`] and
//!   the [`try_sync`] family) is the only way to build a record. Successful
//!   operations never touch it: no allocation, no configuration read.
//! - The **[configuration](config)** decides how much diagnostic detail a
//!   record carries. Presets cover the common cases; a [`Scope`] carries an
//!   isolated configuration for one part of a program.
//! - **Lazy fields** (the trace, a deferred call site, a [`LazyFailure`]'s
//!   thunks) are computed on first read, exactly once.
//! - The **[reliability] combinators** (retry, circuit breaker, rate limiter,
//!   timeout) and the **[middleware] pipelines** report their own failures as
//!   records too, with dedicated kinds such as [`Kind::CIRCUIT_OPEN`].
//! - **[Pooling](pool)** and **[interning](intern)** reduce allocation under
//!   sustained failure rates.
//!
//! For implementation details of the lazy cells, see the
//! [`recoil-internals`] crate.
//!
//! [`recoil-internals`]: recoil_internals

extern crate alloc;

#[macro_use]
mod macros;

mod authenticity;
pub mod callsite;
pub mod config;
pub mod factory;
pub mod failure;
pub mod intern;
mod kind;
pub mod lazy;
pub mod middleware;
pub mod pool;
pub mod prelude;
pub mod reliability;
mod result_ext;
mod wrap;

pub use self::{
    config::{
        Config, Preset, Scope, configure, create_scope, get_config, init_from_env, reset_config,
        set_config,
    },
    factory::{DomainFactory, classify, create_error, from_thrown, wrap_error},
    failure::{
        Cause, Chain, Context, DecodeError, Failure, Field, Fragment, Opaque, Thrown, as_failure,
        is_failure, is_failure_of_kind,
    },
    kind::Kind,
    lazy::LazyFailure,
    pool::release,
    result_ext::{OptionExt, ResultExt},
    wrap::{
        try_all, try_all_async, try_any, try_any_sequential, try_async, try_async_tuple, try_sync,
        try_sync_tuple,
    },
};

#[doc(hidden)]
pub mod __private {
    pub use serde_json::Value;
}

/// A [`Result`](core::result::Result) type alias where the error is
/// [`Failure`].
///
/// ```
/// use recoil::{Kind, bail};
///
/// fn ratio(a: u32, b: u32) -> recoil::Result<u32> {
///     if b == 0 {
///         bail!(Kind::RANGE, "cannot divide {a} by zero");
///     }
///     Ok(a / b)
/// }
///
/// assert_eq!(ratio(6, 3).unwrap(), 2);
/// assert_eq!(ratio(1, 0).unwrap_err().message(), "cannot divide 1 by zero");
/// ```
pub type Result<T, E = Failure> = core::result::Result<T, E>;
