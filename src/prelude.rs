//! Commonly used items for convenient importing.
//!
//! ```rust
//! use recoil::prelude::*;
//!
//! fn parse_port(raw: &str) -> Result<u16, Failure> {
//!     if raw.is_empty() {
//!         bail!(Kind::PARSE, "empty port");
//!     }
//!     raw.parse::<u16>().or_wrap("ConfigError", "invalid port")
//! }
//!
//! assert_eq!(parse_port("8080").unwrap(), 8080);
//! assert_eq!(parse_port("").unwrap_err().kind(), &Kind::PARSE);
//! assert_eq!(parse_port("http").unwrap_err().kind(), "ConfigError");
//! ```
//!
//! # What's Included
//!
//! - **[`Failure`]**, **[`Kind`]**, **[`Thrown`]** and **[`Context`]**
//! - **[`ResultExt`]** and **[`OptionExt`]**: extension methods for `Result`
//!   and `Option`
//! - **[`fail!`]** and **[`bail!`]**: macros for creating and returning
//!   failures
//! - **[`try_sync`]** and **[`try_async`]**

pub use crate::{
    Context, Failure, Kind, Thrown, bail, fail,
    result_ext::{OptionExt, ResultExt},
    try_async, try_sync,
};
