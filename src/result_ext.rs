//! Extension traits turning `Result` and `Option` values into failure
//! records.
//!
//! ```
//! use recoil::{Kind, prelude::*};
//!
//! fn port(raw: &str) -> Result<u16, Failure> {
//!     raw.parse::<u16>().or_wrap("ConfigError", "invalid port")
//! }
//!
//! let failure = port("http").unwrap_err();
//! assert_eq!(failure.kind(), "ConfigError");
//! assert_eq!(failure.root_cause().unwrap().to_string(), "invalid digit found in string");
//! ```

use alloc::borrow::Cow;
use core::{error::Error, panic::Location};

use serde_json::Value;

use crate::{
    Kind,
    config::Scope,
    failure::{Cause, Failure, Thrown},
};

/// Extension methods for `Result<T, E>` where `E` is an error type.
///
/// Every method records the location of its caller, not of the code inside
/// this trait.
pub trait ResultExt<T> {
    /// Classifies the error and turns it into a failure record.
    ///
    /// A [`Failure`] error is passed through unchanged.
    #[track_caller]
    fn into_failure(self) -> Result<T, Failure>;

    /// Wraps the error in a new record of `kind`.
    #[track_caller]
    fn or_wrap(
        self,
        kind: impl Into<Kind>,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<T, Failure>;

    /// Like [`or_wrap`](Self::or_wrap), computing the message only on
    /// failure.
    #[track_caller]
    fn or_wrap_with<F, M>(self, kind: impl Into<Kind>, message: F) -> Result<T, Failure>
    where
        F: FnOnce() -> M,
        M: Into<Cow<'static, str>>;

    /// Classifies the error and adds a context entry to the record.
    #[track_caller]
    fn attach(self, key: impl Into<String>, value: impl Into<Value>) -> Result<T, Failure>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    #[track_caller]
    fn into_failure(self) -> Result<T, Failure> {
        match self {
            Ok(value) => Ok(value),
            Err(error) => {
                let caller = Location::caller();
                Err(Scope::global().from_thrown_at(Thrown::from(error), None, caller))
            }
        }
    }

    #[track_caller]
    fn or_wrap(
        self,
        kind: impl Into<Kind>,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<T, Failure> {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(Scope::global().create_error(
                kind,
                message,
                None,
                Some(Cause::error(error)),
            )),
        }
    }

    #[track_caller]
    fn or_wrap_with<F, M>(self, kind: impl Into<Kind>, message: F) -> Result<T, Failure>
    where
        F: FnOnce() -> M,
        M: Into<Cow<'static, str>>,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(Scope::global().create_error(
                kind,
                message(),
                None,
                Some(Cause::error(error)),
            )),
        }
    }

    #[track_caller]
    fn attach(self, key: impl Into<String>, value: impl Into<Value>) -> Result<T, Failure> {
        self.into_failure()
            .map_err(|failure| failure.with_context(key, value))
    }
}

/// Extension methods for `Option<T>`.
pub trait OptionExt<T> {
    /// Turns `None` into a new record of `kind`.
    ///
    /// ```
    /// use recoil::{Kind, prelude::*};
    ///
    /// let user: Option<u64> = None;
    /// let failure = user.ok_or_fail(Kind::NOT_FOUND, "no such user").unwrap_err();
    /// assert_eq!(failure.kind(), &Kind::NOT_FOUND);
    /// ```
    #[track_caller]
    fn ok_or_fail(
        self,
        kind: impl Into<Kind>,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<T, Failure>;
}

impl<T> OptionExt<T> for Option<T> {
    #[track_caller]
    fn ok_or_fail(
        self,
        kind: impl Into<Kind>,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<T, Failure> {
        match self {
            Some(value) => Ok(value),
            None => Err(Scope::global().create_error(kind, message, None, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_failure_classifies() {
        let result: Result<u8, _> = "999".parse::<u8>();
        let failure = result.into_failure().unwrap_err();
        assert_eq!(failure.kind(), &Kind::RANGE);
        assert!(failure.location().unwrap().file.ends_with("result_ext.rs"));
    }

    #[test]
    fn test_into_failure_passes_records_through() {
        let original = crate::create_error(Kind::TIMEOUT, "slow", None, None);
        let result: Result<(), Failure> = Err(original.clone());
        let failure = result.into_failure().unwrap_err();
        assert!(alloc::sync::Arc::ptr_eq(failure.fragment(), original.fragment()));
    }

    #[test]
    fn test_or_wrap_keeps_cause() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("refused"));
        let failure = result.or_wrap_with("DbError", || format!("connect to {}", "db-1")).unwrap_err();
        assert_eq!(failure.message(), "connect to db-1");
        assert_eq!(failure.cause().unwrap().to_string(), "refused");
    }

    #[test]
    fn test_attach() {
        let result: Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let failure = result.attach("path", "/tmp/x").unwrap_err();
        assert_eq!(failure.kind(), &Kind::ERROR);
        assert_eq!(failure.context()["path"], "/tmp/x");
    }

    #[test]
    fn test_ok_or_fail_passes_values() {
        assert_eq!(Some(3).ok_or_fail(Kind::ERROR, "unused").unwrap(), 3);
    }
}
