//! The discriminant of a failure record.

use alloc::borrow::Cow;
use core::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

/// An open-ended failure discriminant.
///
/// A [`Kind`] is a string so that applications can introduce their own kinds
/// without touching this crate. The associated constants name the kinds the
/// crate itself produces when classifying caught values and when a
/// reliability combinator gives up.
///
/// # Examples
///
/// ```
/// use recoil::Kind;
///
/// let kind = Kind::new("ValidationError");
/// assert_eq!(kind, "ValidationError");
/// assert_ne!(kind, Kind::SYNTAX);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    /// A failure without a more specific classification.
    pub const ERROR: Self = Self::from_static("Error");
    /// Malformed input, e.g. invalid JSON text.
    pub const SYNTAX: Self = Self::from_static("SyntaxError");
    /// Well-formed input of the wrong shape or type.
    pub const TYPE: Self = Self::from_static("TypeError");
    /// A numeric value outside the representable range.
    pub const RANGE: Self = Self::from_static("RangeError");
    /// A value that failed to parse from text.
    pub const PARSE: Self = Self::from_static("ParseError");
    /// Bytes that are not valid in the expected text encoding.
    pub const ENCODING: Self = Self::from_static("EncodingError");
    /// A generic I/O failure.
    pub const IO: Self = Self::from_static("IoError");
    /// A missing file, key or resource.
    pub const NOT_FOUND: Self = Self::from_static("NotFoundError");
    /// A denied permission.
    pub const PERMISSION: Self = Self::from_static("PermissionError");
    /// A failure raised as plain text.
    pub const STRING: Self = Self::from_static("StringError");
    /// A caught value that could not be classified.
    pub const UNKNOWN: Self = Self::from_static("UnknownError");
    /// An operation that did not finish before its deadline.
    pub const TIMEOUT: Self = Self::from_static("TimeoutError");
    /// A call rejected by an open circuit breaker.
    pub const CIRCUIT_OPEN: Self = Self::from_static("CircuitOpenError");
    /// A call rejected because a rate limiter was closed.
    pub const RATE_LIMITED: Self = Self::from_static("RateLimitError");

    /// Creates a kind from a static string without allocating.
    #[inline]
    pub const fn from_static(kind: &'static str) -> Self {
        Self(Cow::Borrowed(kind))
    }

    /// Creates a kind from any string.
    #[inline]
    pub fn new(kind: impl Into<Cow<'static, str>>) -> Self {
        Self(kind.into())
    }

    /// Returns the kind as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Kind {
    fn default() -> Self {
        Self::ERROR
    }
}

impl From<&'static str> for Kind {
    fn from(kind: &'static str) -> Self {
        Self::from_static(kind)
    }
}

impl From<String> for Kind {
    fn from(kind: String) -> Self {
        Self(Cow::Owned(kind))
    }
}

impl Borrow<str> for Kind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Kind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Kind {
    fn eq(&self, other: &str) -> bool {
        *self.0 == *other
    }
}

impl PartialEq<&str> for Kind {
    fn eq(&self, other: &&str) -> bool {
        *self.0 == **other
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_comparisons() {
        assert_eq!(Kind::new("SyntaxError"), Kind::SYNTAX);
        assert_eq!(Kind::SYNTAX, "SyntaxError");
        assert_eq!(Kind::from(String::from("Custom")), "Custom");
        assert_eq!(Kind::default(), Kind::ERROR);
    }

    #[test]
    fn test_kind_formatting() {
        assert_eq!(Kind::TIMEOUT.to_string(), "TimeoutError");
        assert_eq!(format!("{:?}", Kind::TIMEOUT), "\"TimeoutError\"");
    }

    #[test]
    fn test_kind_serde_is_transparent() {
        let json = serde_json::to_value(Kind::RANGE).unwrap();
        assert_eq!(json, serde_json::json!("RangeError"));
        let back: Kind = serde_json::from_value(json).unwrap();
        assert_eq!(back, Kind::RANGE);
    }
}
