//! Call-site resolution.
//!
//! A failure record's `location` is the `file:line:column` where it
//! originated. There are two ways to obtain it:
//!
//! - **Caller** (the default): `#[track_caller]` on the factory entry points
//!   gives the exact location for free via [`CallSite::caller`].
//! - **Trace**: capture the current stack as text (see [`capture_trace`]),
//!   then let [`resolve_call_site`] strip the frames belonging to wrapping
//!   code and parse the first remaining frame. This is the expensive path, and
//!   it is the one that [`Config::lazy`](crate::config::Config::lazy) defers.
//!
//! [`resolve_call_site`] is not tied to traces captured by this crate. It
//! accepts the trace text of several runtimes, which makes it usable on
//! traces received from embedded script engines or from log files:
//!
//! ```
//! use recoil::callsite::{TraceFormat, detect_format, resolve_call_site};
//!
//! let v8 = "Error: boom\n    at parse (/srv/app/config.js:10:15)\n    at main (/srv/app/index.js:3:1)";
//! assert_eq!(detect_format(v8), Some(TraceFormat::V8));
//!
//! let site = resolve_call_site(v8, 0).unwrap();
//! assert_eq!(site.to_string(), "/srv/app/config.js:10:15");
//!
//! // Skip one frame of wrapping code.
//! let site = resolve_call_site(v8, 1).unwrap();
//! assert_eq!(site.to_string(), "/srv/app/index.js:3:1");
//!
//! assert!(resolve_call_site("not a trace", 0).is_none());
//! ```

mod capture;
mod parsers;

use alloc::borrow::Cow;
use core::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use self::{
    capture::{capture_trace, capture_trace_deferred},
    parsers::{TraceFormat, TraceFrame, detect_format, parse_frames},
};

/// A resolved source location.
///
/// Rendered as `file:line:column`, or `file:line` when the trace format does
/// not report columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// The source file path.
    pub file: Cow<'static, str>,
    /// The 1-based line number.
    pub line: u32,
    /// The 1-based column number, if the trace reported one.
    pub column: Option<u32>,
    /// A short name of the enclosing function, if known.
    pub function: Option<String>,
}

impl CallSite {
    /// Creates a call site without a function name.
    pub fn new(file: impl Into<Cow<'static, str>>, line: u32, column: Option<u32>) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            function: None,
        }
    }

    /// Returns the location of the caller, as tracked by `#[track_caller]`.
    #[track_caller]
    #[inline]
    pub fn caller() -> Self {
        let location = core::panic::Location::caller();
        Self {
            file: Cow::Borrowed(location.file()),
            line: location.line(),
            column: Some(location.column()),
            function: None,
        }
    }

    /// Builds a call site from a `core::panic::Location`.
    pub fn from_location(location: &'static core::panic::Location<'static>) -> Self {
        Self {
            file: Cow::Borrowed(location.file()),
            line: location.line(),
            column: Some(location.column()),
            function: None,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}:{}", self.file, self.line, column),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// Error returned when a string is not a `file:line[:column]` location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseCallSiteError;

impl fmt::Display for ParseCallSiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected a location of the form `file:line[:column]`")
    }
}

impl core::error::Error for ParseCallSiteError {}

impl FromStr for CallSite {
    type Err = ParseCallSiteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, last) = s.rsplit_once(':').ok_or(ParseCallSiteError)?;
        let last: u32 = last.parse().map_err(|_| ParseCallSiteError)?;

        // `file:line:column` if the segment before the last one is numeric too.
        if let Some((file, line)) = head.rsplit_once(':')
            && let Ok(line) = line.parse::<u32>()
            && !file.is_empty()
        {
            return Ok(Self::new(file.to_owned(), line, Some(last)));
        }

        if head.is_empty() {
            return Err(ParseCallSiteError);
        }
        Ok(Self::new(head.to_owned(), last, None))
    }
}

impl Serialize for CallSite {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CallSite {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Cow::<'de, str>::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Resolves the call site of a trace.
///
/// The first `frame_offset` frames are treated as belonging to wrapping code
/// and skipped. The next frame is parsed with the parser matching the trace
/// format (see [`detect_format`]). Returns `None` if the format is not
/// recognized, if there are not enough frames, or if the selected frame has
/// no location.
pub fn resolve_call_site(trace: &str, frame_offset: usize) -> Option<CallSite> {
    let format = detect_format(trace)?;
    parsers::nth_frame(trace, format, frame_offset)?.site
}
