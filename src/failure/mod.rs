//! The failure record.
//!
//! A [`Failure`] is a cheap, reference-counted handle to an immutable
//! record. Records can only be produced by this crate (see
//! [`factory`](crate::factory)); each one carries an authenticity tag that
//! [`is_failure`] checks, so a look-alike struct or a JSON object with the
//! same fields is never mistaken for a record.

mod cause;
mod chain;
mod json;

use alloc::borrow::Cow;
use core::{any::Any, error::Error, fmt};
use std::{
    sync::{Arc, OnceLock},
    time::SystemTime,
};

use recoil_internals::Deferred;
use serde_json::Value;
use triomphe::UniqueArc;

pub use self::{
    cause::{Cause, Opaque, Thrown},
    chain::Chain,
    json::DecodeError,
};
use crate::{Kind, authenticity::Tag, callsite::CallSite};

/// Additional key/value data attached to a failure, in insertion order.
pub type Context = indexmap::IndexMap<String, Value>;

/// The shareable part of a record: its kind, message and eagerly resolved
/// location.
///
/// With [`Config::interning`](crate::config::Config::interning) enabled,
/// records with identical triples share one fragment (see
/// [`InternTable`](crate::intern::InternTable)).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fragment {
    pub(crate) kind: Kind,
    pub(crate) message: Cow<'static, str>,
    pub(crate) location: Option<CallSite>,
}

impl Fragment {
    pub(crate) fn new(kind: Kind, message: Cow<'static, str>, location: Option<CallSite>) -> Self {
        Self {
            kind,
            message,
            location,
        }
    }

    pub(crate) fn empty() -> Arc<Self> {
        static EMPTY: OnceLock<Arc<Fragment>> = OnceLock::new();
        EMPTY
            .get_or_init(|| Arc::new(Fragment::new(Kind::ERROR, Cow::Borrowed(""), None)))
            .clone()
    }

    /// The failure kind.
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The eagerly resolved location, if any.
    pub fn location(&self) -> Option<&CallSite> {
        self.location.as_ref()
    }
}

/// The fields of a record that can be computed lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// See [`Failure::location`].
    Location,
    /// See [`Failure::trace`].
    Trace,
    /// See [`Failure::context`].
    Context,
}

pub(crate) struct FailureData {
    pub(crate) tag: Tag,
    pub(crate) fragment: Arc<Fragment>,
    /// Only consulted when the fragment carries no location.
    pub(crate) location: Deferred<Option<CallSite>>,
    pub(crate) trace: Deferred<Option<String>>,
    pub(crate) context: Deferred<Context>,
    pub(crate) created_at: Option<SystemTime>,
    pub(crate) cause: Option<Cause>,
    /// Id of the [`RecordPool`](crate::pool::RecordPool) that handed out this
    /// storage, or zero.
    pub(crate) pool: usize,
}

impl FailureData {
    pub(crate) fn empty() -> Self {
        Self {
            tag: Tag::CLEARED,
            fragment: Fragment::empty(),
            location: Deferred::resolved(None),
            trace: Deferred::resolved(None),
            context: Deferred::resolved(Context::new()),
            created_at: None,
            cause: None,
            pool: 0,
        }
    }

    /// Clears every field while keeping allocations that can be reused.
    pub(crate) fn reset(&mut self) {
        self.tag = Tag::CLEARED;
        self.fragment = Fragment::empty();
        self.location.set(None);
        self.trace.set(None);
        self.context.reset_with(Context::clear);
        self.created_at = None;
        self.cause = None;
    }

    /// Copies the record, resolving deferred fields on the way.
    fn duplicate(&self) -> Self {
        Self {
            tag: self.tag,
            fragment: self.fragment.clone(),
            location: Deferred::resolved(self.location.get().clone()),
            trace: Deferred::resolved(self.trace.get().clone()),
            context: Deferred::resolved(self.context.get().clone()),
            created_at: self.created_at,
            cause: self.cause.clone(),
            pool: 0,
        }
    }
}

/// An authenticated failure record.
///
/// # Examples
///
/// ```
/// use recoil::{Kind, create_error};
///
/// let failure = create_error(Kind::new("ConfigError"), "missing key", None, None)
///     .with_context("key", "database.url");
///
/// assert_eq!(failure.kind(), &Kind::new("ConfigError"));
/// assert_eq!(failure.message(), "missing key");
/// assert_eq!(failure.context()["key"], "database.url");
/// assert!(recoil::is_failure(&failure));
/// ```
#[derive(Clone)]
pub struct Failure(triomphe::Arc<FailureData>);

impl Failure {
    pub(crate) fn from_unique(data: UniqueArc<FailureData>) -> Self {
        Self(data.shareable())
    }

    pub(crate) fn pool_id(&self) -> usize {
        self.0.pool
    }

    pub(crate) fn try_into_unique(self) -> Result<UniqueArc<FailureData>, Self> {
        triomphe::Arc::try_unique(self.0).map_err(Self)
    }

    pub(crate) fn is_authentic(&self) -> bool {
        self.0.tag.verify()
    }

    fn into_unique(self) -> UniqueArc<FailureData> {
        match triomphe::Arc::try_unique(self.0) {
            Ok(unique) => unique,
            Err(shared) => UniqueArc::new(shared.duplicate()),
        }
    }

    fn derive(self, f: impl FnOnce(&mut FailureData)) -> Self {
        let mut data = self.into_unique();
        f(&mut data);
        Self::from_unique(data)
    }

    /// The failure kind.
    #[inline]
    pub fn kind(&self) -> &Kind {
        &self.0.fragment.kind
    }

    /// The human-readable message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0.fragment.message
    }

    /// Where the failure originated.
    ///
    /// Resolves the location on first read if it was deferred.
    pub fn location(&self) -> Option<&CallSite> {
        self.0
            .fragment
            .location
            .as_ref()
            .or_else(|| self.0.location.get().as_ref())
    }

    /// The captured stack trace text, if trace capture was enabled.
    ///
    /// Symbolizes the trace on first read if it was deferred.
    pub fn trace(&self) -> Option<&str> {
        self.0.trace.get().as_deref()
    }

    /// The attached context.
    pub fn context(&self) -> &Context {
        self.0.context.get()
    }

    /// Returns a single context value.
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context().get(key)
    }

    /// When the record was created, unless timestamps were disabled.
    #[inline]
    pub fn created_at(&self) -> Option<SystemTime> {
        self.0.created_at
    }

    /// The direct cause, if any.
    #[inline]
    pub fn cause(&self) -> Option<&Cause> {
        self.0.cause.as_ref()
    }

    /// The shared kind/message/location fragment.
    pub fn fragment(&self) -> &Arc<Fragment> {
        &self.0.fragment
    }

    /// Iterates over this record and the failure records in its cause chain,
    /// outermost first. A non-record cause ends the chain; see
    /// [`root_cause`](Self::root_cause).
    pub fn chain(&self) -> Chain<'_> {
        Chain::new(self)
    }

    /// Returns the innermost cause of the chain, or `None` if the record has
    /// no cause.
    pub fn root_cause(&self) -> Option<&Cause> {
        let mut root = self.cause()?;
        while let Cause::Failure(next) = root
            && let Some(cause) = next.cause()
        {
            root = cause;
        }
        Some(root)
    }

    /// Returns `true` if `field` is still waiting for its first read.
    pub fn is_lazy_property(&self, field: Field) -> bool {
        match field {
            Field::Location => self.0.fragment.location.is_none() && !self.0.location.is_resolved(),
            Field::Trace => !self.0.trace.is_resolved(),
            Field::Context => !self.0.context.is_resolved(),
        }
    }

    /// Resolves every deferred field now.
    pub fn force(&self) -> &Self {
        if self.0.fragment.location.is_none() {
            self.0.location.force();
        }
        self.0.trace.force();
        self.0.context.force();
        self
    }

    /// Returns a record with `key` set to `value` in its context.
    ///
    /// The record is updated in place if this handle is the only one.
    pub fn with_context(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.derive(|data| {
            data.context.get_mut().insert(key, value);
        })
    }

    /// Returns a record with every entry of `context` merged into its
    /// context. Existing keys are overwritten.
    pub fn extend_context(self, context: Context) -> Self {
        if context.is_empty() {
            return self;
        }
        self.derive(|data| data.context.get_mut().extend(context))
    }

    /// Returns a record with a different message.
    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Self {
        let message = message.into();
        self.derive(|data| {
            data.fragment = Arc::new(Fragment::new(
                data.fragment.kind.clone(),
                message,
                data.fragment.location.clone(),
            ));
        })
    }

    /// Returns a record with a different kind.
    pub fn with_kind(self, kind: impl Into<Kind>) -> Self {
        let kind = kind.into();
        self.derive(|data| {
            data.fragment = Arc::new(Fragment::new(
                kind,
                data.fragment.message.clone(),
                data.fragment.location.clone(),
            ));
        })
    }

    /// Returns a record with `cause` as its direct cause.
    pub fn with_cause(self, cause: impl Into<Cause>) -> Self {
        let cause = cause.into();
        self.derive(|data| data.cause = Some(cause))
    }

    /// Returns `true` if the record's kind is `kind`.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind() == kind
    }
}

/// Returns `true` if `value` is an authentic failure record.
///
/// Field shape is never enough: only values produced by this crate's factory
/// in this process qualify.
///
/// ```
/// use recoil::{Kind, create_error, is_failure};
///
/// let failure = create_error(Kind::ERROR, "boom", None, None);
/// assert!(is_failure(&failure));
///
/// let look_alike = serde_json::json!({ "kind": "Error", "message": "boom" });
/// assert!(!is_failure(&look_alike));
/// ```
pub fn is_failure(value: &dyn Any) -> bool {
    as_failure(value).is_some()
}

/// Returns `value` as a failure record if it is an authentic one.
pub fn as_failure(value: &dyn Any) -> Option<&Failure> {
    value
        .downcast_ref::<Failure>()
        .filter(|failure| failure.is_authentic())
}

/// Returns `true` if `value` is an authentic failure record of kind `kind`.
pub fn is_failure_of_kind(value: &dyn Any, kind: &str) -> bool {
    as_failure(value).is_some_and(|failure| failure.is_kind(kind))
}

fn write_context_value(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(text) => f.write_str(text),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())?;
        if let Some(location) = self.location() {
            write!(f, " at {location}")?;
        }

        let context = self.context();
        if !context.is_empty() {
            f.write_str(" {")?;
            for (i, (key, value)) in context.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}=")?;
                write_context_value(f, value)?;
            }
            f.write_str("}")?;
        }

        if f.alternate() {
            let mut link = self.cause();
            while let Some(cause) = link {
                f.write_str("\ncaused by: ")?;
                match cause {
                    Cause::Failure(next) => {
                        // One line per link; the loop prints the rest.
                        write!(f, "{}: {}", next.kind(), next.message())?;
                        if let Some(location) = next.location() {
                            write!(f, " at {location}")?;
                        }
                        link = next.cause();
                    }
                    other => {
                        write!(f, "{other}")?;
                        link = None;
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", self.kind())
            .field("message", &self.message())
            .field("location", &self.location())
            .field("created_at", &self.created_at())
            .field("trace", &self.trace())
            .field("context", self.context())
            .field("cause", &self.cause())
            .finish()
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.cause()? {
            Cause::Failure(failure) => Some(failure),
            Cause::Error(error) => Some(&**error),
            Cause::Message(_) | Cause::Opaque(_) => None,
        }
    }
}
