//! Construction of failure records.
//!
//! Every record is built here. The factory reads a [`Config`] (the global one
//! for the free functions, or the one bound to a [`Scope`]), fills the record
//! accordingly, stamps it with an authenticity tag and finally passes it
//! through the configured hook.
//!
//! Diagnostics are best effort: if trace capture or call-site resolution
//! fails (or panics), the affected fields are left empty and the record is
//! produced anyway with its original kind.

use alloc::borrow::Cow;
use core::{error::Error, panic::Location};
use std::{
    io,
    net::AddrParseError,
    num::{IntErrorKind, ParseFloatError, ParseIntError, TryFromIntError},
    panic::AssertUnwindSafe,
    str::{ParseBoolError, Utf8Error},
    string::{FromUtf8Error, FromUtf16Error},
    sync::Arc,
    time::SystemTime,
};

use recoil_internals::Deferred;
use serde_json::Value;
use triomphe::UniqueArc;

use crate::{
    Kind,
    authenticity::Tag,
    callsite::{self, CallSite},
    config::{CallSiteStrategy, Config, Scope},
    failure::{Cause, Context, Failure, FailureData, Fragment, Thrown},
    intern::global_intern_table,
    pool::global_pool,
};

/// Runs a diagnostic step, turning a panic into `None`.
fn guarded<T>(step: impl FnOnce() -> Option<T>) -> Option<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(value) => value,
        Err(_) => {
            tracing::debug!("diagnostic capture panicked; leaving the field empty");
            None
        }
    }
}

/// The location and trace cells of a record under construction.
struct Diagnostics {
    location: Option<CallSite>,
    deferred_location: Deferred<Option<CallSite>>,
    trace: Deferred<Option<String>>,
}

impl Diagnostics {
    fn collect(config: &Config, caller: &'static Location<'static>) -> Self {
        let trace_site = config.resolve_location && config.call_site == CallSiteStrategy::Trace;
        let offset = config.frame_offset;

        if config.lazy {
            // Walk the stack now; symbolize and parse on first read.
            let trace = match config.capture_trace {
                true => deferred_trace(config.stack_trace_limit, |text| Some(text.to_owned())),
                false => Deferred::resolved(None),
            };
            let deferred_location = match trace_site {
                true => deferred_trace(offset + 1, move |text| {
                    callsite::resolve_call_site(text, offset)
                }),
                false => Deferred::resolved(None),
            };
            let location = (config.resolve_location && !trace_site)
                .then(|| CallSite::from_location(caller));
            return Self {
                location,
                deferred_location,
                trace,
            };
        }

        let limit = match (config.capture_trace, trace_site) {
            (true, true) => config.stack_trace_limit.max(offset + 1),
            (true, false) => config.stack_trace_limit,
            (false, true) => offset + 1,
            (false, false) => 0,
        };
        let text = (limit > 0)
            .then(|| guarded(|| callsite::capture_trace(limit)))
            .flatten();

        let location = match (config.resolve_location, config.call_site) {
            (false, _) => None,
            (true, CallSiteStrategy::Caller) => Some(CallSite::from_location(caller)),
            (true, CallSiteStrategy::Trace) => text
                .as_deref()
                .and_then(|text| guarded(|| callsite::resolve_call_site(text, offset))),
        };
        let trace = if config.capture_trace { text } else { None };

        Self {
            location,
            deferred_location: Deferred::resolved(None),
            trace: Deferred::resolved(trace),
        }
    }
}

/// Captures raw frames now and defers `finish` over the rendered text to the
/// first read.
fn deferred_trace<T, F>(limit: usize, finish: F) -> Deferred<Option<T>>
where
    T: Send + 'static,
    F: FnOnce(&str) -> Option<T> + Send + 'static,
{
    match guarded(|| Some(callsite::capture_trace_deferred(limit))) {
        Some(render) => Deferred::new(move || guarded(|| finish(&render()?))),
        None => Deferred::resolved(None),
    }
}

fn cause_message(cause: &Cause) -> Cow<'static, str> {
    match cause {
        Cause::Failure(failure) => match &failure.fragment().message {
            Cow::Borrowed(message) => Cow::Borrowed(message),
            Cow::Owned(message) => Cow::Owned(message.clone()),
        },
        Cause::Message(message) => Cow::Owned(message.clone()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Maps an error value to the most specific [`Kind`] this crate knows.
///
/// Errors of unrecognized types map to [`Kind::ERROR`].
///
/// ```
/// use recoil::{Kind, factory::classify};
///
/// let error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
/// assert_eq!(classify(&error), Kind::SYNTAX);
///
/// let error = "300".parse::<u8>().unwrap_err();
/// assert_eq!(classify(&error), Kind::RANGE);
/// ```
pub fn classify(error: &(dyn Error + 'static)) -> Kind {
    if let Some(error) = error.downcast_ref::<serde_json::Error>() {
        return match error.classify() {
            serde_json::error::Category::Syntax | serde_json::error::Category::Eof => Kind::SYNTAX,
            serde_json::error::Category::Data => Kind::TYPE,
            serde_json::error::Category::Io => Kind::IO,
        };
    }
    if let Some(error) = error.downcast_ref::<io::Error>() {
        return match error.kind() {
            io::ErrorKind::NotFound => Kind::NOT_FOUND,
            io::ErrorKind::PermissionDenied => Kind::PERMISSION,
            io::ErrorKind::TimedOut => Kind::TIMEOUT,
            io::ErrorKind::InvalidData => Kind::ENCODING,
            _ => Kind::IO,
        };
    }
    if let Some(error) = error.downcast_ref::<ParseIntError>() {
        return match error.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => Kind::RANGE,
            _ => Kind::PARSE,
        };
    }
    if error.is::<TryFromIntError>() {
        return Kind::RANGE;
    }
    if error.is::<Utf8Error>() || error.is::<FromUtf8Error>() || error.is::<FromUtf16Error>() {
        return Kind::ENCODING;
    }
    if error.is::<ParseFloatError>() || error.is::<ParseBoolError>() || error.is::<AddrParseError>()
    {
        return Kind::PARSE;
    }
    if error.is::<tokio::time::error::Elapsed>() {
        return Kind::TIMEOUT;
    }
    if let Some(failure) = error.downcast_ref::<Failure>() {
        return failure.kind().clone();
    }
    Kind::ERROR
}

fn merge_context(target: &mut Context, defaults: &Context, explicit: Option<Context>) {
    if !defaults.is_empty() {
        target.extend(defaults.iter().map(|(key, value)| (key.clone(), value.clone())));
    }
    if let Some(explicit) = explicit {
        target.extend(explicit);
    }
}

impl Scope {
    /// Creates a record from a kind and a message.
    #[track_caller]
    pub fn create_error(
        &self,
        kind: impl Into<Kind>,
        message: impl Into<Cow<'static, str>>,
        context: Option<Context>,
        cause: Option<Cause>,
    ) -> Failure {
        self.build(kind.into(), message.into(), context, cause, Location::caller())
    }

    pub(crate) fn create_error_at(
        &self,
        kind: Kind,
        message: impl Into<Cow<'static, str>>,
        context: Option<Context>,
        cause: Option<Cause>,
        caller: &'static Location<'static>,
    ) -> Failure {
        self.build(kind, message.into(), context, cause, caller)
    }

    /// Creates a record caused by `cause`. The message defaults to the
    /// cause's message.
    #[track_caller]
    pub fn wrap_error(
        &self,
        kind: impl Into<Kind>,
        cause: impl Into<Cause>,
        message: Option<&str>,
        context: Option<Context>,
    ) -> Failure {
        let cause = cause.into();
        let message = match message {
            Some(message) => Cow::Owned(message.to_owned()),
            None => cause_message(&cause),
        };
        self.build(kind.into(), message, context, Some(cause), Location::caller())
    }

    /// Classifies a caught value and creates a record for it.
    ///
    /// A [`Failure`] passes through unchanged; `context` is not applied to it.
    #[track_caller]
    pub fn from_thrown(&self, thrown: Thrown, context: Option<Context>) -> Failure {
        self.from_thrown_at(thrown, context, Location::caller())
    }

    pub(crate) fn from_thrown_at(
        &self,
        thrown: Thrown,
        context: Option<Context>,
        caller: &'static Location<'static>,
    ) -> Failure {
        match thrown {
            Thrown::Error(error) => match error.downcast::<Failure>() {
                Ok(failure) => *failure,
                Err(error) => {
                    let kind = classify(&*error);
                    let message = error.to_string();
                    let cause = Cause::from_boxed(error);
                    self.build(kind, message.into(), context, Some(cause), caller)
                }
            },
            Thrown::Message(message) => self.build(Kind::STRING, message.into(), context, None, caller),
            Thrown::Opaque(opaque) => {
                let message = format!("non-error value thrown: {opaque}");
                let cause = Cause::Opaque(opaque);
                self.build(Kind::UNKNOWN, message.into(), context, Some(cause), caller)
            }
        }
    }

    fn build(
        &self,
        kind: Kind,
        message: Cow<'static, str>,
        context: Option<Context>,
        cause: Option<Cause>,
        caller: &'static Location<'static>,
    ) -> Failure {
        self.build_with(kind, message, context, cause, caller, |_| {})
    }

    /// Builds a record, letting `customize` adjust the storage before the
    /// record is tagged.
    pub(crate) fn build_with(
        &self,
        kind: Kind,
        message: Cow<'static, str>,
        context: Option<Context>,
        cause: Option<Cause>,
        caller: &'static Location<'static>,
        customize: impl FnOnce(&mut FailureData),
    ) -> Failure {
        let config = self.config();

        let failure = if config.minimal {
            let mut data = UniqueArc::new(FailureData::empty());
            data.fragment = Arc::new(Fragment::new(kind, message, None));
            data.cause = cause;
            customize(&mut data);
            data.tag = Tag::issue();
            Failure::from_unique(data)
        } else {
            let Diagnostics {
                location,
                deferred_location,
                trace,
            } = Diagnostics::collect(config, caller);

            let fragment = if config.interning {
                global_intern_table().intern(&kind, &message, location.as_ref())
            } else {
                Arc::new(Fragment::new(kind, message, location))
            };
            let created_at = config.include_timestamp.then(SystemTime::now);

            let fill = |data: &mut FailureData| {
                data.fragment = fragment;
                data.location = deferred_location;
                data.trace = trace;
                merge_context(data.context.get_mut(), &config.default_context, context);
                data.created_at = created_at;
                data.cause = cause;
                customize(data);
            };

            if config.pool_capacity > 0 {
                let pool = global_pool();
                if pool.capacity() != config.pool_capacity {
                    pool.set_capacity(config.pool_capacity);
                }
                pool.acquire().fill(fill)
            } else {
                let mut data = UniqueArc::new(FailureData::empty());
                fill(&mut data);
                data.tag = Tag::issue();
                Failure::from_unique(data)
            }
        };

        match config.active_hook() {
            Some(hook) => hook(failure),
            None => failure,
        }
    }
}

/// Creates a record from a kind and a message, using the global
/// configuration.
///
/// ```
/// use recoil::{Kind, create_error};
///
/// let failure = create_error("QuotaError", "quota exceeded", None, None);
/// assert_eq!(failure.kind(), "QuotaError");
/// assert!(failure.location().unwrap().file.ends_with(".rs"));
/// ```
#[track_caller]
pub fn create_error(
    kind: impl Into<Kind>,
    message: impl Into<Cow<'static, str>>,
    context: Option<Context>,
    cause: Option<Cause>,
) -> Failure {
    Scope::global().create_error(kind, message, context, cause)
}

/// Creates a record caused by `cause`, using the global configuration.
#[track_caller]
pub fn wrap_error(
    kind: impl Into<Kind>,
    cause: impl Into<Cause>,
    message: Option<&str>,
    context: Option<Context>,
) -> Failure {
    Scope::global().wrap_error(kind, cause, message, context)
}

/// Classifies a caught value and creates a record for it, using the global
/// configuration.
///
/// ```
/// use recoil::{Kind, Thrown, from_thrown};
///
/// let error = std::fs::read("/definitely/not/here").unwrap_err();
/// let failure = from_thrown(error.into(), None);
/// assert_eq!(failure.kind(), &Kind::NOT_FOUND);
///
/// let failure = from_thrown(Thrown::message("plain text"), None);
/// assert_eq!(failure.kind(), &Kind::STRING);
///
/// // Existing records pass through unchanged.
/// let again = from_thrown(failure.clone().into(), None);
/// assert_eq!(again.to_string(), failure.to_string());
/// ```
#[track_caller]
pub fn from_thrown(thrown: Thrown, context: Option<Context>) -> Failure {
    Scope::global().from_thrown(thrown, context)
}

/// A factory bound to one domain of an application.
///
/// Every record it produces carries a `domain` context entry and the
/// factory's default context.
///
/// ```
/// use recoil::{Kind, factory::DomainFactory};
///
/// let payments = DomainFactory::new("payments").with_context("region", "eu-west-1");
/// let failure = payments.create("DeclinedError", "card declined");
/// assert_eq!(failure.context()["domain"], "payments");
/// assert_eq!(failure.context()["region"], "eu-west-1");
/// ```
#[derive(Debug, Clone)]
pub struct DomainFactory {
    domain: Cow<'static, str>,
    context: Context,
    scope: Option<Scope>,
}

impl DomainFactory {
    /// Creates a factory for `domain` using the global configuration.
    pub fn new(domain: impl Into<Cow<'static, str>>) -> Self {
        Self {
            domain: domain.into(),
            context: Context::new(),
            scope: None,
        }
    }

    /// Adds an entry to the factory's default context.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Binds the factory to `scope` instead of the global configuration.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// The domain name.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn scope(&self) -> Cow<'_, Scope> {
        match &self.scope {
            Some(scope) => Cow::Borrowed(scope),
            None => Cow::Owned(Scope::global()),
        }
    }

    fn context(&self) -> Context {
        let mut context = Context::with_capacity(self.context.len() + 1);
        context.insert("domain".to_owned(), Value::from(&*self.domain));
        context.extend(self.context.iter().map(|(k, v)| (k.clone(), v.clone())));
        context
    }

    /// Creates a record in this domain.
    #[track_caller]
    pub fn create(
        &self,
        kind: impl Into<Kind>,
        message: impl Into<Cow<'static, str>>,
    ) -> Failure {
        self.scope()
            .create_error(kind, message, Some(self.context()), None)
    }

    /// Creates a record in this domain caused by `cause`.
    #[track_caller]
    pub fn wrap(&self, kind: impl Into<Kind>, cause: impl Into<Cause>, message: Option<&str>) -> Failure {
        self.scope()
            .wrap_error(kind, cause, message, Some(self.context()))
    }

    /// Classifies a caught value and creates a record for it in this domain.
    #[track_caller]
    pub fn from_thrown(&self, thrown: Thrown) -> Failure {
        self.scope().from_thrown(thrown, Some(self.context()))
    }
}
