//! Records whose diagnostic fields are computed on first read.
//!
//! [`Config::lazy`](crate::config::Config::lazy) defers trace symbolization
//! for every record. [`LazyFailure`] goes further and lets the caller supply
//! the thunks itself, for data that is expensive to gather and rarely
//! looked at.

use alloc::borrow::Cow;
use core::panic::Location;
use std::sync::Arc;

use crate::{
    Kind,
    callsite::CallSite,
    config::Scope,
    failure::{Cause, Context, Failure, FailureData, Fragment},
};

type Thunk<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// Builder for a record with caller-supplied deferred fields.
///
/// Each thunk runs at most once, on the first read of its field, and is
/// dropped afterwards. Fields without a thunk are filled the usual way.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use recoil::{Field, Kind, lazy::LazyFailure};
///
/// static LOOKUPS: AtomicUsize = AtomicUsize::new(0);
///
/// let failure = LazyFailure::new(Kind::NOT_FOUND, "no such tenant")
///     .context_with(|| {
///         LOOKUPS.fetch_add(1, Ordering::SeqCst);
///         [("tenant".to_owned(), serde_json::json!("acme"))].into_iter().collect()
///     })
///     .build();
///
/// assert!(failure.is_lazy_property(Field::Context));
/// assert_eq!(failure.context()["tenant"], "acme");
/// assert_eq!(failure.context()["tenant"], "acme");
/// assert_eq!(LOOKUPS.load(Ordering::SeqCst), 1);
/// ```
#[must_use]
pub struct LazyFailure {
    kind: Kind,
    message: Cow<'static, str>,
    caller: &'static Location<'static>,
    scope: Option<Scope>,
    cause: Option<Cause>,
    location: Option<Thunk<Option<CallSite>>>,
    trace: Option<Thunk<Option<String>>>,
    context: Option<Thunk<Context>>,
}

impl LazyFailure {
    /// Starts a record of `kind` at the caller's location.
    #[track_caller]
    pub fn new(kind: impl Into<Kind>, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            caller: Location::caller(),
            scope: None,
            cause: None,
            location: None,
            trace: None,
            context: None,
        }
    }

    /// Uses `scope` instead of the global configuration.
    pub fn in_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Computes the location on first read.
    pub fn location_with<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Option<CallSite> + Send + 'static,
    {
        self.location = Some(Box::new(f));
        self
    }

    /// Computes the trace text on first read.
    pub fn trace_with<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Option<String> + Send + 'static,
    {
        self.trace = Some(Box::new(f));
        self
    }

    /// Computes the context on first read. The configured default context is
    /// merged underneath the computed entries.
    pub fn context_with<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Context + Send + 'static,
    {
        self.context = Some(Box::new(f));
        self
    }

    /// Sets the direct cause.
    pub fn cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Produces the record.
    pub fn build(self) -> Failure {
        let Self {
            kind,
            message,
            caller,
            scope,
            cause,
            location,
            trace,
            context,
        } = self;
        let scope = scope.unwrap_or_else(Scope::global);

        scope.build_with(kind, message, None, cause, caller, move |data| {
            defer_fields(data, location, trace, context)
        })
    }
}

fn defer_fields(
    data: &mut FailureData,
    location: Option<Thunk<Option<CallSite>>>,
    trace: Option<Thunk<Option<String>>>,
    context: Option<Thunk<Context>>,
) {
    if let Some(location) = location {
        if data.fragment.location.is_some() {
            data.fragment = Arc::new(Fragment::new(
                data.fragment.kind.clone(),
                data.fragment.message.clone(),
                None,
            ));
        }
        data.location.defer(location);
    }
    if let Some(trace) = trace {
        data.trace.defer(trace);
    }
    if let Some(context) = context {
        let mut defaults = core::mem::take(data.context.get_mut());
        data.context.defer(move || {
            defaults.extend(context());
            defaults
        });
    }
}

impl core::fmt::Debug for LazyFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LazyFailure")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("location", &self.location.is_some())
            .field("trace", &self.trace.is_some())
            .field("context", &self.context.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{Field, config::Config, is_failure};

    #[test]
    fn test_location_thunk_runs_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let failure = LazyFailure::new(Kind::ERROR, "deferred")
            .in_scope(Scope::new(Config::default()))
            .location_with(|| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Some(CallSite::new("src/remote.rs", 88, None))
            })
            .build();

        assert!(is_failure(&failure));
        assert!(failure.is_lazy_property(Field::Location));
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
        for _ in 0..3 {
            assert_eq!(failure.location().unwrap().line, 88);
        }
        assert!(!failure.is_lazy_property(Field::Location));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_force_resolves_everything() {
        let failure = LazyFailure::new(Kind::IO, "slow disk")
            .in_scope(Scope::new(Config::default()))
            .trace_with(|| Some("   0: main\n".to_owned()))
            .context_with(Context::new)
            .build();
        assert!(failure.is_lazy_property(Field::Trace));
        assert!(failure.is_lazy_property(Field::Context));
        failure.force();
        assert!(!failure.is_lazy_property(Field::Trace));
        assert!(!failure.is_lazy_property(Field::Context));
        assert_eq!(failure.trace(), Some("   0: main\n"));
    }

    #[test]
    fn test_defaults_merge_under_computed_context() {
        let scope = Scope::new(
            Config::default()
                .with_default_context("service", "billing")
                .with_default_context("zone", "a"),
        );
        let failure = LazyFailure::new(Kind::ERROR, "merge")
            .in_scope(scope)
            .context_with(|| [("zone".to_owned(), serde_json::json!("b"))].into_iter().collect())
            .build();
        assert_eq!(failure.context()["service"], "billing");
        assert_eq!(failure.context()["zone"], "b");
    }

    #[test]
    fn test_derivation_resolves_lazy_fields_of_shared_records() {
        let failure = LazyFailure::new(Kind::ERROR, "shared")
            .in_scope(Scope::new(Config::default()))
            .trace_with(|| Some("frames".to_owned()))
            .build();
        let derived = failure.clone().with_context("k", 1);
        assert!(!derived.is_lazy_property(Field::Trace));
        assert_eq!(derived.trace(), Some("frames"));
        assert_eq!(failure.trace(), Some("frames"));
    }
}
