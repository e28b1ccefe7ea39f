use core::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::Level;

use super::{Middleware, Next};
use crate::{
    Kind,
    failure::{Cause, Context, Failure},
    reliability::{CircuitBreaker, RateLimiter, RetryOptions},
};

/// Emits one `tracing` event per failure passing through.
///
/// The event carries the `kind`, `message` and `location` of the failure.
#[derive(Debug, Clone, Copy)]
pub struct Logging {
    level: Level,
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: Level::WARN }
    }
}

impl Logging {
    /// Logs failures at `level`.
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

macro_rules! failure_event {
    ($level:expr, $failure:expr) => {{
        let failure = $failure;
        let location = failure.location().map(ToString::to_string);
        tracing::event!(
            $level,
            kind = %failure.kind(),
            location = location.as_deref(),
            "{}",
            failure.message()
        );
    }};
}

impl<T: 'static> Middleware<T> for Logging {
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
        let result = next();
        if let Err(failure) = &result {
            match self.level {
                Level::ERROR => failure_event!(Level::ERROR, failure),
                Level::WARN => failure_event!(Level::WARN, failure),
                Level::INFO => failure_event!(Level::INFO, failure),
                Level::DEBUG => failure_event!(Level::DEBUG, failure),
                Level::TRACE => failure_event!(Level::TRACE, failure),
            }
        }
        result
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Re-runs the rest of the chain with the backoff of
/// [`retry_blocking`](crate::reliability::retry_blocking).
#[derive(Debug, Clone, Default)]
pub struct Retry {
    options: RetryOptions,
}

impl Retry {
    /// Retries with `options`.
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }
}

impl<T: 'static> Middleware<T> for Retry {
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match next() {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };
            match self.options.schedule(&failure, attempt) {
                Some(delay) => std::thread::sleep(delay),
                None => return Err(failure.with_context("attempts", attempt)),
            }
        }
    }

    fn name(&self) -> &str {
        "retry"
    }
}

/// Adds fixed context entries to every failure.
#[derive(Debug, Clone, Default)]
pub struct EnrichContext {
    context: Context,
}

impl EnrichContext {
    /// Creates the middleware without entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl From<Context> for EnrichContext {
    fn from(context: Context) -> Self {
        Self { context }
    }
}

impl<T: 'static> Middleware<T> for EnrichContext {
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
        next().map_err(|failure| failure.extend_context(self.context.clone()))
    }

    fn name(&self) -> &str {
        "enrich_context"
    }
}

/// Applies a function to every failure.
#[derive(Clone)]
pub struct Transform {
    transform: Arc<dyn Fn(Failure) -> Failure + Send + Sync + 'static>,
}

impl Transform {
    /// Transforms failures with `f`.
    pub fn new(f: impl Fn(Failure) -> Failure + Send + Sync + 'static) -> Self {
        Self {
            transform: Arc::new(f),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").finish_non_exhaustive()
    }
}

impl<T: 'static> Middleware<T> for Transform {
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
        next().map_err(|failure| (self.transform)(failure))
    }

    fn name(&self) -> &str {
        "transform"
    }
}

/// Hides failures of unwanted kinds behind a generic one.
///
/// A failure that does not pass the filter is replaced by a record of the
/// fallback kind (default [`Kind::ERROR`]) carrying the original as its cause
/// and a `filtered_kind` context entry.
#[derive(Debug, Clone)]
pub struct FilterKinds {
    kinds: Vec<Kind>,
    allow: bool,
    fallback: Kind,
}

impl FilterKinds {
    /// Passes only failures of the listed kinds.
    pub fn allow<K: Into<Kind>>(kinds: impl IntoIterator<Item = K>) -> Self {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            allow: true,
            fallback: Kind::ERROR,
        }
    }

    /// Passes every failure except those of the listed kinds.
    pub fn deny<K: Into<Kind>>(kinds: impl IntoIterator<Item = K>) -> Self {
        Self {
            allow: false,
            ..Self::allow(kinds)
        }
    }

    /// Sets the kind of the replacement records.
    #[must_use]
    pub fn with_fallback(mut self, kind: impl Into<Kind>) -> Self {
        self.fallback = kind.into();
        self
    }

    fn passes(&self, failure: &Failure) -> bool {
        self.kinds.contains(failure.kind()) == self.allow
    }
}

impl<T: 'static> Middleware<T> for FilterKinds {
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
        next().map_err(|failure| {
            if self.passes(&failure) {
                return failure;
            }
            let kind = failure.kind().as_str().to_owned();
            failure
                .clone()
                .with_kind(self.fallback.clone())
                .with_cause(Cause::Failure(failure))
                .with_context("filtered_kind", kind)
        })
    }

    fn name(&self) -> &str {
        "filter_kinds"
    }
}

/// Routes the rest of the chain through a shared [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct Breaker {
    breaker: Arc<CircuitBreaker>,
}

impl Breaker {
    /// Uses `breaker`.
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl<T: 'static> Middleware<T> for Breaker {
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
        self.breaker.call_blocking(next)
    }

    fn name(&self) -> &str {
        "breaker"
    }
}

/// Routes the rest of the chain through a shared [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct Limiter {
    limiter: Arc<RateLimiter>,
}

impl Limiter {
    /// Uses `limiter`.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<T: 'static> Middleware<T> for Limiter {
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
        self.limiter.execute_blocking(next)
    }

    fn name(&self) -> &str {
        "limiter"
    }
}

/// Substitutes a value for failures of selected kinds.
pub struct Recover<T> {
    kinds: Vec<Kind>,
    value: Arc<dyn Fn(&Failure) -> T + Send + Sync + 'static>,
}

impl<T> Recover<T> {
    /// Recovers failures of the listed kinds with `value`.
    pub fn new<K: Into<Kind>>(
        kinds: impl IntoIterator<Item = K>,
        value: impl Fn(&Failure) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            value: Arc::new(value),
        }
    }
}

impl<T> Clone for Recover<T> {
    fn clone(&self) -> Self {
        Self {
            kinds: self.kinds.clone(),
            value: self.value.clone(),
        }
    }
}

impl<T> fmt::Debug for Recover<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recover")
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

impl<T: 'static> Middleware<T> for Recover<T> {
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
        match next() {
            Err(failure) if self.kinds.contains(failure.kind()) => {
                tracing::debug!(kind = %failure.kind(), "recovered from failure");
                Ok((self.value)(&failure))
            }
            other => other,
        }
    }

    fn name(&self) -> &str {
        "recover"
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, time::Duration};

    use super::*;
    use crate::{
        Thrown,
        middleware::Pipeline,
        reliability::{CircuitBreakerOptions, CircuitState, RateLimiterOptions},
    };

    #[test]
    fn test_builtins_send_sync() {
        static_assertions::assert_impl_all!(Logging: Send, Sync);
        static_assertions::assert_impl_all!(Retry: Send, Sync);
        static_assertions::assert_impl_all!(Transform: Send, Sync);
        static_assertions::assert_impl_all!(Recover<String>: Send, Sync);
    }

    #[test]
    fn test_retry_reruns_the_operation() {
        let calls = Cell::new(0);
        let pipeline = Pipeline::new().with(Retry::new(
            RetryOptions::new(4).with_base_delay(Duration::ZERO),
        ));
        let value = pipeline
            .execute(|| {
                calls.set(calls.get() + 1);
                if calls.get() < 3 { Err(Thrown::message("again")) } else { Ok(calls.get()) }
            })
            .unwrap();
        assert_eq!(value, 3);

        calls.set(0);
        let failure = pipeline
            .execute(|| {
                calls.set(calls.get() + 1);
                Err::<i32, _>(Thrown::message("never"))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 4);
        assert_eq!(failure.context()["attempts"], 4);
    }

    #[test]
    fn test_logging_passes_results_through() {
        let pipeline = Pipeline::new().with(Logging::new(Level::ERROR));
        assert_eq!(pipeline.execute(|| Ok::<_, Thrown>(1)).unwrap(), 1);
        let failure = pipeline.execute(|| Err::<i32, _>(Thrown::message("logged"))).unwrap_err();
        assert_eq!(failure.message(), "logged");
    }

    #[test]
    fn test_transform_and_filter() {
        let pipeline = Pipeline::new()
            .with(FilterKinds::deny([Kind::IO]).with_fallback("ServiceError"))
            .with(Transform::new(|failure| failure.with_message("rewritten")));
        let failure = pipeline
            .execute(|| Err::<(), _>(std::io::Error::other("disk")))
            .unwrap_err();
        assert_eq!(failure.kind(), "ServiceError");
        assert_eq!(failure.message(), "rewritten");
        assert_eq!(failure.context()["filtered_kind"], "IoError");
        assert_eq!(failure.cause().unwrap().as_failure().unwrap().kind(), &Kind::IO);

        let passing = FilterKinds::allow([Kind::PARSE]);
        let failure = Pipeline::new()
            .with(passing)
            .execute(|| "x".parse::<u8>())
            .unwrap_err();
        assert_eq!(failure.kind(), &Kind::PARSE);
    }

    #[test]
    fn test_breaker_and_limiter_adapters() {
        let breaker = Arc::new(CircuitBreaker::new(
            "adapter",
            CircuitBreakerOptions::new(1, Duration::from_secs(60)),
        ));
        let limiter = Arc::new(RateLimiter::new(RateLimiterOptions::new(1)));
        let pipeline = Pipeline::new()
            .with(Breaker::new(breaker.clone()))
            .with(Limiter::new(limiter.clone()));

        let _ = pipeline.execute(|| Err::<(), _>(Thrown::message("down")));
        assert_eq!(breaker.state(), CircuitState::Open);
        let failure = pipeline.execute(|| Ok::<_, Thrown>(())).unwrap_err();
        assert_eq!(failure.kind(), &Kind::CIRCUIT_OPEN);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_recover_only_selected_kinds() {
        let pipeline = Pipeline::new().with(Recover::new([Kind::TIMEOUT], |_| -1));
        let value = pipeline
            .execute(|| Err::<i32, _>(std::io::Error::from(std::io::ErrorKind::TimedOut)))
            .unwrap();
        assert_eq!(value, -1);
        assert!(pipeline.execute(|| "q".parse::<i32>()).is_err());
    }
}
