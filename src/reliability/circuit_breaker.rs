//! Circuit breaker for dependencies that keep failing.

use alloc::borrow::Cow;
use core::{fmt, panic::Location, time::Duration};
use std::sync::Arc;

use tokio::time::Instant;

use crate::{
    Kind,
    config::Scope,
    failure::{Context, Failure, Thrown},
    wrap::{run_call, run_sync},
};

/// A callback invoked on a state transition.
pub type TransitionCallback = Arc<dyn Fn(&CircuitStats) + Send + Sync + 'static>;

/// The state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls go through; failures are counted.
    Closed,
    /// Calls are rejected without running the operation.
    Open,
    /// One trial call is admitted to probe the dependency.
    HalfOpen,
}

impl CircuitState {
    /// Lower-case name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot of a breaker's state and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitStats {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted in the closed state.
    pub failure_count: u32,
    /// Failures needed to open the circuit.
    pub threshold: u32,
    /// Calls that succeeded.
    pub successes: u64,
    /// Calls that failed.
    pub failures: u64,
    /// Calls rejected without running the operation.
    pub rejected: u64,
    /// When the circuit last opened.
    pub opened_at: Option<Instant>,
}

/// Settings for a [`CircuitBreaker`].
#[derive(Clone)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures that open the circuit. Zero is treated as one.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a trial call.
    pub reset_timeout: Duration,
    /// Called when the circuit opens.
    pub on_open: Option<TransitionCallback>,
    /// Called when the circuit closes after a successful trial.
    pub on_close: Option<TransitionCallback>,
    /// Called when the circuit becomes half-open.
    pub on_half_open: Option<TransitionCallback>,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            on_open: None,
            on_close: None,
            on_half_open: None,
        }
    }
}

impl CircuitBreakerOptions {
    /// Default options with the given threshold and reset timeout.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            ..Self::default()
        }
    }

    /// Sets the callback run when the circuit opens.
    #[must_use]
    pub fn on_open(mut self, f: impl Fn(&CircuitStats) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Sets the callback run when the circuit closes.
    #[must_use]
    pub fn on_close(mut self, f: impl Fn(&CircuitStats) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Sets the callback run when the circuit becomes half-open.
    #[must_use]
    pub fn on_half_open(mut self, f: impl Fn(&CircuitStats) + Send + Sync + 'static) -> Self {
        self.on_half_open = Some(Arc::new(f));
        self
    }

    fn callback(&self, state: CircuitState) -> Option<&TransitionCallback> {
        match state {
            CircuitState::Open => self.on_open.as_ref(),
            CircuitState::Closed => self.on_close.as_ref(),
            CircuitState::HalfOpen => self.on_half_open.as_ref(),
        }
    }
}

impl fmt::Debug for CircuitBreakerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerOptions")
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    successes: u64,
    failures: u64,
    rejected: u64,
}

/// What a call was admitted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Stops calling a dependency that keeps failing.
///
/// After `failure_threshold` consecutive failures the circuit opens and every
/// call fails immediately with [`Kind::CIRCUIT_OPEN`]. Once `reset_timeout`
/// has passed, exactly one trial call is admitted; its outcome closes or
/// re-opens the circuit. Concurrent callers are rejected while the trial
/// runs.
///
/// Time is measured with [`tokio::time::Instant`], so paused tokio clocks
/// apply.
///
/// ```
/// use std::time::Duration;
///
/// use recoil::{Kind, Thrown, reliability::{CircuitBreaker, CircuitBreakerOptions, CircuitState}};
///
/// let breaker = CircuitBreaker::new("inventory", CircuitBreakerOptions::new(2, Duration::from_secs(60)));
/// for _ in 0..2 {
///     let _ = breaker.call_blocking(|| Err::<(), _>(Thrown::message("down")));
/// }
/// assert_eq!(breaker.state(), CircuitState::Open);
///
/// let failure = breaker.call_blocking(|| Ok::<_, Thrown>(1)).unwrap_err();
/// assert_eq!(failure.kind(), &Kind::CIRCUIT_OPEN);
/// ```
pub struct CircuitBreaker {
    name: Cow<'static, str>,
    options: CircuitBreakerOptions,
    inner: spin::Mutex<BreakerState>,
}

/// Releases the half-open trial slot if a trial call is dropped before it
/// settles.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.admission, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<Cow<'static, str>>, options: CircuitBreakerOptions) -> Self {
        Self {
            name: name.into(),
            options,
            inner: spin::Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                successes: 0,
                failures: 0,
                rejected: 0,
            }),
        }
    }

    /// The breaker's name, used in logs and failure context.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn threshold(&self) -> u32 {
        self.options.failure_threshold.max(1)
    }

    /// The current state. An open circuit whose reset timeout has passed
    /// reports [`CircuitState::HalfOpen`].
    pub fn state(&self) -> CircuitState {
        self.stats().state
    }

    /// A snapshot of the state and counters.
    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock();
        let mut stats = self.snapshot(&inner);
        if inner.state == CircuitState::Open && self.reset_elapsed(&inner) {
            stats.state = CircuitState::HalfOpen;
        }
        stats
    }

    fn snapshot(&self, inner: &BreakerState) -> CircuitStats {
        CircuitStats {
            state: inner.state,
            failure_count: inner.consecutive_failures,
            threshold: self.threshold(),
            successes: inner.successes,
            failures: inner.failures,
            rejected: inner.rejected,
            opened_at: inner.opened_at,
        }
    }

    fn reset_elapsed(&self, inner: &BreakerState) -> bool {
        inner
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= self.options.reset_timeout)
    }

    /// Forces the circuit closed and clears the counters.
    pub fn reset(&self) {
        let stats = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            inner.trial_in_flight = false;
            inner.successes = 0;
            inner.failures = 0;
            inner.rejected = 0;
            (previous != CircuitState::Closed).then(|| self.snapshot(&inner))
        };
        if let Some(stats) = stats {
            self.transitioned(&stats);
        }
    }

    fn transitioned(&self, stats: &CircuitStats) {
        match stats.state {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                state = %stats.state,
                failure_count = stats.failure_count,
                threshold = stats.threshold,
                "circuit opened"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                state = %stats.state,
                failure_count = stats.failure_count,
                threshold = stats.threshold,
                "circuit state changed"
            ),
        }
        if let Some(callback) = self.options.callback(stats.state) {
            callback(stats);
        }
    }

    fn admit(&self, caller: &'static Location<'static>) -> Result<Permit<'_>, Failure> {
        let (admission, transition) = {
            let mut inner = self.inner.lock();
            let mut transition = None;
            if inner.state == CircuitState::Open && self.reset_elapsed(&inner) {
                inner.state = CircuitState::HalfOpen;
                transition = Some(self.snapshot(&inner));
            }
            let admission = match inner.state {
                CircuitState::Closed => Some(Admission::Normal),
                CircuitState::HalfOpen if !inner.trial_in_flight => {
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                }
                CircuitState::HalfOpen | CircuitState::Open => {
                    inner.rejected += 1;
                    None
                }
            };
            (admission, transition)
        };
        if let Some(stats) = transition {
            self.transitioned(&stats);
        }

        match admission {
            Some(admission) => Ok(Permit {
                breaker: self,
                admission,
                settled: false,
            }),
            None => Err(self.rejection(caller)),
        }
    }

    fn rejection(&self, caller: &'static Location<'static>) -> Failure {
        let stats = self.stats();
        let mut context = Context::new();
        context.insert("breaker".to_owned(), self.name().into());
        context.insert("state".to_owned(), stats.state.as_str().into());
        context.insert("failure_count".to_owned(), stats.failure_count.into());
        if let Some(opened_at) = stats.opened_at {
            let retry_in = self.options.reset_timeout.saturating_sub(opened_at.elapsed());
            context.insert("retry_in_ms".to_owned(), (retry_in.as_millis() as u64).into());
        }
        Scope::global().create_error_at(
            Kind::CIRCUIT_OPEN,
            format!("circuit '{}' is open", self.name),
            Some(context),
            None,
            caller,
        )
    }

    fn record(&self, admission: Admission, success: bool) {
        let transition = {
            let mut inner = self.inner.lock();
            if admission == Admission::Trial {
                inner.trial_in_flight = false;
            }
            if success {
                inner.successes += 1;
                inner.consecutive_failures = 0;
                match (admission, inner.state) {
                    (Admission::Trial, CircuitState::HalfOpen) => {
                        inner.state = CircuitState::Closed;
                        inner.opened_at = None;
                        Some(self.snapshot(&inner))
                    }
                    _ => None,
                }
            } else {
                inner.failures += 1;
                match (admission, inner.state) {
                    (Admission::Trial, CircuitState::HalfOpen) => {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        Some(self.snapshot(&inner))
                    }
                    (Admission::Normal, CircuitState::Closed) => {
                        inner.consecutive_failures += 1;
                        if inner.consecutive_failures >= self.threshold() {
                            inner.state = CircuitState::Open;
                            inner.opened_at = Some(Instant::now());
                            Some(self.snapshot(&inner))
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            }
        };
        if let Some(stats) = transition {
            self.transitioned(&stats);
        }
    }

    /// Runs `op` through the breaker.
    #[track_caller]
    pub fn call<'a, T, E, F, Fut>(&'a self, op: F) -> impl Future<Output = Result<T, Failure>> + 'a
    where
        F: FnOnce() -> Fut + 'a,
        Fut: Future<Output = Result<T, E>> + 'a,
        E: Into<Thrown> + 'a,
        T: 'a,
    {
        let caller = Location::caller();
        async move {
            let permit = self.admit(caller)?;
            let result = run_call(op, None, caller).await;
            permit.settle(result.is_ok());
            result
        }
    }

    /// Blocking counterpart of [`call`](Self::call).
    #[track_caller]
    pub fn call_blocking<T, E, F>(&self, op: F) -> Result<T, Failure>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<Thrown>,
    {
        let caller = Location::caller();
        let permit = self.admit(caller)?;
        let result = run_sync(op, None, caller);
        permit.settle(result.is_ok());
        result
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn failing() -> Result<(), Thrown> {
        Err(Thrown::message("down"))
    }

    #[test]
    fn test_breaker_send_sync() {
        static_assertions::assert_impl_all!(CircuitBreaker: Send, Sync);
    }

    #[test]
    fn test_opens_at_threshold() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let breaker = CircuitBreaker::new(
            "db",
            CircuitBreakerOptions::new(3, Duration::from_secs(60)).on_open(move |stats| {
                assert_eq!(stats.failure_count, 3);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        for _ in 0..2 {
            assert!(breaker.call_blocking(failing).is_err());
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert!(breaker.call_blocking(failing).is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("db", CircuitBreakerOptions::new(2, Duration::from_secs(60)));
        let _ = breaker.call_blocking(failing);
        breaker.call_blocking(|| Ok::<_, Thrown>(())).unwrap();
        let _ = breaker.call_blocking(failing);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 1);
    }

    #[test]
    fn test_open_circuit_rejects_without_running() {
        let breaker = CircuitBreaker::new("db", CircuitBreakerOptions::new(1, Duration::from_secs(60)));
        let _ = breaker.call_blocking(failing);
        let runs = AtomicUsize::new(0);
        let failure = breaker
            .call_blocking(|| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Thrown>(())
            })
            .unwrap_err();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(failure.kind(), &Kind::CIRCUIT_OPEN);
        assert_eq!(failure.context()["breaker"], "db");
        assert_eq!(failure.context()["state"], "open");
        assert!(failure.location().unwrap().file.ends_with("circuit_breaker.rs"));
        assert_eq!(breaker.stats().rejected, 1);
    }

    #[test]
    fn test_manual_reset() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let breaker = CircuitBreaker::new(
            "db",
            CircuitBreakerOptions::new(1, Duration::from_secs(60)).on_close(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let _ = breaker.call_blocking(failing);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.stats().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_trial() {
        let breaker = CircuitBreaker::new("api", CircuitBreakerOptions::new(1, Duration::from_secs(5)));
        let _ = breaker.call(|| async { failing() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial = breaker.call(|| async move {
            let _ = wait.await;
            Ok::<_, Thrown>("trial")
        });
        let concurrent = async {
            tokio::task::yield_now().await;
            let rejected = breaker.call(|| async { Ok::<_, Thrown>("second") }).await;
            let _ = release.send(());
            rejected
        };
        let (trial, concurrent) = tokio::join!(trial, concurrent);
        assert_eq!(trial.unwrap(), "trial");
        assert_eq!(concurrent.unwrap_err().kind(), &Kind::CIRCUIT_OPEN);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let breaker = CircuitBreaker::new("api", CircuitBreakerOptions::new(1, Duration::from_secs(5)));
        let _ = breaker.call(|| async { failing() }).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        let _ = breaker.call(|| async { failing() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_the_slot() {
        let breaker = CircuitBreaker::new("api", CircuitBreakerOptions::new(1, Duration::from_secs(5)));
        let _ = breaker.call(|| async { failing() }).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = breaker.call(|| std::future::pending::<Result<(), Thrown>>());
        let _ = tokio::time::timeout(Duration::from_millis(10), trial).await;

        let value = breaker.call(|| async { Ok::<_, Thrown>(3) }).await.unwrap();
        assert_eq!(value, 3);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
