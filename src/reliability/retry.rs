//! Bounded retries with exponential backoff.

use core::{fmt, panic::Location, time::Duration};
use std::sync::Arc;

use rand::Rng;

use crate::{
    failure::{Failure, Thrown},
    wrap::{run_call, run_sync},
};

/// Decides whether a failed attempt is retried. Receives the failure and the
/// 1-based number of the attempt that produced it.
pub type RetryPredicate = Arc<dyn Fn(&Failure, u32) -> bool + Send + Sync + 'static>;

/// Settings for [`retry`] and [`retry_blocking`].
///
/// The delay after attempt `n` is `base_delay * backoff_factor^(n - 1)`,
/// capped at `max_delay`. With `jitter` enabled the delay is scaled by a
/// random factor in `[0.5, 1.0]`.
#[derive(Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first one. Zero is treated
    /// as one.
    pub attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Growth factor of the delay between attempts.
    pub backoff_factor: f64,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
    /// Randomizes delays to spread out retries of concurrent callers.
    pub jitter: bool,
    /// Retries every failure when unset.
    pub should_retry: Option<RetryPredicate>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
            should_retry: None,
        }
    }
}

impl RetryOptions {
    /// Default options with `attempts` attempts.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    /// Sets [`base_delay`](Self::base_delay).
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets [`backoff_factor`](Self::backoff_factor).
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets [`max_delay`](Self::max_delay).
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the predicate deciding which failures are retried.
    #[must_use]
    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Failure, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// The delay to wait after failed attempt number `attempt` (1-based),
    /// before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_factor.max(0.0).powi(exponent);
        let nanos = (self.base_delay.as_nanos() as f64 * factor).round();
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }

    fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Returns the delay before the next attempt, or `None` if `failure`
    /// must be returned to the caller.
    pub(crate) fn schedule(&self, failure: &Failure, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts() {
            return None;
        }
        if let Some(should_retry) = &self.should_retry
            && !should_retry(failure, attempt)
        {
            tracing::debug!(attempt, kind = %failure.kind(), "failure is not retryable");
            return None;
        }
        let delay = self.next_delay(attempt);
        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            kind = %failure.kind(),
            "retrying failed attempt"
        );
        Some(delay)
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("attempts", &self.attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

/// Calls `op` until it succeeds or the attempt budget is spent, sleeping
/// between attempts with `tokio::time::sleep`.
///
/// Returns the first success, or the last failure with the number of
/// attempts made in its `attempts` context entry.
///
/// ```
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// use recoil::{Thrown, reliability::{RetryOptions, retry}};
///
/// let calls = &AtomicU32::new(0);
/// let value = retry(
///     move || async move {
///         match calls.fetch_add(1, Ordering::SeqCst) {
///             0 | 1 => Err(Thrown::message("busy")),
///             n => Ok(n),
///         }
///     },
///     RetryOptions::new(5),
/// )
/// .await
/// .unwrap();
/// assert_eq!(value, 2);
/// # }
/// ```
#[track_caller]
pub fn retry<T, E, F, Fut>(mut op: F, options: RetryOptions) -> impl Future<Output = Result<T, Failure>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Thrown>,
{
    let caller = Location::caller();
    async move {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match run_call(&mut op, None, caller).await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };
            match options.schedule(&failure, attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(failure.with_context("attempts", attempt)),
            }
        }
    }
}

/// Blocking counterpart of [`retry`], sleeping the current thread between
/// attempts.
#[track_caller]
pub fn retry_blocking<T, E, F>(mut op: F, options: RetryOptions) -> Result<T, Failure>
where
    F: FnMut() -> Result<T, E>,
    E: Into<Thrown>,
{
    let caller = Location::caller();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let failure = match run_sync(&mut op, None, caller) {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };
        match options.schedule(&failure, attempt) {
            Some(delay) => std::thread::sleep(delay),
            None => return Err(failure.with_context("attempts", attempt)),
        }
    }
}
