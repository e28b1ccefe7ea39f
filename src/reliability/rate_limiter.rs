//! Concurrency and dispatch-rate limiting.

use core::{fmt, panic::Location, time::Duration};

use tokio::{
    sync::{Semaphore, SemaphorePermit, TryAcquireError},
    time::Instant,
};

use crate::{
    Kind,
    config::Scope,
    failure::{Context, Failure, Thrown},
    wrap::{run_call, run_sync},
};

/// Settings for a [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterOptions {
    /// Operations allowed in flight at once. Zero is treated as one.
    pub max_concurrent: usize,
    /// Minimum spacing between two dispatches.
    pub min_delay: Option<Duration>,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            min_delay: None,
        }
    }
}

impl RateLimiterOptions {
    /// Options allowing `max_concurrent` operations in flight.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            min_delay: None,
        }
    }

    /// Sets the minimum spacing between two dispatches.
    #[must_use]
    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = Some(delay);
        self
    }
}

/// Bounds how many operations run at once and how often they start.
///
/// Callers beyond `max_concurrent` wait in FIFO order for a slot. With
/// `min_delay` set, dispatches are additionally spaced out by at least that
/// long.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use recoil::{Thrown, reliability::{RateLimiter, RateLimiterOptions}};
///
/// let limiter = RateLimiter::new(RateLimiterOptions::new(2));
/// let value = limiter.execute(|| async { Ok::<_, Thrown>(7) }).await.unwrap();
/// assert_eq!(value, 7);
/// assert_eq!(limiter.in_flight(), 0);
/// # }
/// ```
pub struct RateLimiter {
    semaphore: Semaphore,
    options: RateLimiterOptions,
    /// The earliest instant the next dispatch may start.
    next_slot: spin::Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter.
    pub fn new(options: RateLimiterOptions) -> Self {
        let options = RateLimiterOptions {
            max_concurrent: options.max_concurrent.max(1),
            ..options
        };
        Self {
            semaphore: Semaphore::new(options.max_concurrent),
            options,
            next_slot: spin::Mutex::new(None),
        }
    }

    /// The limiter's settings.
    pub fn options(&self) -> RateLimiterOptions {
        self.options
    }

    /// Operations currently running.
    pub fn in_flight(&self) -> usize {
        self.options.max_concurrent - self.available()
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Claims the next dispatch if it may start now. Otherwise leaves the
    /// schedule untouched and returns how long until it may.
    fn claim_dispatch(&self) -> Result<(), Duration> {
        let Some(min_delay) = self.options.min_delay else {
            return Ok(());
        };
        let now = Instant::now();
        let mut next_slot = self.next_slot.lock();
        match *next_slot {
            Some(slot) if slot > now => Err(slot - now),
            _ => {
                *next_slot = Some(now + min_delay);
                Ok(())
            }
        }
    }

    fn closed(&self, caller: &'static Location<'static>) -> Failure {
        self.limited("rate limiter is closed", caller)
    }

    fn limited(&self, message: &'static str, caller: &'static Location<'static>) -> Failure {
        let mut context = Context::new();
        context.insert("max_concurrent".to_owned(), self.options.max_concurrent.into());
        context.insert("in_flight".to_owned(), self.in_flight().into());
        Scope::global().create_error_at(Kind::RATE_LIMITED, message, Some(context), None, caller)
    }

    async fn acquire(&self, caller: &'static Location<'static>) -> Result<SemaphorePermit<'_>, Failure> {
        if self.available() == 0 {
            tracing::debug!(max_concurrent = self.options.max_concurrent, "waiting for a rate limiter slot");
        }
        let permit = self.semaphore.acquire().await.map_err(|_| self.closed(caller))?;
        // Waiting claims nothing, so a dropped waiter never delays the others.
        while let Err(wait) = self.claim_dispatch() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "delaying dispatch");
            tokio::time::sleep(wait).await;
        }
        Ok(permit)
    }

    /// Runs `op` once a slot is free.
    #[track_caller]
    pub fn execute<'a, T, E, F, Fut>(&'a self, op: F) -> impl Future<Output = Result<T, Failure>> + 'a
    where
        F: FnOnce() -> Fut + 'a,
        Fut: Future<Output = Result<T, E>> + 'a,
        E: Into<Thrown> + 'a,
        T: 'a,
    {
        let caller = Location::caller();
        async move {
            let _permit = self.acquire(caller).await?;
            run_call(op, None, caller).await
        }
    }

    /// Runs `op` if a slot is free right now, failing with
    /// [`Kind::RATE_LIMITED`] otherwise. Does not honor `min_delay` waits:
    /// a dispatch that would have to wait is rejected too.
    #[track_caller]
    pub fn try_execute<T, E, F>(&self, op: F) -> Result<T, Failure>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<Thrown>,
    {
        let caller = Location::caller();
        let _permit = match self.semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                return Err(self.limited("too many operations in flight", caller));
            }
            Err(TryAcquireError::Closed) => return Err(self.closed(caller)),
        };
        if self.claim_dispatch().is_err() {
            return Err(self.limited("dispatch rate exceeded", caller));
        }
        run_sync(op, None, caller)
    }

    /// Blocking counterpart of [`execute`](Self::execute); waits on the
    /// current thread.
    #[track_caller]
    pub fn execute_blocking<T, E, F>(&self, op: F) -> Result<T, Failure>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<Thrown>,
    {
        let caller = Location::caller();
        let _permit = futures::executor::block_on(self.semaphore.acquire())
            .map_err(|_| self.closed(caller))?;
        while let Err(wait) = self.claim_dispatch() {
            std::thread::sleep(wait);
        }
        run_sync(op, None, caller)
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("options", &self.options)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;

    use super::*;

    #[test]
    fn test_limiter_send_sync() {
        static_assertions::assert_impl_all!(RateLimiter: Send, Sync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let limiter = RateLimiter::new(RateLimiterOptions::new(2));
        let running = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);
        let tasks = (0..6).map(|i| {
            limiter.execute(move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, Thrown>(i)
            })
        });
        let results = join_all(tasks).await;
        let values: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, [0, 1, 2, 3, 4, 5]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_delay_spaces_dispatches() {
        let limiter = RateLimiter::new(
            RateLimiterOptions::new(4).with_min_delay(Duration::from_millis(100)),
        );
        let start = Instant::now();
        let starts = spin::Mutex::new(Vec::new());
        let tasks = (0..3).map(|_| {
            limiter.execute(|| async {
                starts.lock().push(start.elapsed());
                Ok::<_, Thrown>(())
            })
        });
        join_all(tasks).await;
        let mut starts = starts.into_inner();
        starts.sort();
        assert_eq!(starts[0], Duration::ZERO);
        assert!(starts[1] >= Duration::from_millis(100));
        assert!(starts[2] >= Duration::from_millis(200));
    }

    #[test]
    fn test_try_execute_rejects_when_full() {
        let limiter = RateLimiter::new(RateLimiterOptions::new(1));
        let failure = limiter
            .try_execute(|| limiter.try_execute(|| Ok::<_, Thrown>(())))
            .unwrap_err();
        assert_eq!(failure.kind(), &Kind::RATE_LIMITED);
        assert_eq!(failure.context()["max_concurrent"], 1);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_does_not_delay_next_dispatch() {
        let limiter = RateLimiter::new(
            RateLimiterOptions::new(4).with_min_delay(Duration::from_millis(100)),
        );
        let start = Instant::now();
        limiter.execute(|| async { Ok::<_, Thrown>(()) }).await.unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            limiter.execute(|| async { Ok::<_, Thrown>(()) }),
        )
        .await;
        assert!(abandoned.is_err());

        limiter.execute(|| async { Ok::<_, Thrown>(()) }).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150));
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_execute_rejections_keep_the_schedule() {
        let limiter = RateLimiter::new(
            RateLimiterOptions::new(4).with_min_delay(Duration::from_millis(100)),
        );
        assert!(limiter.try_execute(|| Ok::<_, Thrown>(())).is_ok());

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(60)).await;
            match limiter.try_execute(|| Ok::<_, Thrown>(())) {
                Ok(()) => outcomes.push(true),
                Err(failure) => {
                    assert_eq!(failure.kind(), &Kind::RATE_LIMITED);
                    outcomes.push(false);
                }
            }
        }
        assert_eq!(outcomes, [false, true, false, true, false]);
    }

    #[test]
    fn test_execute_blocking() {
        let limiter = RateLimiter::new(RateLimiterOptions::new(0));
        assert_eq!(limiter.options().max_concurrent, 1);
        let failure = limiter.execute_blocking(|| "x".parse::<u8>()).unwrap_err();
        assert_eq!(failure.kind(), &Kind::PARSE);
        assert_eq!(limiter.available(), 1);
    }
}
