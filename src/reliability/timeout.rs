//! Deadlines for asynchronous operations.

use core::{panic::Location, time::Duration};

use crate::{
    Kind,
    config::Scope,
    failure::{Cause, Context, Failure, Thrown},
    wrap::run_async,
};

fn expired(duration: Duration, elapsed: tokio::time::error::Elapsed, caller: &'static Location<'static>) -> Failure {
    let mut context = Context::new();
    context.insert("timeout_ms".to_owned(), (duration.as_millis() as u64).into());
    Scope::global().create_error_at(
        Kind::TIMEOUT,
        format!("operation timed out after {duration:?}"),
        Some(context),
        Some(Cause::error(elapsed)),
        caller,
    )
}

/// Races `future` against a deadline.
///
/// The future runs as a spawned tokio task. If the deadline passes first, a
/// [`Kind::TIMEOUT`] failure is returned and the task keeps running in the
/// background; its outcome is discarded. Use [`timeout_in_place`] to drop
/// the operation at the deadline instead.
///
/// # Panics
///
/// Panics if called outside of a tokio runtime.
///
/// ```
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// use std::time::Duration;
///
/// use recoil::{Kind, Thrown, reliability::timeout};
///
/// let failure = timeout(Duration::from_millis(50), async {
///     tokio::time::sleep(Duration::from_secs(10)).await;
///     Ok::<_, Thrown>(())
/// })
/// .await
/// .unwrap_err();
/// assert_eq!(failure.kind(), &Kind::TIMEOUT);
/// assert_eq!(failure.context()["timeout_ms"], 50);
/// # }
/// ```
#[track_caller]
pub fn timeout<T, E, Fut>(duration: Duration, future: Fut) -> impl Future<Output = Result<T, Failure>>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<Thrown> + 'static,
{
    let caller = Location::caller();
    let task = tokio::spawn(run_async(future, None, caller));
    async move {
        match tokio::time::timeout(duration, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Scope::global().from_thrown_at(join_error.into(), None, caller)),
            Err(elapsed) => {
                tracing::debug!(timeout_ms = duration.as_millis() as u64, "operation timed out, detaching it");
                Err(expired(duration, elapsed, caller))
            }
        }
    }
}

/// Like [`timeout`], but runs `future` on the current task and drops it at
/// the deadline.
#[track_caller]
pub fn timeout_in_place<T, E, Fut>(duration: Duration, future: Fut) -> impl Future<Output = Result<T, Failure>>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<Thrown>,
{
    let caller = Location::caller();
    async move {
        match tokio::time::timeout(duration, run_async(future, None, caller)).await {
            Ok(result) => result,
            Err(elapsed) => Err(expired(duration, elapsed, caller)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_completes() {
        let value = timeout(Duration::from_secs(1), async { Ok::<_, Thrown>(9) })
            .await
            .unwrap();
        assert_eq!(value, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_operation_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let failure = timeout(Duration::from_millis(10), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, Thrown>(())
        })
        .await
        .unwrap_err();
        assert_eq!(failure.kind(), &Kind::TIMEOUT);
        assert!(failure.cause().unwrap().downcast_ref::<tokio::time::error::Elapsed>().is_some());
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_place_drops_the_operation() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let failure = timeout_in_place(Duration::from_millis(10), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, Thrown>(())
        })
        .await
        .unwrap_err();
        assert_eq!(failure.kind(), &Kind::TIMEOUT);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_task_becomes_failure() {
        let failure = timeout(Duration::from_secs(1), async {
            if true {
                panic!("worker crashed");
            }
            Ok::<(), Thrown>(())
        })
        .await
        .unwrap_err();
        assert_eq!(failure.message(), "worker crashed");
    }
}
