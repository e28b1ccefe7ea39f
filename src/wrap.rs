//! Running fallible operations and turning their failures into records.
//!
//! The wrap primitives accept operations returning `Result<T, E>` for any
//! `E` convertible into [`Thrown`] (every error type, [`Failure`] itself and
//! [`Thrown`]). Panics raised by the operation are caught as well. On
//! success the value is handed back untouched: no record is allocated and no
//! configuration is read.
//!
//! ```
//! use recoil::{Kind, try_sync};
//!
//! let value = try_sync(|| serde_json::from_str::<serde_json::Value>(r#"{"a":1}"#)).unwrap();
//! assert_eq!(value["a"], 1);
//!
//! let failure = try_sync(|| serde_json::from_str::<serde_json::Value>("bad")).unwrap_err();
//! assert_eq!(failure.kind(), &Kind::SYNTAX);
//! assert!(!failure.message().is_empty());
//! ```

use core::panic::Location;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, StreamExt, stream::FuturesUnordered};

use crate::{
    config::Scope,
    failure::{Failure, Thrown},
};

/// Turns the outcome of a guarded call into a result.
fn settle<T, E>(
    outcome: std::thread::Result<Result<T, E>>,
    scope: Option<&Scope>,
    caller: &'static Location<'static>,
) -> Result<T, Failure>
where
    E: Into<Thrown>,
{
    let thrown = match outcome {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(error)) => error.into(),
        Err(payload) => Thrown::from_panic(payload),
    };
    Err(match scope {
        Some(scope) => scope.from_thrown_at(thrown, None, caller),
        None => Scope::global().from_thrown_at(thrown, None, caller),
    })
}

pub(crate) fn run_sync<T, E, F>(op: F, scope: Option<&Scope>, caller: &'static Location<'static>) -> Result<T, Failure>
where
    F: FnOnce() -> Result<T, E>,
    E: Into<Thrown>,
{
    settle(std::panic::catch_unwind(AssertUnwindSafe(op)), scope, caller)
}

pub(crate) async fn run_async<T, E, Fut>(
    future: Fut,
    scope: Option<Scope>,
    caller: &'static Location<'static>,
) -> Result<T, Failure>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<Thrown>,
{
    let outcome = AssertUnwindSafe(future).catch_unwind().await;
    settle(outcome, scope.as_ref(), caller)
}

/// Calls `op` and awaits the future it returns, catching panics raised by
/// either.
pub(crate) async fn run_call<T, E, F, Fut>(
    op: F,
    scope: Option<&Scope>,
    caller: &'static Location<'static>,
) -> Result<T, Failure>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Thrown>,
{
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(op)) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(payload) => Err(payload),
    };
    settle(outcome, scope, caller)
}

/// Runs `op`, converting an error or a panic into a [`Failure`].
#[track_caller]
pub fn try_sync<T, E, F>(op: F) -> Result<T, Failure>
where
    F: FnOnce() -> Result<T, E>,
    E: Into<Thrown>,
{
    run_sync(op, None, Location::caller())
}

/// Like [`try_sync`], returning the outcome as a pair.
///
/// Exactly one side of the pair is `Some`.
#[track_caller]
pub fn try_sync_tuple<T, E, F>(op: F) -> (Option<T>, Option<Failure>)
where
    F: FnOnce() -> Result<T, E>,
    E: Into<Thrown>,
{
    into_tuple(run_sync(op, None, Location::caller()))
}

/// Awaits `future`, converting an error or a panic into a [`Failure`].
///
/// The location recorded on failure is the call to `try_async`, not the
/// `.await`.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use recoil::{Kind, try_async};
///
/// let failure = try_async(async { tokio::fs::read("/no/such/file").await })
///     .await
///     .unwrap_err();
/// assert_eq!(failure.kind(), &Kind::NOT_FOUND);
/// # }
/// ```
#[track_caller]
pub fn try_async<T, E, Fut>(future: Fut) -> impl Future<Output = Result<T, Failure>>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<Thrown>,
{
    run_async(future, None, Location::caller())
}

/// Like [`try_async`], returning the outcome as a pair.
#[track_caller]
pub fn try_async_tuple<T, E, Fut>(future: Fut) -> impl Future<Output = (Option<T>, Option<Failure>)>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<Thrown>,
{
    run_async(future, None, Location::caller()).map(into_tuple)
}

fn into_tuple<T>(result: Result<T, Failure>) -> (Option<T>, Option<Failure>) {
    match result {
        Ok(value) => (Some(value), None),
        Err(failure) => (None, Some(failure)),
    }
}

/// Runs every operation in order and collects their values.
///
/// Stops at the first failure; later operations are not run.
#[track_caller]
pub fn try_all<T, E, F, I>(ops: I) -> Result<Vec<T>, Failure>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Result<T, E>,
    E: Into<Thrown>,
{
    let caller = Location::caller();
    ops.into_iter()
        .map(|op| run_sync(op, None, caller))
        .collect()
}

/// Runs operations in order until one succeeds.
///
/// If every operation fails, returns the last failure with the number of
/// attempts in its `attempts` context entry. An empty input is a failure.
#[track_caller]
pub fn try_any<T, E, F, I>(ops: I) -> Result<T, Failure>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Result<T, E>,
    E: Into<Thrown>,
{
    let caller = Location::caller();
    let mut last = None;
    let mut attempts = 0usize;
    for op in ops {
        attempts += 1;
        match run_sync(op, None, caller) {
            Ok(value) => return Ok(value),
            Err(failure) => last = Some(failure),
        }
    }
    Err(exhausted(last, attempts, caller))
}

fn exhausted(last: Option<Failure>, attempts: usize, caller: &'static Location<'static>) -> Failure {
    match last {
        Some(failure) => failure.with_context("attempts", attempts),
        None => Scope::global().from_thrown_at(Thrown::message("no operations to try"), None, caller),
    }
}

/// Polls every future concurrently on the current task and collects their
/// values in input order.
///
/// Returns only once every future has settled; no future is cancelled. If any
/// of them fails, the first failure to settle is returned.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use recoil::try_all_async;
///
/// use futures::future::ready;
///
/// let values = try_all_async([ready(Ok::<_, std::io::Error>(1)), ready(Ok(2))])
///     .await
///     .unwrap();
/// assert_eq!(values, [1, 2]);
/// # }
/// ```
#[track_caller]
pub fn try_all_async<T, E, Fut, I>(futures: I) -> impl Future<Output = Result<Vec<T>, Failure>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Thrown>,
{
    let caller = Location::caller();
    let mut pending: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(index, future)| run_async(future, None, caller).map(move |result| (index, result)))
        .collect();

    async move {
        let mut values: Vec<Option<T>> = core::iter::repeat_with(|| None).take(pending.len()).collect();
        let mut first_failure = None;
        while let Some((index, result)) = pending.next().await {
            match result {
                Ok(value) => values[index] = Some(value),
                Err(failure) => {
                    first_failure.get_or_insert(failure);
                }
            }
        }
        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(values.into_iter().flatten().collect()),
        }
    }
}

/// Runs asynchronous operations one at a time until one succeeds.
///
/// Failure semantics match [`try_any`].
#[track_caller]
pub fn try_any_sequential<T, E, F, Fut, I>(ops: I) -> impl Future<Output = Result<T, Failure>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Thrown>,
{
    let caller = Location::caller();
    async move {
        let mut last = None;
        let mut attempts = 0usize;
        for op in ops {
            attempts += 1;
            match run_call(op, None, caller).await {
                Ok(value) => return Ok(value),
                Err(failure) => last = Some(failure),
            }
        }
        Err(exhausted(last, attempts, caller))
    }
}

impl Scope {
    /// [`try_sync`] using this scope's configuration.
    #[track_caller]
    pub fn try_sync<T, E, F>(&self, op: F) -> Result<T, Failure>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<Thrown>,
    {
        run_sync(op, Some(self), Location::caller())
    }

    /// [`try_async`] using this scope's configuration.
    #[track_caller]
    pub fn try_async<T, E, Fut>(&self, future: Fut) -> impl Future<Output = Result<T, Failure>> + use<T, E, Fut>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<Thrown>,
    {
        run_async(future, Some(self.clone()), Location::caller())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        pin::Pin,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{Kind, config::Config, create_error, is_failure};

    type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, Failure>> + Send>>;

    #[test]
    fn test_success_is_untouched() {
        let data = vec![1, 2, 3];
        let ptr = data.as_ptr();
        let value = try_sync(|| Ok::<_, Failure>(data)).unwrap();
        assert_eq!(value.as_ptr(), ptr);
    }

    #[test]
    fn test_panics_become_failures() {
        let failure = try_sync(|| -> Result<(), Failure> { panic!("index went wrong") }).unwrap_err();
        assert!(is_failure(&failure));
        assert_eq!(failure.kind(), &Kind::STRING);
        assert_eq!(failure.message(), "index went wrong");
        assert!(failure.cause().is_none());
        assert!(failure.location().unwrap().file.ends_with("wrap.rs"));
    }

    #[test]
    fn test_failures_pass_through() {
        let original = create_error(Kind::RANGE, "too far", None, None);
        let failure = try_sync(|| Err::<(), _>(original.clone())).unwrap_err();
        assert!(std::sync::Arc::ptr_eq(failure.fragment(), original.fragment()));
    }

    #[test]
    fn test_tuple_form() {
        let (value, failure) = try_sync_tuple(|| "42".parse::<u8>());
        assert_eq!(value, Some(42));
        assert!(failure.is_none());

        let (value, failure) = try_sync_tuple(|| "4x2".parse::<u8>());
        assert!(value.is_none());
        assert_eq!(failure.unwrap().kind(), &Kind::PARSE);
    }

    #[test]
    fn test_try_all_stops_at_first_failure() {
        let runs = Cell::new(0);
        let op = |ok: bool| {
            let runs = &runs;
            move || {
                runs.set(runs.get() + 1);
                if ok { Ok(runs.get()) } else { Err(Thrown::message("nope")) }
            }
        };
        let failure = try_all([op(true), op(false), op(true)]).unwrap_err();
        assert_eq!(failure.message(), "nope");
        assert_eq!(runs.get(), 2);

        runs.set(0);
        assert_eq!(try_all([op(true), op(true)]).unwrap(), [1, 2]);
    }

    #[test]
    fn test_try_any() {
        let ops: [fn() -> Result<u8, Thrown>; 3] = [
            || Err(Thrown::message("first")),
            || Ok(2),
            || panic!("never runs"),
        ];
        assert_eq!(try_any(ops).unwrap(), 2);

        let failing: [fn() -> Result<u8, Thrown>; 2] =
            [|| Err(Thrown::message("a")), || Err(Thrown::message("b"))];
        let failure = try_any(failing).unwrap_err();
        assert_eq!(failure.message(), "b");
        assert_eq!(failure.context()["attempts"], 2);

        let none: [fn() -> Result<u8, Thrown>; 0] = [];
        let failure = try_any(none).unwrap_err();
        assert_eq!(failure.message(), "no operations to try");
    }

    #[test]
    fn test_scope_variant_uses_scope_config() {
        let scope = Scope::new(Config::default().with_default_context("scoped", true));
        let failure = scope.try_sync(|| "x".parse::<i32>()).unwrap_err();
        assert_eq!(failure.context()["scoped"], true);
    }

    #[tokio::test]
    async fn test_try_async_catches_panics() {
        let failure = try_async(async {
            if true {
                panic!("async boom");
            }
            Ok::<(), Failure>(())
        })
        .await
        .unwrap_err();
        assert_eq!(failure.message(), "async boom");

        let (value, failure) = try_async_tuple(async { Ok::<_, Failure>(5) }).await;
        assert_eq!(value, Some(5));
        assert!(failure.is_none());
    }

    #[tokio::test]
    async fn test_try_all_async_waits_for_every_future() {
        static SETTLED: AtomicUsize = AtomicUsize::new(0);
        let slow_ok = |value: u8| -> BoxFuture<u8> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                SETTLED.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            })
        };
        let fast_fail: BoxFuture<u8> = Box::pin(async {
            SETTLED.fetch_add(1, Ordering::SeqCst);
            Err(create_error(Kind::TIMEOUT, "fast", None, None))
        });

        let failure = try_all_async([slow_ok(1), fast_fail, slow_ok(3)]).await.unwrap_err();
        assert_eq!(failure.message(), "fast");
        assert_eq!(SETTLED.load(Ordering::SeqCst), 3);

        let values = try_all_async([slow_ok(7), slow_ok(8)]).await.unwrap();
        assert_eq!(values, [7, 8]);
    }

    #[tokio::test]
    async fn test_try_any_sequential() {
        let calls = AtomicUsize::new(0);
        let op = |ok: bool| {
            let calls = &calls;
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if ok { Ok(1u8) } else { Err(Thrown::message("down")) }
            }
        };
        assert_eq!(try_any_sequential([op(false), op(true), op(true)]).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let failure = try_any_sequential([op(false), op(false)]).await.unwrap_err();
        assert_eq!(failure.context()["attempts"], 2);
    }
}
