//! Reliability combinators built on the wrap primitives.
//!
//! Every combinator takes operations in the same shape as
//! [`try_async`](crate::try_async) (or [`try_sync`](crate::try_sync) for the
//! blocking variants) and returns `Result<T, Failure>`. Operation failures
//! never panic out of a combinator.
//!
//! - [`retry`] / [`retry_blocking`]: bounded retries with exponential backoff
//! - [`CircuitBreaker`]: stops calling a dependency that keeps failing
//! - [`RateLimiter`]: bounds concurrency and dispatch rate
//! - [`timeout`] / [`timeout_in_place`]: deadlines for asynchronous operations

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;
pub mod timeout;

pub use self::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerOptions, CircuitState, CircuitStats},
    rate_limiter::{RateLimiter, RateLimiterOptions},
    retry::{RetryOptions, retry, retry_blocking},
    timeout::{timeout, timeout_in_place},
};
