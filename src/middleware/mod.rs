//! Composable handling of failures for cross-cutting concerns.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`] wrapped around an
//! operation. The first middleware added is the outermost: it sees the
//! operation's outcome last and can re-run everything below it.
//!
//! ```
//! use recoil::{
//!     Kind, Thrown,
//!     middleware::{EnrichContext, Logging, Pipeline, Recover},
//! };
//!
//! let pipeline = Pipeline::new()
//!     .with(Logging::default())
//!     .with(EnrichContext::new().with("service", "search"))
//!     .with(Recover::new([Kind::NOT_FOUND], |_| Vec::<String>::new()));
//!
//! let hits = pipeline
//!     .execute(|| Err::<Vec<String>, _>(std::io::Error::from(std::io::ErrorKind::NotFound)))
//!     .unwrap();
//! assert!(hits.is_empty());
//!
//! let failure = pipeline.execute(|| Err::<Vec<String>, _>(Thrown::message("boom"))).unwrap_err();
//! assert_eq!(failure.context()["service"], "search");
//! ```

mod builtin;
mod pipeline;
mod registry;

pub use self::{
    builtin::{Breaker, EnrichContext, FilterKinds, Limiter, Logging, Recover, Retry, Transform},
    pipeline::Pipeline,
    registry::{RegistryError, pipeline, register_pipeline, registered_pipelines, unregister_pipeline},
};
use crate::failure::Failure;

/// Re-runs the rest of the chain (the middleware below and the operation).
///
/// May be called zero times (short-circuit), once, or several times (retry).
pub type Next<'a, T> = &'a mut dyn FnMut() -> Result<T, Failure>;

/// A step of a [`Pipeline`].
///
/// ```
/// use recoil::{Failure, middleware::{Middleware, Next, Pipeline}};
///
/// struct Twice;
///
/// impl<T> Middleware<T> for Twice {
///     fn handle(&self, next: Next<'_, T>) -> Result<T, Failure> {
///         next().or_else(|_| next())
///     }
/// }
///
/// let mut calls = 0;
/// let result = Pipeline::new().with(Twice).execute(|| {
///     calls += 1;
///     if calls < 2 { Err(recoil::Thrown::message("flaky")) } else { Ok(calls) }
/// });
/// assert_eq!(result.unwrap(), 2);
/// ```
pub trait Middleware<T>: Send + Sync + 'static {
    /// Handles one run of the chain.
    fn handle(&self, next: Next<'_, T>) -> Result<T, Failure>;

    /// A name for diagnostics.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }
}
