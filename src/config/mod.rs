//! Configuration of failure record construction.
//!
//! A [`Config`] decides how much diagnostic detail a record carries and which
//! memory optimizations the factory uses. There is one process-wide instance,
//! read with [`get_config`] and changed with [`configure`] or [`set_config`],
//! and any number of isolated [`Scope`]s that carry their own copy.
//!
//! ```
//! use recoil::config::{CallSiteStrategy, Config, Preset};
//!
//! let config = Config::preset(Preset::Production)
//!     .with_default_context("service", "billing")
//!     .with_call_site(CallSiteStrategy::Caller);
//! assert!(config.lazy);
//! assert_eq!(config.default_context["service"], "billing");
//! ```

mod env;
mod presets;
mod scope;
mod store;

use core::fmt;
use std::sync::Arc;

use serde_json::Value;

pub use self::{
    env::init_from_env,
    presets::{ParsePresetError, Preset},
    scope::{Scope, create_scope},
    store::{configure, get_config, reset_config, set_config},
};
use crate::failure::{Context, Failure};

/// A transform applied to every record the factory produces.
///
/// The hook receives an authentic record and can only return records built
/// by this crate, so its output is authentic too.
pub type ErrorHook = Arc<dyn Fn(Failure) -> Failure + Send + Sync + 'static>;

/// Replaces [`Failure::to_json`] for [`Failure::serialize_with`].
pub trait Serializer: Send + Sync + 'static {
    /// Renders `failure` as JSON.
    fn serialize(&self, failure: &Failure) -> Value;
}

impl<F> Serializer for F
where
    F: Fn(&Failure) -> Value + Send + Sync + 'static,
{
    fn serialize(&self, failure: &Failure) -> Value {
        self(failure)
    }
}

/// How the factory determines a record's location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallSiteStrategy {
    /// Use the location tracked by `#[track_caller]`. Exact and free.
    #[default]
    Caller,
    /// Capture a stack trace and resolve the first frame after
    /// [`Config::frame_offset`] skipped frames.
    Trace,
}

/// Hooks that replace [`Config::on_error`] depending on where the record is
/// created.
#[derive(Clone, Default)]
pub struct RuntimeHandlers {
    /// Used for records created inside a tokio runtime.
    pub async_runtime: Option<ErrorHook>,
    /// Used for records created outside any async runtime.
    pub thread: Option<ErrorHook>,
}

impl RuntimeHandlers {
    /// Returns the handler for the current execution context, if any.
    pub fn current(&self) -> Option<&ErrorHook> {
        if tokio::runtime::Handle::try_current().is_ok() {
            self.async_runtime.as_ref()
        } else {
            self.thread.as_ref()
        }
    }

    fn is_empty(&self) -> bool {
        self.async_runtime.is_none() && self.thread.is_none()
    }
}

impl fmt::Debug for RuntimeHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandlers")
            .field("async_runtime", &self.async_runtime.is_some())
            .field("thread", &self.thread.is_some())
            .finish()
    }
}

/// Settings for failure record construction.
#[derive(Clone)]
pub struct Config {
    /// Capture a stack trace for every record.
    pub capture_trace: bool,
    /// Determine the record's location.
    pub resolve_location: bool,
    /// How the location is determined.
    pub call_site: CallSiteStrategy,
    /// Maximum number of frames kept in a captured trace.
    pub stack_trace_limit: usize,
    /// Frames skipped before resolving the location from a trace.
    pub frame_offset: usize,
    /// Produce records with kind, message and cause only.
    pub minimal: bool,
    /// Defer trace symbolization and trace-based location resolution to the
    /// first read.
    pub lazy: bool,
    /// Record the creation time.
    pub include_timestamp: bool,
    /// Capacity of the global record pool; `0` disables pooling.
    pub pool_capacity: usize,
    /// Share identical kind/message/location fragments through the global
    /// intern table.
    pub interning: bool,
    /// Context merged under every record's own context.
    pub default_context: Context,
    /// Custom JSON serializer.
    pub serializer: Option<Arc<dyn Serializer>>,
    /// Transform applied to every produced record.
    pub on_error: Option<ErrorHook>,
    /// Per-runtime overrides of `on_error`.
    pub handlers: RuntimeHandlers,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_trace: false,
            resolve_location: true,
            call_site: CallSiteStrategy::Caller,
            stack_trace_limit: 10,
            frame_offset: 0,
            minimal: false,
            lazy: false,
            include_timestamp: true,
            pool_capacity: 0,
            interning: false,
            default_context: Context::new(),
            serializer: None,
            on_error: None,
            handlers: RuntimeHandlers::default(),
        }
    }
}

impl Config {
    /// Enables or disables trace capture.
    #[must_use]
    pub fn with_trace(mut self, capture_trace: bool) -> Self {
        self.capture_trace = capture_trace;
        self
    }

    /// Sets the call-site strategy.
    #[must_use]
    pub fn with_call_site(mut self, strategy: CallSiteStrategy) -> Self {
        self.call_site = strategy;
        self
    }

    /// Enables or disables lazy resolution of expensive fields.
    #[must_use]
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Enables or disables minimal records.
    #[must_use]
    pub fn with_minimal(mut self, minimal: bool) -> Self {
        self.minimal = minimal;
        self
    }

    /// Sets the global record pool capacity.
    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Enables or disables fragment interning.
    #[must_use]
    pub fn with_interning(mut self, interning: bool) -> Self {
        self.interning = interning;
        self
    }

    /// Adds an entry to the default context.
    #[must_use]
    pub fn with_default_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_context.insert(key.into(), value.into());
        self
    }

    /// Sets the custom serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: impl Serializer) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Sets the transform applied to every produced record.
    #[must_use]
    pub fn with_on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(Failure) -> Failure + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Sets the transform used for records created inside a tokio runtime.
    #[must_use]
    pub fn with_async_handler<F>(mut self, hook: F) -> Self
    where
        F: Fn(Failure) -> Failure + Send + Sync + 'static,
    {
        self.handlers.async_runtime = Some(Arc::new(hook));
        self
    }

    /// Sets the transform used for records created outside any async runtime.
    #[must_use]
    pub fn with_thread_handler<F>(mut self, hook: F) -> Self
    where
        F: Fn(Failure) -> Failure + Send + Sync + 'static,
    {
        self.handlers.thread = Some(Arc::new(hook));
        self
    }

    /// Returns the hook that applies to a record created right now.
    ///
    /// A runtime handler matching the current execution context takes
    /// precedence over `on_error`.
    pub fn active_hook(&self) -> Option<&ErrorHook> {
        if self.handlers.is_empty() {
            return self.on_error.as_ref();
        }
        self.handlers.current().or(self.on_error.as_ref())
    }

    /// Serializes `failure` with the configured serializer, or with
    /// [`Failure::to_json`] if there is none.
    pub fn serialize(&self, failure: &Failure) -> Value {
        match &self.serializer {
            Some(serializer) => {
                failure.force();
                serializer.serialize(failure)
            }
            None => failure.to_json(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("capture_trace", &self.capture_trace)
            .field("resolve_location", &self.resolve_location)
            .field("call_site", &self.call_site)
            .field("stack_trace_limit", &self.stack_trace_limit)
            .field("frame_offset", &self.frame_offset)
            .field("minimal", &self.minimal)
            .field("lazy", &self.lazy)
            .field("include_timestamp", &self.include_timestamp)
            .field("pool_capacity", &self.pool_capacity)
            .field("interning", &self.interning)
            .field("default_context", &self.default_context)
            .field("serializer", &self.serializer.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("handlers", &self.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Kind, create_error};

    #[test]
    fn test_config_send_sync() {
        static_assertions::assert_impl_all!(Config: Send, Sync, Clone, Default);
        static_assertions::assert_impl_all!(RuntimeHandlers: Send, Sync, Clone);
    }

    #[test]
    fn test_active_hook_prefers_runtime_handler() {
        let config = Config::default()
            .with_on_error(|f| f.with_context("hook", "global"))
            .with_thread_handler(|f| f.with_context("hook", "thread"));

        let failure = create_error(Kind::ERROR, "x", None, None);
        let hook = config.active_hook().unwrap();
        assert_eq!(hook(failure).context()["hook"], "thread");
    }

    #[tokio::test]
    async fn test_active_hook_inside_runtime() {
        let config = Config::default()
            .with_on_error(|f| f.with_context("hook", "global"))
            .with_thread_handler(|f| f.with_context("hook", "thread"));

        // No async handler: falls back to `on_error`.
        let hook = config.active_hook().unwrap();
        let failure = create_error(Kind::ERROR, "x", None, None);
        assert_eq!(hook(failure).context()["hook"], "global");

        let config = config.with_async_handler(|f| f.with_context("hook", "async"));
        let hook = config.active_hook().unwrap();
        let failure = create_error(Kind::ERROR, "x", None, None);
        assert_eq!(hook(failure).context()["hook"], "async");
    }

    #[test]
    fn test_custom_serializer() {
        let config = Config::default()
            .with_serializer(|f: &Failure| serde_json::json!({ "k": f.kind().as_str() }));
        let failure = create_error(Kind::TIMEOUT, "late", None, None);
        assert_eq!(config.serialize(&failure), serde_json::json!({ "k": "TimeoutError" }));
        assert_eq!(
            Config::default().serialize(&failure)["message"],
            serde_json::json!("late")
        );
    }

    #[test]
    fn test_debug_hides_closures() {
        let rendered = format!("{:?}", Config::default().with_on_error(|f| f));
        assert!(rendered.contains("on_error: true"));
        assert!(rendered.contains("serializer: false"));
    }
}
