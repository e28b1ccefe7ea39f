use core::{any::Any, fmt, panic::Location};
use std::sync::Arc;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use super::Pipeline;

struct Registered {
    pipeline: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    added_at: &'static Location<'static>,
}

type Registry = HashMap<String, Registered, FxBuildHasher>;

static REGISTRY: spin::RwLock<Option<Registry>> = spin::RwLock::new(None);

/// Error returned by the named pipeline registry.
#[derive(Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A pipeline is already registered under the name.
    AlreadyRegistered {
        /// The requested name.
        name: String,
        /// Where the existing pipeline was registered.
        added_at: &'static Location<'static>,
    },
    /// No pipeline is registered under the name.
    NotFound {
        /// The requested name.
        name: String,
    },
    /// The registered pipeline handles a different value type.
    TypeMismatch {
        /// The requested name.
        name: String,
        /// The requested value type.
        expected: &'static str,
        /// The registered value type.
        found: &'static str,
    },
}

impl fmt::Debug for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered { name, added_at } => {
                write!(f, "pipeline {name:?} is already registered (at {added_at})")
            }
            Self::NotFound { name } => write!(f, "no pipeline registered as {name:?}"),
            Self::TypeMismatch {
                name,
                expected,
                found,
            } => write!(f, "pipeline {name:?} handles {found}, not {expected}"),
        }
    }
}

impl core::error::Error for RegistryError {}

/// Registers `pipeline` under `name` for later lookup with [`pipeline`].
///
/// Names are unique; registering a taken name fails and leaves the existing
/// pipeline in place.
///
/// ```
/// use recoil::middleware::{Logging, Pipeline, pipeline, register_pipeline};
///
/// register_pipeline("doc-http", Pipeline::<u16>::new().with(Logging::default())).unwrap();
/// let http = pipeline::<u16>("doc-http").unwrap();
/// assert_eq!(http.execute(|| Ok::<_, recoil::Thrown>(200)).unwrap(), 200);
/// assert!(pipeline::<String>("doc-http").is_err());
/// ```
#[track_caller]
pub fn register_pipeline<T: 'static>(
    name: impl Into<String>,
    pipeline: Pipeline<T>,
) -> Result<(), RegistryError> {
    let added_at = Location::caller();
    let name = name.into();
    let mut registry = REGISTRY.write();
    let registry = registry.get_or_insert_with(Registry::default);
    if let Some(existing) = registry.get(&name) {
        return Err(RegistryError::AlreadyRegistered {
            name,
            added_at: existing.added_at,
        });
    }
    tracing::debug!(pipeline = %name, middleware = ?pipeline, "registered pipeline");
    registry.insert(
        name,
        Registered {
            pipeline: Arc::new(pipeline),
            type_name: core::any::type_name::<T>(),
            added_at,
        },
    );
    Ok(())
}

/// Returns a handle to the pipeline registered under `name`.
pub fn pipeline<T: 'static>(name: &str) -> Result<Pipeline<T>, RegistryError> {
    let registry = REGISTRY.read();
    let registered = registry
        .as_ref()
        .and_then(|registry| registry.get(name))
        .ok_or_else(|| RegistryError::NotFound {
            name: name.to_owned(),
        })?;
    registered
        .pipeline
        .downcast_ref::<Pipeline<T>>()
        .cloned()
        .ok_or_else(|| RegistryError::TypeMismatch {
            name: name.to_owned(),
            expected: core::any::type_name::<T>(),
            found: registered.type_name,
        })
}

/// Removes the pipeline registered under `name`. Returns `false` if there
/// was none.
pub fn unregister_pipeline(name: &str) -> bool {
    REGISTRY
        .write()
        .as_mut()
        .is_some_and(|registry| registry.remove(name).is_some())
}

/// Names of all registered pipelines, sorted.
pub fn registered_pipelines() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY
        .read()
        .as_ref()
        .map(|registry| registry.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    names
}
