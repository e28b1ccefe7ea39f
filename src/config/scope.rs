use triomphe::Arc;

use super::{Config, get_config};

/// A configuration bound to a set of call sites, isolated from the global
/// configuration.
///
/// Every factory operation is available as a method on [`Scope`]; the free
/// functions ([`create_error`](crate::create_error) and friends) use a
/// snapshot of the global configuration instead.
///
/// ```
/// use recoil::{Kind, config::{Config, Preset, create_scope, get_config}};
///
/// let quiet = create_scope(Config::preset(Preset::Minimal));
/// let failure = quiet.create_error(Kind::ERROR, "boom", None, None);
/// assert!(failure.location().is_none());
///
/// // The global configuration is untouched.
/// assert!(!get_config().minimal);
/// ```
#[derive(Clone, Debug)]
pub struct Scope {
    config: Arc<Config>,
}

impl Scope {
    /// Creates a scope with its own configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Creates a scope from a snapshot of the global configuration.
    pub fn global() -> Self {
        Self {
            config: get_config(),
        }
    }

    /// The scope's configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Changes this scope's configuration. Other clones of the scope and the
    /// global configuration are unaffected.
    pub fn configure(&mut self, f: impl FnOnce(&mut Config)) {
        f(Arc::make_mut(&mut self.config));
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::global()
    }
}

impl From<Config> for Scope {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

/// Creates an isolated [`Scope`].
pub fn create_scope(config: Config) -> Scope {
    Scope::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_send_sync() {
        static_assertions::assert_impl_all!(Scope: Send, Sync, Clone);
    }

    #[test]
    fn test_configure_is_copy_on_write() {
        let mut first = Scope::new(Config::default());
        let second = first.clone();
        first.configure(|config| config.capture_trace = true);
        assert!(first.config().capture_trace);
        assert!(!second.config().capture_trace);
    }
}
