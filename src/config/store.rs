//! The process-wide configuration instance.

use std::sync::OnceLock;

use triomphe::Arc;

use super::Config;

/// Holds the installed configuration; `None` stands for the default one.
#[repr(transparent)]
struct ConfigLock(spin::RwLock<Option<Arc<Config>>>);

impl ConfigLock {
    const fn new() -> Self {
        Self(spin::RwLock::new(None))
    }

    /// Returns a snapshot of the current configuration. The lock is released
    /// before returning.
    #[inline]
    fn snapshot(&'static self) -> Arc<Config> {
        if let Some(config) = &*self.0.read() {
            return config.clone();
        }
        default_config()
    }

    #[inline]
    fn replace(&'static self, config: Option<Arc<Config>>) {
        *self.0.write() = config;
    }

    fn update(&'static self, f: impl FnOnce(&mut Config)) {
        let mut guard = self.0.write();
        let mut config = match &*guard {
            Some(config) => Config::clone(config),
            None => Config::default(),
        };
        f(&mut config);
        *guard = Some(Arc::new(config));
    }
}

static CONFIG: ConfigLock = ConfigLock::new();

fn default_config() -> Arc<Config> {
    static DEFAULT: OnceLock<Arc<Config>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(Config::default())).clone()
}

/// Returns a snapshot of the global configuration.
///
/// Later changes to the global configuration do not affect the returned
/// snapshot.
pub fn get_config() -> Arc<Config> {
    CONFIG.snapshot()
}

/// Changes the global configuration in place.
///
/// `f` receives a copy of the current configuration; the result replaces it
/// atomically.
///
/// ```
/// use recoil::config::{configure, get_config, reset_config};
///
/// configure(|config| config.capture_trace = true);
/// assert!(get_config().capture_trace);
/// reset_config();
/// assert!(!get_config().capture_trace);
/// ```
pub fn configure(f: impl FnOnce(&mut Config)) {
    CONFIG.update(f);
    tracing::debug!(config = ?*get_config(), "recoil configuration updated");
}

/// Replaces the global configuration.
pub fn set_config(config: Config) {
    CONFIG.replace(Some(Arc::new(config)));
}

/// Restores the default global configuration.
pub fn reset_config() {
    CONFIG.replace(None);
}
