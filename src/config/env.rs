use std::sync::OnceLock;

use super::{CallSiteStrategy, Config, Preset, set_config};

/// Settings read from the environment, parsed once per process.
#[derive(Debug, Default)]
struct RecoilEnvOptions {
    preset: Option<Preset>,
    rust_backtrace_full: bool,
    trace: Option<bool>,
    lazy: Option<bool>,
    call_site: Option<CallSiteStrategy>,
}

impl RecoilEnvOptions {
    fn get() -> &'static Self {
        static RECOIL_FLAGS: OnceLock<RecoilEnvOptions> = OnceLock::new();

        RECOIL_FLAGS.get_or_init(|| {
            let preset = std::env::var("RECOIL_PRESET").ok();
            let trace = std::env::var("RECOIL_TRACE").ok();
            let rust_backtrace = std::env::var_os("RUST_BACKTRACE");
            Self::parse(
                preset.as_deref(),
                trace.as_deref(),
                rust_backtrace.is_some_and(|var| var == "full"),
            )
        })
    }

    fn parse(preset: Option<&str>, trace: Option<&str>, rust_backtrace_full: bool) -> Self {
        let mut options = Self {
            rust_backtrace_full,
            ..Self::default()
        };

        if let Some(name) = preset {
            match name.parse() {
                Ok(preset) => options.preset = Some(preset),
                Err(error) => tracing::warn!(%error, "ignoring RECOIL_PRESET"),
            }
        }

        for flag in trace.into_iter().flat_map(|var| var.split(',')) {
            let flag = flag.trim();
            if flag.eq_ignore_ascii_case("off") {
                options.trace = Some(false);
            } else if flag.eq_ignore_ascii_case("on") {
                options.trace = Some(true);
            } else if flag.eq_ignore_ascii_case("lazy") {
                options.lazy = Some(true);
            } else if flag.eq_ignore_ascii_case("caller") {
                options.call_site = Some(CallSiteStrategy::Caller);
            } else if flag.eq_ignore_ascii_case("trace") {
                options.call_site = Some(CallSiteStrategy::Trace);
            } else if !flag.is_empty() {
                tracing::warn!(flag, "ignoring unknown RECOIL_TRACE flag");
            }
        }

        options
    }

    fn to_config(&self) -> Config {
        let mut config = self.preset.map(Config::preset).unwrap_or_default();
        if self.rust_backtrace_full {
            config.capture_trace = true;
        }
        if let Some(trace) = self.trace {
            config.capture_trace = trace;
        }
        if let Some(lazy) = self.lazy {
            config.lazy = lazy;
        }
        if let Some(call_site) = self.call_site {
            config.call_site = call_site;
        }
        config
    }
}

impl Config {
    /// Builds a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RECOIL_PRESET` - Name of a [`Preset`] to start from.
    /// - `RUST_BACKTRACE=full` - Enables trace capture.
    /// - `RECOIL_TRACE` - Comma-separated options applied last:
    ///   - `on` / `off` - Enable or disable trace capture
    ///   - `lazy` - Defer trace symbolization to the first read
    ///   - `caller` / `trace` - Select the [`CallSiteStrategy`]
    ///
    /// The variables are read once per process; later changes to the
    /// environment are not observed.
    pub fn from_env() -> Self {
        RecoilEnvOptions::get().to_config()
    }
}

/// Installs [`Config::from_env`] as the global configuration.
pub fn init_from_env() {
    set_config(Config::from_env());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_environment_is_default() {
        let config = RecoilEnvOptions::parse(None, None, false).to_config();
        assert!(!config.capture_trace);
        assert!(!config.lazy);
        assert_eq!(config.call_site, CallSiteStrategy::Caller);
    }

    #[test]
    fn test_rust_backtrace_full_enables_traces() {
        let config = RecoilEnvOptions::parse(None, None, true).to_config();
        assert!(config.capture_trace);

        // `RECOIL_TRACE` wins over `RUST_BACKTRACE`.
        let config = RecoilEnvOptions::parse(None, Some("off"), true).to_config();
        assert!(!config.capture_trace);
    }

    #[test]
    fn test_trace_flags() {
        let config = RecoilEnvOptions::parse(None, Some("on, LAZY,trace"), false).to_config();
        assert!(config.capture_trace);
        assert!(config.lazy);
        assert_eq!(config.call_site, CallSiteStrategy::Trace);
    }

    #[test]
    fn test_preset_then_overrides() {
        let config =
            RecoilEnvOptions::parse(Some("full-diagnostics"), Some("caller"), false).to_config();
        assert!(config.capture_trace);
        assert_eq!(config.stack_trace_limit, 50);
        assert_eq!(config.call_site, CallSiteStrategy::Caller);
    }

    #[test]
    fn test_unknown_values_are_ignored() {
        let options = RecoilEnvOptions::parse(Some("verbose"), Some("sideways"), false);
        assert_eq!(options.preset, None);
        assert_eq!(options.trace, None);
    }
}
