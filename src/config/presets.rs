use core::{fmt, str::FromStr};

use super::{CallSiteStrategy, Config};

/// Named configurations for common situations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    /// Kind and message only. The cheapest records.
    Minimal,
    /// Every diagnostic field, resolved eagerly from a captured trace.
    FullDiagnostics,
    /// Eager traces and locations for readable test failures.
    Testing,
    /// Caller locations and timestamps; traces off.
    Production,
    /// Pooled, interned records without location or timestamp.
    HighThroughput,
}

impl Preset {
    /// Every preset, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Minimal,
        Self::FullDiagnostics,
        Self::Testing,
        Self::Production,
        Self::HighThroughput,
    ];

    /// The canonical name of the preset.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::FullDiagnostics => "full-diagnostics",
            Self::Testing => "testing",
            Self::Production => "production",
            Self::HighThroughput => "high-throughput",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown preset name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePresetError {
    name: String,
}

impl fmt::Display for ParsePresetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown configuration preset `{}`", self.name)
    }
}

impl core::error::Error for ParsePresetError {}

impl FromStr for Preset {
    type Err = ParsePresetError;

    /// Parses a preset name. Case, `-` and `_` are ignored, so
    /// `FullDiagnostics`, `full-diagnostics` and `FULL_DIAGNOSTICS` are all
    /// accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().replace('-', "") == normalized)
            .ok_or_else(|| ParsePresetError { name: s.to_owned() })
    }
}

impl Config {
    /// Returns the configuration of a preset.
    pub fn preset(preset: Preset) -> Self {
        let base = Self::default();
        match preset {
            Preset::Minimal => Self {
                minimal: true,
                capture_trace: false,
                resolve_location: false,
                include_timestamp: false,
                ..base
            },
            Preset::FullDiagnostics => Self {
                capture_trace: true,
                resolve_location: true,
                call_site: CallSiteStrategy::Trace,
                stack_trace_limit: 50,
                lazy: false,
                ..base
            },
            Preset::Testing => Self {
                capture_trace: true,
                resolve_location: true,
                stack_trace_limit: 20,
                lazy: false,
                ..base
            },
            Preset::Production => Self {
                capture_trace: false,
                resolve_location: true,
                lazy: true,
                ..base
            },
            Preset::HighThroughput => Self {
                capture_trace: false,
                resolve_location: false,
                include_timestamp: false,
                lazy: true,
                pool_capacity: 256,
                interning: true,
                ..base
            },
        }
    }
}
