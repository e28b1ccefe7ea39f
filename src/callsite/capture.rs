//! Stack trace capture.
//!
//! Traces are rendered in the [`TraceFormat::Rust`](super::TraceFormat::Rust)
//! text format so that [`resolve_call_site`](super::resolve_call_site) can read
//! them back. Leading frames from the unwinder, the standard library and this
//! crate are skipped, as are trailing runtime start-up frames.
//!
//! With the `backtrace` feature (enabled by default) frames are collected with
//! the [`backtrace`] crate. Without it, [`std::backtrace::Backtrace`] is used
//! and its output is re-parsed.

use core::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;

use super::{CallSite, TraceFrame, parsers};

/// Crates whose frames are dropped from the top of a captured trace.
const SKIPPED_INITIAL_CRATES: &[&str] = &[
    "backtrace",
    "std",
    "core",
    "alloc",
    "recoil",
    "recoil_internals",
];

/// Crates whose frames are dropped from the bottom of a captured trace.
const SKIPPED_FINAL_CRATES: &[&str] = &["std", "core", "alloc"];

/// Captures the current stack trace, keeping at most `limit` frames.
///
/// Returns `None` if `limit` is zero or if no frame with a source location
/// remains after filtering.
///
/// # Examples
///
/// ```
/// let trace = recoil::callsite::capture_trace(8);
/// if let Some(trace) = trace {
///     assert!(trace.lines().count() <= 16);
/// }
/// ```
pub fn capture_trace(limit: usize) -> Option<String> {
    capture_trace_deferred(limit)()
}

/// Records the current stack now and returns a closure that symbolizes and
/// renders it on demand.
///
/// Walking the stack is cheap compared to symbolization. Lazy failure records
/// call this at creation time and run the closure on the first read of their
/// `trace` field.
pub fn capture_trace_deferred(limit: usize) -> impl FnOnce() -> Option<String> + Send + 'static {
    let raw = (limit > 0).then(RawTrace::capture);
    move || {
        let frames = raw?.resolve();
        render(filter(frames), limit)
    }
}

#[cfg(feature = "backtrace")]
struct RawTrace(backtrace::Backtrace);

#[cfg(feature = "backtrace")]
impl RawTrace {
    fn capture() -> Self {
        Self(backtrace::Backtrace::new_unresolved())
    }

    fn resolve(mut self) -> Vec<TraceFrame> {
        self.0.resolve();
        let mut frames = Vec::new();
        for frame in self.0.frames() {
            for symbol in frame.symbols() {
                // Don't consider frames without symbol names or filenames.
                let (Some(name), Some(file), Some(line)) =
                    (symbol.name(), symbol.filename(), symbol.lineno())
                else {
                    continue;
                };
                let name = format!("{name:#}");
                frames.push(TraceFrame {
                    site: Some(CallSite {
                        file: file.to_string_lossy().into_owned().into(),
                        line,
                        column: symbol.colno(),
                        function: Some(parsers::short_function_name(&name).to_owned()),
                    }),
                    symbol: Some(name),
                });
            }
        }
        frames
    }
}

#[cfg(not(feature = "backtrace"))]
struct RawTrace(std::backtrace::Backtrace);

#[cfg(not(feature = "backtrace"))]
impl RawTrace {
    fn capture() -> Self {
        Self(std::backtrace::Backtrace::force_capture())
    }

    fn resolve(self) -> Vec<TraceFrame> {
        let text = self.0.to_string();
        parsers::frames(&text, super::TraceFormat::Rust)
            .into_iter()
            .filter(|frame| frame.symbol.is_some() && frame.site.is_some())
            .collect()
    }
}

/// Determines which crate a frame belongs to, from its file path first and
/// from the leading segment of its symbol otherwise.
fn frame_crate(frame: &TraceFrame) -> Option<&str> {
    static REGEXES: OnceLock<[Regex; 2]> = OnceLock::new();
    let [std_regex, registry_regex] = REGEXES.get_or_init(|| {
        [
            // - /lib/rustlib/src/rust/library/{std|core|alloc}/src/...
            // - /rustc/{40-char-hash}/library/{std|core|alloc}/src/...
            Regex::new(
                r"(?:/lib/rustlib/src/rust|^/rustc/[0-9a-f]{40})/library/(std|core|alloc)/src/.*$",
            )
            .expect("built-in regex pattern for std library paths should be valid"),
            // - /.cargo/registry/src/{index}-{16-char-hash}/{crate}-{version}/src/...
            Regex::new(r"/\.cargo/registry/src/[^/]+-[0-9a-f]{16}/([^./]+)-[0-9]+\.[^/]*/src/.*$")
                .expect("built-in regex pattern for cargo registry paths should be valid"),
        ]
    });

    if let Some(site) = &frame.site {
        let file: &str = &site.file;
        for regex in [std_regex, registry_regex] {
            if let Some(captures) = regex.captures(file)
                && let Some(name) = captures.get(1)
            {
                return Some(name.as_str());
            }
        }
    }

    let symbol = frame.symbol.as_deref()?;
    let symbol = symbol.trim_start_matches(['<', '&']);
    let symbol = symbol.strip_prefix("dyn ").unwrap_or(symbol);
    symbol.split_once("::").map(|(head, _)| head)
}

fn filter(mut frames: Vec<TraceFrame>) -> Vec<TraceFrame> {
    let leading = frames
        .iter()
        .take_while(|frame| {
            frame_crate(frame).is_some_and(|name| SKIPPED_INITIAL_CRATES.contains(&name))
        })
        .count();
    frames.drain(..leading);

    while let Some(last) = frames.last() {
        let symbol = last.symbol.as_deref().unwrap_or_default();
        let skip = frame_crate(last).is_some_and(|c| SKIPPED_FINAL_CRATES.contains(&c))
            || symbol == "__libc_start_call_main"
            || symbol == "__libc_start_main_impl"
            || symbol == "_start";
        if !skip {
            break;
        }
        frames.pop();
    }
    frames
}

fn render(frames: Vec<TraceFrame>, limit: usize) -> Option<String> {
    let mut out = String::new();
    for (index, frame) in frames.into_iter().take(limit).enumerate() {
        let symbol = frame.symbol.as_deref().unwrap_or("<unknown>");
        let _ = writeln!(out, "{index:>4}: {symbol}");
        if let Some(site) = frame.site {
            let _ = writeln!(out, "             at {site}");
        }
    }
    (!out.is_empty()).then_some(out)
}
