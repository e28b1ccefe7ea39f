//! Trace text parsers.
//!
//! Every parser turns trace text into a list of [`TraceFrame`]s ordered from
//! the innermost frame (where the failure was raised) outwards.

use std::sync::OnceLock;

use regex::Regex;

use super::CallSite;

/// Trace text formats understood by [`resolve_call_site`](super::resolve_call_site).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceFormat {
    /// `std::backtrace` / `backtrace` crate output:
    ///
    /// ```text
    ///    3: app::parse
    ///              at ./src/parse.rs:10:5
    /// ```
    Rust,
    /// V8 (Node.js, Chromium) stack frames: `    at fn (file:line:col)`.
    V8,
    /// SpiderMonkey and JavaScriptCore stack frames: `fn@file:line:col`.
    Gecko,
    /// Python tracebacks: `  File "path", line N, in fn`.
    ///
    /// Python prints the innermost frame last; the parser reverses the order.
    Python,
}

/// One frame of a parsed trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// The function or symbol name as printed in the trace.
    pub symbol: Option<String>,
    /// The location of the frame, if the trace printed one.
    pub site: Option<CallSite>,
}

struct Patterns {
    rust_entry: Regex,
    rust_at: Regex,
    v8: Regex,
    gecko: Regex,
    python: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // `   12: symbol`
        rust_entry: Regex::new(r"^[ \t]*([0-9]+):[ \t]+(.+)$")
            .expect("built-in regex pattern for rust trace entries should be valid"),
        // `             at /path/file.rs:10:5`
        rust_at: Regex::new(r"^[ \t]+at[ \t]+(.+?):([0-9]+)(?::([0-9]+))?$")
            .expect("built-in regex pattern for rust trace locations should be valid"),
        // `    at fn (file:10:5)` or `    at file:10:5`
        v8: Regex::new(r"^[ \t]*at[ \t]+(?:(.+?)[ \t]+\()?(.+?):([0-9]+):([0-9]+)\)?$")
            .expect("built-in regex pattern for v8 frames should be valid"),
        // `fn@file:10:5`
        gecko: Regex::new(r"^(.*?)@(.+?):([0-9]+):([0-9]+)$")
            .expect("built-in regex pattern for gecko frames should be valid"),
        // `  File "path", line 10, in fn`
        python: Regex::new(r#"^[ \t]*File "(.+)", line ([0-9]+)(?:, in (.+))?$"#)
            .expect("built-in regex pattern for python frames should be valid"),
    })
}

/// Guesses the format of `trace` from cheap textual markers.
///
/// Returns `None` if no known format is recognized.
pub fn detect_format(trace: &str) -> Option<TraceFormat> {
    if trace.contains("File \"") && trace.contains(", line ") {
        return Some(TraceFormat::Python);
    }

    let mut v8_like = false;
    let mut gecko_like = false;
    for line in trace.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(|c: char| c.is_ascii_digit()) {
            // `N: symbol` entries only occur in Rust traces.
            let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            if rest.starts_with(": ") {
                return Some(TraceFormat::Rust);
            }
        }
        if trimmed.starts_with("at ") {
            v8_like = true;
        } else if trimmed.contains('@') && trimmed.contains(':') {
            gecko_like = true;
        }
    }

    if v8_like {
        Some(TraceFormat::V8)
    } else if gecko_like {
        Some(TraceFormat::Gecko)
    } else {
        None
    }
}

/// Parses every frame of `trace`, probing its format first.
///
/// Returns an empty list if the format is not recognized.
pub fn parse_frames(trace: &str) -> Vec<TraceFrame> {
    match detect_format(trace) {
        Some(format) => frames(trace, format),
        None => Vec::new(),
    }
}

pub(super) fn nth_frame(trace: &str, format: TraceFormat, n: usize) -> Option<TraceFrame> {
    frames(trace, format).into_iter().nth(n)
}

pub(super) fn frames(trace: &str, format: TraceFormat) -> Vec<TraceFrame> {
    match format {
        TraceFormat::Rust => rust_frames(trace),
        TraceFormat::V8 => v8_frames(trace),
        TraceFormat::Gecko => gecko_frames(trace),
        TraceFormat::Python => python_frames(trace),
    }
}

fn number(text: Option<regex::Match<'_>>) -> Option<u32> {
    text?.as_str().parse().ok()
}

fn site(file: &str, line: u32, column: Option<u32>, symbol: Option<&str>) -> CallSite {
    CallSite {
        file: file.to_owned().into(),
        line,
        column,
        function: symbol
            .filter(|symbol| !symbol.is_empty())
            .map(|symbol| short_function_name(symbol).to_owned()),
    }
}

fn rust_frames(trace: &str) -> Vec<TraceFrame> {
    let patterns = patterns();
    let mut frames: Vec<TraceFrame> = Vec::new();

    for line in trace.lines() {
        if let Some(captures) = patterns.rust_entry.captures(line) {
            frames.push(TraceFrame {
                symbol: captures.get(2).map(|m| m.as_str().to_owned()),
                site: None,
            });
        } else if let Some(captures) = patterns.rust_at.captures(line)
            && let Some(frame) = frames.last_mut()
            // Inlined frames print several locations; the first one is the
            // innermost.
            && frame.site.is_none()
            && let (Some(file), Some(line)) = (captures.get(1), number(captures.get(2)))
        {
            frame.site = Some(site(
                file.as_str(),
                line,
                number(captures.get(3)),
                frame.symbol.as_deref(),
            ));
        }
    }
    frames
}

fn v8_frames(trace: &str) -> Vec<TraceFrame> {
    let patterns = patterns();
    trace
        .lines()
        .filter(|line| line.trim_start().starts_with("at "))
        .map(|line| match patterns.v8.captures(line) {
            Some(captures) => {
                let symbol = captures.get(1).map(|m| m.as_str());
                let located = captures.get(2).zip(number(captures.get(3)));
                TraceFrame {
                    symbol: symbol.map(str::to_owned),
                    site: located.map(|(file, line)| {
                        site(file.as_str(), line, number(captures.get(4)), symbol)
                    }),
                }
            }
            // Native frames such as `at Array.map (<anonymous>)`.
            None => TraceFrame {
                symbol: Some(line.trim_start()[3..].trim().to_owned()),
                site: None,
            },
        })
        .collect()
}

fn gecko_frames(trace: &str) -> Vec<TraceFrame> {
    let patterns = patterns();
    trace
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match patterns.gecko.captures(line) {
            Some(captures) => {
                let symbol = captures.get(1).map(|m| m.as_str());
                let located = captures.get(2).zip(number(captures.get(3)));
                TraceFrame {
                    symbol: symbol.filter(|s| !s.is_empty()).map(str::to_owned),
                    site: located.map(|(file, line)| {
                        site(file.as_str(), line, number(captures.get(4)), symbol)
                    }),
                }
            }
            None => TraceFrame {
                symbol: Some(line.to_owned()),
                site: None,
            },
        })
        .collect()
}

fn python_frames(trace: &str) -> Vec<TraceFrame> {
    let patterns = patterns();
    let mut frames: Vec<TraceFrame> = trace
        .lines()
        .filter_map(|line| {
            let captures = patterns.python.captures(line)?;
            let symbol = captures.get(3).map(|m| m.as_str());
            let located = captures.get(1).zip(number(captures.get(2)));
            Some(TraceFrame {
                symbol: symbol.map(str::to_owned),
                site: located.map(|(file, line)| site(file.as_str(), line, None, symbol)),
            })
        })
        .collect();
    frames.reverse();
    frames
}

/// Extracts the last path segment of a (possibly generic) function path.
///
/// `<app::Config as core::str::FromStr>::from_str` becomes `from_str`, and
/// `app::main::{{closure}}` becomes `{{closure}}`.
pub(super) fn short_function_name(symbol: &str) -> &str {
    let symbol = strip_symbol_hash(symbol);

    let mut word_start = 0usize;
    let mut word_end = 0usize;
    let mut angle_nesting_level = 0u64;
    let mut curly_nesting_level = 0u64;
    let mut potential_function_arrow = false;
    let mut inside_word = false;

    for (i, c) in symbol.char_indices() {
        if curly_nesting_level == 0 && angle_nesting_level == 0 {
            if !inside_word && (unicode_ident::is_xid_start(c) || c == '$') {
                word_start = i;
                inside_word = true;
            } else if inside_word && !(unicode_ident::is_xid_continue(c) || c == '$') {
                word_end = i;
                inside_word = false;
            }
        }

        let was_potential_function_arrow = potential_function_arrow;
        potential_function_arrow = c == '-';

        match c {
            '<' => angle_nesting_level = angle_nesting_level.saturating_add(1),
            '>' if !was_potential_function_arrow => {
                angle_nesting_level = angle_nesting_level.saturating_sub(1);
            }
            '{' => {
                curly_nesting_level = curly_nesting_level.saturating_add(1);
                if !inside_word && curly_nesting_level == 1 && angle_nesting_level == 0 {
                    word_start = i;
                    inside_word = true;
                }
            }
            '}' => {
                curly_nesting_level = curly_nesting_level.saturating_sub(1);
                if inside_word && curly_nesting_level == 0 {
                    word_end = i + 1;
                    inside_word = false;
                }
            }
            _ => {}
        }
    }

    if word_start < word_end {
        &symbol[word_start..word_end]
    } else {
        &symbol[word_start..]
    }
}

/// Removes the `::h0123456789abcdef` suffix of legacy-mangled Rust symbols.
fn strip_symbol_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::h") {
        Some((path, hash)) if hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit()) => {
            path
        }
        _ => symbol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callsite::resolve_call_site;

    const RUST_TRACE: &str = "\
   0: app::config::load
             at ./src/config.rs:41:13
   1: app::main::{{closure}}
             at ./src/main.rs:7:5
   2: core::ops::function::FnOnce::call_once
             at /rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/core/src/ops/function.rs:250:5
";

    const V8_TRACE: &str = "\
TypeError: Cannot read properties of undefined (reading 'x')
    at readX (/srv/app/lib/point.js:12:18)
    at Array.map (<anonymous>)
    at /srv/app/index.js:4:20
";

    const GECKO_TRACE: &str = "\
readX@http://localhost:8080/point.js:12:18
@http://localhost:8080/index.js:4:20
";

    const PYTHON_TRACE: &str = r#"Traceback (most recent call last):
  File "/srv/app/main.py", line 10, in <module>
    main()
  File "/srv/app/main.py", line 6, in main
    load()
  File "/srv/app/config.py", line 3, in load
    raise ValueError("bad")
ValueError: bad
"#;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(RUST_TRACE), Some(TraceFormat::Rust));
        assert_eq!(detect_format(V8_TRACE), Some(TraceFormat::V8));
        assert_eq!(detect_format(GECKO_TRACE), Some(TraceFormat::Gecko));
        assert_eq!(detect_format(PYTHON_TRACE), Some(TraceFormat::Python));
        assert_eq!(detect_format("plain words"), None);
        assert_eq!(detect_format(""), None);
    }

    #[test]
    fn test_rust_frames() {
        let site = resolve_call_site(RUST_TRACE, 0).unwrap();
        assert_eq!(site.to_string(), "./src/config.rs:41:13");
        assert_eq!(site.function.as_deref(), Some("load"));

        let site = resolve_call_site(RUST_TRACE, 1).unwrap();
        assert_eq!(site.to_string(), "./src/main.rs:7:5");
        assert_eq!(site.function.as_deref(), Some("{{closure}}"));

        assert_eq!(resolve_call_site(RUST_TRACE, 3), None);
    }

    #[test]
    fn test_rust_frame_without_location() {
        let trace = "   0: <unknown>\n   1: app::run\n             at src/run.rs:3:1\n";
        assert_eq!(resolve_call_site(trace, 0), None);
        assert_eq!(resolve_call_site(trace, 1).unwrap().line, 3);
    }

    #[test]
    fn test_v8_frames() {
        let site = resolve_call_site(V8_TRACE, 0).unwrap();
        assert_eq!(site.to_string(), "/srv/app/lib/point.js:12:18");
        assert_eq!(site.function.as_deref(), Some("readX"));

        // Native frames count as frames but carry no location.
        assert_eq!(resolve_call_site(V8_TRACE, 1), None);

        let anonymous = resolve_call_site(V8_TRACE, 2).unwrap();
        assert_eq!(anonymous.to_string(), "/srv/app/index.js:4:20");
        assert_eq!(anonymous.function, None);
    }

    #[test]
    fn test_gecko_frames() {
        let site = resolve_call_site(GECKO_TRACE, 0).unwrap();
        assert_eq!(site.to_string(), "http://localhost:8080/point.js:12:18");
        assert_eq!(site.function.as_deref(), Some("readX"));

        let anonymous = resolve_call_site(GECKO_TRACE, 1).unwrap();
        assert_eq!(anonymous.line, 4);
        assert_eq!(anonymous.function, None);
    }

    #[test]
    fn test_python_frames_innermost_first() {
        let site = resolve_call_site(PYTHON_TRACE, 0).unwrap();
        assert_eq!(site.to_string(), "/srv/app/config.py:3");
        assert_eq!(site.function.as_deref(), Some("load"));

        let outer = resolve_call_site(PYTHON_TRACE, 2).unwrap();
        assert_eq!(outer.line, 10);
    }

    #[test]
    fn test_parse_frames_counts() {
        assert_eq!(parse_frames(RUST_TRACE).len(), 3);
        assert_eq!(parse_frames(V8_TRACE).len(), 3);
        assert_eq!(parse_frames(PYTHON_TRACE).len(), 3);
        assert!(parse_frames("nothing here").is_empty());
    }

    #[test]
    fn test_short_function_name() {
        assert_eq!(short_function_name("app::config::load"), "load");
        assert_eq!(
            short_function_name("<app::Config as core::str::FromStr>::from_str"),
            "from_str"
        );
        assert_eq!(short_function_name("app::main::{{closure}}"), "{{closure}}");
        assert_eq!(short_function_name("app::run::h0123456789abcdef"), "run");
        assert_eq!(short_function_name("readX"), "readX");
    }
}
