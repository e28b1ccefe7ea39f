//! Basic introduction to recoil failure records.
//!
//! This example demonstrates the fundamental concepts:
//! 1. Turning fallible calls into records with `try_sync`
//! 2. Wrapping errors with `.or_wrap()` and adding context with `.attach()`
//! 3. Creating records directly with `fail!` and `bail!`
//! 4. Following cause chains and rendering records as JSON

use recoil::prelude::*;
use std::fs;

/// Simplest usage: any error becomes a classified record.
fn read_settings_simple(path: &str) -> Result<String, Failure> {
    try_sync(|| fs::read_to_string(path))
}

/// Adding information: `.attach()` classifies the error and records the path.
fn read_settings(path: &str) -> Result<String, Failure> {
    fs::read_to_string(path).attach("path", path)
}

/// Building a chain: `.or_wrap()` explains what the caller was doing.
fn load_port(raw: &str) -> Result<u16, Failure> {
    if raw.trim().is_empty() {
        bail!(Kind::PARSE, "no port configured");
    }
    raw.trim().parse::<u16>().or_wrap("ConfigError", "invalid port setting")
}

fn startup() -> Result<u16, Failure> {
    let port = load_port("80800").map_err(|failure| failure.with_context("phase", "startup"))?;
    Ok(port)
}

fn main() {
    println!("=== Basic Failure Records ===\n");

    println!("Example 1: A classified I/O error");
    if let Err(failure) = read_settings_simple("/nonexistent/settings.json") {
        println!("{failure}");
        println!("kind: {}", failure.kind());
    }
    println!();

    println!("Example 2: Context attached at the call site");
    if let Err(failure) = read_settings("/nonexistent/settings.json") {
        println!("{}", failure.to_json());
    }
    println!();

    println!("Example 3: A wrapped error and its root cause");
    if let Err(failure) = startup() {
        for (depth, link) in failure.chain().enumerate() {
            println!("{:indent$}{}: {}", "", link.kind(), link.message(), indent = depth * 2);
        }
        if let Some(root) = failure.root_cause() {
            println!("root cause: {root}");
        }
    }
    println!();

    println!("Example 4: Records built directly");
    let failure = fail!("QuotaError", "quota exceeded for {}", "acme"; "limit" => 100);
    println!("{}", serde_json::to_string_pretty(&failure.to_json()).unwrap_or_default());
    println!("authentic: {}", recoil::is_failure(&failure));
}
