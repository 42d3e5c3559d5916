//! # logger
//!
//! This module contains the logging config shared by the gossip sync engine
//! and the outgoing payment engine.
//!
//! During development, the log level is configurable via the `RUST_LOG`
//! environment variable. For example, `RUST_LOG=trace cargo run` would run
//! the node with all logs enabled. The log level defaults to `RUST_LOG=info`
//! if unset.
//!
//! ### Per-Target Filtering
//!
//! You can also filter logs on a per-crate/per-module basis:
//!
//! ```bash
//! $ RUST_LOG=warn,lexe_ln::gossip=debug cargo run
//! ```
//!
//! ### Syntax
//!
//! The full syntax is, `RUST_LOG=<filter_1>,<filter_2>,...,<filter_n>`,
//! where each `<filter_i>` is of the form:
//!
//! * `trace` (bare LEVEL)
//! * `foo` (bare TARGET)
//! * `foo=trace` (TARGET=LEVEL)

use std::{io, str::FromStr};

use anyhow::Context;
use tracing_core::{Level, LevelFilter};
use tracing_subscriber::{
    filter::Targets,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the global `tracing` logger.
///
/// + The logger will print enabled `tracing` events and spans to stderr.
/// + The default log level includes INFO, WARN, and ERROR events.
///
/// Panics if a logger is already initialized. This will fail if used in
/// tests, since multiple test threads will compete to set the global logger.
pub fn init(rust_log: Option<&str>, allow_trace: bool) {
    try_init(rust_log, allow_trace).expect("Failed to setup logger");
}

/// Use this to initialize the global logger in tests.
#[cfg(any(test, feature = "test-utils"))]
pub fn init_for_testing() {
    let rust_log = std::env::var("RUST_LOG").ok();

    // Don't panic if there's already a logger setup.
    // Multiple tests might try setting the global logger.
    let _ = try_init(rust_log.as_deref(), true);
}

/// Try to initialize a global logger.
/// Returns `Err` if another global logger is already set.
pub fn try_init(rust_log: Option<&str>, allow_trace: bool) -> anyhow::Result<()> {
    let rust_log = rust_log.unwrap_or("info");

    let targets = Targets::from_str(rust_log)
        .inspect_err(|e| eprintln!("Invalid RUST_LOG; using INFO: {e}"))
        .unwrap_or_else(|_| Targets::new().with_default(Level::INFO));

    // Allow TRACE logs in debug builds or if explicitly requested
    let clamped_targets =
        if cfg!(any(test, debug_assertions, feature = "test-utils")) || allow_trace {
            targets
        } else {
            clamp_targets(targets)
        };

    let stderr_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_target(true)
        .with_writer(io::stderr as fn() -> io::Stderr)
        .with_ansi(true)
        .with_filter(clamped_targets);

    tracing_subscriber::registry()
        .with(stderr_log)
        .try_init()
        .context("Logger already initialized")
}

/// Disallows TRACE logs as a default or for any specific target.
fn clamp_targets(targets: Targets) -> Targets {
    /// Sets a level to DEBUG if it is currently specified as TRACE.
    fn clamp_level(level: LevelFilter) -> LevelFilter {
        if level == LevelFilter::TRACE {
            LevelFilter::DEBUG
        } else {
            level
        }
    }

    let clamped_default = match targets.default_level() {
        Some(level) => clamp_level(level),
        None => LevelFilter::INFO,
    };

    let targets = targets
        .into_iter()
        .map(|(target, level)| (target, clamp_level(level)))
        .collect::<Targets>();

    targets.with_default(clamped_default)
}
