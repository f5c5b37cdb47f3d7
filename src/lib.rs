#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! autoreplay: record desktop input, replay it with accurate timing, and steer
//! replays with on-screen template matching.
//!
//! The crate is organized into cohesive modules:
//! - `capture`: global input hook and the recorder that turns events into actions.
//! - `replay`: input injection (Enigo) and an in-memory replayer.
//! - `vision`: screen capture (xcap), template matching and the recognition engine.
//! - `executor`: the execution engine interpreting action sequences.
//! - `automation`: the facade a UI or CLI drives.
//! - `model`: actions, sequences, scripts, templates and recognition results.
//! - `config`: configuration models, loader, schema helpers and script files.
//! - `error`: typed errors shared by the platform layers.
//! - `utils`: interpolation of `{{variables}}`.
//!
//! Use `autoreplay::prelude::*` to bring commonly used items into scope quickly.

pub mod automation;
pub mod capture;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod replay;
pub mod utils;
pub mod vision;

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Parse a simple level name (trace|debug|info|warn|error).
pub fn parse_level(s: &str) -> Option<tracing::Level> {
    use tracing::Level;
    match s.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize tracing (logging) with a reasonable default.
/// - Honors the `RUST_LOG` environment variable if set (as a simple level).
/// - Falls back to `info` level.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(tracing::Level::INFO);
    init_tracing_with_level(level);
}

/// Initialize tracing at an explicit level. Later calls are no-ops.
pub fn init_tracing_with_level(level: tracing::Level) {
    // Ignore the error if the global subscriber was already set.
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use autoreplay::prelude::*;`
pub mod prelude {
    // Common result/error handling
    pub use anyhow::{Context, Error, Result, anyhow, bail, ensure};

    // Serialization
    pub use serde::{Deserialize, Serialize};

    // Tracing macros
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use std::time::Duration;

    pub use crate::automation::Automation;
    pub use crate::error::{CaptureError, InputError, PermissionStatus, ValidationError};
    pub use crate::executor::{
        ExecutionContext, ExecutionEngine, ExecutionOptions, ExecutionResult, ExecutionStatus,
    };
    pub use crate::model::{
        ActionKind, ActionSequence, Condition, GameAction, ImageTemplate, Key, MouseButton, Rect,
        Script, TemplateLibrary,
    };

    // Frequently used internal modules
    pub use crate::{capture, config, executor, model, replay, vision};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_parse() {
        assert_eq!(parse_level(" Warning "), Some(tracing::Level::WARN));
        assert_eq!(parse_level("loud"), None);
        assert!(!version().is_empty());
    }
}
