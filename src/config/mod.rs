//! Configuration module for autoreplay.
//!
//! This module wires together the data models and loading/validation helpers used
//! throughout the crate, plus the JSON persistence of scripts.
//!
//! Example:
//! use autoreplay::config::{Config, load_from_path};
//!
//! let cfg = load_from_path("config/default.json")?;

pub mod loader;
pub mod models;

// Re-export core data models
pub use models::{CaptureConfig, Config, ParametersMap, PlaybackConfig, RecognitionConfig};

// Re-export loader utilities
pub use loader::{
    generate_schema, load_from_path, load_from_path_async, load_from_reader, load_from_str,
    load_script_from_path, load_script_from_str, save_script_to_path, validate_config,
    write_schema_to_writer,
};
