use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::Key;

/// Root configuration for autoreplay.
///
/// Deserialized from a JSON file. Every section is optional and falls back to
/// its defaults:
/// - `playback`: timing, error policy and coordinate mapping for replay
/// - `recognition`: polling and matching parameters
/// - `capture`: hook queue size and recording filters
/// - `parameters`: values exposed to scripts as `{{@name}}`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    /// Parameters copied into every execution context.
    /// Values can be any JSON value (string/number/bool/object/array).
    #[serde(default)]
    pub parameters: ParametersMap,
}

/// Execution parameters.
pub type ParametersMap = BTreeMap<String, serde_json::Value>;

/// Replay timing and policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Speed multiplier; delays are divided by it (2.0 plays twice as fast). Must be > 0.
    pub speed: f64,

    /// Random delay variation as a fraction of each delay, in [0, 1].
    pub jitter: f64,

    /// Keep going after a failed action instead of aborting the run.
    pub continue_on_error: bool,

    /// Wall-clock limit for a whole run in milliseconds.
    pub timeout_ms: Option<u64>,

    /// Horizontal scale applied to recorded coordinates.
    pub scale_x: f64,

    /// Vertical scale applied to recorded coordinates.
    pub scale_y: f64,

    /// Offset added after scaling (e.g. a secondary monitor origin).
    pub offset_x: i32,
    pub offset_y: i32,

    /// Log synthesized input instead of injecting it.
    pub dry_run: bool,

    /// Log every action at info level while running.
    pub log_actions: bool,

    /// Maximum nesting of loops and conditionals.
    pub max_depth: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            jitter: 0.0,
            continue_on_error: false,
            timeout_ms: None,
            scale_x: 1.0,
            scale_y: 1.0,
            offset_x: 0,
            offset_y: 0,
            dry_run: false,
            log_actions: false,
            max_depth: 32,
        }
    }
}

/// Template matching parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Interval between attempts while waiting for a template (minimum 10).
    pub poll_interval_ms: u64,

    /// Threshold given to templates loaded without one, in [0, 1].
    pub default_threshold: f64,

    /// Upper bound for "find all" results.
    pub max_matches: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            default_threshold: 0.9,
            max_matches: 32,
        }
    }
}

/// Recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capacity of the queue between the OS hook and the consumer thread (minimum 16).
    pub queue_capacity: usize,

    /// Record pointer movement (button presses always carry their position).
    pub record_mouse_moves: bool,

    /// Minimum spacing between two recorded pointer moves.
    pub mouse_move_interval_ms: u64,

    /// Keys that are never recorded, e.g. the hotkey that stops a recording.
    pub ignored_keys: Vec<Key>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            record_mouse_moves: true,
            mouse_move_interval_ms: 15,
            ignored_keys: Vec::new(),
        }
    }
}
