//! Typed error taxonomy shared by the capture, replay and vision layers.
//!
//! Platform layers report failures as values so the execution engine can apply
//! its continue/abort policy uniformly. Validation errors are raised when a value
//! is constructed and never surface mid-execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ActionId, Rect};

/// Failures of the input hook and the input-injection primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// The OS refused access (accessibility / input monitoring not granted).
    #[error("input permission denied: {0}")]
    PermissionDenied(String),

    /// The platform API is missing or could not be initialized.
    #[error("input backend unavailable: {0}")]
    Unavailable(String),

    /// A single injection call failed; retrying later may succeed.
    #[error("input injection failed: {0}")]
    Transient(String),

    /// Another event source is already listening in this process.
    #[error("an input event source is already active")]
    AlreadyActive,

    /// `stop` was called on a source that is not listening.
    #[error("input event source is not active")]
    NotActive,
}

impl InputError {
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    /// Classify a backend error message as a permission failure or an unavailable backend.
    pub(crate) fn from_backend_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if looks_like_permission(&message) {
            Self::PermissionDenied(message)
        } else {
            Self::Unavailable(message)
        }
    }
}

/// Failures of the screen sampler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("screen capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("screen capture failed: {0}")]
    Transient(String),

    #[error("capture region {0:?} does not intersect the screen")]
    InvalidRegion(Rect),
}

impl CaptureError {
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    pub(crate) fn from_backend_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if looks_like_permission(&message) {
            Self::PermissionDenied(message)
        } else {
            Self::Transient(message)
        }
    }
}

/// Malformed values rejected at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("template pixel buffer is empty")]
    EmptyPixels,

    #[error("threshold {0} is outside [0, 1]")]
    ThresholdOutOfRange(f64),

    #[error("{0} must not be blank")]
    BlankName(&'static str),

    #[error("action {0} is not part of the sequence")]
    UnknownAction(ActionId),

    #[error("action {0} appears more than once")]
    DuplicateAction(ActionId),

    #[error("index {index} is out of range for a sequence of {len} actions")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("loop count {0} is outside 1..={max}", max = crate::model::MAX_LOOP_COUNT)]
    InvalidLoopCount(u32),

    #[error("actions are nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("playback speed {0} must be greater than zero")]
    InvalidSpeed(f64),

    #[error("jitter {0} is outside [0, 1]")]
    InvalidJitter(f64),

    #[error("region {0:?} is empty or extends past the coordinate range")]
    InvalidRegion(Rect),
}

/// Answer to a permission probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied(String),
    /// The probe could not decide (backend failed for an unrelated reason).
    Unknown(String),
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

fn looks_like_permission(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["permission", "denied", "not authorized", "accessibility", "eventtap", "tcc"]
        .iter()
        .any(|needle| lower.contains(needle))
}
