/*!
Input replay: synthesizing keyboard and mouse transitions.

- `InputReplayer`: the capability the execution engine depends on.
- `EnigoReplayer`: real injection through Enigo on a dedicated thread (with dry-run).
- `MemoryReplayer`: records what would have been injected; used for previews and tests.

A replayer sends exactly one transition per call. Pairing a key press with its
release is the caller's job, and sending the same action twice produces two
real transitions.
*/

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{InputError, PermissionStatus};
use crate::model::{ActionKind, Key, MouseButton};

pub mod enigo_backend;

pub use enigo_backend::EnigoReplayer;

/// A single synthesizable transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputAction {
    KeyDown { key: Key },
    KeyUp { key: Key },
    MouseMove { x: i32, y: i32 },
    /// Moves to `(x, y)` first, then presses.
    MouseDown { button: MouseButton, x: i32, y: i32 },
    /// Moves to `(x, y)` first, then releases.
    MouseUp { button: MouseButton, x: i32, y: i32 },
    Wheel { delta_x: i32, delta_y: i32 },
}

impl InputAction {
    /// The input transition behind an action kind, if it has one.
    pub fn from_kind(kind: &ActionKind) -> Option<Self> {
        let action = match *kind {
            ActionKind::KeyDown { key } => Self::KeyDown { key },
            ActionKind::KeyUp { key } => Self::KeyUp { key },
            ActionKind::MouseMove { x, y } => Self::MouseMove { x, y },
            ActionKind::MouseDown { button, x, y } => Self::MouseDown { button, x, y },
            ActionKind::MouseUp { button, x, y } => Self::MouseUp { button, x, y },
            ActionKind::MouseWheel { delta_x, delta_y } => Self::Wheel { delta_x, delta_y },
            _ => return None,
        };
        Some(action)
    }
}

/// Maps recorded logical coordinates onto the playback display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub factor_x: f64,
    pub factor_y: f64,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl Scale {
    pub const IDENTITY: Scale = Scale {
        factor_x: 1.0,
        factor_y: 1.0,
        offset_x: 0,
        offset_y: 0,
    };

    pub fn apply(&self, x: i32, y: i32) -> (i32, i32) {
        let sx = ((f64::from(x) * self.factor_x).round() as i32).saturating_add(self.offset_x);
        let sy = ((f64::from(y) * self.factor_y).round() as i32).saturating_add(self.offset_y);
        (sx, sy)
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Capability to inject input. Implementations must report failures as values.
pub trait InputReplayer: Send + Sync {
    /// Static human-readable identifier (used in logs).
    fn name(&self) -> &'static str;

    /// Synthesize one transition. A failure is recoverable from the caller's point of view.
    fn send(&self, action: &InputAction, scale: Scale) -> Result<(), InputError>;

    /// Whether the OS currently lets this process inject input.
    fn check_permission(&self) -> PermissionStatus;
}

/// One action accepted by a [`MemoryReplayer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentInput {
    pub action: InputAction,
    pub at: Instant,
}

/// Replayer that keeps every action in memory instead of touching the OS.
///
/// Coordinates are stored after scaling. Individual keys can be made to fail
/// to exercise error policies.
#[derive(Debug, Default)]
pub struct MemoryReplayer {
    sent: Mutex<Vec<SentInput>>,
    failing_keys: Vec<Key>,
}

impl MemoryReplayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every press or release of `key` is refused with a transient error.
    #[must_use]
    pub fn failing_on(mut self, key: Key) -> Self {
        self.failing_keys.push(key);
        self
    }

    pub fn sent(&self) -> Vec<SentInput> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn actions(&self) -> Vec<InputAction> {
        self.sent().into_iter().map(|s| s.action).collect()
    }
}

impl InputReplayer for MemoryReplayer {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn send(&self, action: &InputAction, scale: Scale) -> Result<(), InputError> {
        if let InputAction::KeyDown { key } | InputAction::KeyUp { key } = action {
            if self.failing_keys.contains(key) {
                return Err(InputError::Transient(format!("injection of {key} refused")));
            }
        }
        let action = match *action {
            InputAction::MouseMove { x, y } => {
                let (x, y) = scale.apply(x, y);
                InputAction::MouseMove { x, y }
            }
            InputAction::MouseDown { button, x, y } => {
                let (x, y) = scale.apply(x, y);
                InputAction::MouseDown { button, x, y }
            }
            InputAction::MouseUp { button, x, y } => {
                let (x, y) = scale.apply(x, y);
                InputAction::MouseUp { button, x, y }
            }
            other => other,
        };
        trace!(target: "autoreplay::replay", ?action, "memory send");
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentInput {
                action,
                at: Instant::now(),
            });
        Ok(())
    }

    fn check_permission(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }
}
