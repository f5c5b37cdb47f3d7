/*!
Input capture.

- `InputEventSource`: start/stop a system-wide listener delivering normalized events.
- `HookEventSource`: rdev backed implementation. The OS callback only stamps and
  enqueues; filtering and the user handler run on a consumer thread.
- `Recorder`: turns a capture session into an `ActionSequence`.

At most one source may be listening per process.
*/

use std::time::Instant;

use serde::Serialize;

use crate::config::CaptureConfig;
use crate::error::InputError;
use crate::model::{Key, MouseButton};

pub mod hook;
pub mod recorder;

pub use hook::HookEventSource;
pub use recorder::{Recorder, sequence_from_events};

/// Normalized input transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEventKind {
    KeyPress { key: Key },
    KeyRelease { key: Key },
    ButtonPress { button: MouseButton, x: i32, y: i32 },
    ButtonRelease { button: MouseButton, x: i32, y: i32 },
    MouseMove { x: i32, y: i32 },
    Wheel { delta_x: i32, delta_y: i32 },
}

impl InputEventKind {
    pub fn key(&self) -> Option<Key> {
        match *self {
            Self::KeyPress { key } | Self::KeyRelease { key } => Some(key),
            _ => None,
        }
    }
}

/// An event with the monotonic time it was observed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputEventKind,
    pub at: Instant,
}

impl InputEvent {
    pub fn new(kind: InputEventKind, at: Instant) -> Self {
        Self { kind, at }
    }
}

/// Selects which events reach the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub keyboard: bool,
    pub mouse_buttons: bool,
    pub mouse_moves: bool,
    pub wheel: bool,
    pub ignored_keys: Vec<Key>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            keyboard: true,
            mouse_buttons: true,
            mouse_moves: true,
            wheel: true,
            ignored_keys: Vec::new(),
        }
    }
}

impl EventFilter {
    pub fn from_config(cfg: &CaptureConfig) -> Self {
        Self {
            mouse_moves: cfg.record_mouse_moves,
            ignored_keys: cfg.ignored_keys.clone(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ignoring(mut self, key: Key) -> Self {
        self.ignored_keys.push(key);
        self
    }

    pub fn allows(&self, kind: &InputEventKind) -> bool {
        match kind {
            InputEventKind::KeyPress { key } | InputEventKind::KeyRelease { key } => {
                self.keyboard && !self.ignored_keys.contains(key)
            }
            InputEventKind::ButtonPress { .. } | InputEventKind::ButtonRelease { .. } => {
                self.mouse_buttons
            }
            InputEventKind::MouseMove { .. } => self.mouse_moves,
            InputEventKind::Wheel { .. } => self.wheel,
        }
    }
}

/// Counters reported when a source stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Events handed to the handler.
    pub delivered: u64,
    /// Events rejected by the filter.
    pub filtered: u64,
    /// Events lost because the hand-off queue was full.
    pub dropped: u64,
}

/// Callback receiving filtered events on the consumer thread.
pub type EventHandler = Box<dyn FnMut(InputEvent) + Send + 'static>;

/// Capability to observe system-wide input.
pub trait InputEventSource: Send {
    /// Static human-readable identifier (used in logs).
    fn name(&self) -> &'static str;

    /// Begin listening. Fails with `AlreadyActive` when any source in the process
    /// is listening, and with a permission/unavailable error when the platform hook
    /// cannot be installed.
    fn start(&mut self, filter: EventFilter, handler: EventHandler) -> Result<(), InputError>;

    /// Stop listening. Events already queued are delivered before this returns.
    fn stop(&mut self) -> Result<CaptureStats, InputError>;

    fn is_active(&self) -> bool;
}
