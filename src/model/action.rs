use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::model::{ActionSequence, Key, MouseButton, Rect};

/// Upper bound for `Loop::count`.
pub const MAX_LOOP_COUNT: u32 = 10_000;

/// Stable identity of an action inside and across sequences.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What an action does.
///
/// Mouse coordinates are absolute logical screen coordinates. Only mouse kinds
/// carry them, so a keyboard action can never hold stray mouse fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    KeyDown { key: Key },
    KeyUp { key: Key },
    MouseMove { x: i32, y: i32 },
    MouseDown { button: MouseButton, x: i32, y: i32 },
    MouseUp { button: MouseButton, x: i32, y: i32 },
    MouseWheel {
        #[serde(default)]
        delta_x: i32,
        #[serde(default)]
        delta_y: i32,
    },
    /// Pure wait; the time is carried by the action's `delay_ms`.
    Delay,

    /// Look for a template on screen. With `timeout_ms` it polls until the template
    /// appears; otherwise it takes a single shot.
    FindImage {
        template: String,
        #[serde(default)]
        region: Option<Rect>,
        #[serde(default)]
        timeout_ms: Option<u64>,
        /// Click this button at the match centre once found.
        #[serde(default)]
        click: Option<MouseButton>,
        /// Variable prefix receiving `.found`, `.x`, `.y` and `.confidence`.
        #[serde(default)]
        store_as: Option<String>,
        /// A miss fails the action when set; otherwise it only records `.found = false`.
        #[serde(default = "default_true")]
        required: bool,
    },

    /// Run `body` up to `count` times, stopping early once `until` holds.
    Loop {
        body: ActionSequence,
        count: u32,
        #[serde(default)]
        until: Option<Condition>,
    },

    Conditional {
        condition: Condition,
        then: ActionSequence,
        #[serde(default)]
        otherwise: ActionSequence,
    },

    /// Set a variable; `value` is interpolated first.
    SetVariable { name: String, value: String },
}

fn default_true() -> bool {
    true
}

impl ActionKind {
    pub fn is_keyboard(&self) -> bool {
        matches!(self, Self::KeyDown { .. } | Self::KeyUp { .. })
    }

    pub fn is_mouse(&self) -> bool {
        matches!(
            self,
            Self::MouseMove { .. }
                | Self::MouseDown { .. }
                | Self::MouseUp { .. }
                | Self::MouseWheel { .. }
        )
    }

    fn describe(&self) -> String {
        match self {
            Self::KeyDown { key } => format!("press {key}"),
            Self::KeyUp { key } => format!("release {key}"),
            Self::MouseMove { x, y } => format!("move to ({x}, {y})"),
            Self::MouseDown { button, x, y } => format!("{button:?} down at ({x}, {y})"),
            Self::MouseUp { button, x, y } => format!("{button:?} up at ({x}, {y})"),
            Self::MouseWheel { delta_x, delta_y } => format!("scroll ({delta_x}, {delta_y})"),
            Self::Delay => "wait".to_string(),
            Self::FindImage { template, .. } => format!("find '{template}'"),
            Self::Loop { count, .. } => format!("repeat x{count}"),
            Self::Conditional { .. } => "if".to_string(),
            Self::SetVariable { name, .. } => format!("set {name}"),
        }
    }
}

/// Predicate used by guards, conditionals and loop exits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// True when the template currently matches on screen.
    ImageVisible {
        template: String,
        #[serde(default)]
        region: Option<Rect>,
    },
    /// String equality after interpolating `value`.
    VariableEquals { name: String, value: String },
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn not(self) -> Self {
        Condition::Not {
            condition: Box::new(self),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Condition::ImageVisible { template, .. } if template.trim().is_empty() => {
                Err(ValidationError::BlankName("template name"))
            }
            Condition::ImageVisible { region, .. } => check_region(region.as_ref()),
            Condition::VariableEquals { name, .. } if name.trim().is_empty() => {
                Err(ValidationError::BlankName("variable name"))
            }
            Condition::Not { condition } => condition.validate(),
            _ => Ok(()),
        }
    }
}

fn check_region(region: Option<&Rect>) -> Result<(), ValidationError> {
    match region {
        Some(r) if !r.is_valid_region() => Err(ValidationError::InvalidRegion(*r)),
        _ => Ok(()),
    }
}

/// A single captured or scripted operation.
///
/// `delay_ms` is the wait before this action, measured from the previous action
/// of the same sequence (the first action measures from the sequence start).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameAction {
    #[serde(default)]
    id: ActionId,
    kind: ActionKind,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    guard: Option<Condition>,
}

impl GameAction {
    pub fn new(kind: ActionKind, delay_ms: u64) -> Self {
        let label = kind.describe();
        Self {
            id: ActionId::new(),
            kind,
            delay_ms,
            label,
            guard: None,
        }
    }

    pub fn key_down(key: Key, delay_ms: u64) -> Self {
        Self::new(ActionKind::KeyDown { key }, delay_ms)
    }

    pub fn key_up(key: Key, delay_ms: u64) -> Self {
        Self::new(ActionKind::KeyUp { key }, delay_ms)
    }

    pub fn mouse_move(x: i32, y: i32, delay_ms: u64) -> Self {
        Self::new(ActionKind::MouseMove { x, y }, delay_ms)
    }

    pub fn mouse_down(button: MouseButton, x: i32, y: i32, delay_ms: u64) -> Self {
        Self::new(ActionKind::MouseDown { button, x, y }, delay_ms)
    }

    pub fn mouse_up(button: MouseButton, x: i32, y: i32, delay_ms: u64) -> Self {
        Self::new(ActionKind::MouseUp { button, x, y }, delay_ms)
    }

    pub fn delay(delay_ms: u64) -> Self {
        Self::new(ActionKind::Delay, delay_ms)
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn guard(&self) -> Option<&Condition> {
        self.guard.as_ref()
    }

    /// Same action (same id) with a different delay.
    #[must_use]
    pub fn with_delay(&self, delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_label(&self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_guard(&self, guard: Condition) -> Self {
        Self {
            guard: Some(guard),
            ..self.clone()
        }
    }

    /// A copy with a fresh identity, e.g. when duplicating an action in an editor.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            id: ActionId::new(),
            ..self.clone()
        }
    }

    /// Check nested content: names are non-blank, loop counts are bounded and the
    /// nesting stays within `max_depth`.
    pub fn validate(&self, depth: usize, max_depth: usize) -> Result<(), ValidationError> {
        if depth > max_depth {
            return Err(ValidationError::NestingTooDeep(max_depth));
        }
        if let Some(guard) = &self.guard {
            guard.validate()?;
        }
        match &self.kind {
            ActionKind::FindImage { template, .. } if template.trim().is_empty() => {
                Err(ValidationError::BlankName("template name"))
            }
            ActionKind::FindImage { region, .. } => check_region(region.as_ref()),
            ActionKind::SetVariable { name, .. } if name.trim().is_empty() => {
                Err(ValidationError::BlankName("variable name"))
            }
            ActionKind::Loop { body, count, until } => {
                if *count == 0 || *count > MAX_LOOP_COUNT {
                    return Err(ValidationError::InvalidLoopCount(*count));
                }
                if let Some(until) = until {
                    until.validate()?;
                }
                body.validate_nested(depth + 1, max_depth)
            }
            ActionKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.validate()?;
                then.validate_nested(depth + 1, max_depth)?;
                otherwise.validate_nested(depth + 1, max_depth)
            }
            _ => Ok(()),
        }
    }
}
