use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::ActionSequence;

/// A persisted recording or hand-written script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub name: String,

    /// How many times the sequence runs (ignored when `loop_forever` is set).
    #[serde(default = "default_repeat")]
    pub repeat_count: u32,

    /// Repeat until cancelled or timed out.
    #[serde(default)]
    pub loop_forever: bool,

    pub actions: ActionSequence,
}

fn default_repeat() -> u32 {
    1
}

impl Script {
    pub fn new(name: impl Into<String>, actions: ActionSequence) -> Self {
        Self {
            name: name.into(),
            repeat_count: 1,
            loop_forever: false,
            actions,
        }
    }

    pub fn validate(&self, max_depth: usize) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::BlankName("script name"));
        }
        if self.repeat_count == 0 {
            return Err(ValidationError::InvalidLoopCount(0));
        }
        self.actions.validate(max_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionKind, Condition, GameAction, Key, MouseButton, Rect};

    #[test]
    fn json_round_trip_is_lossless() {
        let body = ActionSequence::new(vec![
            GameAction::mouse_down(MouseButton::Left, 5, 6, 10),
            GameAction::mouse_up(MouseButton::Left, 5, 6, 40),
        ]);
        let actions = ActionSequence::new(vec![
            GameAction::key_down(Key::Char('a'), 0).with_label("open"),
            GameAction::key_up(Key::Char('a'), 50),
            GameAction::new(
                ActionKind::FindImage {
                    template: "ok".into(),
                    region: Some(Rect::new(0, 0, 640, 480)),
                    timeout_ms: Some(2_000),
                    click: Some(MouseButton::Left),
                    store_as: Some("ok".into()),
                    required: false,
                },
                100,
            ),
            GameAction::new(
                ActionKind::Loop {
                    body,
                    count: 3,
                    until: Some(Condition::VariableEquals {
                        name: "ok.found".into(),
                        value: "true".into(),
                    }),
                },
                0,
            )
            .with_guard(
                Condition::ImageVisible {
                    template: "ok".into(),
                    region: None,
                }
                .not(),
            ),
        ]);
        let mut script = Script::new("demo", actions);
        script.repeat_count = 2;

        let json = serde_json::to_string_pretty(&script).unwrap();
        let back: Script = serde_json::from_str(&json).unwrap();
        assert_eq!(back, script);
    }

    #[test]
    fn defaults_apply_to_minimal_documents() {
        let json = r#"{
            "name": "minimal",
            "actions": [
                { "kind": { "type": "key_down", "key": "return" } },
                { "kind": { "type": "delay" }, "delay_ms": 250 }
            ]
        }"#;
        let script: Script = serde_json::from_str(json).unwrap();
        assert_eq!(script.repeat_count, 1);
        assert!(!script.loop_forever);
        assert_eq!(script.actions.len(), 2);
        assert_eq!(script.actions.total_duration().as_millis(), 250);
        assert!(script.validate(8).is_ok());
    }

    #[test]
    fn zero_repeat_is_rejected() {
        let mut script = Script::new("x", ActionSequence::default());
        script.repeat_count = 0;
        assert!(script.validate(8).is_err());
    }
}
