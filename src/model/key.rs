use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Platform-neutral key identity.
///
/// Printable keys are stored as their lowercase character so a recording made on
/// one layout replays the same character on another. Anything the hook cannot name
/// is kept as a raw platform scan code.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Char(char),
    /// Function key `F<n>`.
    Function(u8),
    Return,
    Escape,
    Backspace,
    Tab,
    Space,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    Shift,
    Control,
    Alt,
    Meta,
    CapsLock,
    Raw(u32),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{}", c.to_uppercase()),
            Key::Function(n) => write!(f, "F{n}"),
            Key::Raw(code) => write!(f, "#{code}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl FromStr for Key {
    type Err = String;

    /// Parses the names printed by `Display` (case-insensitive), e.g. `a`, `F5`, `Escape`, `#57`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Ok(Key::Char(c.to_ascii_lowercase()));
        }
        if let Some(code) = trimmed.strip_prefix('#') {
            return code
                .parse()
                .map(Key::Raw)
                .map_err(|_| format!("invalid raw key code '{trimmed}'"));
        }
        let lower = trimmed.to_lowercase();
        if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
            return Ok(Key::Function(n));
        }
        let key = match lower.as_str() {
            "return" | "enter" => Key::Return,
            "escape" | "esc" => Key::Escape,
            "backspace" => Key::Backspace,
            "tab" => Key::Tab,
            "space" => Key::Space,
            "delete" | "del" => Key::Delete,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" => Key::PageUp,
            "pagedown" => Key::PageDown,
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "shift" => Key::Shift,
            "control" | "ctrl" => Key::Control,
            "alt" | "option" => Key::Alt,
            "meta" | "cmd" | "super" | "win" => Key::Meta,
            "capslock" => Key::CapsLock,
            _ => return Err(format!("unknown key '{trimmed}'")),
        };
        Ok(key)
    }
}

/// Mouse button enumeration.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_agree() {
        for key in [Key::Char('a'), Key::Function(5), Key::Escape, Key::Raw(57), Key::PageUp] {
            let parsed: Key = key.to_string().parse().unwrap();
            assert_eq!(parsed, key);
        }
        assert_eq!("Enter".parse::<Key>().unwrap(), Key::Return);
        assert!("hyper".parse::<Key>().is_err());
    }

    #[test]
    fn serde_shape() {
        assert_eq!(serde_json::to_string(&Key::Char('a')).unwrap(), r#"{"char":"a"}"#);
        assert_eq!(serde_json::to_string(&Key::Return).unwrap(), r#""return""#);
    }
}
