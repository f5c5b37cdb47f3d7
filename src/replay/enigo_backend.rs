use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread;

use enigo::Keyboard as _;
use enigo::Mouse as _;
use enigo::{Axis, Button as EButton, Coordinate, Direction, Enigo, Key as EKey, Settings};
use tracing::{debug, info, trace, warn};

use super::{InputAction, InputReplayer, Scale};
use crate::error::{InputError, PermissionStatus};
use crate::model::{Key, MouseButton};

enum Request {
    Send {
        action: InputAction,
        reply: SyncSender<Result<(), InputError>>,
    },
    Probe {
        reply: SyncSender<PermissionStatus>,
    },
}

/// Injects input through Enigo, with optional dry-run mode.
///
/// Enigo is owned by a dedicated worker thread (it is not `Send` on every
/// platform). `send` blocks until the worker has finished the transition, so an
/// injection that has started always completes.
pub struct EnigoReplayer {
    dry_run: bool,
    requests: Sender<Request>,
}

impl EnigoReplayer {
    /// Create a replayer. In dry-run mode actions are only logged.
    pub fn new(dry_run: bool) -> Result<Self, InputError> {
        let (requests, rx) = mpsc::channel();
        thread::Builder::new()
            .name("autoreplay-inject".into())
            .spawn(move || run_worker(rx))
            .map_err(|e| InputError::Unavailable(format!("failed to spawn injection thread: {e}")))?;
        Ok(Self { dry_run, requests })
    }

    /// Returns whether the replayer is in dry-run mode.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn worker_gone() -> InputError {
        InputError::Unavailable("injection thread stopped".into())
    }
}

impl InputReplayer for EnigoReplayer {
    fn name(&self) -> &'static str {
        "enigo"
    }

    fn send(&self, action: &InputAction, scale: Scale) -> Result<(), InputError> {
        let action = scaled(*action, scale);
        if self.dry_run {
            info!(target: "autoreplay::replay", ?action, "DRY-RUN send");
            return Ok(());
        }
        let (reply, rx) = mpsc::sync_channel(1);
        self.requests
            .send(Request::Send { action, reply })
            .map_err(|_| Self::worker_gone())?;
        rx.recv().map_err(|_| Self::worker_gone())?
    }

    fn check_permission(&self) -> PermissionStatus {
        if self.dry_run {
            return PermissionStatus::Granted;
        }
        let (reply, rx) = mpsc::sync_channel(1);
        if self.requests.send(Request::Probe { reply }).is_err() {
            return PermissionStatus::Unknown("injection thread stopped".into());
        }
        rx.recv()
            .unwrap_or_else(|_| PermissionStatus::Unknown("injection thread stopped".into()))
    }
}

fn scaled(action: InputAction, scale: Scale) -> InputAction {
    match action {
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
    }
}

fn run_worker(rx: Receiver<Request>) {
    let mut enigo: Option<Enigo> = None;
    for request in rx {
        match request {
            Request::Send { action, reply } => {
                let result = ensure_enigo(&mut enigo).and_then(|e| perform(e, action));
                if let Err(err) = &result {
                    warn!(target: "autoreplay::replay", ?action, error = %err, "injection failed");
                }
                let _ = reply.send(result);
            }
            Request::Probe { reply } => {
                let status = match ensure_enigo(&mut enigo) {
                    Ok(_) => PermissionStatus::Granted,
                    Err(InputError::PermissionDenied(reason)) => PermissionStatus::Denied(reason),
                    Err(other) => PermissionStatus::Unknown(other.to_string()),
                };
                let _ = reply.send(status);
            }
        }
    }
    debug!(target: "autoreplay::replay", "injection thread exiting");
}

fn ensure_enigo(slot: &mut Option<Enigo>) -> Result<&mut Enigo, InputError> {
    if slot.is_none() {
        trace!(target: "autoreplay::replay", "Initializing Enigo");
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| InputError::from_backend_message(format!("Failed to initialize Enigo: {e}")))?;
        *slot = Some(enigo);
    }
    slot.as_mut()
        .ok_or_else(|| InputError::Unavailable("Enigo is not initialized".into()))
}

fn perform(enigo: &mut Enigo, action: InputAction) -> Result<(), InputError> {
    let transient = |e: enigo::InputError| InputError::Transient(e.to_string());
    trace!(target: "autoreplay::replay", ?action, "send");
    match action {
        InputAction::KeyDown { key } => enigo.key(map_key(key)?, Direction::Press).map_err(transient),
        InputAction::KeyUp { key } => enigo.key(map_key(key)?, Direction::Release).map_err(transient),
        InputAction::MouseMove { x, y } => enigo.move_mouse(x, y, Coordinate::Abs).map_err(transient),
        InputAction::MouseDown { button, x, y } => {
            enigo.move_mouse(x, y, Coordinate::Abs).map_err(transient)?;
            enigo
                .button(map_mouse_button(button), Direction::Press)
                .map_err(transient)
        }
        InputAction::MouseUp { button, x, y } => {
            enigo.move_mouse(x, y, Coordinate::Abs).map_err(transient)?;
            enigo
                .button(map_mouse_button(button), Direction::Release)
                .map_err(transient)
        }
        InputAction::Wheel { delta_x, delta_y } => {
            if delta_x != 0 {
                enigo.scroll(delta_x, Axis::Horizontal).map_err(transient)?;
            }
            if delta_y != 0 {
                enigo.scroll(delta_y, Axis::Vertical).map_err(transient)?;
            }
            Ok(())
        }
    }
}

fn map_key(key: Key) -> Result<EKey, InputError> {
    let mapped = match key {
        Key::Char(c) => EKey::Unicode(c),
        Key::Function(n) => map_function_key(n)?,
        Key::Return => EKey::Return,
        Key::Escape => EKey::Escape,
        Key::Backspace => EKey::Backspace,
        Key::Tab => EKey::Tab,
        Key::Space => EKey::Space,
        Key::Delete => EKey::Delete,
        Key::Home => EKey::Home,
        Key::End => EKey::End,
        Key::PageUp => EKey::PageUp,
        Key::PageDown => EKey::PageDown,
        Key::Up => EKey::UpArrow,
        Key::Down => EKey::DownArrow,
        Key::Left => EKey::LeftArrow,
        Key::Right => EKey::RightArrow,
        Key::Shift => EKey::Shift,
        Key::Control => EKey::Control,
        Key::Alt => EKey::Alt,
        Key::Meta => EKey::Meta,
        Key::CapsLock => EKey::CapsLock,
        Key::Raw(code) => EKey::Other(code),
    };
    Ok(mapped)
}

fn map_function_key(n: u8) -> Result<EKey, InputError> {
    let key = match n {
        1 => EKey::F1,
        2 => EKey::F2,
        3 => EKey::F3,
        4 => EKey::F4,
        5 => EKey::F5,
        6 => EKey::F6,
        7 => EKey::F7,
        8 => EKey::F8,
        9 => EKey::F9,
        10 => EKey::F10,
        11 => EKey::F11,
        12 => EKey::F12,
        13 => EKey::F13,
        14 => EKey::F14,
        15 => EKey::F15,
        16 => EKey::F16,
        17 => EKey::F17,
        18 => EKey::F18,
        19 => EKey::F19,
        20 => EKey::F20,
        other => {
            return Err(InputError::Unavailable(format!(
                "F{other} cannot be injected on this platform"
            )));
        }
    };
    Ok(key)
}

fn map_mouse_button(btn: MouseButton) -> EButton {
    match btn {
        MouseButton::Left => EButton::Left,
        MouseButton::Middle => EButton::Middle,
        MouseButton::Right => EButton::Right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_never_touches_the_os() {
        let replayer = EnigoReplayer::new(true).unwrap();
        assert!(replayer.is_dry_run());
        replayer
            .send(&InputAction::KeyDown { key: Key::Char('a') }, Scale::IDENTITY)
            .unwrap();
        assert_eq!(replayer.check_permission(), PermissionStatus::Granted);
    }

    #[test]
    fn scaling_applies_to_mouse_only() {
        let scale = Scale {
            factor_x: 2.0,
            factor_y: 3.0,
            offset_x: 1,
            offset_y: 1,
        };
        assert_eq!(
            scaled(InputAction::MouseDown { button: MouseButton::Left, x: 2, y: 2 }, scale),
            InputAction::MouseDown { button: MouseButton::Left, x: 5, y: 7 }
        );
        let key = InputAction::KeyUp { key: Key::Tab };
        assert_eq!(scaled(key, scale), key);
    }

    #[test]
    fn keys_map_to_enigo() {
        assert!(matches!(map_key(Key::Char('q')), Ok(EKey::Unicode('q'))));
        assert!(matches!(map_key(Key::Function(12)), Ok(EKey::F12)));
        assert!(map_key(Key::Function(40)).is_err());
        assert!(matches!(map_key(Key::Raw(57)), Ok(EKey::Other(57))));
    }
}
