use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, TrySendError};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rdev::{Button, EventType, Key as RdevKey};
use tracing::{debug, info, warn};

use super::{CaptureStats, EventFilter, EventHandler, InputEvent, InputEventKind, InputEventSource};
use crate::error::InputError;
use crate::model::{Key, MouseButton};

/// How long `start` waits for the listener to fail before assuming it is installed.
const INSTALL_GRACE: Duration = Duration::from_millis(250);

/// State shared between the OS callback and the owning source.
///
/// The rdev listener cannot be removed once installed, so it lives for the rest
/// of the process and forwards events only while `active` is set.
#[derive(Default)]
struct Shared {
    active: AtomicBool,
    slot: Mutex<Option<mpsc::SyncSender<InputEvent>>>,
    dropped: AtomicU64,
    installed: AtomicBool,
    failure: Mutex<Option<String>>,
}

static SHARED: OnceLock<Shared> = OnceLock::new();

fn shared() -> &'static Shared {
    SHARED.get_or_init(Shared::default)
}

/// Global keyboard and mouse hook backed by rdev.
pub struct HookEventSource {
    queue_capacity: usize,
    consumer: Option<JoinHandle<(u64, u64)>>,
}

impl Default for HookEventSource {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl HookEventSource {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            consumer: None,
        }
    }
}

impl InputEventSource for HookEventSource {
    fn name(&self) -> &'static str {
        "rdev"
    }

    fn start(&mut self, filter: EventFilter, handler: EventHandler) -> Result<(), InputError> {
        let shared = shared();
        if shared
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InputError::AlreadyActive);
        }

        let (tx, rx) = mpsc::sync_channel(self.queue_capacity);
        *shared.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        shared.dropped.store(0, Ordering::Relaxed);

        if let Err(e) = install(shared) {
            deactivate(shared);
            return Err(e);
        }

        let spawned = thread::Builder::new()
            .name("autoreplay-capture".into())
            .spawn(move || consume(rx, &filter, handler));
        match spawned {
            Ok(handle) => {
                self.consumer = Some(handle);
                info!(
                    target: "autoreplay::capture",
                    capacity = self.queue_capacity,
                    "input hook listening"
                );
                Ok(())
            }
            Err(e) => {
                deactivate(shared);
                Err(InputError::Unavailable(format!(
                    "failed to spawn capture consumer: {e}"
                )))
            }
        }
    }

    fn stop(&mut self) -> Result<CaptureStats, InputError> {
        let consumer = self.consumer.take().ok_or(InputError::NotActive)?;
        let shared = shared();
        deactivate(shared);
        let (delivered, filtered) = consumer
            .join()
            .map_err(|_| InputError::Unavailable("capture consumer panicked".into()))?;
        let dropped = shared.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            warn!(target: "autoreplay::capture", dropped, "hook queue overflowed; events were lost");
        }
        let stats = CaptureStats {
            delivered,
            filtered,
            dropped,
        };
        info!(target: "autoreplay::capture", ?stats, "input hook stopped");
        Ok(stats)
    }

    fn is_active(&self) -> bool {
        self.consumer.is_some()
    }
}

impl Drop for HookEventSource {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            let _ = self.stop();
        }
    }
}

/// Close the hand-off queue, which ends the consumer once it has drained.
fn deactivate(shared: &Shared) {
    shared.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    shared.active.store(false, Ordering::Release);
}

/// Start the process-wide listener thread unless it is already running.
fn install(shared: &'static Shared) -> Result<(), InputError> {
    if shared.installed.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    shared
        .failure
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();

    thread::Builder::new()
        .name("autoreplay-hook".into())
        .spawn(move || {
            let mut pointer = (0, 0);
            let outcome = rdev::listen(move |event| forward(shared, &event.event_type, &mut pointer));
            if let Err(e) = outcome {
                *shared.failure.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(format!("{e:?}"));
            }
            shared.installed.store(false, Ordering::Release);
        })
        .map_err(|e| {
            shared.installed.store(false, Ordering::Release);
            InputError::Unavailable(format!("failed to spawn hook thread: {e}"))
        })?;

    // `listen` blocks for good on success and returns quickly on failure.
    let deadline = Instant::now() + INSTALL_GRACE;
    while Instant::now() < deadline {
        let failure = shared
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reason) = failure {
            debug!(target: "autoreplay::capture", %reason, "hook installation failed");
            return Err(InputError::from_backend_message(reason));
        }
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

/// Runs inside the OS callback: convert, stamp, enqueue. Never blocks.
fn forward(shared: &Shared, event: &EventType, pointer: &mut (i32, i32)) {
    let at = Instant::now();
    if let EventType::MouseMove { x, y } = *event {
        *pointer = (x.round() as i32, y.round() as i32);
    }
    if !shared.active.load(Ordering::Acquire) {
        return;
    }
    let Some(kind) = convert(event, *pointer) else {
        return;
    };
    let Ok(slot) = shared.slot.try_lock() else {
        shared.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };
    if let Some(tx) = slot.as_ref() {
        if let Err(TrySendError::Full(_)) = tx.try_send(InputEvent::new(kind, at)) {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Consumer thread body; returns `(delivered, filtered)`.
fn consume(rx: Receiver<InputEvent>, filter: &EventFilter, mut handler: EventHandler) -> (u64, u64) {
    let (mut delivered, mut filtered) = (0u64, 0u64);
    for event in rx {
        if filter.allows(&event.kind) {
            handler(event);
            delivered += 1;
        } else {
            filtered += 1;
        }
    }
    (delivered, filtered)
}

fn convert(event: &EventType, pointer: (i32, i32)) -> Option<InputEventKind> {
    let (x, y) = pointer;
    let kind = match *event {
        EventType::KeyPress(key) => InputEventKind::KeyPress { key: map_key(key)? },
        EventType::KeyRelease(key) => InputEventKind::KeyRelease { key: map_key(key)? },
        EventType::ButtonPress(button) => InputEventKind::ButtonPress {
            button: map_button(button)?,
            x,
            y,
        },
        EventType::ButtonRelease(button) => InputEventKind::ButtonRelease {
            button: map_button(button)?,
            x,
            y,
        },
        EventType::MouseMove { .. } => InputEventKind::MouseMove { x, y },
        EventType::Wheel { delta_x, delta_y } => InputEventKind::Wheel {
            delta_x: delta_x as i32,
            delta_y: delta_y as i32,
        },
    };
    Some(kind)
}

fn map_button(button: Button) -> Option<MouseButton> {
    match button {
        Button::Left => Some(MouseButton::Left),
        Button::Middle => Some(MouseButton::Middle),
        Button::Right => Some(MouseButton::Right),
        Button::Unknown(_) => None,
    }
}

fn map_key(key: RdevKey) -> Option<Key> {
    let mapped = match key {
        RdevKey::KeyA => Key::Char('a'),
        RdevKey::KeyB => Key::Char('b'),
        RdevKey::KeyC => Key::Char('c'),
        RdevKey::KeyD => Key::Char('d'),
        RdevKey::KeyE => Key::Char('e'),
        RdevKey::KeyF => Key::Char('f'),
        RdevKey::KeyG => Key::Char('g'),
        RdevKey::KeyH => Key::Char('h'),
        RdevKey::KeyI => Key::Char('i'),
        RdevKey::KeyJ => Key::Char('j'),
        RdevKey::KeyK => Key::Char('k'),
        RdevKey::KeyL => Key::Char('l'),
        RdevKey::KeyM => Key::Char('m'),
        RdevKey::KeyN => Key::Char('n'),
        RdevKey::KeyO => Key::Char('o'),
        RdevKey::KeyP => Key::Char('p'),
        RdevKey::KeyQ => Key::Char('q'),
        RdevKey::KeyR => Key::Char('r'),
        RdevKey::KeyS => Key::Char('s'),
        RdevKey::KeyT => Key::Char('t'),
        RdevKey::KeyU => Key::Char('u'),
        RdevKey::KeyV => Key::Char('v'),
        RdevKey::KeyW => Key::Char('w'),
        RdevKey::KeyX => Key::Char('x'),
        RdevKey::KeyY => Key::Char('y'),
        RdevKey::KeyZ => Key::Char('z'),
        RdevKey::Num0 | RdevKey::Kp0 => Key::Char('0'),
        RdevKey::Num1 | RdevKey::Kp1 => Key::Char('1'),
        RdevKey::Num2 | RdevKey::Kp2 => Key::Char('2'),
        RdevKey::Num3 | RdevKey::Kp3 => Key::Char('3'),
        RdevKey::Num4 | RdevKey::Kp4 => Key::Char('4'),
        RdevKey::Num5 | RdevKey::Kp5 => Key::Char('5'),
        RdevKey::Num6 | RdevKey::Kp6 => Key::Char('6'),
        RdevKey::Num7 | RdevKey::Kp7 => Key::Char('7'),
        RdevKey::Num8 | RdevKey::Kp8 => Key::Char('8'),
        RdevKey::Num9 | RdevKey::Kp9 => Key::Char('9'),
        RdevKey::BackQuote => Key::Char('`'),
        RdevKey::Minus | RdevKey::KpMinus => Key::Char('-'),
        RdevKey::Equal => Key::Char('='),
        RdevKey::KpPlus => Key::Char('+'),
        RdevKey::KpMultiply => Key::Char('*'),
        RdevKey::KpDivide | RdevKey::Slash => Key::Char('/'),
        RdevKey::LeftBracket => Key::Char('['),
        RdevKey::RightBracket => Key::Char(']'),
        RdevKey::SemiColon => Key::Char(';'),
        RdevKey::Quote => Key::Char('\''),
        RdevKey::BackSlash | RdevKey::IntlBackslash => Key::Char('\\'),
        RdevKey::Comma => Key::Char(','),
        RdevKey::Dot => Key::Char('.'),
        RdevKey::F1 => Key::Function(1),
        RdevKey::F2 => Key::Function(2),
        RdevKey::F3 => Key::Function(3),
        RdevKey::F4 => Key::Function(4),
        RdevKey::F5 => Key::Function(5),
        RdevKey::F6 => Key::Function(6),
        RdevKey::F7 => Key::Function(7),
        RdevKey::F8 => Key::Function(8),
        RdevKey::F9 => Key::Function(9),
        RdevKey::F10 => Key::Function(10),
        RdevKey::F11 => Key::Function(11),
        RdevKey::F12 => Key::Function(12),
        RdevKey::Return | RdevKey::KpReturn => Key::Return,
        RdevKey::Escape => Key::Escape,
        RdevKey::Backspace => Key::Backspace,
        RdevKey::Tab => Key::Tab,
        RdevKey::Space => Key::Space,
        RdevKey::Delete | RdevKey::KpDelete => Key::Delete,
        RdevKey::Home => Key::Home,
        RdevKey::End => Key::End,
        RdevKey::PageUp => Key::PageUp,
        RdevKey::PageDown => Key::PageDown,
        RdevKey::UpArrow => Key::Up,
        RdevKey::DownArrow => Key::Down,
        RdevKey::LeftArrow => Key::Left,
        RdevKey::RightArrow => Key::Right,
        RdevKey::ShiftLeft | RdevKey::ShiftRight => Key::Shift,
        RdevKey::ControlLeft | RdevKey::ControlRight => Key::Control,
        RdevKey::Alt | RdevKey::AltGr => Key::Alt,
        RdevKey::MetaLeft | RdevKey::MetaRight => Key::Meta,
        RdevKey::CapsLock => Key::CapsLock,
        RdevKey::Unknown(code) => Key::Raw(code),
        // Insert, PrintScreen, ScrollLock, Pause, NumLock, Function
        _ => return None,
    };
    Some(mapped)
}
