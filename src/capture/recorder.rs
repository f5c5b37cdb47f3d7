use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info};

use super::{CaptureStats, EventFilter, InputEvent, InputEventKind, InputEventSource};
use crate::config::CaptureConfig;
use crate::error::InputError;
use crate::model::{ActionKind, ActionSequence};

/// Records one capture session into an [`ActionSequence`].
pub struct Recorder {
    source: Box<dyn InputEventSource>,
    config: CaptureConfig,
    events: Arc<Mutex<Vec<InputEvent>>>,
    started_at: Option<Instant>,
    last_stats: CaptureStats,
}

impl Recorder {
    pub fn new(source: Box<dyn InputEventSource>, config: CaptureConfig) -> Self {
        Self {
            source,
            config,
            events: Arc::new(Mutex::new(Vec::new())),
            started_at: None,
            last_stats: CaptureStats::default(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }

    /// Counters of the most recently finished session.
    pub fn last_stats(&self) -> CaptureStats {
        self.last_stats
    }

    pub fn start(&mut self) -> Result<(), InputError> {
        if self.is_recording() {
            return Err(InputError::AlreadyActive);
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let sink = Arc::clone(&self.events);
        let started_at = Instant::now();
        self.source.start(
            EventFilter::from_config(&self.config),
            Box::new(move |event| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(event);
            }),
        )?;
        self.started_at = Some(started_at);
        info!(target: "autoreplay::capture", source = self.source.name(), "recording started");
        Ok(())
    }

    /// Stop the session and convert what was captured.
    pub fn stop(&mut self) -> Result<ActionSequence, InputError> {
        let started_at = self.started_at.take().ok_or(InputError::NotActive)?;
        self.last_stats = self.source.stop()?;
        let events = std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner));
        let sequence = sequence_from_events(&events, started_at, &self.config);
        info!(
            target: "autoreplay::capture",
            events = events.len(),
            actions = sequence.len(),
            duration_ms = sequence.total_duration().as_millis() as u64,
            "recording stopped"
        );
        Ok(sequence)
    }
}

/// Convert captured events into actions.
///
/// Timestamps become elapsed milliseconds since `started_at` and then per-action
/// delays. Ignored keys are skipped and pointer moves closer together than
/// `mouse_move_interval_ms` are thinned out.
pub fn sequence_from_events(
    events: &[InputEvent],
    started_at: Instant,
    config: &CaptureConfig,
) -> ActionSequence {
    let filter = EventFilter::from_config(config);
    let mut last_move: Option<Instant> = None;
    let mut skipped_moves = 0usize;

    let timeline = events.iter().filter_map(|event| {
        if !filter.allows(&event.kind) {
            return None;
        }
        if let InputEventKind::MouseMove { .. } = event.kind {
            let too_soon = last_move.is_some_and(|prev| {
                event.at.saturating_duration_since(prev).as_millis() < u128::from(config.mouse_move_interval_ms)
            });
            if too_soon {
                skipped_moves += 1;
                return None;
            }
            last_move = Some(event.at);
        }
        let elapsed = event.at.saturating_duration_since(started_at).as_millis() as u64;
        Some((elapsed, to_action_kind(event.kind)))
    });
    let sequence = ActionSequence::from_timeline(timeline.collect::<Vec<_>>());
    if skipped_moves > 0 {
        debug!(target: "autoreplay::capture", skipped_moves, "throttled pointer moves");
    }
    sequence
}

fn to_action_kind(kind: InputEventKind) -> ActionKind {
    match kind {
        InputEventKind::KeyPress { key } => ActionKind::KeyDown { key },
        InputEventKind::KeyRelease { key } => ActionKind::KeyUp { key },
        InputEventKind::ButtonPress { button, x, y } => ActionKind::MouseDown { button, x, y },
        InputEventKind::ButtonRelease { button, x, y } => ActionKind::MouseUp { button, x, y },
        InputEventKind::MouseMove { x, y } => ActionKind::MouseMove { x, y },
        InputEventKind::Wheel { delta_x, delta_y } => ActionKind::MouseWheel { delta_x, delta_y },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::EventHandler;
    use crate::model::{Key, MouseButton};
    use std::time::Duration;

    /// Source that plays a canned list of events into the handler on `start`.
    struct Canned {
        events: Vec<InputEvent>,
        active: bool,
    }

    impl InputEventSource for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn start(&mut self, filter: EventFilter, mut handler: EventHandler) -> Result<(), InputError> {
            if self.active {
                return Err(InputError::AlreadyActive);
            }
            self.active = true;
            for event in &self.events {
                if filter.allows(&event.kind) {
                    handler(*event);
                }
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<CaptureStats, InputError> {
            if !self.active {
                return Err(InputError::NotActive);
            }
            self.active = false;
            Ok(CaptureStats {
                delivered: self.events.len() as u64,
                ..CaptureStats::default()
            })
        }

        fn is_active(&self) -> bool {
            self.active
        }
    }

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn events_become_delta_encoded_actions() {
        let t0 = Instant::now();
        let events = [
            InputEvent::new(InputEventKind::KeyPress { key: Key::Char('a') }, at(t0, 10)),
            InputEvent::new(InputEventKind::KeyRelease { key: Key::Char('a') }, at(t0, 60)),
            InputEvent::new(
                InputEventKind::ButtonPress {
                    button: MouseButton::Right,
                    x: 4,
                    y: 5,
                },
                at(t0, 100),
            ),
        ];
        let seq = sequence_from_events(&events, t0, &CaptureConfig::default());
        let delays: Vec<_> = seq.iter().map(|a| a.delay_ms()).collect();
        assert_eq!(delays, vec![10, 50, 40]);
        assert_eq!(seq.elapsed_offsets(), vec![10, 60, 100]);
        assert_eq!(
            seq.get(2).unwrap().kind(),
            &ActionKind::MouseDown {
                button: MouseButton::Right,
                x: 4,
                y: 5
            }
        );
    }

    #[test]
    fn pointer_moves_are_throttled_and_ignored_keys_skipped() {
        let t0 = Instant::now();
        let config = CaptureConfig {
            mouse_move_interval_ms: 20,
            ignored_keys: vec![Key::Function(12)],
            ..CaptureConfig::default()
        };
        let events = [
            InputEvent::new(InputEventKind::MouseMove { x: 1, y: 1 }, at(t0, 0)),
            InputEvent::new(InputEventKind::MouseMove { x: 2, y: 2 }, at(t0, 5)),
            InputEvent::new(InputEventKind::MouseMove { x: 3, y: 3 }, at(t0, 25)),
            InputEvent::new(InputEventKind::KeyPress { key: Key::Function(12) }, at(t0, 30)),
        ];
        let seq = sequence_from_events(&events, t0, &config);
        let kinds: Vec<_> = seq.iter().map(|a| a.kind().clone()).collect();
        assert_eq!(
            kinds,
            vec![ActionKind::MouseMove { x: 1, y: 1 }, ActionKind::MouseMove { x: 3, y: 3 }]
        );
        assert_eq!(seq.total_duration(), Duration::from_millis(25));
    }

    #[test]
    fn recorder_session_lifecycle() {
        let t0 = Instant::now() + Duration::from_millis(5);
        let source = Canned {
            events: vec![
                InputEvent::new(InputEventKind::KeyPress { key: Key::Space }, t0),
                InputEvent::new(InputEventKind::KeyRelease { key: Key::Space }, at(t0, 30)),
            ],
            active: false,
        };
        let mut recorder = Recorder::new(Box::new(source), CaptureConfig::default());
        assert_eq!(recorder.stop().unwrap_err(), InputError::NotActive);

        recorder.start().unwrap();
        assert!(recorder.is_recording());
        assert_eq!(recorder.start().unwrap_err(), InputError::AlreadyActive);

        let seq = recorder.stop().unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.get(1).unwrap().delay_ms(), 30);
        assert_eq!(recorder.last_stats().delivered, 2);
        assert!(!recorder.is_recording());
    }
}
