use std::sync::Arc;
use std::time::{Duration, Instant};

use autoreplay::capture::{InputEvent, InputEventKind, sequence_from_events};
use autoreplay::config::{self, CaptureConfig};
use autoreplay::executor::{ExecutionContext, ExecutionEngine, ExecutionStatus};
use autoreplay::model::{ActionKind, Key, Script};
use autoreplay::replay::{InputAction, MemoryReplayer};
use autoreplay::vision::{RecognitionEngine, StaticSampler, TemplateMatcher};
use image::{Rgba, RgbaImage};

fn engine(replayer: Arc<MemoryReplayer>) -> ExecutionEngine {
    let recognition = RecognitionEngine::new(
        Arc::new(StaticSampler::from_image(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])))),
        TemplateMatcher::default(),
        Duration::from_millis(10),
    );
    ExecutionEngine::new(replayer, recognition)
}

#[tokio::test]
async fn recorded_tap_survives_save_load_and_replays_in_order() {
    let start = Instant::now();
    let events = [
        InputEvent::new(InputEventKind::KeyPress { key: Key::Char('a') }, start),
        InputEvent::new(
            InputEventKind::KeyRelease { key: Key::Char('a') },
            start + Duration::from_millis(50),
        ),
    ];
    let sequence = sequence_from_events(&events, start, &CaptureConfig::default());
    assert_eq!(sequence.len(), 2);
    assert_eq!(sequence.get(1).map(|a| a.delay_ms()), Some(50));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tap.json");
    config::save_script_to_path(&Script::new("tap", sequence.clone()), &path).unwrap();
    let loaded = config::load_script_from_path(&path, 32).unwrap();
    assert_eq!(loaded.actions, sequence);
    assert!(matches!(
        loaded.actions.get(0).map(|a| a.kind()),
        Some(ActionKind::KeyDown { key: Key::Char('a') })
    ));

    let replayer = Arc::new(MemoryReplayer::new());
    let engine = engine(replayer.clone());
    let mut ctx = ExecutionContext::default();
    let result = engine.execute_script(&loaded, &mut ctx).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.actions_executed, 2);
    let sent = replayer.sent();
    assert_eq!(
        sent.iter().map(|s| s.action).collect::<Vec<_>>(),
        vec![
            InputAction::KeyDown { key: Key::Char('a') },
            InputAction::KeyUp { key: Key::Char('a') },
        ]
    );
    assert!(sent[1].at - sent[0].at >= Duration::from_millis(50));
}

#[tokio::test]
async fn cancel_from_another_task_stops_a_long_wait() {
    let sequence = autoreplay::model::ActionSequence::new(vec![
        autoreplay::model::GameAction::key_down(Key::Char('x'), 0),
        autoreplay::model::GameAction::key_up(Key::Char('x'), 10_000),
    ]);
    let replayer = Arc::new(MemoryReplayer::new());
    let engine = engine(replayer.clone());

    let handle = engine.spawn(sequence, ExecutionContext::default());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.cancel());

    let started = Instant::now();
    let (result, _ctx) = handle.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert_eq!(result.actions_executed, 1);
    // the held key is released on the way out
    assert_eq!(
        replayer.actions().last(),
        Some(&InputAction::KeyUp { key: Key::Char('x') })
    );
}
