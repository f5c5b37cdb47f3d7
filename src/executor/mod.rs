#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/*!
Executor module for autoreplay.

This module wires together:
- `context`: the per-run `ExecutionContext` (variables, parameters, templates,
  options, progress sink) and the shared `ExecutionControl` handle
- `result`: statuses and the `ExecutionResult` / `ActionResult` records
- `runtime`: `ExecutionEngine`, the interpreter driving replay and recognition

Typical usage:
- Build an `ExecutionEngine` from an `InputReplayer` and a `RecognitionEngine`.
- Call `execute` (or `execute_script`) with a context; use `pause`, `resume`
  and `cancel` from another task while it runs.

Example:
```no_run
use std::sync::Arc;
use std::time::Duration;
use autoreplay::executor::{ExecutionContext, ExecutionEngine};
use autoreplay::model::{ActionSequence, GameAction, Key};
use autoreplay::replay::MemoryReplayer;
use autoreplay::vision::{RecognitionEngine, ScreenCapture, TemplateMatcher};

# async fn demo() {
let recognition = RecognitionEngine::new(
    Arc::new(ScreenCapture::new()),
    TemplateMatcher::default(),
    Duration::from_millis(100),
);
let engine = ExecutionEngine::new(Arc::new(MemoryReplayer::new()), recognition);
let sequence = ActionSequence::new(vec![
    GameAction::key_down(Key::Char('a'), 0),
    GameAction::key_up(Key::Char('a'), 50),
]);
let result = engine.execute(&sequence, &mut ExecutionContext::default()).await;
println!("{:?}", result.status);
# }
```
*/

pub mod context;
pub mod result;
pub mod runtime;

// Re-exports for convenient access from `autoreplay::executor::*`
pub use context::{ExecutionContext, ExecutionControl, ExecutionOptions, ExecutionProgress, ProgressSink};
pub use result::{ActionResult, ActionStatus, ExecutionResult, ExecutionStatus};
pub use runtime::ExecutionEngine;
