use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::context::{ExecutionContext, ExecutionControl, ExecutionProgress};
use super::result::{ActionResult, ActionStatus, ExecutionResult, ExecutionStatus};
use crate::model::{
    ActionId, ActionKind, ActionSequence, Condition, GameAction, ImageTemplate, Key, MouseButton,
    RecognitionResult, Rect, Script,
};
use crate::replay::{InputAction, InputReplayer, Scale};
use crate::utils::interpolation::interpolate;
use crate::vision::{RecognitionEngine, WaitOutcome};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Interprets action sequences against an input replayer and a recognition engine.
///
/// Clones share the same control handle, so at most one execution runs per
/// engine family at any time.
#[derive(Clone)]
pub struct ExecutionEngine {
    replayer: Arc<dyn InputReplayer>,
    recognition: RecognitionEngine,
    control: ExecutionControl,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("replayer", &self.replayer.name())
            .field("recognition", &self.recognition)
            .field("status", &self.control.status())
            .finish()
    }
}

impl ExecutionEngine {
    pub fn new(replayer: Arc<dyn InputReplayer>, recognition: RecognitionEngine) -> Self {
        Self {
            replayer,
            recognition,
            control: ExecutionControl::default(),
        }
    }

    pub fn control(&self) -> &ExecutionControl {
        &self.control
    }

    pub fn recognition(&self) -> &RecognitionEngine {
        &self.recognition
    }

    pub fn replayer(&self) -> &Arc<dyn InputReplayer> {
        &self.replayer
    }

    pub fn status(&self) -> ExecutionStatus {
        self.control.status()
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Run `sequence` once.
    pub async fn execute(&self, sequence: &ActionSequence, ctx: &mut ExecutionContext) -> ExecutionResult {
        self.run(sequence, Repeat::Times(1), ctx).await
    }

    /// Run a script, honouring its repeat count or loop flag.
    pub async fn execute_script(&self, script: &Script, ctx: &mut ExecutionContext) -> ExecutionResult {
        if let Err(e) = script.validate(ctx.options.max_depth) {
            return ExecutionResult::rejected(format!("invalid script: {e}"));
        }
        info!(target: "autoreplay::executor", script = %script.name, "Starting script");
        let repeat = if script.loop_forever {
            Repeat::Forever
        } else {
            Repeat::Times(script.repeat_count)
        };
        self.run(&script.actions, repeat, ctx).await
    }

    /// Run on a separate tokio task; the context comes back with the result.
    pub fn spawn(
        &self,
        sequence: ActionSequence,
        mut ctx: ExecutionContext,
    ) -> JoinHandle<(ExecutionResult, ExecutionContext)> {
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.execute(&sequence, &mut ctx).await;
            (result, ctx)
        })
    }

    async fn run(&self, sequence: &ActionSequence, repeat: Repeat, ctx: &mut ExecutionContext) -> ExecutionResult {
        let started = Instant::now();

        if let Err(e) = ctx.options.validate() {
            return ExecutionResult::rejected(e.to_string());
        }
        if let Err(e) = sequence.validate(ctx.options.max_depth) {
            return ExecutionResult::rejected(format!("invalid sequence: {e}"));
        }

        let token = ctx.cancellation_token().child_token();
        let Some(_guard) = self.control.begin(token.clone()) else {
            warn!(target: "autoreplay::executor", "Rejected execution: engine busy");
            return ExecutionResult::rejected("another execution is already running");
        };

        let timeout = ctx.options.timeout;
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = timeout.map(|limit| {
            let token = token.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        timed_out.store(true, Ordering::Release);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        info!(
            target: "autoreplay::executor",
            actions = sequence.len(),
            total_ms = sequence.total_duration().as_millis() as u64,
            replayer = self.replayer.name(),
            "Starting execution"
        );

        let mut run = Run {
            engine: self,
            ctx,
            cancel: token.clone(),
            held_keys: Vec::new(),
            held_buttons: Vec::new(),
            iteration: 0,
        };

        let mut results = Vec::new();
        let mut iterations = 0u32;
        let flow = loop {
            let (mut batch, outcome) = run.run_sequence(sequence, 0).await;
            results.append(&mut batch);
            if !matches!(outcome, Flow::Continue) {
                break outcome;
            }
            iterations += 1;
            run.iteration = iterations;
            let more = match repeat {
                Repeat::Times(n) => iterations < n,
                Repeat::Forever => !sequence.is_empty(),
            };
            if !more {
                break Flow::Continue;
            }
        };

        run.release_held().await;
        if let Some(timer) = timer {
            timer.abort();
        }

        let mut result = match flow {
            Flow::Continue => ExecutionResult::new(ExecutionStatus::Completed, results),
            Flow::Abort { action_id, message } => {
                let mut r = ExecutionResult::new(ExecutionStatus::Failed, results);
                r.failed_action = Some(action_id);
                r.message = Some(message);
                r
            }
            Flow::Interrupted if timed_out.load(Ordering::Acquire) => {
                let mut r = ExecutionResult::new(ExecutionStatus::Timeout, results);
                let limit = timeout.unwrap_or_default().as_millis();
                r.message = Some(format!("timed out after {limit} ms"));
                r
            }
            Flow::Interrupted => {
                let mut r = ExecutionResult::new(ExecutionStatus::Cancelled, results);
                r.message = Some("cancelled".into());
                r
            }
        };
        result.iterations = iterations;
        result.duration = started.elapsed();
        self.control.set_status(result.status);

        info!(
            target: "autoreplay::executor",
            status = ?result.status,
            executed = result.actions_executed,
            failed = result.actions_failed,
            skipped = result.actions_skipped,
            elapsed_ms = result.duration.as_millis() as u64,
            "Execution finished"
        );
        result
    }
}

#[derive(Debug, Clone, Copy)]
enum Repeat {
    Times(u32),
    Forever,
}

/// How a (sub)sequence ended.
#[derive(Debug)]
enum Flow {
    Continue,
    Abort { action_id: ActionId, message: String },
    Interrupted,
}

/// Result of dispatching one action body.
enum Dispatch {
    Done {
        children: Vec<ActionResult>,
        recognition: Option<RecognitionResult>,
    },
    Failed {
        message: String,
        children: Vec<ActionResult>,
        recognition: Option<RecognitionResult>,
    },
    Interrupted {
        children: Vec<ActionResult>,
    },
}

impl Dispatch {
    fn done() -> Self {
        Dispatch::Done {
            children: Vec::new(),
            recognition: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Dispatch::Failed {
            message: message.into(),
            children: Vec::new(),
            recognition: None,
        }
    }
}

enum ConditionError {
    Interrupted,
    Failed(String),
}

/// State of one in-flight execution.
struct Run<'a> {
    engine: &'a ExecutionEngine,
    ctx: &'a mut ExecutionContext,
    cancel: CancellationToken,
    held_keys: Vec<Key>,
    held_buttons: Vec<(MouseButton, i32, i32)>,
    iteration: u32,
}

impl Run<'_> {
    fn run_sequence<'s>(
        &'s mut self,
        sequence: &'s ActionSequence,
        depth: usize,
    ) -> BoxFuture<'s, (Vec<ActionResult>, Flow)> {
        Box::pin(async move {
            let total = sequence.len();
            let mut results = Vec::with_capacity(total);
            for (index, action) in sequence.iter().enumerate() {
                let Some(result) = self.run_action(index, action, depth).await else {
                    return (results, Flow::Interrupted);
                };
                let status = result.status;
                let message = result.message.clone();
                results.push(result);

                if depth == 0 {
                    self.ctx.report(ExecutionProgress {
                        current: index + 1,
                        total,
                        iteration: self.iteration,
                        action_id: action.id(),
                        status,
                    });
                }

                match status {
                    ActionStatus::Cancelled => return (results, Flow::Interrupted),
                    ActionStatus::Failed if !self.ctx.options.continue_on_error => {
                        let message = format!(
                            "action {index} ({}) failed: {}",
                            action.label(),
                            message.unwrap_or_default()
                        );
                        return (
                            results,
                            Flow::Abort {
                                action_id: action.id(),
                                message,
                            },
                        );
                    }
                    _ => {}
                }
            }
            (results, Flow::Continue)
        })
    }

    /// `None` when cancellation was observed before the action began.
    async fn run_action(&mut self, index: usize, action: &GameAction, depth: usize) -> Option<ActionResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let started = Instant::now();
        let iteration = self.iteration;
        let finish = |status, message: Option<String>, children, recognition| ActionResult {
            action_id: action.id(),
            label: action.label().to_string(),
            index,
            iteration,
            status,
            message,
            duration: started.elapsed(),
            recognition,
            children,
        };

        if let Some(guard) = action.guard() {
            match self.evaluate(guard).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(target: "autoreplay::executor", index, depth, label = action.label(), "Guard false, skipping");
                    return Some(finish(ActionStatus::Skipped, None, Vec::new(), None));
                }
                Err(ConditionError::Interrupted) => return None,
                Err(ConditionError::Failed(message)) => {
                    return Some(finish(
                        ActionStatus::Failed,
                        Some(format!("guard: {message}")),
                        Vec::new(),
                        None,
                    ));
                }
            }
        }

        if self.wait_while_paused().await {
            return None;
        }
        let delay = self.scaled_delay(action.delay_ms());
        if !delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Some(finish(ActionStatus::Cancelled, Some("interrupted during delay".into()), Vec::new(), None));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.ctx.options.log_actions {
            info!(target: "autoreplay::executor", index, depth, action_id = %action.id(), label = action.label(), "Executing action");
        } else {
            trace!(target: "autoreplay::executor", index, depth, action_id = %action.id(), label = action.label(), "Executing action");
        }

        let result = match self.dispatch(action.kind(), depth).await {
            Dispatch::Done { children, recognition } => {
                finish(ActionStatus::Succeeded, None, children, recognition)
            }
            Dispatch::Failed {
                message,
                children,
                recognition,
            } => {
                warn!(target: "autoreplay::executor", index, depth, label = action.label(), %message, "Action failed");
                finish(ActionStatus::Failed, Some(message), children, recognition)
            }
            Dispatch::Interrupted { children } => finish(
                ActionStatus::Cancelled,
                Some("interrupted".into()),
                children,
                None,
            ),
        };
        Some(result)
    }

    async fn dispatch(&mut self, kind: &ActionKind, depth: usize) -> Dispatch {
        match kind {
            ActionKind::Delay => Dispatch::done(),

            ActionKind::SetVariable { name, value } => {
                let value = interpolate(value, &self.ctx.variables, &self.ctx.parameters);
                trace!(target: "autoreplay::executor", key = %name, value = %value, "SetVariable");
                self.ctx.variables.insert(name.clone(), value);
                Dispatch::done()
            }

            ActionKind::FindImage {
                template,
                region,
                timeout_ms,
                click,
                store_as,
                required,
            } => {
                self.find_image(template, *region, *timeout_ms, *click, store_as.as_deref(), *required)
                    .await
            }

            ActionKind::Loop { body, count, until } => {
                let mut children = Vec::new();
                for pass in 0..*count {
                    if let Some(until) = until {
                        match self.evaluate(until).await {
                            Ok(true) => {
                                debug!(target: "autoreplay::executor", pass, "Loop exit condition met");
                                break;
                            }
                            Ok(false) => {}
                            Err(ConditionError::Interrupted) => return Dispatch::Interrupted { children },
                            Err(ConditionError::Failed(message)) => {
                                return Dispatch::Failed {
                                    message: format!("loop condition: {message}"),
                                    children,
                                    recognition: None,
                                };
                            }
                        }
                    }
                    let (mut results, flow) = self.run_sequence(body, depth + 1).await;
                    children.append(&mut results);
                    match flow {
                        Flow::Continue => {}
                        Flow::Abort { message, .. } => {
                            return Dispatch::Failed {
                                message: format!("loop pass {pass}: {message}"),
                                children,
                                recognition: None,
                            };
                        }
                        Flow::Interrupted => return Dispatch::Interrupted { children },
                    }
                }
                Dispatch::Done {
                    children,
                    recognition: None,
                }
            }

            ActionKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let branch = match self.evaluate(condition).await {
                    Ok(true) => then,
                    Ok(false) => otherwise,
                    Err(ConditionError::Interrupted) => {
                        return Dispatch::Interrupted { children: Vec::new() };
                    }
                    Err(ConditionError::Failed(message)) => {
                        return Dispatch::failed(format!("condition: {message}"));
                    }
                };
                let (children, flow) = self.run_sequence(branch, depth + 1).await;
                match flow {
                    Flow::Continue => Dispatch::Done {
                        children,
                        recognition: None,
                    },
                    Flow::Abort { message, .. } => Dispatch::Failed {
                        message,
                        children,
                        recognition: None,
                    },
                    Flow::Interrupted => Dispatch::Interrupted { children },
                }
            }

            input => match InputAction::from_kind(input) {
                Some(action) => match self.send(action).await {
                    Ok(()) => Dispatch::done(),
                    Err(message) => Dispatch::failed(message),
                },
                None => Dispatch::failed("unsupported action"),
            },
        }
    }

    async fn find_image(
        &mut self,
        name: &str,
        region: Option<Rect>,
        timeout_ms: Option<u64>,
        click: Option<MouseButton>,
        store_as: Option<&str>,
        required: bool,
    ) -> Dispatch {
        let template = match self.template(name) {
            Ok(t) => t,
            Err(message) => return Dispatch::failed(message),
        };
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(0));
        let waited = match self
            .engine
            .recognition
            .wait_for(&template, timeout, region, &self.cancel)
            .await
        {
            Ok(w) => w,
            Err(e) => return Dispatch::failed(e.to_string()),
        };

        let result = waited.result;
        if waited.outcome == WaitOutcome::Cancelled {
            return Dispatch::Interrupted { children: Vec::new() };
        }
        if let Some(prefix) = store_as {
            self.store_recognition(prefix, &result);
        }
        debug!(
            target: "autoreplay::executor",
            template = name,
            matched = result.is_match(),
            confidence = result.confidence(),
            attempts = waited.attempts,
            elapsed_ms = waited.elapsed.as_millis() as u64,
            "FindImage"
        );

        let Some(center) = result.center() else {
            return if required {
                Dispatch::Failed {
                    message: format!("template '{name}' not found within {} ms", timeout.as_millis()),
                    children: Vec::new(),
                    recognition: Some(result),
                }
            } else {
                Dispatch::Done {
                    children: Vec::new(),
                    recognition: Some(result),
                }
            };
        };

        if let Some(button) = click {
            // Match positions are already on-screen coordinates; bypass recording scale.
            let press = InputAction::MouseDown {
                button,
                x: center.x,
                y: center.y,
            };
            let release = InputAction::MouseUp {
                button,
                x: center.x,
                y: center.y,
            };
            for action in [press, release] {
                if let Err(message) = self.send_unscaled(action).await {
                    return Dispatch::Failed {
                        message,
                        children: Vec::new(),
                        recognition: Some(result),
                    };
                }
            }
        }
        Dispatch::Done {
            children: Vec::new(),
            recognition: Some(result),
        }
    }

    fn template(&self, name: &str) -> Result<ImageTemplate, String> {
        let library = self.ctx.shared_templates();
        library
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown template '{name}'"))
    }

    fn store_recognition(&mut self, prefix: &str, result: &RecognitionResult) {
        let vars = &mut self.ctx.variables;
        vars.insert(format!("{prefix}.found"), result.is_match().to_string());
        if let Some(center) = result.center() {
            vars.insert(format!("{prefix}.x"), center.x.to_string());
            vars.insert(format!("{prefix}.y"), center.y.to_string());
        }
        vars.insert(format!("{prefix}.confidence"), format!("{:.3}", result.confidence()));
    }

    /// Evaluate a condition; image checks are single shots.
    async fn evaluate(&mut self, condition: &Condition) -> Result<bool, ConditionError> {
        let mut negate = false;
        let mut current = condition;
        let value = loop {
            match current {
                Condition::Not { condition } => {
                    negate = !negate;
                    current = &**condition;
                }
                Condition::VariableEquals { name, value } => {
                    let expected = interpolate(value, &self.ctx.variables, &self.ctx.parameters);
                    break self.ctx.variable(name) == Some(expected.as_str());
                }
                Condition::ImageVisible { template, region } => {
                    let template = self.template(template).map_err(ConditionError::Failed)?;
                    let waited = self
                        .engine
                        .recognition
                        .wait_for(&template, Duration::ZERO, *region, &self.cancel)
                        .await
                        .map_err(|e| ConditionError::Failed(e.to_string()))?;
                    if waited.outcome == WaitOutcome::Cancelled {
                        return Err(ConditionError::Interrupted);
                    }
                    break waited.is_match();
                }
            }
        };
        Ok(value != negate)
    }

    /// Blocks while paused. Returns `true` if cancelled meanwhile.
    async fn wait_while_paused(&mut self) -> bool {
        let control = &self.engine.control;
        let mut updates = control.pause_updates();
        loop {
            if !*updates.borrow_and_update() {
                return false;
            }
            control.set_status(ExecutionStatus::Paused);
            debug!(target: "autoreplay::executor", "Paused");
            tokio::select! {
                _ = self.cancel.cancelled() => return true,
                changed = updates.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    if !*updates.borrow() {
                        control.set_status(ExecutionStatus::Running);
                        debug!(target: "autoreplay::executor", "Resumed");
                    }
                }
            }
        }
    }

    fn scaled_delay(&self, delay_ms: u64) -> Duration {
        scaled_delay(delay_ms, self.ctx.options.speed, self.ctx.options.jitter)
    }

    async fn send(&mut self, action: InputAction) -> Result<(), String> {
        let scale = self.ctx.options.scale;
        self.inject(action, scale).await
    }

    async fn send_unscaled(&mut self, action: InputAction) -> Result<(), String> {
        self.inject(action, Scale::IDENTITY).await
    }

    /// One injection on the blocking pool. Never abandoned once started.
    async fn inject(&mut self, action: InputAction, scale: Scale) -> Result<(), String> {
        let replayer = Arc::clone(&self.engine.replayer);
        let sent = tokio::task::spawn_blocking(move || replayer.send(&action, scale))
            .await
            .map_err(|e| format!("injection task failed: {e}"))?;
        sent.map_err(|e| e.to_string())?;
        self.track(action, scale);
        Ok(())
    }

    fn track(&mut self, action: InputAction, scale: Scale) {
        match action {
            InputAction::KeyDown { key } => {
                if !self.held_keys.contains(&key) {
                    self.held_keys.push(key);
                }
            }
            InputAction::KeyUp { key } => self.held_keys.retain(|k| *k != key),
            InputAction::MouseDown { button, x, y } => {
                let (x, y) = scale.apply(x, y);
                self.held_buttons.retain(|(b, _, _)| *b != button);
                self.held_buttons.push((button, x, y));
            }
            InputAction::MouseUp { button, .. } => self.held_buttons.retain(|(b, _, _)| *b != button),
            InputAction::MouseMove { .. } | InputAction::Wheel { .. } => {}
        }
    }

    /// Release whatever this run left pressed, newest first.
    async fn release_held(&mut self) {
        let keys = std::mem::take(&mut self.held_keys);
        let buttons = std::mem::take(&mut self.held_buttons);
        if keys.is_empty() && buttons.is_empty() {
            return;
        }
        info!(
            target: "autoreplay::executor",
            keys = keys.len(),
            buttons = buttons.len(),
            "Releasing held input"
        );
        let releases = keys
            .into_iter()
            .rev()
            .map(|key| InputAction::KeyUp { key })
            .chain(
                buttons
                    .into_iter()
                    .rev()
                    .map(|(button, x, y)| InputAction::MouseUp { button, x, y }),
            );
        for action in releases {
            if let Err(message) = self.send_unscaled(action).await {
                warn!(target: "autoreplay::executor", ?action, %message, "Failed to release held input");
            }
        }
    }
}

/// `delay_ms` divided by `speed`, spread by up to `jitter` either way.
/// Delays too long for a `Duration` saturate.
fn scaled_delay(delay_ms: u64, speed: f64, jitter: f64) -> Duration {
    if delay_ms == 0 {
        return Duration::ZERO;
    }
    let mut ms = delay_ms as f64 / speed;
    if jitter > 0.0 {
        ms *= 1.0 + rand::rng().random_range(-jitter..=jitter);
    }
    Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).unwrap_or(Duration::MAX)
}
