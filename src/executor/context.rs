use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::result::{ActionStatus, ExecutionStatus};
use crate::config::{ParametersMap, PlaybackConfig};
use crate::error::ValidationError;
use crate::model::{ActionId, TemplateLibrary};
use crate::replay::Scale;

/// Per-run policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOptions {
    pub continue_on_error: bool,
    /// Wall-clock limit for the whole run.
    pub timeout: Option<Duration>,
    /// Log each action at info level.
    pub log_actions: bool,
    /// Delays are divided by this factor.
    pub speed: f64,
    /// Each delay varies randomly by up to this fraction.
    pub jitter: f64,
    pub scale: Scale,
    pub max_depth: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            timeout: None,
            log_actions: false,
            speed: 1.0,
            jitter: 0.0,
            scale: Scale::IDENTITY,
            max_depth: 32,
        }
    }
}

impl ExecutionOptions {
    pub fn from_config(cfg: &PlaybackConfig) -> Self {
        Self {
            continue_on_error: cfg.continue_on_error,
            timeout: cfg.timeout_ms.map(Duration::from_millis),
            log_actions: cfg.log_actions,
            speed: cfg.speed,
            jitter: cfg.jitter,
            scale: Scale {
                factor_x: cfg.scale_x,
                factor_y: cfg.scale_y,
                offset_x: cfg.offset_x,
                offset_y: cfg.offset_y,
            },
            max_depth: cfg.max_depth,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(ValidationError::InvalidSpeed(self.speed));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ValidationError::InvalidJitter(self.jitter));
        }
        Ok(())
    }
}

/// Progress report sent after every top-level action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionProgress {
    /// 1-based index of the action just finished.
    pub current: usize,
    pub total: usize,
    pub iteration: u32,
    pub action_id: ActionId,
    pub status: ActionStatus,
}

pub type ProgressSink = Arc<dyn Fn(ExecutionProgress) + Send + Sync>;

/// Mutable state owned by exactly one execution.
pub struct ExecutionContext {
    cancel: CancellationToken,
    pub variables: HashMap<String, String>,
    pub parameters: ParametersMap,
    pub options: ExecutionOptions,
    templates: Arc<TemplateLibrary>,
    progress: Option<ProgressSink>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(ExecutionOptions::default())
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("variables", &self.variables)
            .field("parameters", &self.parameters)
            .field("options", &self.options)
            .field("templates", &self.templates.len())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(options: ExecutionOptions) -> Self {
        Self {
            cancel: CancellationToken::new(),
            variables: HashMap::new(),
            parameters: ParametersMap::new(),
            options,
            templates: Arc::new(TemplateLibrary::new()),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: ParametersMap) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_templates(mut self, templates: impl Into<Arc<TemplateLibrary>>) -> Self {
        self.templates = templates.into();
        self
    }

    #[must_use]
    pub fn with_progress(mut self, sink: impl Fn(ExecutionProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }

    /// Use a caller-owned token; cancelling it stops the run.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    pub(crate) fn shared_templates(&self) -> Arc<TemplateLibrary> {
        Arc::clone(&self.templates)
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub(crate) fn report(&self, progress: ExecutionProgress) {
        if let Some(sink) = &self.progress {
            sink(progress);
        }
    }
}

/// Handle used to steer whichever execution is currently running on an engine.
///
/// Clones share state. Requests made while nothing runs are ignored.
#[derive(Debug, Clone)]
pub struct ExecutionControl {
    inner: Arc<ControlInner>,
}

#[derive(Debug)]
struct ControlInner {
    running: AtomicBool,
    run_token: Mutex<Option<CancellationToken>>,
    paused: watch::Sender<bool>,
    status: Mutex<ExecutionStatus>,
}

impl Default for ExecutionControl {
    fn default() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                running: AtomicBool::new(false),
                run_token: Mutex::new(None),
                paused,
                status: Mutex::new(ExecutionStatus::Pending),
            }),
        }
    }
}

impl ExecutionControl {
    pub fn status(&self) -> ExecutionStatus {
        *self.inner.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Hold the run before its next action. Returns whether a run was affected.
    pub fn pause(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.inner.paused.send_replace(true);
        true
    }

    pub fn resume(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.inner.paused.send_replace(false);
        true
    }

    pub fn cancel(&self) -> bool {
        let token = self
            .inner
            .run_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Claim the engine for one run; `None` when another run holds it.
    pub(crate) fn begin(&self, run_token: CancellationToken) -> Option<RunGuard> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        *self.inner.run_token.lock().unwrap_or_else(PoisonError::into_inner) = Some(run_token);
        self.inner.paused.send_replace(false);
        self.set_status(ExecutionStatus::Running);
        Some(RunGuard {
            control: self.clone(),
        })
    }

    pub(crate) fn set_status(&self, status: ExecutionStatus) {
        *self.inner.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub(crate) fn pause_updates(&self) -> watch::Receiver<bool> {
        self.inner.paused.subscribe()
    }
}

/// Releases the engine when the run ends, however it ends.
pub(crate) struct RunGuard {
    control: ExecutionControl,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let inner = &self.control.inner;
        inner.run_token.lock().unwrap_or_else(PoisonError::into_inner).take();
        inner.paused.send_replace(false);
        inner.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_playback_config() {
        let cfg = PlaybackConfig {
            speed: 2.0,
            timeout_ms: Some(1500),
            scale_x: 1.5,
            offset_y: 20,
            ..PlaybackConfig::default()
        };
        let options = ExecutionOptions::from_config(&cfg);
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.scale.apply(10, 10), (15, 30));
        assert!(options.validate().is_ok());

        let bad = ExecutionOptions {
            jitter: 2.0,
            ..ExecutionOptions::default()
        };
        assert_eq!(bad.validate().unwrap_err(), ValidationError::InvalidJitter(2.0));
    }

    #[test]
    fn control_guards_a_single_run() {
        let control = ExecutionControl::default();
        assert!(!control.pause(), "nothing to pause");

        let token = CancellationToken::new();
        let guard = control.begin(token.clone()).unwrap();
        assert!(control.begin(CancellationToken::new()).is_none());
        assert!(control.pause());
        assert!(control.is_paused());
        assert!(control.cancel());
        assert!(token.is_cancelled());

        drop(guard);
        assert!(!control.is_running());
        assert!(!control.is_paused());
        assert!(!control.cancel());
    }
}
