//! Entry points for a UI or CLI: capture lifecycle, execution control and
//! permission probes, wired from a [`Config`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::info;

use crate::capture::{HookEventSource, InputEventSource, Recorder};
use crate::config::Config;
use crate::error::{InputError, PermissionStatus};
use crate::executor::{ExecutionContext, ExecutionEngine, ExecutionOptions, ExecutionResult, ExecutionStatus};
use crate::model::{ActionSequence, Script, TemplateLibrary};
use crate::replay::{EnigoReplayer, InputReplayer};
use crate::vision::{RecognitionEngine, ScreenCapture, ScreenSampler, TemplateMatcher};

pub struct Automation {
    config: Config,
    recorder: Mutex<Recorder>,
    engine: ExecutionEngine,
    templates: Arc<TemplateLibrary>,
}

impl Automation {
    /// Assemble from explicit backends.
    pub fn new(
        config: Config,
        source: Box<dyn InputEventSource>,
        replayer: Arc<dyn InputReplayer>,
        sampler: Arc<dyn ScreenSampler>,
    ) -> Self {
        let recognition = RecognitionEngine::new(
            sampler,
            TemplateMatcher::new(config.recognition.max_matches),
            Duration::from_millis(config.recognition.poll_interval_ms),
        );
        Self {
            recorder: Mutex::new(Recorder::new(source, config.capture.clone())),
            engine: ExecutionEngine::new(replayer, recognition),
            templates: Arc::new(TemplateLibrary::new()),
            config,
        }
    }

    /// Platform backends: rdev hook, Enigo injection and xcap capture.
    pub fn from_config(config: Config) -> Result<Self, InputError> {
        let source = HookEventSource::new(config.capture.queue_capacity);
        let replayer = EnigoReplayer::new(config.playback.dry_run)?;
        info!(
            target: "autoreplay",
            dry_run = config.playback.dry_run,
            "Using platform input and capture backends"
        );
        Ok(Self::new(
            config,
            Box::new(source),
            Arc::new(replayer),
            Arc::new(ScreenCapture::new()),
        ))
    }

    #[must_use]
    pub fn with_templates(mut self, templates: TemplateLibrary) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    pub fn start_capture(&self) -> Result<(), InputError> {
        self.recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .start()
    }

    pub fn stop_capture(&self) -> Result<ActionSequence, InputError> {
        self.recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop()
    }

    pub fn is_capturing(&self) -> bool {
        self.recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_recording()
    }

    /// Fresh context carrying the configured playback options, parameters and templates.
    pub fn new_context(&self) -> ExecutionContext {
        ExecutionContext::new(ExecutionOptions::from_config(&self.config.playback))
            .with_parameters(self.config.parameters.clone())
            .with_templates(Arc::clone(&self.templates))
    }

    pub async fn execute(&self, sequence: &ActionSequence, ctx: &mut ExecutionContext) -> ExecutionResult {
        self.engine.execute(sequence, ctx).await
    }

    pub async fn execute_script(&self, script: &Script, ctx: &mut ExecutionContext) -> ExecutionResult {
        self.engine.execute_script(script, ctx).await
    }

    pub fn pause(&self) -> bool {
        self.engine.pause()
    }

    pub fn resume(&self) -> bool {
        self.engine.resume()
    }

    pub fn cancel(&self) -> bool {
        self.engine.cancel()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.engine.status()
    }

    pub fn check_input_permission(&self) -> PermissionStatus {
        self.engine.replayer().check_permission()
    }

    pub fn check_screen_capture_permission(&self) -> PermissionStatus {
        self.engine.recognition().check_permission()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureStats, EventFilter, EventHandler, InputEvent, InputEventKind};
    use crate::model::Key;
    use crate::replay::{InputAction, MemoryReplayer};
    use crate::vision::StaticSampler;
    use image::{Rgba, RgbaImage};
    use std::time::Instant;

    /// Emits one key tap as soon as it starts.
    #[derive(Default)]
    struct TapSource {
        active: bool,
    }

    impl InputEventSource for TapSource {
        fn name(&self) -> &'static str {
            "tap"
        }

        fn start(&mut self, filter: EventFilter, mut handler: EventHandler) -> Result<(), InputError> {
            self.active = true;
            let now = Instant::now();
            for kind in [
                InputEventKind::KeyPress { key: Key::Char('k') },
                InputEventKind::KeyRelease { key: Key::Char('k') },
            ] {
                if filter.allows(&kind) {
                    handler(InputEvent::new(kind, now));
                }
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<CaptureStats, InputError> {
            self.active = false;
            Ok(CaptureStats::default())
        }

        fn is_active(&self) -> bool {
            self.active
        }
    }

    fn automation(config: Config, replayer: Arc<MemoryReplayer>) -> Automation {
        Automation::new(
            config,
            Box::new(TapSource::default()),
            replayer,
            Arc::new(StaticSampler::from_image(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 255])))),
        )
    }

    #[tokio::test]
    async fn capture_then_execute() {
        let replayer = Arc::new(MemoryReplayer::new());
        let automation = automation(Config::default(), replayer.clone());

        automation.start_capture().unwrap();
        assert!(automation.is_capturing());
        let sequence = automation.stop_capture().unwrap();
        assert_eq!(sequence.len(), 2);

        let mut ctx = automation.new_context();
        let result = automation.execute(&sequence, &mut ctx).await;
        assert!(result.is_success());
        assert_eq!(
            replayer.actions(),
            vec![
                InputAction::KeyDown { key: Key::Char('k') },
                InputAction::KeyUp { key: Key::Char('k') },
            ]
        );
        assert_eq!(automation.status(), ExecutionStatus::Completed);
    }

    #[test]
    fn context_reflects_config() {
        let mut config = Config::default();
        config.playback.continue_on_error = true;
        config.playback.speed = 3.0;
        config.parameters.insert("who".into(), serde_json::json!("me"));
        config.capture.ignored_keys = vec![Key::Char('k')];
        let automation = automation(config, Arc::new(MemoryReplayer::new()));

        let ctx = automation.new_context();
        assert!(ctx.options.continue_on_error);
        assert_eq!(ctx.options.speed, 3.0);
        assert_eq!(ctx.parameters.get("who"), Some(&serde_json::json!("me")));

        automation.start_capture().unwrap();
        assert!(automation.stop_capture().unwrap().is_empty(), "ignored key is not recorded");
        assert!(automation.check_input_permission().is_granted());
        assert!(automation.check_screen_capture_permission().is_granted());
        assert!(!automation.pause(), "nothing running");
    }
}
