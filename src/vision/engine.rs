use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::matcher::TemplateMatcher;
use super::sampler::{Frame, ScreenSampler};
use crate::error::{CaptureError, PermissionStatus};
use crate::model::{ImageTemplate, RecognitionResult, Rect};

/// How a [`RecognitionEngine::wait_for`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    Matched,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct WaitResult {
    pub outcome: WaitOutcome,
    /// The match, or the last no-match seen before giving up.
    pub result: RecognitionResult,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl WaitResult {
    pub fn is_match(&self) -> bool {
        self.outcome == WaitOutcome::Matched
    }
}

/// Screen capture plus template matching.
///
/// Clones share the sampler and the capture lock, so captures issued through
/// any clone are serialized.
#[derive(Clone)]
pub struct RecognitionEngine {
    sampler: Arc<dyn ScreenSampler>,
    matcher: TemplateMatcher,
    capture_lock: Arc<Mutex<()>>,
    poll_interval: Duration,
}

impl std::fmt::Debug for RecognitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionEngine")
            .field("sampler", &self.sampler.name())
            .field("matcher", &self.matcher)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl RecognitionEngine {
    pub fn new(sampler: Arc<dyn ScreenSampler>, matcher: TemplateMatcher, poll_interval: Duration) -> Self {
        Self {
            sampler,
            matcher,
            capture_lock: Arc::new(Mutex::new(())),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn check_permission(&self) -> PermissionStatus {
        let _guard = self.capture_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.sampler.check_permission()
    }

    /// Fresh capture of `region`, or of the whole screen.
    pub fn sample(&self, region: Option<Rect>) -> Result<Frame, CaptureError> {
        let _guard = self.capture_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match region {
            Some(rect) => self.sampler.capture_region(rect),
            None => self.sampler.capture_full(),
        }
    }

    /// Single-shot match. `region` overrides the template's own search region.
    pub fn recognize(
        &self,
        template: &ImageTemplate,
        region: Option<Rect>,
    ) -> Result<RecognitionResult, CaptureError> {
        let frame = self.sample(region.or(template.region()))?;
        let result = self.matcher.best_match_in(&frame, template, None);
        trace!(
            target: "autoreplay::vision",
            template = template.name(),
            matched = result.is_match(),
            confidence = result.confidence(),
            "recognize"
        );
        Ok(result)
    }

    /// Match several templates against one capture.
    pub fn recognize_batch(
        &self,
        templates: &[ImageTemplate],
        region: Option<Rect>,
    ) -> Result<Vec<RecognitionResult>, CaptureError> {
        let frame = self.sample(region)?;
        if region.is_some() {
            Ok(templates
                .iter()
                .map(|t| self.matcher.best_match_in(&frame, t, None))
                .collect())
        } else {
            Ok(self.matcher.match_batch(&frame, templates))
        }
    }

    pub fn find_all(
        &self,
        template: &ImageTemplate,
        region: Option<Rect>,
    ) -> Result<Vec<RecognitionResult>, CaptureError> {
        let frame = self.sample(region.or(template.region()))?;
        Ok(self.matcher.find_all_in(&frame, template, None))
    }

    /// Poll until `template` matches, `timeout` elapses or `cancel` fires.
    ///
    /// At least one attempt is always made, so a zero timeout is a single-shot
    /// check. Transient capture failures are retried while time remains; a
    /// permission failure ends the wait immediately.
    pub async fn wait_for(
        &self,
        template: &ImageTemplate,
        timeout: Duration,
        region: Option<Rect>,
        cancel: &CancellationToken,
    ) -> Result<WaitResult, CaptureError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempts = 0u32;
        let mut last = RecognitionResult::no_match(template.name());

        let finish = |outcome, result, attempts| WaitResult {
            outcome,
            result,
            elapsed: started.elapsed(),
            attempts,
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(finish(WaitOutcome::Cancelled, last, attempts));
            }
            attempts += 1;

            let engine = self.clone();
            let owned = template.clone();
            let task = tokio::task::spawn_blocking(move || engine.recognize(&owned, region));
            let attempt = tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(finish(WaitOutcome::Cancelled, last, attempts));
                }
                joined = task => joined
                    .map_err(|e| CaptureError::Transient(format!("recognition task failed: {e}")))?,
            };

            let now = Instant::now();
            match attempt {
                Ok(result) if result.is_match() => {
                    debug!(
                        target: "autoreplay::vision",
                        template = template.name(),
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "template appeared"
                    );
                    return Ok(finish(WaitOutcome::Matched, result, attempts));
                }
                Ok(result) => last = result,
                Err(CaptureError::Transient(reason)) if now < deadline => {
                    debug!(target: "autoreplay::vision", %reason, attempts, "capture failed, retrying");
                }
                Err(e) => return Err(e),
            }

            if now >= deadline {
                return Ok(finish(WaitOutcome::TimedOut, last, attempts));
            }
            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(finish(WaitOutcome::Cancelled, last, attempts));
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::sampler::StaticSampler;
    use image::{Rgba, RgbaImage, imageops};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn textured(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(37) ^ y.wrapping_mul(91)).wrapping_add(x * y) % 251;
            Rgba([v as u8, (v * 3 % 256) as u8, (255 - v) as u8, 255])
        })
    }

    fn engine_for(sampler: impl ScreenSampler + 'static) -> RecognitionEngine {
        RecognitionEngine::new(Arc::new(sampler), TemplateMatcher::default(), Duration::from_millis(20))
    }

    /// Shows a plain screen until the `reveal_after`-th capture, then the textured one.
    struct Delayed {
        calls: AtomicU32,
        reveal_after: u32,
        screen: RgbaImage,
    }

    impl ScreenSampler for Delayed {
        fn name(&self) -> &'static str {
            "delayed"
        }

        fn capture_full(&self) -> Result<Frame, CaptureError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.reveal_after {
                Ok(Frame::new(self.screen.clone()))
            } else {
                Ok(Frame::new(RgbaImage::from_pixel(
                    self.screen.width(),
                    self.screen.height(),
                    Rgba([30, 30, 30, 255]),
                )))
            }
        }

        fn capture_region(&self, region: Rect) -> Result<Frame, CaptureError> {
            self.capture_full()?.crop(region)
        }

        fn check_permission(&self) -> PermissionStatus {
            PermissionStatus::Granted
        }
    }

    struct Denied;

    impl ScreenSampler for Denied {
        fn name(&self) -> &'static str {
            "denied"
        }

        fn capture_full(&self) -> Result<Frame, CaptureError> {
            Err(CaptureError::PermissionDenied("screen recording not allowed".into()))
        }

        fn capture_region(&self, _region: Rect) -> Result<Frame, CaptureError> {
            self.capture_full()
        }

        fn check_permission(&self) -> PermissionStatus {
            PermissionStatus::Denied("screen recording not allowed".into())
        }
    }

    fn probe(screen: &RgbaImage, x: u32, y: u32) -> ImageTemplate {
        let pixels = imageops::crop_imm(screen, x, y, 10, 10).to_image();
        ImageTemplate::new("probe", pixels, None, 0.95).unwrap()
    }

    #[test]
    fn region_override_limits_the_capture() {
        let screen = textured(80, 80);
        let template = probe(&screen, 50, 50);
        let engine = engine_for(StaticSampler::from_image(screen));

        let inside = engine.recognize(&template, Some(Rect::new(40, 40, 40, 40))).unwrap();
        assert!(inside.is_match());
        assert_eq!(inside.rect(), Rect::new(50, 50, 10, 10));

        let outside = engine.recognize(&template, Some(Rect::new(0, 0, 40, 40))).unwrap();
        assert!(!outside.is_match());
    }

    #[test]
    fn batch_uses_one_capture_for_all_templates() {
        let screen = textured(60, 60);
        let a = probe(&screen, 0, 0);
        let b = probe(&screen, 40, 30);
        let sampler = Delayed {
            calls: AtomicU32::new(0),
            reveal_after: 1,
            screen,
        };
        let engine = RecognitionEngine::new(Arc::new(sampler), TemplateMatcher::default(), Duration::from_millis(20));
        let results = engine.recognize_batch(&[a, b], None).unwrap();
        assert!(results.iter().all(RecognitionResult::is_match));
        assert_eq!(results[1].rect(), Rect::new(40, 30, 10, 10));
    }

    #[tokio::test]
    async fn wait_for_polls_until_the_template_appears() {
        let screen = textured(60, 60);
        let template = probe(&screen, 20, 20);
        let engine = engine_for(Delayed {
            calls: AtomicU32::new(0),
            reveal_after: 3,
            screen,
        });
        let waited = engine
            .wait_for(&template, Duration::from_secs(5), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(waited.outcome, WaitOutcome::Matched);
        assert_eq!(waited.attempts, 3);
        assert_eq!(waited.result.rect(), Rect::new(20, 20, 10, 10));
    }

    #[tokio::test]
    async fn wait_for_times_out_with_last_no_match() {
        let screen = textured(60, 60);
        let template = probe(&screen, 20, 20);
        let engine = engine_for(Delayed {
            calls: AtomicU32::new(0),
            reveal_after: u32::MAX,
            screen,
        });
        let waited = engine
            .wait_for(&template, Duration::from_millis(120), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(waited.outcome, WaitOutcome::TimedOut);
        assert!(!waited.result.is_match());
        assert!(waited.attempts >= 2);
        assert!(waited.elapsed >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn zero_timeout_is_a_single_shot() {
        let screen = textured(40, 40);
        let template = probe(&screen, 30, 30);
        let engine = engine_for(StaticSampler::from_image(RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 255]))));
        let waited = engine
            .wait_for(&template, Duration::ZERO, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(waited.outcome, WaitOutcome::TimedOut);
        assert_eq!(waited.attempts, 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_long_wait() {
        let screen = textured(60, 60);
        let template = probe(&screen, 20, 20);
        let engine = engine_for(Delayed {
            calls: AtomicU32::new(0),
            reveal_after: u32::MAX,
            screen,
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            trigger.cancel();
        });
        let waited = engine
            .wait_for(&template, Duration::from_secs(30), None, &cancel)
            .await
            .unwrap();
        assert_eq!(waited.outcome, WaitOutcome::Cancelled);
        assert!(waited.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn permission_failures_end_the_wait() {
        let template = probe(&textured(20, 20), 0, 0);
        let engine = engine_for(Denied);
        let err = engine
            .wait_for(&template, Duration::from_secs(5), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_permission());
        assert!(!engine.check_permission().is_granted());
    }
}
