use std::sync::Arc;

use image::RgbaImage;
use image::imageops;
use tracing::{debug, trace};
use xcap::Monitor;

use crate::error::{CaptureError, PermissionStatus};
use crate::model::{Point, Rect};

/// A captured screen area.
///
/// `origin` is the logical screen coordinate of pixel `(0, 0)`; `scale_factor`
/// is the number of physical pixels per logical unit (2.0 on a typical high-DPI
/// display).
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbaImage>,
    origin: Point,
    scale_factor: f32,
}

/// Rectangle in frame pixel coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// A frame at the screen origin with a 1:1 scale.
    pub fn new(image: RgbaImage) -> Self {
        Self::with_placement(image, Point::default(), 1.0)
    }

    pub fn with_placement(image: RgbaImage, origin: Point, scale_factor: f32) -> Self {
        let scale_factor = if scale_factor.is_finite() && scale_factor > 0.0 {
            scale_factor
        } else {
            1.0
        };
        Self {
            image: Arc::new(image),
            origin,
            scale_factor,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    /// Logical screen area covered by this frame.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            self.origin.x,
            self.origin.y,
            (self.width() as f32 / self.scale_factor).round() as i32,
            (self.height() as f32 / self.scale_factor).round() as i32,
        )
    }

    /// Map a logical screen rectangle onto frame pixels, clipped to the frame.
    pub(crate) fn to_pixels(&self, rect: Rect) -> Option<PixelRect> {
        let clipped = rect.intersect(&self.bounds())?;
        let s = self.scale_factor;
        let x0 = ((clipped.x - self.origin.x) as f32 * s).floor().max(0.0) as u32;
        let y0 = ((clipped.y - self.origin.y) as f32 * s).floor().max(0.0) as u32;
        let x1 = (((clipped.right() - self.origin.x) as f32 * s).ceil() as u32).min(self.width());
        let y1 = (((clipped.bottom() - self.origin.y) as f32 * s).ceil() as u32).min(self.height());
        (x1 > x0 && y1 > y0).then(|| PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    /// Map frame pixels back to a logical screen rectangle.
    pub(crate) fn to_screen(&self, px: PixelRect) -> Rect {
        let s = self.scale_factor;
        Rect::new(
            self.origin.x + (px.x as f32 / s).round() as i32,
            self.origin.y + (px.y as f32 / s).round() as i32,
            (px.width as f32 / s).round().max(1.0) as i32,
            (px.height as f32 / s).round().max(1.0) as i32,
        )
    }

    pub(crate) fn full_pixels(&self) -> PixelRect {
        PixelRect {
            x: 0,
            y: 0,
            width: self.width(),
            height: self.height(),
        }
    }

    /// Sub-frame covering `rect` (logical), keeping placement information.
    pub fn crop(&self, rect: Rect) -> Result<Frame, CaptureError> {
        let px = self.to_pixels(rect).ok_or(CaptureError::InvalidRegion(rect))?;
        let image = imageops::crop_imm(self.image.as_ref(), px.x, px.y, px.width, px.height).to_image();
        let origin = self.to_screen(px);
        Ok(Frame::with_placement(
            image,
            Point::new(origin.x, origin.y),
            self.scale_factor,
        ))
    }
}

/// Capability to read screen pixels. Every call is a fresh capture.
pub trait ScreenSampler: Send + Sync {
    /// Static human-readable identifier (used in logs).
    fn name(&self) -> &'static str;

    fn capture_full(&self) -> Result<Frame, CaptureError>;

    /// Capture a logical screen rectangle (clipped to the screen).
    fn capture_region(&self, region: Rect) -> Result<Frame, CaptureError>;

    fn check_permission(&self) -> PermissionStatus;
}

/// Captures the primary monitor through xcap.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScreenCapture;

impl ScreenCapture {
    pub fn new() -> Self {
        Self
    }

    fn primary_monitor() -> Result<Monitor, CaptureError> {
        let monitors = Monitor::all()
            .map_err(|e| CaptureError::from_backend_message(format!("Failed to get monitors: {e}")))?;
        let mut first = None;
        for monitor in monitors {
            match monitor.is_primary() {
                Ok(true) => return Ok(monitor),
                Ok(false) => {
                    if first.is_none() {
                        first = Some(monitor);
                    }
                }
                Err(e) => {
                    return Err(CaptureError::from_backend_message(format!(
                        "Error checking monitor primary status: {e}"
                    )));
                }
            }
        }
        first.ok_or_else(|| CaptureError::Transient("no monitor found".into()))
    }

    fn monitor_bounds(monitor: &Monitor) -> Result<Rect, CaptureError> {
        let err = |what: &str, e: xcap::XCapError| {
            CaptureError::from_backend_message(format!("Failed to get monitor {what}: {e}"))
        };
        let x = monitor.x().map_err(|e| err("x", e))?;
        let y = monitor.y().map_err(|e| err("y", e))?;
        let width = monitor.width().map_err(|e| err("width", e))?;
        let height = monitor.height().map_err(|e| err("height", e))?;
        Ok(Rect::new(x, y, width as i32, height as i32))
    }
}

impl ScreenSampler for ScreenCapture {
    fn name(&self) -> &'static str {
        "xcap"
    }

    fn capture_full(&self) -> Result<Frame, CaptureError> {
        let monitor = Self::primary_monitor()?;
        let bounds = Self::monitor_bounds(&monitor)?;
        let image = monitor
            .capture_image()
            .map_err(|e| CaptureError::from_backend_message(format!("Failed to capture screen: {e}")))?;
        // Derive the scale from what was actually delivered.
        let scale = image.width() as f32 / bounds.width.max(1) as f32;
        trace!(
            target: "autoreplay::vision",
            width = image.width(), height = image.height(), scale,
            "captured full screen"
        );
        Ok(Frame::with_placement(image, Point::new(bounds.x, bounds.y), scale))
    }

    fn capture_region(&self, region: Rect) -> Result<Frame, CaptureError> {
        let monitor = Self::primary_monitor()?;
        let bounds = Self::monitor_bounds(&monitor)?;
        let clipped = region
            .intersect(&bounds)
            .ok_or(CaptureError::InvalidRegion(region))?;
        let image = monitor
            .capture_region(
                (clipped.x - bounds.x) as u32,
                (clipped.y - bounds.y) as u32,
                clipped.width as u32,
                clipped.height as u32,
            )
            .map_err(|e| CaptureError::from_backend_message(format!("Failed to capture region: {e}")))?;
        let scale = image.width() as f32 / clipped.width.max(1) as f32;
        trace!(
            target: "autoreplay::vision",
            ?clipped, width = image.width(), height = image.height(),
            "captured region"
        );
        Ok(Frame::with_placement(image, Point::new(clipped.x, clipped.y), scale))
    }

    fn check_permission(&self) -> PermissionStatus {
        let probe = Self::primary_monitor().and_then(|monitor| {
            monitor
                .capture_region(0, 0, 1, 1)
                .map_err(|e| CaptureError::from_backend_message(e.to_string()))
        });
        match probe {
            Ok(_) => PermissionStatus::Granted,
            Err(CaptureError::PermissionDenied(reason)) => {
                debug!(target: "autoreplay::vision", %reason, "screen capture denied");
                PermissionStatus::Denied(reason)
            }
            Err(other) => PermissionStatus::Unknown(other.to_string()),
        }
    }
}

/// Serves a fixed frame, e.g. a screenshot loaded from disk.
#[derive(Debug, Clone)]
pub struct StaticSampler {
    frame: Frame,
}

impl StaticSampler {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self::new(Frame::new(image))
    }
}

impl ScreenSampler for StaticSampler {
    fn name(&self) -> &'static str {
        "static"
    }

    fn capture_full(&self) -> Result<Frame, CaptureError> {
        Ok(self.frame.clone())
    }

    fn capture_region(&self, region: Rect) -> Result<Frame, CaptureError> {
        self.frame.crop(region)
    }

    fn check_permission(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn pixel_mapping_honours_origin_and_scale() {
        let frame = Frame::with_placement(RgbaImage::new(200, 100), Point::new(1000, 0), 2.0);
        assert_eq!(frame.bounds(), Rect::new(1000, 0, 100, 50));
        let px = frame.to_pixels(Rect::new(1010, 5, 20, 10)).unwrap();
        assert_eq!(px, PixelRect { x: 20, y: 10, width: 40, height: 20 });
        assert_eq!(frame.to_screen(px), Rect::new(1010, 5, 20, 10));
        assert!(frame.to_pixels(Rect::new(0, 0, 10, 10)).is_none());
    }

    #[test]
    fn static_sampler_crops_regions() {
        let mut image = RgbaImage::from_pixel(50, 40, Rgba([0, 0, 0, 255]));
        image.put_pixel(12, 7, Rgba([255, 0, 0, 255]));
        let sampler = StaticSampler::from_image(image);

        let frame = sampler.capture_region(Rect::new(10, 5, 10, 10)).unwrap();
        assert_eq!((frame.width(), frame.height()), (10, 10));
        assert_eq!(frame.origin(), Point::new(10, 5));
        assert_eq!(frame.image().get_pixel(2, 2), &Rgba([255, 0, 0, 255]));

        // Regions hanging off the edge are clipped.
        let clipped = sampler.capture_region(Rect::new(45, 35, 20, 20)).unwrap();
        assert_eq!((clipped.width(), clipped.height()), (5, 5));

        assert_eq!(
            sampler.capture_region(Rect::new(100, 100, 5, 5)).unwrap_err(),
            CaptureError::InvalidRegion(Rect::new(100, 100, 5, 5))
        );
    }
}
