//! Template matching by zero-mean normalized cross-correlation.
//!
//! Both images are reduced to luma. For every placement of the template inside
//! the search area the score is
//!
//! ```text
//!   sum((S - mean S) * (T - mean T)) / sqrt(sum((S - mean S)^2) * sum((T - mean T)^2))
//! ```
//!
//! Window sums of `S` and `S^2` come from integral images, so only the cross
//! term costs `O(template area)` per placement. Rows are scored in parallel with
//! rayon and merged in scan order, which keeps ties on the top-left-most
//! placement and makes results deterministic.

use image::RgbaImage;
use rayon::prelude::*;

use super::sampler::{Frame, PixelRect};
use crate::model::{ImageTemplate, RecognitionResult, Rect};

/// Per-pixel variance below which a window or template counts as flat.
const FLAT_VARIANCE: f64 = 1e-4;

/// Stateless matcher; the only knob bounds the size of "find all" answers.
#[derive(Debug, Clone, Copy)]
pub struct TemplateMatcher {
    max_matches: usize,
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self { max_matches: 32 }
    }
}

impl TemplateMatcher {
    pub fn new(max_matches: usize) -> Self {
        Self {
            max_matches: max_matches.max(1),
        }
    }

    /// Best placement of `template` inside its declared search region (or the
    /// whole frame). A match requires `confidence >= template.threshold()`.
    pub fn best_match(&self, frame: &Frame, template: &ImageTemplate) -> RecognitionResult {
        self.best_match_in(frame, template, template.region())
    }

    /// Like [`best_match`](Self::best_match) with an explicit search region.
    pub fn best_match_in(
        &self,
        frame: &Frame,
        template: &ImageTemplate,
        region: Option<Rect>,
    ) -> RecognitionResult {
        let plane = LumaPlane::from_rgba(frame.image());
        let integral = Integral::new(&plane);
        self.best_on(frame, &plane, &integral, template, region)
    }

    /// Every non-overlapping placement at or above the threshold, best first.
    pub fn find_all(&self, frame: &Frame, template: &ImageTemplate) -> Vec<RecognitionResult> {
        self.find_all_in(frame, template, template.region())
    }

    pub fn find_all_in(
        &self,
        frame: &Frame,
        template: &ImageTemplate,
        region: Option<Rect>,
    ) -> Vec<RecognitionResult> {
        let Some(search) = Search::prepare(frame, template, region) else {
            return Vec::new();
        };
        let plane = LumaPlane::from_rgba(frame.image());
        let integral = Integral::new(&plane);
        let threshold = template.threshold();

        let (search_ref, plane_ref, integral_ref) = (&search, &plane, &integral);
        let mut candidates: Vec<(f64, u32, u32)> = search
            .rows()
            .into_par_iter()
            .flat_map_iter(move |y| {
                search_ref.columns().filter_map(move |x| {
                    let score = search_ref.score(plane_ref, integral_ref, x, y);
                    (score >= threshold).then_some((score, x, y))
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(a.2.cmp(&b.2))
                .then(a.1.cmp(&b.1))
        });

        let (tw, th) = (search.template.width, search.template.height);
        let mut accepted: Vec<(f64, PixelRect)> = Vec::new();
        for (score, x, y) in candidates {
            let candidate = PixelRect {
                x,
                y,
                width: tw,
                height: th,
            };
            if accepted.iter().any(|(_, kept)| pixel_overlap(kept, &candidate)) {
                continue;
            }
            accepted.push((score, candidate));
            if accepted.len() == self.max_matches {
                break;
            }
        }
        accepted
            .into_iter()
            .map(|(score, px)| RecognitionResult::matched(template.name(), frame.to_screen(px), score))
            .collect()
    }

    /// Match several templates against the same frame. Results are independent and
    /// come back in the order of `templates`.
    pub fn match_batch(&self, frame: &Frame, templates: &[ImageTemplate]) -> Vec<RecognitionResult> {
        let plane = LumaPlane::from_rgba(frame.image());
        let integral = Integral::new(&plane);
        templates
            .iter()
            .map(|t| self.best_on(frame, &plane, &integral, t, t.region()))
            .collect()
    }

    fn best_on(
        &self,
        frame: &Frame,
        plane: &LumaPlane,
        integral: &Integral,
        template: &ImageTemplate,
        region: Option<Rect>,
    ) -> RecognitionResult {
        let Some(search) = Search::prepare(frame, template, region) else {
            return RecognitionResult::no_match(template.name());
        };

        let row_best: Vec<Option<(f64, u32)>> = search
            .rows()
            .into_par_iter()
            .map(|y| {
                let mut best: Option<(f64, u32)> = None;
                for x in search.columns() {
                    let score = search.score(plane, integral, x, y);
                    if best.is_none_or(|(b, _)| score > b) {
                        best = Some((score, x));
                    }
                }
                best
            })
            .collect();

        let mut best: Option<(f64, u32, u32)> = None;
        for (y, row) in search.rows().zip(row_best) {
            if let Some((score, x)) = row {
                if best.is_none_or(|(b, _, _)| score > b) {
                    best = Some((score, x, y));
                }
            }
        }

        match best {
            Some((score, x, y)) if score >= template.threshold() => {
                let px = PixelRect {
                    x,
                    y,
                    width: search.template.width,
                    height: search.template.height,
                };
                RecognitionResult::matched(template.name(), frame.to_screen(px), score)
            }
            _ => RecognitionResult::no_match(template.name()),
        }
    }
}

fn pixel_overlap(a: &PixelRect, b: &PixelRect) -> bool {
    a.x < b.x + b.width && b.x < a.x + a.width && a.y < b.y + b.height && b.y < a.y + a.height
}

struct LumaPlane {
    width: usize,
    data: Vec<f32>,
}

impl LumaPlane {
    fn from_rgba(image: &RgbaImage) -> Self {
        let data = image
            .pixels()
            .map(|p| 0.299 * f32::from(p[0]) + 0.587 * f32::from(p[1]) + 0.114 * f32::from(p[2]))
            .collect();
        Self {
            width: image.width() as usize,
            data,
        }
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

/// Summed-area tables of values and squared values, one row/column of padding.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(plane: &LumaPlane) -> Self {
        let width = plane.width;
        let height = if width == 0 { 0 } else { plane.data.len() / width };
        let stride = width + 1;
        let mut sum = vec![0.0; stride * (height + 1)];
        let mut sq = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..width {
                let v = f64::from(plane.at(x, y));
                row_sum += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row_sum;
                sq[i] = sq[i - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let s = self.stride;
        let (a, b, c, d) = (y * s + x, y * s + x + w, (y + h) * s + x, (y + h) * s + x + w);
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sq[d] - self.sq[b] - self.sq[c] + self.sq[a],
        )
    }
}

/// Template reduced to zero-mean luma.
struct PreparedTemplate {
    width: u32,
    height: u32,
    centered: Vec<f32>,
    norm: f64,
}

impl PreparedTemplate {
    /// `None` for flat templates, which carry no correlation signal.
    fn new(image: &RgbaImage) -> Option<Self> {
        let plane = LumaPlane::from_rgba(image);
        let n = plane.data.len();
        if n == 0 {
            return None;
        }
        let mean = plane.data.iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64;
        let centered: Vec<f32> = plane.data.iter().map(|&v| (f64::from(v) - mean) as f32).collect();
        let energy: f64 = centered.iter().map(|&v| f64::from(v) * f64::from(v)).sum();
        if energy / (n as f64) < FLAT_VARIANCE {
            return None;
        }
        Some(Self {
            width: image.width(),
            height: image.height(),
            centered,
            norm: energy.sqrt(),
        })
    }
}

struct Search {
    template: PreparedTemplate,
    area: PixelRect,
}

impl Search {
    /// Resolve the search area; `None` when nothing can match (inactive or flat
    /// template, or a template larger than the area).
    fn prepare(frame: &Frame, template: &ImageTemplate, region: Option<Rect>) -> Option<Self> {
        if !template.is_active() {
            return None;
        }
        let area = match region {
            Some(rect) => frame.to_pixels(rect)?,
            None => frame.full_pixels(),
        };
        if template.width() > area.width || template.height() > area.height {
            return None;
        }
        let prepared = PreparedTemplate::new(template.pixels())?;
        Some(Self {
            template: prepared,
            area,
        })
    }

    fn rows(&self) -> std::ops::RangeInclusive<u32> {
        self.area.y..=self.area.y + self.area.height - self.template.height
    }

    fn columns(&self) -> std::ops::RangeInclusive<u32> {
        self.area.x..=self.area.x + self.area.width - self.template.width
    }

    fn score(&self, plane: &LumaPlane, integral: &Integral, x: u32, y: u32) -> f64 {
        let (x, y) = (x as usize, y as usize);
        let (tw, th) = (self.template.width as usize, self.template.height as usize);
        let n = (tw * th) as f64;
        let (sum, sq) = integral.window(x, y, tw, th);
        let variance = sq - sum * sum / n;
        if variance / n < FLAT_VARIANCE {
            return 0.0;
        }
        let mut cross = 0.0f64;
        for ty in 0..th {
            let row = (y + ty) * plane.width + x;
            let sample = &plane.data[row..row + tw];
            let tmpl = &self.template.centered[ty * tw..(ty + 1) * tw];
            cross += sample
                .iter()
                .zip(tmpl)
                .map(|(&s, &t)| f64::from(s) * f64::from(t))
                .sum::<f64>();
        }
        let score = cross / (variance.sqrt() * self.template.norm);
        if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Point;
    use image::{Rgba, imageops};

    /// Deterministic textured image so every window is distinct.
    fn textured(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(37) ^ y.wrapping_mul(91)).wrapping_add(x * y) % 251;
            Rgba([v as u8, (v * 3 % 256) as u8, (255 - v) as u8, 255])
        })
    }

    fn template_from(image: &RgbaImage, x: u32, y: u32, w: u32, h: u32, threshold: f64) -> ImageTemplate {
        let pixels = imageops::crop_imm(image, x, y, w, h).to_image();
        ImageTemplate::new("probe", pixels, None, threshold).unwrap()
    }

    fn checker(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if (x / 2 + y / 2) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn finds_exact_location() {
        let screen = textured(80, 60);
        let template = template_from(&screen, 37, 21, 12, 10, 0.95);
        let result = TemplateMatcher::default().best_match(&Frame::new(screen), &template);
        assert!(result.is_match());
        assert_eq!(result.rect(), Rect::new(37, 21, 12, 10));
        assert!(result.confidence() > 0.999);
    }

    #[test]
    fn matching_is_idempotent() {
        let screen = textured(64, 48);
        let template = template_from(&screen, 5, 30, 9, 9, 0.9);
        let frame = Frame::new(screen);
        let matcher = TemplateMatcher::default();
        let a = matcher.best_match(&frame, &template);
        let b = matcher.best_match(&frame, &template);
        assert_eq!(a.rect(), b.rect());
        assert_eq!(a.confidence(), b.confidence());
    }

    #[test]
    fn reports_positions_in_screen_coordinates() {
        let screen = textured(80, 60);
        let template = template_from(&screen, 20, 10, 8, 8, 0.95);
        let frame = Frame::with_placement(screen, Point::new(500, 300), 1.0);
        let result = TemplateMatcher::default().best_match(&frame, &template);
        assert_eq!(result.rect(), Rect::new(520, 310, 8, 8));
    }

    #[test]
    fn degenerate_templates_never_match() {
        let screen = textured(40, 40);
        let frame = Frame::new(screen.clone());
        let matcher = TemplateMatcher::default();

        let flat = ImageTemplate::new("flat", RgbaImage::from_pixel(6, 6, Rgba([9, 9, 9, 255])), None, 0.1)
            .unwrap();
        let r = matcher.best_match(&frame, &flat);
        assert!(!r.is_match());
        assert_eq!(r.confidence(), 0.0);

        let huge = ImageTemplate::new("huge", textured(50, 10), None, 0.1).unwrap();
        assert!(!matcher.best_match(&frame, &huge).is_match());

        let mut inactive = template_from(&screen, 0, 0, 8, 8, 0.5);
        inactive.set_active(false);
        assert!(!matcher.best_match(&frame, &inactive).is_match());
    }

    #[test]
    fn threshold_decides_match() {
        let screen = textured(60, 60);
        let mut template = template_from(&screen, 10, 10, 8, 8, 0.9);
        // Perturb the template so the best score drops below 1.
        let mut pixels = template.pixels().clone();
        for x in 0..8 {
            pixels.put_pixel(x, 0, Rgba([0, 0, 0, 255]));
        }
        template.replace_pixels(pixels).unwrap();
        template.set_threshold(1.0).unwrap();
        let frame = Frame::new(screen);
        let strict = TemplateMatcher::default().best_match(&frame, &template);
        assert!(!strict.is_match());
        assert_eq!(strict.confidence(), 0.0);

        template.set_threshold(0.5).unwrap();
        let lenient = TemplateMatcher::default().best_match(&frame, &template);
        assert!(lenient.is_match());
        assert!(lenient.confidence() < 1.0);
        assert_eq!(lenient.rect(), Rect::new(10, 10, 8, 8));
    }

    #[test]
    fn search_region_restricts_the_scan() {
        let mut screen = RgbaImage::from_pixel(100, 40, Rgba([128, 128, 128, 255]));
        let pattern = checker(8);
        imageops::replace(&mut screen, &pattern, 5, 5);
        imageops::replace(&mut screen, &pattern, 70, 20);
        let template = ImageTemplate::new("chk", pattern, Some(Rect::new(50, 0, 50, 40)), 0.9).unwrap();

        let result = TemplateMatcher::default().best_match(&Frame::new(screen), &template);
        assert_eq!(result.rect(), Rect::new(70, 20, 8, 8));
    }

    #[test]
    fn find_all_returns_non_overlapping_hits() {
        let mut screen = RgbaImage::from_pixel(100, 60, Rgba([128, 128, 128, 255]));
        let pattern = checker(8);
        imageops::replace(&mut screen, &pattern, 10, 10);
        imageops::replace(&mut screen, &pattern, 60, 40);
        let template = ImageTemplate::new("chk", pattern, None, 0.95).unwrap();

        let hits = TemplateMatcher::default().find_all(&Frame::new(screen.clone()), &template);
        let mut rects: Vec<_> = hits.iter().map(RecognitionResult::rect).collect();
        rects.sort_by_key(|r| (r.y, r.x));
        assert_eq!(rects, vec![Rect::new(10, 10, 8, 8), Rect::new(60, 40, 8, 8)]);
        assert!(hits.iter().all(|h| h.confidence() >= 0.95 && h.confidence() <= 1.0));

        let capped = TemplateMatcher::new(1).find_all(&Frame::new(screen), &template);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn batch_results_are_independent() {
        let screen = textured(70, 50);
        let found = template_from(&screen, 3, 4, 10, 10, 0.95);
        let flat = ImageTemplate::new("flat", RgbaImage::from_pixel(5, 5, Rgba([1, 1, 1, 255])), None, 0.5)
            .unwrap();
        let results = TemplateMatcher::default().match_batch(&Frame::new(screen), &[found, flat]);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_match());
        assert_eq!(results[0].rect(), Rect::new(3, 4, 10, 10));
        assert!(!results[1].is_match());
    }
}
