use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::RgbaImage;

use crate::error::ValidationError;
use crate::model::Rect;

/// A named reference image used by the recognition engine.
///
/// Invariants: the pixel buffer is never empty, the threshold lies in `[0, 1]`,
/// the name is not blank. Every successful change bumps `version`.
#[derive(Debug, Clone)]
pub struct ImageTemplate {
    name: String,
    pixels: Arc<RgbaImage>,
    region: Option<Rect>,
    threshold: f64,
    active: bool,
    version: u64,
}

impl ImageTemplate {
    pub fn new(
        name: impl Into<String>,
        pixels: RgbaImage,
        region: Option<Rect>,
        threshold: f64,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::BlankName("template name"));
        }
        check_pixels(&pixels)?;
        check_threshold(threshold)?;
        Ok(Self {
            name,
            pixels: Arc::new(pixels),
            region,
            threshold,
            active: true,
            version: 1,
        })
    }

    /// Load a template from an image file; the file stem becomes the name.
    pub fn from_file(path: impl AsRef<Path>, threshold: f64) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let pixels = image::open(path)
            .with_context(|| format!("Failed to open template image {}", path.display()))?
            .to_rgba8();
        Self::new(name, pixels, None, threshold)
            .with_context(|| format!("Invalid template {}", path.display()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Search rectangle in logical screen coordinates; `None` searches everywhere.
    pub fn region(&self) -> Option<Rect> {
        self.region
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_threshold(&mut self, threshold: f64) -> Result<(), ValidationError> {
        check_threshold(threshold)?;
        self.threshold = threshold;
        self.version += 1;
        Ok(())
    }

    pub fn set_region(&mut self, region: Option<Rect>) {
        self.region = region;
        self.version += 1;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.version += 1;
    }

    pub fn replace_pixels(&mut self, pixels: RgbaImage) -> Result<(), ValidationError> {
        check_pixels(&pixels)?;
        self.pixels = Arc::new(pixels);
        self.version += 1;
        Ok(())
    }
}

fn check_pixels(pixels: &RgbaImage) -> Result<(), ValidationError> {
    if pixels.width() == 0 || pixels.height() == 0 {
        return Err(ValidationError::EmptyPixels);
    }
    Ok(())
}

fn check_threshold(threshold: f64) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ValidationError::ThresholdOutOfRange(threshold));
    }
    Ok(())
}

/// Read-only set of templates available to one execution, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, ImageTemplate>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a template, returning the previous one with that name.
    pub fn insert(&mut self, template: ImageTemplate) -> Option<ImageTemplate> {
        self.templates.insert(template.name().to_string(), template)
    }

    #[must_use]
    pub fn with(mut self, template: ImageTemplate) -> Self {
        self.insert(template);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ImageTemplate> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Load every `png`/`jpg`/`bmp` file in `dir` as a template.
    pub fn load_dir(dir: impl AsRef<Path>, threshold: f64) -> Result<Self> {
        let dir = dir.as_ref();
        let mut library = Self::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read template directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"));
            if is_image {
                library.insert(ImageTemplate::from_file(&path, threshold)?);
            }
        }
        Ok(library)
    }
}
