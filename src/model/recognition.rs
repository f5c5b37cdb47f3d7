use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Point, Rect};

/// Outcome of one matching attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    matched: bool,
    rect: Rect,
    confidence: f64,
    template: String,
    timestamp: DateTime<Utc>,
}

impl RecognitionResult {
    /// A match at `rect`. The confidence is clamped to `[0, 1]` (NaN becomes 0).
    pub fn matched(template: impl Into<String>, rect: Rect, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            matched: true,
            rect,
            confidence,
            template: template.into(),
            timestamp: Utc::now(),
        }
    }

    /// No match: zero confidence and an empty rectangle.
    pub fn no_match(template: impl Into<String>) -> Self {
        Self {
            matched: false,
            rect: Rect::default(),
            confidence: 0.0,
            template: template.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Centre of the matched rectangle, if this is a match.
    pub fn center(&self) -> Option<Point> {
        self.matched.then(|| self.rect.center())
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_match_is_empty() {
        let r = RecognitionResult::no_match("ok");
        assert!(!r.is_match());
        assert_eq!(r.confidence(), 0.0);
        assert!(r.rect().is_empty());
        assert_eq!(r.center(), None);
    }

    #[test]
    fn match_confidence_is_clamped() {
        let rect = Rect::new(10, 10, 4, 4);
        assert_eq!(RecognitionResult::matched("a", rect, 1.2).confidence(), 1.0);
        assert_eq!(RecognitionResult::matched("a", rect, -0.3).confidence(), 0.0);
        assert_eq!(RecognitionResult::matched("a", rect, f64::NAN).confidence(), 0.0);
        assert_eq!(
            RecognitionResult::matched("a", rect, 0.5).center(),
            Some(Point::new(12, 12))
        );
    }
}
