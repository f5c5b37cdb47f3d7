use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A point in logical screen coordinates.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A rectangle region on screen. A zero width or height makes it empty.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Non-empty and with right and bottom edges representable in `i32`.
    pub const fn is_valid_region(&self) -> bool {
        !self.is_empty() && self.x.checked_add(self.width).is_some() && self.y.checked_add(self.height).is_some()
    }

    pub const fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub const fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub const fn center(&self) -> Point {
        Point::new(
            self.x.saturating_add(self.width / 2),
            self.y.saturating_add(self.height / 2),
        )
    }

    pub const fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    /// Overlapping area of two rectangles, or `None` when they are disjoint.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        let r = Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y));
        (!r.is_empty()).then_some(r)
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.intersect(other).is_some()
    }
}
