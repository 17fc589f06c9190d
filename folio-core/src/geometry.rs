use serde::{Deserialize, Serialize};

/// Width and height of a page, in pixels at some scale.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn scaled(self, scale: f32) -> Self {
        Self {
            width: self.width * scale,
            height: self.height * scale,
        }
    }

    pub fn area(self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle with a top-left origin.
///
/// Stored annotation geometry uses scale-1 units; everything on screen uses
/// pixels at the current scale. [`Rect::scaled`] and [`Rect::normalized`]
/// convert between the two.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn scaled(&self, scale: f32) -> Self {
        Self {
            left: self.left * scale,
            top: self.top * scale,
            width: self.width * scale,
            height: self.height * scale,
        }
    }

    /// Inverse of [`Rect::scaled`]. A non-positive scale leaves the rect as is.
    pub fn normalized(&self, scale: f32) -> Self {
        if !(scale > 0.0) {
            return *self;
        }
        self.scaled(1.0 / scale)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            left: self.left + dx,
            top: self.top + dy,
            ..*self
        }
    }

    pub fn contains(&self, point: Point, padding: f32) -> bool {
        point.x >= self.left - padding
            && point.x <= self.right() + padding
            && point.y >= self.top - padding
            && point.y <= self.bottom() + padding
    }

    pub fn center_x(&self) -> f32 {
        self.left + self.width / 2.0
    }
}

/// A vertical range in content coordinates, used for buffer windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalSpan {
    pub top: f32,
    pub bottom: f32,
}

impl VerticalSpan {
    pub fn new(top: f32, bottom: f32) -> Self {
        Self { top, bottom }
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn center(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    /// Grows the span by `viewports` times its own height on each side.
    pub fn buffered(&self, viewports: f32) -> Self {
        let margin = self.height() * viewports.max(0.0);
        Self {
            top: self.top - margin,
            bottom: self.bottom + margin,
        }
    }

    pub fn intersects(&self, rect: &Rect) -> bool {
        rect.top < self.bottom && rect.bottom() > self.top
    }

    /// Distance from `y` to the nearest edge of `rect`, zero when inside.
    pub fn distance_to(y: f32, rect: &Rect) -> f32 {
        if y < rect.top {
            rect.top - y
        } else if y > rect.bottom() {
            y - rect.bottom()
        } else {
            0.0
        }
    }
}
