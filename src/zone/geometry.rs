//! Bounding boxes, anchor points and the planar tests zones are built on.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Pixel coordinate in frame space (x grows right, y grows down).
pub type Point = Point2<f32>;

/// Axis-aligned bounding box in TLBR form.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    /// Create a box from top-left and bottom-right corners.
    #[inline]
    pub fn from_tlbr(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Create a box from top-left corner and size.
    #[inline]
    pub fn from_tlwh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::from_tlbr(x, y, x + width, y + height)
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// Corners are finite and strictly ordered on both axes.
    pub fn is_valid(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_max > self.x_min
            && self.y_max > self.y_min
    }

    /// The point of this box that is tested against zones.
    pub fn anchor(&self, anchor: Anchor) -> Point {
        let cx = (self.x_min + self.x_max) / 2.0;
        match anchor {
            Anchor::BottomCenter => Point::new(cx, self.y_max),
            Anchor::Center => Point::new(cx, (self.y_min + self.y_max) / 2.0),
        }
    }
}

/// Which point of a detection box is used for zone tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Where an object meets the ground in a typical camera view.
    #[default]
    BottomCenter,
    Center,
}

/// Side of a directed line a point lies on.
///
/// With the line running from `start` to `end`, `A` is where the 2D cross
/// product of direction and offset is negative and `B` where it is positive.
/// In image coordinates and a left-to-right line, `A` is above the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

/// Classify `point` against the directed line `start -> end`.
///
/// Returns `None` when the point lies exactly on the line.
pub fn side_of(start: &Point, end: &Point, point: &Point) -> Option<Side> {
    let direction: Vector2<f32> = end - start;
    let offset: Vector2<f32> = point - start;
    let cross = direction.perp(&offset);
    if cross < 0.0 {
        Some(Side::A)
    } else if cross > 0.0 {
        Some(Side::B)
    } else {
        None
    }
}

/// Crossing-number point-in-polygon test. Points on an edge or vertex are inside.
pub fn polygon_contains(vertices: &[Point], point: &Point) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = &vertices[i];
        let b = &vertices[j];
        if on_segment(a, b, point) {
            return true;
        }
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: &Point, b: &Point, p: &Point) -> bool {
    let ab: Vector2<f32> = b - a;
    let ap: Vector2<f32> = p - a;
    if ab.perp(&ap) != 0.0 {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Shoelace area of a polygon (absolute value).
pub fn polygon_area(vertices: &[Point]) -> f32 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f32 = (0..n)
        .map(|i| {
            let a = &vertices[i];
            let b = &vertices[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    (twice / 2.0).abs()
}

/// Rectangle covering the central 80% of a frame (10% inset on each side).
pub fn inset_rectangle(frame_width: u32, frame_height: u32) -> Vec<Point> {
    let w = frame_width as f32;
    let h = frame_height as f32;
    let (x0, x1) = (w / 10.0, w - w / 10.0);
    let (y0, y1) = (h / 10.0, h - h / 10.0);
    vec![
        Point::new(x0, y0),
        Point::new(x1, y0),
        Point::new(x1, y1),
        Point::new(x0, y1),
    ]
}
