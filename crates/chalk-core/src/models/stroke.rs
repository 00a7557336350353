//! Stroke geometry

use serde::{Deserialize, Serialize};

/// A single sampled ink point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    /// Canvas x coordinate
    pub x: f64,
    /// Canvas y coordinate
    pub y: f64,
    /// Capture time (Unix ms)
    pub t: i64,
    /// Normalized pen pressure
    pub pressure: f32,
}

impl StrokePoint {
    #[must_use]
    pub const fn new(x: f64, y: f64, t: i64, pressure: f32) -> Self {
        Self { x, y, t, pressure }
    }
}

/// Axis-aligned bounding box of a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Compute bounds for `points`, or `None` for an empty stroke.
    #[must_use]
    pub fn of(points: &[StrokePoint]) -> Option<Self> {
        let first = points.first()?;
        let initial = Self {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(points.iter().skip(1).fold(initial, |bounds, point| Self {
            min_x: bounds.min_x.min(point.x),
            min_y: bounds.min_y.min(point.y),
            max_x: bounds.max_x.max(point.x),
            max_y: bounds.max_y.max(point.y),
        }))
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_of_empty_stroke_is_none() {
        assert!(Bounds::of(&[]).is_none());
    }

    #[test]
    fn bounds_cover_all_points() {
        let points = [
            StrokePoint::new(10.0, 5.0, 0, 0.5),
            StrokePoint::new(-2.0, 8.0, 16, 0.5),
            StrokePoint::new(4.0, 20.0, 32, 0.5),
        ];
        let bounds = Bounds::of(&points).unwrap();
        assert_eq!(bounds.min_x, -2.0);
        assert_eq!(bounds.max_x, 10.0);
        assert_eq!(bounds.min_y, 5.0);
        assert_eq!(bounds.max_y, 20.0);
        assert_eq!(bounds.width(), 12.0);
        assert_eq!(bounds.height(), 15.0);
    }
}
