//! Freehand strokes.

use super::{Provenance, SerializableColor};
use kurbo::Point;

/// A freehand polyline.
///
/// Strokes have no deletable identity of their own; they leave the log only
/// when the whole canvas is cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    /// Points in drawing order.
    pub points: Vec<Point>,
    /// Stroke color.
    pub color: SerializableColor,
    /// Stroke width.
    pub width: f64,
    /// Legacy paint-over eraser stroke (rendered destination-out).
    pub erase: bool,
    /// Writer tag, present on records written by this engine.
    pub provenance: Option<Provenance>,
}

impl Stroke {
    /// Start a stroke at `point`.
    ///
    /// The point is recorded twice so a click without movement still
    /// produces a drawable two-point polyline.
    pub fn begin(point: Point, color: SerializableColor, width: f64) -> Self {
        Self {
            points: vec![point, point],
            color,
            width,
            erase: false,
            provenance: None,
        }
    }

    /// Append a sampled point.
    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Points flattened to `[x0, y0, x1, y1, ...]`.
    pub fn flat_points(&self) -> Vec<f64> {
        self.points.iter().flat_map(|p| [p.x, p.y]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_seeds_duplicate_point() {
        let stroke = Stroke::begin(Point::new(3.0, 4.0), SerializableColor::black(), 2.0);
        assert_eq!(stroke.points, vec![Point::new(3.0, 4.0), Point::new(3.0, 4.0)]);
    }

    #[test]
    fn test_flat_points_interleave_coordinates() {
        let mut stroke = Stroke::begin(Point::new(1.0, 2.0), SerializableColor::black(), 2.0);
        stroke.push(Point::new(5.0, 6.0));
        assert_eq!(stroke.flat_points(), vec![1.0, 2.0, 1.0, 2.0, 5.0, 6.0]);
    }
}
