//! Parametric shapes (rectangles and circles).

use super::{Provenance, SerializableColor};
use kurbo::{Circle, Point, Rect, Size};
use uuid::Uuid;

/// Client-generated shape identifier (`shapeId` on the wire).
pub type ShapeId = String;

/// Type-specific geometry of a shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShapeKind {
    /// Width and height measured from the origin; either may be negative.
    Rectangle { width: f64, height: f64 },
    /// Radius around the origin.
    Circle { radius: f64 },
}

impl ShapeKind {
    /// The `type` tag written to the log.
    pub fn tag(&self) -> &'static str {
        match self {
            ShapeKind::Rectangle { .. } => super::record::TYPE_RECTANGLE,
            ShapeKind::Circle { .. } => super::record::TYPE_CIRCLE,
        }
    }
}

/// A rectangle or circle with a stable identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    /// Globally unique id, the handle used for deletion.
    pub id: ShapeId,
    /// Anchor point: the drag start for rectangles, the center for circles.
    pub origin: Point,
    pub kind: ShapeKind,
    pub stroke_color: SerializableColor,
    pub stroke_width: f64,
    /// Writer tag, present on records written by this engine.
    pub provenance: Option<Provenance>,
}

impl Shape {
    fn with_kind(origin: Point, kind: ShapeKind, stroke_color: SerializableColor, stroke_width: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            origin,
            kind,
            stroke_color,
            stroke_width,
            provenance: None,
        }
    }

    /// A zero-extent rectangle anchored at `origin`.
    pub fn rectangle(origin: Point, stroke_color: SerializableColor, stroke_width: f64) -> Self {
        Self::with_kind(
            origin,
            ShapeKind::Rectangle { width: 0.0, height: 0.0 },
            stroke_color,
            stroke_width,
        )
    }

    /// A zero-radius circle centered at `origin`.
    pub fn circle(origin: Point, stroke_color: SerializableColor, stroke_width: f64) -> Self {
        Self::with_kind(origin, ShapeKind::Circle { radius: 0.0 }, stroke_color, stroke_width)
    }

    /// Resize the shape so its extent reaches `point`.
    pub fn drag_to(&mut self, point: Point) {
        match &mut self.kind {
            ShapeKind::Rectangle { width, height } => {
                *width = point.x - self.origin.x;
                *height = point.y - self.origin.y;
            }
            ShapeKind::Circle { radius } => {
                *radius = self.origin.distance(point);
            }
        }
    }

    /// True when the shape has no visible extent.
    pub fn is_degenerate(&self) -> bool {
        match self.kind {
            ShapeKind::Rectangle { width, height } => {
                !width.is_finite() || !height.is_finite() || width == 0.0 || height == 0.0
            }
            ShapeKind::Circle { radius } => !radius.is_finite() || radius <= 0.0,
        }
    }

    /// Normalized rectangle geometry.
    ///
    /// Negative extents flip the rectangle around its origin, the same way
    /// canvas libraries draw `rect(x, y, -w, -h)`.
    pub fn as_rect(&self) -> Option<Rect> {
        match self.kind {
            ShapeKind::Rectangle { width, height } => {
                Some(Rect::from_origin_size(self.origin, Size::new(width, height)).abs())
            }
            ShapeKind::Circle { .. } => None,
        }
    }

    /// Circle geometry.
    pub fn as_circle(&self) -> Option<Circle> {
        match self.kind {
            ShapeKind::Circle { radius } => Some(Circle::new(self.origin, radius)),
            ShapeKind::Rectangle { .. } => None,
        }
    }
}
