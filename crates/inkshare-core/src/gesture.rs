//! Pointer gestures to primitives.

use crate::primitives::{Primitive, Shape, Stroke};
use crate::tools::{DrawingContext, Mode, ToolKind};
use kurbo::Point;

/// State of the gesture tracker.
#[derive(Debug, Clone, Default)]
pub enum GestureState {
    /// No pointer is down.
    #[default]
    Idle,
    /// A primitive is being drawn.
    Active {
        /// Tool and style captured at `begin`.
        context: DrawingContext,
        /// The primitive being built; local only until `end`.
        primitive: Primitive,
    },
}

/// What a pointer-down turned into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BeginOutcome {
    /// A new in-progress primitive was created.
    Started,
    /// Eraser mode: hit-test and delete at this point instead.
    Erase(Point),
}

/// Turns pointer down/move/up sequences into primitives.
///
/// A primitive is committed exactly once, at `end`, so the number of log
/// appends follows the number of gestures rather than the pointer sampling
/// rate.
#[derive(Debug, Clone, Default)]
pub struct GestureTracker {
    state: GestureState,
}

impl GestureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pointer down.
    pub fn begin(&mut self, mode: Mode, context: DrawingContext, point: Point) -> BeginOutcome {
        let tool = match mode {
            Mode::Eraser => {
                self.state = GestureState::Idle;
                return BeginOutcome::Erase(point);
            }
            Mode::Draw(tool) => tool,
        };
        let context = DrawingContext { tool, ..context };
        let primitive = match tool {
            ToolKind::Brush => Primitive::Stroke(Stroke::begin(point, context.color, context.width)),
            ToolKind::Rectangle => Primitive::Shape(Shape::rectangle(point, context.color, context.width)),
            ToolKind::Circle => Primitive::Shape(Shape::circle(point, context.color, context.width)),
        };
        log::trace!("gesture begin: {:?} at ({}, {})", tool, point.x, point.y);
        self.state = GestureState::Active { context, primitive };
        BeginOutcome::Started
    }

    /// Pointer move. Returns true if the in-progress primitive changed.
    pub fn update(&mut self, point: Point) -> bool {
        match &mut self.state {
            GestureState::Active { primitive, .. } => {
                match primitive {
                    Primitive::Stroke(stroke) => stroke.push(point),
                    Primitive::Shape(shape) => shape.drag_to(point),
                }
                true
            }
            GestureState::Idle => false,
        }
    }

    /// Pointer up. Returns the finished primitive, ready to append.
    ///
    /// A shape that never got a nonzero extent (a click without a drag) is
    /// dropped.
    pub fn end(&mut self) -> Option<Primitive> {
        match std::mem::take(&mut self.state) {
            GestureState::Active { primitive, .. } if !primitive.is_degenerate() => Some(primitive),
            GestureState::Active { .. } => {
                log::debug!("gesture ended without extent, nothing to commit");
                None
            }
            GestureState::Idle => None,
        }
    }

    /// Abandon the current gesture without committing.
    pub fn cancel(&mut self) {
        self.state = GestureState::Idle;
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, GestureState::Active { .. })
    }

    /// The primitive being drawn, for local rendering.
    pub fn in_progress(&self) -> Option<&Primitive> {
        match &self.state {
            GestureState::Active { primitive, .. } => Some(primitive),
            GestureState::Idle => None,
        }
    }

    /// The context captured when the current gesture began.
    pub fn context(&self) -> Option<&DrawingContext> {
        match &self.state {
            GestureState::Active { context, .. } => Some(context),
            GestureState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{SerializableColor, ShapeKind};
    use crate::tools::ToolController;

    fn begin(tracker: &mut GestureTracker, tools: &ToolController, x: f64, y: f64) -> BeginOutcome {
        tracker.begin(tools.mode(), tools.context(), Point::new(x, y))
    }

    #[test]
    fn test_stroke_gesture_records_every_sample() {
        let tools = ToolController::default();
        let mut tracker = GestureTracker::new();

        assert_eq!(begin(&mut tracker, &tools, 10.0, 10.0), BeginOutcome::Started);
        assert!(tracker.update(Point::new(50.0, 10.0)));
        assert!(tracker.update(Point::new(50.0, 40.0)));

        let Some(Primitive::Stroke(stroke)) = tracker.end() else {
            panic!("expected a stroke");
        };
        assert_eq!(stroke.flat_points(), vec![10.0, 10.0, 10.0, 10.0, 50.0, 10.0, 50.0, 40.0]);
        assert_eq!(stroke.color, tools.color());
        assert_eq!(stroke.width, tools.width());
        assert!(!tracker.is_active());
    }

    #[test]
    fn test_point_count_is_samples_plus_duplicate() {
        let tools = ToolController::default();
        let mut tracker = GestureTracker::new();
        begin(&mut tracker, &tools, 0.0, 0.0);
        for i in 1..=17 {
            tracker.update(Point::new(i as f64, 0.0));
        }
        let Some(Primitive::Stroke(stroke)) = tracker.end() else {
            panic!("expected a stroke");
        };
        assert_eq!(stroke.points.len(), 17 + 2);
    }

    #[test]
    fn test_circle_gesture() {
        let mut tools = ToolController::default();
        tools.set_tool(ToolKind::Circle);
        let mut tracker = GestureTracker::new();

        begin(&mut tracker, &tools, 0.0, 0.0);
        tracker.update(Point::new(30.0, 40.0));

        let Some(Primitive::Shape(shape)) = tracker.end() else {
            panic!("expected a shape");
        };
        assert_eq!(shape.kind, ShapeKind::Circle { radius: 50.0 });
        assert_eq!(shape.origin, Point::ZERO);
    }

    #[test]
    fn test_style_change_mid_gesture_is_ignored() {
        let mut tools = ToolController::default();
        let mut tracker = GestureTracker::new();
        begin(&mut tracker, &tools, 0.0, 0.0);

        tools.set_color(SerializableColor::rgb(255, 0, 0));
        tools.set_width(30.0);
        tracker.update(Point::new(5.0, 5.0));

        let Some(Primitive::Stroke(stroke)) = tracker.end() else {
            panic!("expected a stroke");
        };
        assert_eq!(stroke.color, SerializableColor::black());
        assert_eq!(stroke.width, 5.0);
    }

    #[test]
    fn test_eraser_does_not_start_gesture() {
        let mut tools = ToolController::default();
        tools.toggle_eraser();
        let mut tracker = GestureTracker::new();

        let outcome = begin(&mut tracker, &tools, 3.0, 4.0);
        assert_eq!(outcome, BeginOutcome::Erase(Point::new(3.0, 4.0)));
        assert!(!tracker.is_active());
        assert!(!tracker.update(Point::new(9.0, 9.0)));
        assert!(tracker.end().is_none());
    }

    #[test]
    fn test_end_when_idle_is_noop() {
        let mut tracker = GestureTracker::new();
        assert!(tracker.end().is_none());
        assert!(tracker.end().is_none());
    }

    #[test]
    fn test_click_without_drag_drops_shape() {
        let mut tools = ToolController::default();
        tools.set_tool(ToolKind::Rectangle);
        let mut tracker = GestureTracker::new();

        begin(&mut tracker, &tools, 5.0, 5.0);
        assert!(tracker.in_progress().is_some());
        assert!(tracker.end().is_none());
    }

    #[test]
    fn test_cancel_interaction() {
        let tools = ToolController::default();
        let mut tracker = GestureTracker::new();
        begin(&mut tracker, &tools, 0.0, 0.0);
        assert!(tracker.is_active());
        assert!(tracker.context().is_some());

        tracker.cancel();
        assert!(!tracker.is_active());
        assert!(tracker.end().is_none());
    }
}
