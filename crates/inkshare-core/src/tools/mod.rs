//! Tool and style selection.

use crate::primitives::SerializableColor;
use serde::{Deserialize, Serialize};

/// Drawing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Brush,
    Rectangle,
    Circle,
}

/// What a pointer-down does right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Create a primitive with the given tool.
    Draw(ToolKind),
    /// Delete the shape under the pointer.
    Eraser,
}

/// Tool and style captured at the start of a gesture.
///
/// Style changes made while a gesture is in progress only apply to the next
/// gesture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawingContext {
    pub tool: ToolKind,
    pub color: SerializableColor,
    pub width: f64,
}

/// Tracks the active tool, eraser toggle and current style.
#[derive(Debug, Clone)]
pub struct ToolController {
    active_tool: ToolKind,
    eraser_active: bool,
    /// Tool to restore when the eraser is toggled off.
    previous_tool: Option<ToolKind>,
    color: SerializableColor,
    width: f64,
}

impl Default for ToolController {
    fn default() -> Self {
        Self::new(SerializableColor::black(), 5.0)
    }
}

impl ToolController {
    /// Create a controller with the brush selected.
    pub fn new(color: SerializableColor, width: f64) -> Self {
        Self {
            active_tool: ToolKind::default(),
            eraser_active: false,
            previous_tool: None,
            color,
            width,
        }
    }

    /// Select a drawing tool. Leaves eraser mode if it was on.
    pub fn set_tool(&mut self, tool: ToolKind) {
        self.active_tool = tool;
        self.eraser_active = false;
        self.previous_tool = None;
    }

    pub fn set_color(&mut self, color: SerializableColor) {
        self.color = color;
    }

    pub fn set_width(&mut self, width: f64) {
        self.width = width;
    }

    /// Flip eraser mode.
    ///
    /// Turning it on remembers the active tool; turning it off restores that
    /// tool rather than falling back to the brush.
    pub fn toggle_eraser(&mut self) {
        if self.eraser_active {
            self.eraser_active = false;
            if let Some(tool) = self.previous_tool.take() {
                self.active_tool = tool;
            }
        } else {
            self.previous_tool = Some(self.active_tool);
            self.eraser_active = true;
        }
    }

    pub fn mode(&self) -> Mode {
        if self.eraser_active {
            Mode::Eraser
        } else {
            Mode::Draw(self.active_tool)
        }
    }

    pub fn is_eraser(&self) -> bool {
        self.eraser_active
    }

    pub fn active_tool(&self) -> ToolKind {
        self.active_tool
    }

    pub fn color(&self) -> SerializableColor {
        self.color
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Snapshot of the current tool and style for a new gesture.
    pub fn context(&self) -> DrawingContext {
        DrawingContext {
            tool: self.active_tool,
            color: self.color,
            width: self.width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_selection() {
        let mut tc = ToolController::default();
        assert_eq!(tc.mode(), Mode::Draw(ToolKind::Brush));

        tc.set_tool(ToolKind::Rectangle);
        assert_eq!(tc.mode(), Mode::Draw(ToolKind::Rectangle));
    }

    #[test]
    fn test_eraser_toggle_restores_previous_tool() {
        let mut tc = ToolController::default();
        tc.set_tool(ToolKind::Rectangle);

        tc.toggle_eraser();
        assert_eq!(tc.mode(), Mode::Eraser);
        assert!(tc.is_eraser());

        tc.toggle_eraser();
        assert_eq!(tc.mode(), Mode::Draw(ToolKind::Rectangle));
    }

    #[test]
    fn test_set_tool_leaves_eraser() {
        let mut tc = ToolController::default();
        tc.toggle_eraser();
        tc.set_tool(ToolKind::Circle);
        assert_eq!(tc.mode(), Mode::Draw(ToolKind::Circle));

        // Toggling again must not bring back the pre-eraser brush.
        tc.toggle_eraser();
        tc.toggle_eraser();
        assert_eq!(tc.active_tool(), ToolKind::Circle);
    }

    #[test]
    fn test_context_captures_style() {
        let mut tc = ToolController::default();
        tc.set_color(SerializableColor::rgb(0, 0, 255));
        tc.set_width(12.0);
        let ctx = tc.context();

        tc.set_width(1.0);
        assert_eq!(ctx.width, 12.0);
        assert_eq!(ctx.color, SerializableColor::rgb(0, 0, 255));
        assert_eq!(ctx.tool, ToolKind::Brush);
    }
}
