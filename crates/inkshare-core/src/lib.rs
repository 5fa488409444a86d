//! InkShare Core Library
//!
//! Synchronization engine for a shared whiteboard: pointer gestures become
//! drawing primitives, primitives are appended to a shared ordered log, and
//! every client rebuilds its scene from that log.

pub mod config;
pub mod gesture;
pub mod input;
pub mod primitives;
pub mod scene;
pub mod shared_log;
pub mod tools;
pub mod whiteboard;

pub use config::{ConfigError, ConfigResult, WhiteboardConfig};
pub use gesture::{BeginOutcome, GestureTracker};
pub use input::PointerEvent;
pub use primitives::{Primitive, Provenance, RecordError, SerializableColor, Shape, ShapeId, ShapeKind, Stroke};
pub use scene::{Composite, RenderPrimitive, RenderSurface, SceneGraph, SceneReconciler};
pub use shared_log::{LogEntry, LogError, LogResult, MemoryLog, RecordId, SharedLog, Subscription};
pub use tools::{DrawingContext, Mode, ToolController, ToolKind};
pub use whiteboard::{SyncIssue, Whiteboard};

#[cfg(not(target_arch = "wasm32"))]
pub use shared_log::RelayLog;
