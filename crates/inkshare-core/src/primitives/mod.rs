//! Drawing primitives shared between clients.
//!
//! A primitive is either a freehand [`Stroke`] or a parametric [`Shape`].
//! Primitives are immutable once they reach the log; edits produce new
//! primitives.

mod color;
pub mod record;
mod shape;
mod stroke;

pub use color::{ParseColorError, SerializableColor};
pub use record::{Record, RecordError, deserialize, serialize};
pub use shape::{Shape, ShapeId, ShapeKind};
pub use stroke::Stroke;

use serde::{Deserialize, Serialize};

/// Identifies the session and per-session sequence number that wrote a record.
///
/// Used to recognise our own records when the log echoes them back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub origin: String,
    pub seq: u64,
}

impl Provenance {
    pub fn new(origin: impl Into<String>, seq: u64) -> Self {
        Self {
            origin: origin.into(),
            seq,
        }
    }
}

/// One user-drawn object.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Stroke(Stroke),
    Shape(Shape),
}

impl Primitive {
    /// The shape identifier, if this is a shape.
    pub fn shape_id(&self) -> Option<&str> {
        match self {
            Primitive::Shape(shape) => Some(&shape.id),
            Primitive::Stroke(_) => None,
        }
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        match self {
            Primitive::Stroke(s) => s.provenance.as_ref(),
            Primitive::Shape(s) => s.provenance.as_ref(),
        }
    }

    pub fn set_provenance(&mut self, provenance: Provenance) {
        match self {
            Primitive::Stroke(s) => s.provenance = Some(provenance),
            Primitive::Shape(s) => s.provenance = Some(provenance),
        }
    }

    /// True when the primitive has nothing to draw.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Primitive::Stroke(s) => s.points.len() < 2,
            Primitive::Shape(s) => s.is_degenerate(),
        }
    }
}
