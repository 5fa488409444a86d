//! Conversion between primitives and log records.
//!
//! A record is an opaque JSON object. The log enforces no schema, so
//! [`deserialize`] validates everything it reads and reports problems as
//! [`RecordError`] instead of panicking.

use super::{Primitive, Provenance, SerializableColor, Shape, ShapeKind, Stroke};
use kurbo::Point;
use serde_json::{Map, Value};
use thiserror::Error;

/// A record as stored in the shared log.
pub type Record = Map<String, Value>;

// Shape type identifiers
pub const TYPE_RECTANGLE: &str = "rectangle";
pub const TYPE_CIRCLE: &str = "circle";

// Common keys
pub const KEY_TYPE: &str = "type";
pub const KEY_ORIGIN: &str = "origin";
pub const KEY_SEQ: &str = "seq";

// Stroke keys
pub const KEY_POINTS: &str = "points";
pub const KEY_COLOR: &str = "color";
pub const KEY_WIDTH: &str = "width";
pub const KEY_ERASE: &str = "erase";

// Shape keys
pub const KEY_SHAPE_ID: &str = "shapeId";
pub const KEY_X: &str = "x";
pub const KEY_Y: &str = "y";
pub const KEY_STROKE_COLOR: &str = "strokeColor";
pub const KEY_STROKE_WIDTH: &str = "strokeWidth";
pub const KEY_HEIGHT: &str = "height";
pub const KEY_RADIUS: &str = "radius";

/// Why a record could not be turned into a primitive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("missing or invalid field `{0}`")]
    MissingField(&'static str),
    #[error("unknown shape type `{0}`")]
    UnknownType(String),
    #[error("invalid point list: {0}")]
    InvalidPoints(&'static str),
    #[error("invalid color in `{field}`: {value}")]
    InvalidColor { field: &'static str, value: String },
}

fn get_f64(record: &Record, key: &'static str) -> Result<f64, RecordError> {
    record
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or(RecordError::MissingField(key))
}

fn get_str<'a>(record: &'a Record, key: &'static str) -> Result<&'a str, RecordError> {
    record
        .get(key)
        .and_then(Value::as_str)
        .ok_or(RecordError::MissingField(key))
}

fn get_color(record: &Record, key: &'static str) -> Result<SerializableColor, RecordError> {
    let raw = get_str(record, key)?;
    raw.parse().map_err(|_| RecordError::InvalidColor {
        field: key,
        value: raw.to_string(),
    })
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Read the writer tag of a record without decoding the rest.
pub fn provenance_of(record: &Record) -> Option<Provenance> {
    let origin = record.get(KEY_ORIGIN)?.as_str()?;
    let seq = record.get(KEY_SEQ)?.as_u64()?;
    Some(Provenance::new(origin, seq))
}

fn provenance_to_record(provenance: &Option<Provenance>, record: &mut Record) {
    if let Some(p) = provenance {
        record.insert(KEY_ORIGIN.into(), Value::String(p.origin.clone()));
        record.insert(KEY_SEQ.into(), Value::from(p.seq));
    }
}

/// Convert a primitive to its record form.
///
/// Optional fields that are not set are omitted rather than written as null.
pub fn serialize(primitive: &Primitive) -> Record {
    let mut record = Record::new();
    match primitive {
        Primitive::Stroke(stroke) => {
            let points = stroke.flat_points().into_iter().map(number).collect();
            record.insert(KEY_POINTS.into(), Value::Array(points));
            record.insert(KEY_COLOR.into(), Value::String(stroke.color.to_hex()));
            record.insert(KEY_WIDTH.into(), number(stroke.width));
            if stroke.erase {
                record.insert(KEY_ERASE.into(), Value::Bool(true));
            }
            provenance_to_record(&stroke.provenance, &mut record);
        }
        Primitive::Shape(shape) => {
            record.insert(KEY_TYPE.into(), Value::String(shape.kind.tag().to_string()));
            record.insert(KEY_SHAPE_ID.into(), Value::String(shape.id.clone()));
            record.insert(KEY_X.into(), number(shape.origin.x));
            record.insert(KEY_Y.into(), number(shape.origin.y));
            record.insert(KEY_STROKE_COLOR.into(), Value::String(shape.stroke_color.to_hex()));
            record.insert(KEY_STROKE_WIDTH.into(), number(shape.stroke_width));
            match shape.kind {
                ShapeKind::Rectangle { width, height } => {
                    record.insert(KEY_WIDTH.into(), number(width));
                    record.insert(KEY_HEIGHT.into(), number(height));
                }
                ShapeKind::Circle { radius } => {
                    record.insert(KEY_RADIUS.into(), number(radius));
                }
            }
            provenance_to_record(&shape.provenance, &mut record);
        }
    }
    record
}

/// Convert a record back into a primitive.
///
/// Records with a `type` field are shapes, everything else is a stroke.
pub fn deserialize(record: &Record) -> Result<Primitive, RecordError> {
    if record.contains_key(KEY_TYPE) {
        shape_from_record(record).map(Primitive::Shape)
    } else {
        stroke_from_record(record).map(Primitive::Stroke)
    }
}

fn stroke_from_record(record: &Record) -> Result<Stroke, RecordError> {
    let raw = record
        .get(KEY_POINTS)
        .and_then(Value::as_array)
        .ok_or(RecordError::MissingField(KEY_POINTS))?;
    if raw.len() % 2 != 0 {
        return Err(RecordError::InvalidPoints("odd number of coordinates"));
    }
    if raw.len() < 4 {
        return Err(RecordError::InvalidPoints("fewer than two points"));
    }
    let coords = raw
        .iter()
        .map(|v| v.as_f64().filter(|c| c.is_finite()))
        .collect::<Option<Vec<f64>>>()
        .ok_or(RecordError::InvalidPoints("non-numeric coordinate"))?;
    let points = coords.chunks_exact(2).map(|c| Point::new(c[0], c[1])).collect();

    Ok(Stroke {
        points,
        color: get_color(record, KEY_COLOR)?,
        width: get_f64(record, KEY_WIDTH)?,
        erase: record.get(KEY_ERASE).and_then(Value::as_bool).unwrap_or(false),
        provenance: provenance_of(record),
    })
}

fn shape_from_record(record: &Record) -> Result<Shape, RecordError> {
    let tag = get_str(record, KEY_TYPE)?;
    let kind = match tag {
        TYPE_RECTANGLE => ShapeKind::Rectangle {
            width: get_f64(record, KEY_WIDTH)?,
            height: get_f64(record, KEY_HEIGHT)?,
        },
        TYPE_CIRCLE => ShapeKind::Circle {
            radius: get_f64(record, KEY_RADIUS)?,
        },
        other => return Err(RecordError::UnknownType(other.to_string())),
    };

    Ok(Shape {
        id: get_str(record, KEY_SHAPE_ID)?.to_string(),
        origin: Point::new(get_f64(record, KEY_X)?, get_f64(record, KEY_Y)?),
        kind,
        stroke_color: get_color(record, KEY_STROKE_COLOR)?,
        stroke_width: get_f64(record, KEY_STROKE_WIDTH)?,
        provenance: provenance_of(record),
    })
}
