//! Scene reconciliation: keeping the rendered scene in step with the log.
//!
//! The reconciler owns the rendering surface and one node per log entry
//! currently present, plus the local entries still waiting for their echo.
//! Nodes are never updated in place: an entry is either drawn once or removed.

mod graph;

pub use graph::{NodeHandle, SceneGraph};

use crate::primitives::record::{self, KEY_SHAPE_ID};
use crate::primitives::{Primitive, Provenance, SerializableColor, ShapeId, ShapeKind};
use crate::shared_log::{LogEntry, LogResult, RecordId, SharedLog};
use kurbo::{Circle, Point, Rect};
use std::fmt::Debug;
use std::hash::Hash;

/// How a primitive is composited onto the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Composite {
    /// Paint color.
    #[default]
    SourceOver,
    /// Paint transparency (legacy eraser strokes).
    DestinationOut,
}

/// A primitive in the form a rendering surface draws it.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderPrimitive {
    Polyline {
        points: Vec<Point>,
        color: SerializableColor,
        width: f64,
        composite: Composite,
    },
    Rect {
        rect: Rect,
        color: SerializableColor,
        width: f64,
    },
    Circle {
        circle: Circle,
        color: SerializableColor,
        width: f64,
    },
}

impl RenderPrimitive {
    /// Build the render form of a primitive.
    ///
    /// Returns `None` for shapes without extent, which are not drawn.
    pub fn from_primitive(primitive: &Primitive) -> Option<Self> {
        if primitive.is_degenerate() {
            return None;
        }
        match primitive {
            Primitive::Stroke(stroke) => Some(RenderPrimitive::Polyline {
                points: stroke.points.clone(),
                color: stroke.color,
                width: stroke.width,
                composite: if stroke.erase {
                    Composite::DestinationOut
                } else {
                    Composite::SourceOver
                },
            }),
            Primitive::Shape(shape) => match shape.kind {
                ShapeKind::Rectangle { .. } => shape.as_rect().map(|rect| RenderPrimitive::Rect {
                    rect,
                    color: shape.stroke_color,
                    width: shape.stroke_width,
                }),
                ShapeKind::Circle { .. } => shape.as_circle().map(|circle| RenderPrimitive::Circle {
                    circle,
                    color: shape.stroke_color,
                    width: shape.stroke_width,
                }),
            },
        }
    }
}

/// Capability interface of the 2-D drawing surface.
pub trait RenderSurface {
    /// Opaque handle to a drawn node.
    type Handle: Copy + Eq + Hash + Debug;

    /// Draw a new node on top of the scene.
    fn draw(&mut self, primitive: &RenderPrimitive) -> Self::Handle;

    /// Replace the geometry of an existing node, keeping its stacking order.
    fn redraw(&mut self, handle: Self::Handle, primitive: &RenderPrimitive);

    /// Destroy a node. Unknown handles are ignored.
    fn remove(&mut self, handle: Self::Handle);

    /// Destroy every node.
    fn clear(&mut self);

    /// Nodes containing `point`, topmost first.
    fn hit_test(&self, point: Point) -> Vec<Self::Handle>;

    /// Push pending changes to the screen in one batch.
    fn flush(&mut self) {}
}

/// Identity of a scene node, used to match log entries with what is drawn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// Records written by this engine, recognised by their writer tag.
    Tagged(Provenance),
    /// Records without a tag, recognised by storage id.
    Stored(RecordId),
}

impl NodeKey {
    fn for_entry(entry: &LogEntry) -> Self {
        match record::provenance_of(&entry.record) {
            Some(p) => NodeKey::Tagged(p),
            None => NodeKey::Stored(entry.id.clone()),
        }
    }
}

#[derive(Debug)]
struct SceneNode<H> {
    key: NodeKey,
    record_id: Option<RecordId>,
    shape_id: Option<ShapeId>,
    /// Kept so the node can be drawn again after a reload.
    render: Option<RenderPrimitive>,
    /// `None` when the primitive has nothing to draw.
    handle: Option<H>,
}

impl<H> SceneNode<H> {
    fn is_shape(&self, shape_id: &str) -> bool {
        self.shape_id.as_deref() == Some(shape_id)
    }
}

/// Owns the rendered scene and reconciles it with the log.
pub struct SceneReconciler<S: RenderSurface> {
    surface: S,
    /// Nodes backed by log entries, in log order.
    nodes: Vec<SceneNode<S::Handle>>,
    /// Local commits not yet seen in the log, in commit order. Drawn above
    /// `nodes` and kept across reloads until their echo arrives.
    local: Vec<SceneNode<S::Handle>>,
    /// The in-progress gesture, drawn above everything else.
    preview: Option<(S::Handle, RenderPrimitive)>,
}

impl<S: RenderSurface> SceneReconciler<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            nodes: Vec::new(),
            local: Vec::new(),
            preview: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Number of nodes, including local ones awaiting their echo but not the
    /// preview.
    pub fn len(&self) -> usize {
        self.nodes.len() + self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.local.is_empty()
    }

    /// Number of local nodes not yet seen in the log.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Node keys in scene order: log-backed nodes, then local ones.
    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.iter().chain(&self.local).map(|n| &n.key)
    }

    /// Ids of the shapes currently in the scene.
    pub fn shape_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().chain(&self.local).filter_map(|n| n.shape_id.as_deref())
    }

    pub fn contains_shape(&self, shape_id: &str) -> bool {
        self.nodes.iter().chain(&self.local).any(|n| n.is_shape(shape_id))
    }

    fn contains_record(&self, id: &RecordId) -> bool {
        self.nodes.iter().any(|n| n.record_id.as_ref() == Some(id))
    }

    fn local_position(&self, key: &NodeKey) -> Option<usize> {
        self.local.iter().position(|n| &n.key == key)
    }

    fn node(&mut self, key: NodeKey, record_id: Option<RecordId>, primitive: &Primitive) -> SceneNode<S::Handle> {
        let render = RenderPrimitive::from_primitive(primitive);
        let handle = render.as_ref().map(|rp| self.surface.draw(rp));
        SceneNode {
            key,
            record_id,
            shape_id: primitive.shape_id().map(str::to_string),
            render,
            handle,
        }
    }

    /// Move the preview back above everything drawn since it was shown.
    fn raise_preview(&mut self) {
        if let Some((handle, rp)) = self.preview.take() {
            self.surface.remove(handle);
            self.preview = Some((self.surface.draw(&rp), rp));
        }
    }

    /// Replace the log-backed scene with the given log contents.
    ///
    /// Local nodes found in the snapshot become regular nodes; the others are
    /// drawn again on top, followed by the preview. Malformed records are
    /// skipped with a warning.
    pub fn load_snapshot(&mut self, entries: &[LogEntry]) {
        self.surface.clear();
        self.nodes.clear();

        let mut skipped = 0usize;
        for entry in entries {
            match record::deserialize(&entry.record) {
                Ok(primitive) => {
                    let key = NodeKey::for_entry(entry);
                    if let Some(pos) = self.local_position(&key) {
                        self.local.remove(pos);
                    }
                    let node = self.node(key, Some(entry.id.clone()), &primitive);
                    self.nodes.push(node);
                }
                Err(e) => {
                    skipped += 1;
                    log::warn!("skipping malformed record {}: {}", entry.id, e);
                }
            }
        }
        for node in &mut self.local {
            node.handle = node.render.as_ref().map(|rp| self.surface.draw(rp));
        }
        if let Some((handle, rp)) = &mut self.preview {
            *handle = self.surface.draw(rp);
        }
        log::debug!(
            "loaded snapshot: {} nodes, {} local, {} skipped",
            self.nodes.len(),
            self.local.len(),
            skipped
        );
    }

    /// Add one record from the log without touching existing nodes.
    ///
    /// Returns true if a node was drawn. Records already in the scene are
    /// not drawn again, and the echo of a local commit adopts the local node.
    pub fn apply_addition(&mut self, entry: &LogEntry) -> bool {
        if self.contains_record(&entry.id) {
            return false;
        }
        let key = NodeKey::for_entry(entry);
        if let Some(pos) = self.local_position(&key) {
            let mut node = self.local.remove(pos);
            node.record_id = Some(entry.id.clone());
            self.nodes.push(node);
            return false;
        }
        match record::deserialize(&entry.record) {
            Ok(primitive) => {
                let node = self.node(key, Some(entry.id.clone()), &primitive);
                self.nodes.push(node);
                self.raise_preview();
                true
            }
            Err(e) => {
                log::warn!("skipping malformed record {}: {}", entry.id, e);
                false
            }
        }
    }

    /// Drop the local node for an entry the log has already removed again.
    ///
    /// Returns true if a local node was dropped.
    pub fn discard_superseded(&mut self, entry: &LogEntry) -> bool {
        let key = NodeKey::for_entry(entry);
        let Some(pos) = self.local_position(&key) else {
            return false;
        };
        let node = self.local.remove(pos);
        if let Some(h) = node.handle {
            self.surface.remove(h);
        }
        log::debug!("local record {} was removed before its echo", entry.id);
        true
    }

    /// True if reloading `entries` would produce the current log-backed scene
    /// followed by `pending`, i.e. a snapshot that only reflects additions not
    /// yet applied. Local nodes awaiting their echo do not take part.
    pub fn matches(&self, entries: &[LogEntry], pending: &[LogEntry]) -> bool {
        let snapshot_keys = entries
            .iter()
            .filter(|e| record::deserialize(&e.record).is_ok())
            .map(NodeKey::for_entry);
        let mut expected: Vec<NodeKey> = self.nodes.iter().map(|n| n.key.clone()).collect();
        for entry in pending {
            if self.contains_record(&entry.id) || record::deserialize(&entry.record).is_err() {
                continue;
            }
            let key = NodeKey::for_entry(entry);
            if !expected.contains(&key) {
                expected.push(key);
            }
        }
        snapshot_keys.eq(expected)
    }

    /// Show or update the in-progress primitive.
    pub fn show_preview(&mut self, primitive: &Primitive) {
        match (RenderPrimitive::from_primitive(primitive), self.preview.as_mut()) {
            (Some(rp), Some((handle, current))) => {
                self.surface.redraw(*handle, &rp);
                *current = rp;
            }
            (Some(rp), None) => {
                let handle = self.surface.draw(&rp);
                self.preview = Some((handle, rp));
            }
            (None, _) => self.discard_preview(),
        }
    }

    /// Remove the preview node, if any.
    pub fn discard_preview(&mut self) {
        if let Some((handle, _)) = self.preview.take() {
            self.surface.remove(handle);
        }
    }

    /// Turn the preview into a local node for a primitive just committed.
    /// The node is keyed by the primitive's writer tag so the echo from the
    /// log is recognised.
    pub fn commit_local(&mut self, primitive: &Primitive) {
        let Some(provenance) = primitive.provenance().cloned() else {
            log::warn!("local primitive without writer tag, not drawn");
            self.discard_preview();
            return;
        };
        let render = RenderPrimitive::from_primitive(primitive);
        let handle = match (self.preview.take(), &render) {
            (Some((handle, _)), Some(rp)) => {
                self.surface.redraw(handle, rp);
                Some(handle)
            }
            (Some((handle, _)), None) => {
                self.surface.remove(handle);
                None
            }
            (None, Some(rp)) => Some(self.surface.draw(rp)),
            (None, None) => None,
        };
        self.local.push(SceneNode {
            key: NodeKey::Tagged(provenance),
            record_id: None,
            shape_id: primitive.shape_id().map(str::to_string),
            render,
            handle,
        });
    }

    /// Record the storage id assigned to a local node.
    pub fn bind_record(&mut self, provenance: &Provenance, id: RecordId) {
        let key = NodeKey::Tagged(provenance.clone());
        if let Some(pos) = self.local_position(&key) {
            self.local[pos].record_id = Some(id);
        }
    }

    /// Find the topmost shape under `point`, remove it from the scene and
    /// return its id. Strokes are not erasable.
    pub fn erase_at(&mut self, point: Point) -> Option<ShapeId> {
        let hits = self.surface.hit_test(point);
        let shape_id = hits.iter().find_map(|h| {
            self.nodes
                .iter()
                .chain(&self.local)
                .find(|n| n.handle.as_ref() == Some(h))
                .and_then(|n| n.shape_id.clone())
        })?;
        self.remove_shape(&shape_id);
        Some(shape_id)
    }

    /// Remove every node carrying `shape_id`. Returns false if the shape is
    /// not in the scene.
    pub fn remove_shape(&mut self, shape_id: &str) -> bool {
        let mut found = false;
        let mut handles = Vec::new();
        for list in [&mut self.nodes, &mut self.local] {
            list.retain(|n| {
                if n.is_shape(shape_id) {
                    found = true;
                    handles.extend(n.handle);
                    false
                } else {
                    true
                }
            });
        }
        for handle in handles {
            self.surface.remove(handle);
        }
        found
    }

    /// Destroy every node, including local ones and the preview.
    pub fn clear(&mut self) {
        self.surface.clear();
        self.nodes.clear();
        self.local.clear();
        self.preview = None;
    }

    /// Push pending changes to the surface.
    pub fn flush(&mut self) {
        self.surface.flush();
    }
}

/// Delete every log entry carrying `shape_id`.
///
/// Returns the number of entries removed; zero means the shape was already
/// gone, which is not an error.
pub async fn remove_shape_records<L: SharedLog + ?Sized>(log: &L, shape_id: &str) -> LogResult<usize> {
    let matches = log
        .query_by_field(KEY_SHAPE_ID, &serde_json::Value::String(shape_id.to_string()))
        .await?;
    for entry in &matches {
        log.remove_by_id(&entry.id).await?;
    }
    Ok(matches.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Record, Shape, Stroke, serialize};
    use crate::shared_log::{MemoryLog, block_on};

    fn tagged(mut primitive: Primitive, seq: u64) -> Primitive {
        primitive.set_provenance(Provenance::new("session-a", seq));
        primitive
    }

    fn stroke(x: f64) -> Primitive {
        let mut s = Stroke::begin(Point::new(x, 0.0), SerializableColor::black(), 2.0);
        s.push(Point::new(x + 10.0, 0.0));
        Primitive::Stroke(s)
    }

    fn rect_at(x: f64, y: f64) -> Primitive {
        let mut s = Shape::rectangle(Point::new(x, y), SerializableColor::black(), 2.0);
        s.drag_to(Point::new(x + 20.0, y + 20.0));
        Primitive::Shape(s)
    }

    fn entry(id: &str, primitive: &Primitive) -> LogEntry {
        LogEntry {
            id: RecordId::from(id),
            record: serialize(primitive),
        }
    }

    #[test]
    fn test_load_snapshot_skips_malformed_records() {
        let mut scene = SceneReconciler::new(SceneGraph::default());
        let mut bad = Record::new();
        bad.insert("type".into(), serde_json::json!("triangle"));
        let entries = vec![
            entry("a", &stroke(0.0)),
            LogEntry {
                id: RecordId::from("bad"),
                record: bad,
            },
            entry("b", &rect_at(0.0, 0.0)),
        ];

        scene.load_snapshot(&entries);
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.surface().len(), 2);

        scene.load_snapshot(&entries);
        assert_eq!(scene.surface().len(), 2);
    }

    #[test]
    fn test_addition_is_drawn_once() {
        let mut scene = SceneReconciler::new(SceneGraph::default());
        let e = entry("a", &stroke(0.0));
        assert!(scene.apply_addition(&e));
        assert!(!scene.apply_addition(&e));
        assert_eq!(scene.surface().len(), 1);
    }

    #[test]
    fn test_echo_of_local_commit_binds_instead_of_drawing() {
        let mut scene = SceneReconciler::new(SceneGraph::default());
        let local = tagged(stroke(0.0), 1);
        scene.show_preview(&local);
        scene.commit_local(&local);
        assert_eq!(scene.surface().len(), 1);

        assert!(!scene.apply_addition(&entry("r1", &local)));
        assert_eq!(scene.len(), 1);
        assert_eq!(scene.surface().len(), 1);

        // Snapshot already reflects what we drew.
        assert!(scene.matches(&[entry("r1", &local)], &[]));
    }

    #[test]
    fn test_matches_accounts_for_pending_additions() {
        let mut scene = SceneReconciler::new(SceneGraph::default());
        let a = entry("a", &stroke(0.0));
        let b = entry("b", &stroke(5.0));
        scene.load_snapshot(std::slice::from_ref(&a));

        assert!(scene.matches(&[a.clone(), b.clone()], std::slice::from_ref(&b)));
        assert!(!scene.matches(&[a.clone(), b.clone()], &[]));
        assert!(!scene.matches(&[b.clone(), a.clone()], std::slice::from_ref(&b)));
        assert!(!scene.matches(&[], &[]));
    }

    #[test]
    fn test_preview_survives_reload_and_stays_on_top() {
        let mut scene = SceneReconciler::new(SceneGraph::default());
        let preview = rect_at(100.0, 100.0);
        scene.show_preview(&preview);

        scene.load_snapshot(&[entry("a", &stroke(0.0))]);
        assert_eq!(scene.surface().len(), 2);

        scene.apply_addition(&entry("b", &stroke(5.0)));
        let top = scene.surface().nodes().last().unwrap();
        assert_eq!(top, &RenderPrimitive::from_primitive(&preview).unwrap());

        scene.discard_preview();
        assert_eq!(scene.surface().len(), 2);
        assert_eq!(scene.len(), 2);
    }

    #[test]
    fn test_degenerate_preview_is_not_drawn() {
        let mut scene = SceneReconciler::new(SceneGraph::default());
        let shape = Shape::circle(Point::ZERO, SerializableColor::black(), 1.0);
        scene.show_preview(&Primitive::Shape(shape));
        assert!(scene.surface().is_empty());
    }

    #[test]
    fn test_erase_at_removes_topmost_shape_only() {
        let mut scene = SceneReconciler::new(SceneGraph::new(0.0));
        let under = rect_at(0.0, 0.0);
        let over = rect_at(10.0, 10.0);
        scene.load_snapshot(&[
            entry("s", &stroke(12.0)),
            entry("a", &under),
            entry("b", &over),
        ]);

        let erased = scene.erase_at(Point::new(15.0, 15.0));
        assert_eq!(erased.as_deref(), over.shape_id());
        assert_eq!(scene.len(), 2);
        assert!(!scene.contains_shape(over.shape_id().unwrap()));
        assert!(scene.contains_shape(under.shape_id().unwrap()));
    }

    #[test]
    fn test_erase_at_ignores_strokes_and_empty_space() {
        let mut scene = SceneReconciler::new(SceneGraph::new(0.0));
        scene.load_snapshot(&[entry("s", &stroke(0.0))]);
        assert_eq!(scene.erase_at(Point::new(5.0, 0.0)), None);
        assert_eq!(scene.erase_at(Point::new(500.0, 500.0)), None);
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn test_erase_removes_every_node_of_a_duplicated_shape() {
        let mut scene = SceneReconciler::new(SceneGraph::new(0.0));
        let shape = rect_at(0.0, 0.0);
        scene.load_snapshot(&[entry("a", &shape), entry("a-dup", &shape)]);
        assert_eq!(scene.surface().len(), 2);

        let erased = scene.erase_at(Point::new(10.0, 10.0));
        assert_eq!(erased.as_deref(), shape.shape_id());
        assert_eq!(scene.len(), 0);
        assert!(scene.surface().is_empty());
        assert_eq!(scene.erase_at(Point::new(10.0, 10.0)), None);
    }

    #[test]
    fn test_unconfirmed_local_node_is_outside_reload_comparison() {
        let mut scene = SceneReconciler::new(SceneGraph::default());
        let local = tagged(stroke(0.0), 1);
        scene.commit_local(&local);
        let remote = entry("b", &stroke(5.0));

        // A snapshot that does not know the local commit yet still matches.
        assert!(scene.matches(std::slice::from_ref(&remote), std::slice::from_ref(&remote)));
        assert!(!scene.matches(&[], std::slice::from_ref(&remote)));
    }

    #[test]
    fn test_reload_keeps_unconfirmed_local_node_on_top() {
        let mut scene = SceneReconciler::new(SceneGraph::default());
        let local = tagged(stroke(0.0), 1);
        scene.commit_local(&local);

        scene.load_snapshot(&[entry("b", &stroke(5.0))]);
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.local_len(), 1);
        let top = scene.surface().nodes().last().unwrap();
        assert_eq!(top, &RenderPrimitive::from_primitive(&local).unwrap());

        // The echo inside a later snapshot turns it into a regular node.
        scene.load_snapshot(&[entry("b", &stroke(5.0)), entry("r1", &local)]);
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.local_len(), 0);
        assert_eq!(scene.surface().len(), 2);
    }

    #[test]
    fn test_discard_superseded_drops_only_local_nodes() {
        let mut scene = SceneReconciler::new(SceneGraph::default());
        let local = tagged(stroke(0.0), 1);
        scene.commit_local(&local);
        let remote = entry("b", &stroke(5.0));
        scene.apply_addition(&remote);

        assert!(!scene.discard_superseded(&remote));
        assert!(scene.discard_superseded(&entry("r1", &local)));
        assert_eq!(scene.len(), 1);
        assert_eq!(scene.surface().len(), 1);
    }

    #[test]
    fn test_remove_shape_records_counts_matches() {
        let log = MemoryLog::new();
        let shape = rect_at(0.0, 0.0);
        log.append_record(serialize(&stroke(0.0))).unwrap();
        log.append_record(serialize(&shape)).unwrap();

        let id = shape.shape_id().unwrap();
        assert_eq!(block_on(remove_shape_records(&log, id)).unwrap(), 1);
        assert_eq!(log.len(), 1);
        assert_eq!(block_on(remove_shape_records(&log, id)).unwrap(), 0);
    }
}
