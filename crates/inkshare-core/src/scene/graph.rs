//! In-memory retained scene.

use super::{Composite, RenderPrimitive, RenderSurface};
use kurbo::Point;

/// Handle to a node in a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u64);

/// Retained list of drawn nodes, bottom to top.
///
/// Hosts that render through their own toolkit read [`SceneGraph::nodes`]
/// after each flush and paint them in order.
#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: Vec<(NodeHandle, RenderPrimitive)>,
    next_handle: u64,
    hit_tolerance: f64,
    flushes: u64,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl SceneGraph {
    /// Create an empty scene. `hit_tolerance` widens hit testing around
    /// outlines, in scene units.
    pub fn new(hit_tolerance: f64) -> Self {
        Self {
            nodes: Vec::new(),
            next_handle: 0,
            hit_tolerance,
            flushes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes bottom to top.
    pub fn nodes(&self) -> impl Iterator<Item = &RenderPrimitive> {
        self.nodes.iter().map(|(_, p)| p)
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&RenderPrimitive> {
        self.nodes.iter().find(|(h, _)| *h == handle).map(|(_, p)| p)
    }

    /// Number of times the scene was flushed.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    fn hits(&self, primitive: &RenderPrimitive, point: Point) -> bool {
        let tol = self.hit_tolerance;
        match primitive {
            RenderPrimitive::Polyline {
                points,
                width,
                composite,
                ..
            } => {
                *composite == Composite::SourceOver
                    && point_to_polyline_dist(point, points) <= width / 2.0 + tol
            }
            RenderPrimitive::Rect { rect, width, .. } => {
                let pad = width / 2.0 + tol;
                rect.inflate(pad, pad).contains(point)
            }
            RenderPrimitive::Circle { circle, width, .. } => {
                circle.center.distance(point) <= circle.radius + width / 2.0 + tol
            }
        }
    }
}

impl RenderSurface for SceneGraph {
    type Handle = NodeHandle;

    fn draw(&mut self, primitive: &RenderPrimitive) -> NodeHandle {
        let handle = NodeHandle(self.next_handle);
        self.next_handle += 1;
        self.nodes.push((handle, primitive.clone()));
        handle
    }

    fn redraw(&mut self, handle: NodeHandle, primitive: &RenderPrimitive) {
        if let Some((_, p)) = self.nodes.iter_mut().find(|(h, _)| *h == handle) {
            *p = primitive.clone();
        }
    }

    fn remove(&mut self, handle: NodeHandle) {
        self.nodes.retain(|(h, _)| *h != handle);
    }

    fn clear(&mut self) {
        self.nodes.clear();
    }

    fn hit_test(&self, point: Point) -> Vec<NodeHandle> {
        self.nodes
            .iter()
            .rev()
            .filter(|(_, p)| self.hits(p, point))
            .map(|(h, _)| *h)
            .collect()
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

/// Distance from `point` to the segment `a`-`b`.
fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = b - a;
    let pv = point - a;
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    (pv - seg * t).hypot()
}

/// Minimum distance from `point` to a polyline.
fn point_to_polyline_dist(point: Point, points: &[Point]) -> f64 {
    match points {
        [] => f64::INFINITY,
        [only] => (point - *only).hypot(),
        _ => points
            .windows(2)
            .map(|w| point_to_segment_dist(point, w[0], w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}
