//! A whiteboard session: pointer input in, log writes out, scene kept in sync.

use crate::config::WhiteboardConfig;
use crate::gesture::{BeginOutcome, GestureTracker};
use crate::input::PointerEvent;
use crate::primitives::{Primitive, Provenance, ShapeId, serialize};
use crate::scene::{self, RenderSurface, SceneGraph, SceneReconciler};
use crate::shared_log::{Addition, LogEntry, LogError, LogResult, RecordId, SharedLog, Snapshot, Subscription};
#[cfg(not(target_arch = "wasm32"))]
use crate::shared_log::RelayLog;
use crate::tools::ToolController;
use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use kurbo::Point;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use uuid::Uuid;

/// A recoverable sync problem the host may want to show.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncIssue {
    /// A log write failed. Whatever was drawn stays on the local scene.
    WriteFailure {
        operation: &'static str,
        error: LogError,
    },
    /// An erased shape had no entries in the log; treated as already gone.
    LookupMiss { shape_id: ShapeId },
}

/// Result of a log operation, handed back to the session on the next pump.
enum Completion {
    Appended {
        provenance: Provenance,
        result: LogResult<RecordId>,
    },
    Erased {
        shape_id: ShapeId,
        result: LogResult<usize>,
    },
    Cleared(LogResult<()>),
}

/// One client's view of a shared canvas.
///
/// Single-threaded: log I/O runs on a local executor that only makes
/// progress inside [`Whiteboard::pump`], which the host calls from its event
/// loop (typically once per frame).
pub struct Whiteboard<L: SharedLog + 'static, S: RenderSurface> {
    log: Rc<L>,
    scene: SceneReconciler<S>,
    tools: ToolController,
    gesture: GestureTracker,
    /// Writer tag for records from this session.
    session: String,
    next_seq: u64,
    pool: LocalPool,
    spawner: LocalSpawner,
    completions: Rc<RefCell<Vec<Completion>>>,
    issues: Vec<SyncIssue>,
    snapshots: Option<Subscription<Snapshot>>,
    additions: Option<Subscription<Addition>>,
    /// Revision of the last snapshot applied to the scene.
    applied_revision: Option<u64>,
}

impl<L: SharedLog + 'static> Whiteboard<L, SceneGraph> {
    /// Attach with an in-memory scene graph.
    pub fn headless(log: Rc<L>, config: &WhiteboardConfig) -> Self {
        Self::attach(log, SceneGraph::new(config.hit_tolerance), config)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl<S: RenderSurface> Whiteboard<RelayLog, S> {
    /// Connect to the relay at `config.relay_url` and attach to
    /// `config.collection`.
    pub fn connect(config: &WhiteboardConfig, surface: S) -> LogResult<Self> {
        let url = config
            .relay_url
            .as_deref()
            .ok_or_else(|| LogError::Unreachable("No relay_url configured".to_string()))?;
        let log = RelayLog::connect(url, &config.collection)?;
        Ok(Self::attach(Rc::new(log), surface, config))
    }

    /// [`connect`](Self::connect) with the config from the default location.
    pub fn connect_with_defaults(surface: S) -> LogResult<Self> {
        Self::connect(&WhiteboardConfig::load_or_default(), surface)
    }
}

impl<L: SharedLog + 'static, S: RenderSurface> Whiteboard<L, S> {
    /// Subscribe to the log and start a session drawing into `surface`.
    ///
    /// The scene is populated by the first [`pump`](Self::pump).
    pub fn attach(log: Rc<L>, surface: S, config: &WhiteboardConfig) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        let snapshots = log.subscribe_snapshot();
        let additions = log.subscribe_additions();
        let session = Uuid::new_v4().to_string();
        log::info!("whiteboard session {} attached to '{}'", session, config.collection);

        Self {
            log,
            scene: SceneReconciler::new(surface),
            tools: ToolController::new(config.color, config.width),
            gesture: GestureTracker::new(),
            session,
            next_seq: 0,
            pool,
            spawner,
            completions: Rc::new(RefCell::new(Vec::new())),
            issues: Vec::new(),
            snapshots: Some(snapshots),
            additions: Some(additions),
            applied_revision: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session
    }

    pub fn log(&self) -> &Rc<L> {
        &self.log
    }

    pub fn tools(&self) -> &ToolController {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolController {
        &mut self.tools
    }

    pub fn scene(&self) -> &SceneReconciler<S> {
        &self.scene
    }

    pub fn surface(&self) -> &S {
        self.scene.surface()
    }

    pub fn is_attached(&self) -> bool {
        self.snapshots.is_some() || self.additions.is_some()
    }

    /// True while a pointer gesture is in progress.
    pub fn is_drawing(&self) -> bool {
        self.gesture.is_active()
    }

    /// Sync issues raised since the last call.
    pub fn take_issues(&mut self) -> Vec<SyncIssue> {
        std::mem::take(&mut self.issues)
    }

    fn spawn<F: Future<Output = ()> + 'static>(&self, task: F) {
        if let Err(e) = self.spawner.spawn_local(task) {
            log::error!("failed to schedule log operation: {:?}", e);
        }
    }

    fn next_provenance(&mut self) -> Provenance {
        self.next_seq += 1;
        Provenance::new(self.session.clone(), self.next_seq)
    }

    /// Route a pointer event.
    pub fn pointer(&mut self, event: PointerEvent) {
        if !self.is_attached() {
            return;
        }
        match event {
            PointerEvent::Down { position } => self.pointer_down(position),
            PointerEvent::Move { position } => self.pointer_move(position),
            PointerEvent::Up { .. } => self.pointer_up(),
        }
        self.scene.flush();
    }

    fn pointer_down(&mut self, position: Point) {
        match self.gesture.begin(self.tools.mode(), self.tools.context(), position) {
            BeginOutcome::Started => {
                if let Some(primitive) = self.gesture.in_progress() {
                    self.scene.show_preview(primitive);
                }
            }
            BeginOutcome::Erase(point) => {
                self.erase_at(point);
            }
        }
    }

    fn pointer_move(&mut self, position: Point) {
        if !self.gesture.update(position) {
            return;
        }
        if let Some(primitive) = self.gesture.in_progress() {
            self.scene.show_preview(primitive);
        }
    }

    fn pointer_up(&mut self) {
        match self.gesture.end() {
            Some(primitive) => self.commit(primitive),
            None => self.scene.discard_preview(),
        }
    }

    /// Tag a finished primitive, keep it on screen and append it.
    fn commit(&mut self, mut primitive: Primitive) {
        let provenance = self.next_provenance();
        primitive.set_provenance(provenance.clone());
        self.scene.commit_local(&primitive);

        let record = serialize(&primitive);
        let log = Rc::clone(&self.log);
        let completions = Rc::clone(&self.completions);
        log::debug!("committing primitive seq {}", provenance.seq);
        self.spawn(async move {
            let result = log.append(record).await;
            completions
                .borrow_mut()
                .push(Completion::Appended { provenance, result });
        });
    }

    /// Delete the topmost shape under `point`.
    ///
    /// The shape disappears locally right away; its log entries are removed
    /// in the background. Returns the erased shape id, or `None` if no shape
    /// was hit.
    pub fn erase_at(&mut self, point: Point) -> Option<ShapeId> {
        let shape_id = self.scene.erase_at(point)?;
        let log = Rc::clone(&self.log);
        let completions = Rc::clone(&self.completions);
        let id = shape_id.clone();
        self.spawn(async move {
            let result = scene::remove_shape_records(&*log, &id).await;
            completions
                .borrow_mut()
                .push(Completion::Erased { shape_id: id, result });
        });
        Some(shape_id)
    }

    /// Wipe the canvas for everyone.
    pub fn clear_all(&mut self) {
        self.scene.clear();
        if let Some(primitive) = self.gesture.in_progress() {
            self.scene.show_preview(primitive);
        }
        let log = Rc::clone(&self.log);
        let completions = Rc::clone(&self.completions);
        self.spawn(async move {
            let result = log.remove_all().await;
            completions.borrow_mut().push(Completion::Cleared(result));
        });
        self.scene.flush();
    }

    /// Drive pending log I/O and apply whatever the log delivered.
    pub fn pump(&mut self) {
        self.pool.run_until_stalled();
        self.handle_completions();
        self.apply_feeds();
        self.scene.flush();
    }

    fn handle_completions(&mut self) {
        let completions = std::mem::take(&mut *self.completions.borrow_mut());
        for completion in completions {
            match completion {
                Completion::Appended { provenance, result } => match result {
                    Ok(id) => self.scene.bind_record(&provenance, id),
                    // The node stays on screen as a local-only node.
                    Err(error) => self.write_failed("append", error),
                },
                Completion::Erased { shape_id, result } => match result {
                    Ok(0) => {
                        log::debug!("erase of {} found nothing in the log", shape_id);
                        self.issues.push(SyncIssue::LookupMiss { shape_id });
                    }
                    Ok(n) => log::debug!("erased {} ({} entries)", shape_id, n),
                    Err(error) => self.write_failed("erase", error),
                },
                Completion::Cleared(result) => {
                    if let Err(error) = result {
                        self.write_failed("clear", error);
                    }
                }
            }
        }
    }

    fn write_failed(&mut self, operation: &'static str, error: LogError) {
        log::warn!("{} failed: {}", operation, error);
        self.issues.push(SyncIssue::WriteFailure { operation, error });
    }

    /// Apply the latest snapshot, then additions newer than it.
    ///
    /// Additions at or below the snapshot's revision are already part of it.
    /// When the snapshot only adds those additions to what is on screen, they
    /// are applied incrementally instead of reloading the scene. Additions at
    /// or below a snapshot applied earlier are never drawn.
    fn apply_feeds(&mut self) {
        let applied = self.applied_revision;
        let snapshot = self
            .snapshots
            .as_mut()
            .and_then(|s| s.drain().pop())
            .filter(|s| applied.is_none_or(|r| s.revision > r));
        let mut additions = self
            .additions
            .as_mut()
            .map(Subscription::drain)
            .unwrap_or_default();

        if let Some(snapshot) = snapshot {
            let (covered, later): (Vec<Addition>, Vec<Addition>) = additions
                .into_iter()
                .partition(|a| a.revision <= snapshot.revision);
            let covered: Vec<LogEntry> = covered.into_iter().map(|a| a.entry).collect();

            if self.scene.matches(&snapshot.entries, &covered) {
                for entry in &covered {
                    self.scene.apply_addition(entry);
                }
            } else {
                log::debug!("reloading scene at revision {}", snapshot.revision);
                self.scene.load_snapshot(&snapshot.entries);
                for entry in &covered {
                    self.scene.discard_superseded(entry);
                }
            }
            self.applied_revision = Some(snapshot.revision);
            additions = later;
        }

        for addition in &additions {
            if self.applied_revision.is_some_and(|r| addition.revision <= r) {
                log::debug!("dropping stale addition at revision {}", addition.revision);
                self.scene.discard_superseded(&addition.entry);
            } else {
                self.scene.apply_addition(&addition.entry);
            }
        }
    }

    /// Stop listening to the log and abandon any gesture in progress.
    ///
    /// Operations already scheduled are dropped unfinished. Called on drop.
    pub fn detach(&mut self) {
        if !self.is_attached() {
            return;
        }
        self.gesture.cancel();
        self.scene.discard_preview();
        if let Some(mut s) = self.snapshots.take() {
            s.close();
        }
        if let Some(mut s) = self.additions.take() {
            s.close();
        }
        log::info!("whiteboard session {} detached", self.session);
    }
}

impl<L: SharedLog + 'static, S: RenderSurface> Drop for Whiteboard<L, S> {
    fn drop(&mut self) {
        self.detach();
    }
}
