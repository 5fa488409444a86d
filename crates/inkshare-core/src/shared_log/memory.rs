//! In-memory shared log.

use super::{
    Addition, BoxFuture, LogEntry, LogError, LogResult, RecordId, SharedLog, Snapshot,
    Subscription,
};
use crate::primitives::Record;
use futures::channel::mpsc::UnboundedSender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct LogState {
    entries: Vec<LogEntry>,
    revision: u64,
    unreachable: bool,
    snapshot_subs: Vec<UnboundedSender<Snapshot>>,
    addition_subs: Vec<UnboundedSender<Addition>>,
}

impl LogState {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            revision: self.revision,
            entries: self.entries.clone(),
        }
    }

    fn check_reachable(&self) -> LogResult<()> {
        if self.unreachable {
            Err(LogError::Unreachable("memory log is offline".to_string()))
        } else {
            Ok(())
        }
    }

    /// Bump the revision and push the new contents to snapshot feeds.
    fn changed(&mut self) {
        self.revision += 1;
        let snapshot = self.snapshot();
        self.snapshot_subs
            .retain(|tx| tx.unbounded_send(snapshot.clone()).is_ok());
    }
}

/// A shared log held in process memory.
///
/// Thread-safe, so one instance can back several whiteboards in a test or be
/// hosted by the relay server. Every mutation is applied synchronously; the
/// [`SharedLog`] futures are ready on first poll.
#[derive(Default)]
pub struct MemoryLog {
    state: Mutex<LogState>,
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the store going offline (writes fail with `Unreachable`).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Number of records currently in the log.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current revision; bumps on every change.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// The current contents.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    /// Append a record.
    pub fn append_record(&self, record: Record) -> LogResult<RecordId> {
        let mut state = self.lock();
        state.check_reachable()?;

        let id = RecordId(Uuid::new_v4().simple().to_string());
        let entry = LogEntry {
            id: id.clone(),
            record,
        };
        state.entries.push(entry.clone());
        state.changed();

        let addition = Addition {
            revision: state.revision,
            entry,
        };
        state
            .addition_subs
            .retain(|tx| tx.unbounded_send(addition.clone()).is_ok());
        log::debug!("appended {} at revision {}", id, state.revision);
        Ok(id)
    }

    /// Remove a record by id; a missing id is not an error.
    pub fn remove_record(&self, id: &RecordId) -> LogResult<()> {
        let mut state = self.lock();
        state.check_reachable()?;

        let before = state.entries.len();
        state.entries.retain(|e| &e.id != id);
        if state.entries.len() != before {
            state.changed();
            log::debug!("removed {} at revision {}", id, state.revision);
        }
        Ok(())
    }

    /// Remove every record.
    pub fn remove_all_records(&self) -> LogResult<()> {
        let mut state = self.lock();
        state.check_reachable()?;

        if !state.entries.is_empty() {
            state.entries.clear();
            state.changed();
            log::debug!("cleared at revision {}", state.revision);
        }
        Ok(())
    }

    /// Records whose `field` equals `value`.
    pub fn query(&self, field: &str, value: &serde_json::Value) -> LogResult<Vec<LogEntry>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.record.get(field) == Some(value))
            .cloned()
            .collect())
    }

    /// Subscribe to full snapshots; the current one is delivered immediately.
    pub fn snapshots(&self) -> Subscription<Snapshot> {
        let mut state = self.lock();
        let (tx, sub) = Subscription::channel();
        if tx.unbounded_send(state.snapshot()).is_ok() {
            state.snapshot_subs.push(tx);
        }
        sub
    }

    /// Subscribe to appended records.
    pub fn additions(&self) -> Subscription<Addition> {
        let (tx, sub) = Subscription::channel();
        self.lock().addition_subs.push(tx);
        sub
    }

    /// Number of feeds still open.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.snapshot_subs.retain(|tx| !tx.is_closed());
        state.addition_subs.retain(|tx| !tx.is_closed());
        state.snapshot_subs.len() + state.addition_subs.len()
    }
}

impl SharedLog for MemoryLog {
    fn append(&self, record: Record) -> BoxFuture<'_, LogResult<RecordId>> {
        Box::pin(async move { self.append_record(record) })
    }

    fn remove_by_id(&self, id: &RecordId) -> BoxFuture<'_, LogResult<()>> {
        let id = id.clone();
        Box::pin(async move { self.remove_record(&id) })
    }

    fn remove_all(&self) -> BoxFuture<'_, LogResult<()>> {
        Box::pin(async move { self.remove_all_records() })
    }

    fn query_by_field(
        &self,
        field: &str,
        value: &serde_json::Value,
    ) -> BoxFuture<'_, LogResult<Vec<LogEntry>>> {
        let field = field.to_string();
        let value = value.clone();
        Box::pin(async move { self.query(&field, &value) })
    }

    fn subscribe_snapshot(&self) -> Subscription<Snapshot> {
        self.snapshots()
    }

    fn subscribe_additions(&self) -> Subscription<Addition> {
        self.additions()
    }
}
