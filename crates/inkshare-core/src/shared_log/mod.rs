//! The shared ordered log that carries primitives between clients.
//!
//! The log itself is an external collaborator. This module defines the
//! narrow capability the engine needs from it ([`SharedLog`]) plus two
//! implementations: [`MemoryLog`] for a single process and `RelayLog` for a
//! WebSocket relay server.

mod memory;
pub mod protocol;

#[cfg(not(target_arch = "wasm32"))]
mod relay;

pub use memory::MemoryLog;

#[cfg(not(target_arch = "wasm32"))]
pub use relay::RelayLog;

use crate::primitives::Record;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;

/// Storage id assigned by the log on append.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A record together with its storage id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: RecordId,
    pub record: Record,
}

/// The full ordered contents of the log at `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub revision: u64,
    pub entries: Vec<LogEntry>,
}

/// One newly appended record; `revision` is the log revision it created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addition {
    pub revision: u64,
    pub entry: LogEntry,
}

/// Log errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LogError {
    /// The store could not be reached; the write did not happen.
    #[error("Log unreachable: {0}")]
    Unreachable(String),
    /// The store refused the operation.
    #[error("Log rejected operation: {0}")]
    Rejected(String),
    /// The store answered with something we could not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Boxed future for log operations.
///
/// Not `Send`: the engine runs log I/O on a single-threaded executor.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A live feed from the log.
///
/// Dropping the handle (or calling [`Subscription::close`]) cancels it; the
/// log prunes closed feeds on its next delivery.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Create a connected sender/subscription pair.
    pub fn channel() -> (UnboundedSender<T>, Self) {
        let (tx, rx) = unbounded();
        (tx, Self { rx })
    }

    /// Take every item delivered so far without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(Some(item)) = self.rx.try_next() {
            items.push(item);
        }
        items
    }

    /// Stop the feed. Items already queued can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.get_mut().rx).poll_next(cx)
    }
}

/// Capability interface of the external shared ordered log.
pub trait SharedLog {
    /// Append a record, returning its storage id.
    fn append(&self, record: Record) -> BoxFuture<'_, LogResult<RecordId>>;

    /// Remove a record. Removing an id that does not exist is not an error.
    fn remove_by_id(&self, id: &RecordId) -> BoxFuture<'_, LogResult<()>>;

    /// Remove every record.
    fn remove_all(&self) -> BoxFuture<'_, LogResult<()>>;

    /// All records whose `field` equals `value`, in log order.
    fn query_by_field(
        &self,
        field: &str,
        value: &serde_json::Value,
    ) -> BoxFuture<'_, LogResult<Vec<LogEntry>>>;

    /// Feed of the complete ordered contents, delivered on every change.
    /// The current contents are delivered immediately.
    fn subscribe_snapshot(&self) -> Subscription<Snapshot>;

    /// Feed of each appended record, exactly once, in append order.
    fn subscribe_additions(&self) -> Subscription<Addition>;
}

#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    futures::executor::block_on(f)
}
