//! Wire protocol between `RelayLog` clients and the relay server.
//!
//! Messages are JSON text frames tagged by `type`:
//! ```json
//! { "type": "subscribe", "collection": "drawings" }
//! { "type": "append", "request_id": 7, "record": { "points": [0, 0, 0, 0], "color": "#000000", "width": 5 } }
//! { "type": "added", "revision": 12, "entry": { "id": "…", "record": { … } } }
//! ```

use super::{LogEntry, RecordId};
use crate::primitives::Record;
use serde::{Deserialize, Serialize};

/// Correlates a response with the request that caused it.
pub type RequestId = u64;

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Attach to a collection; the server answers with a snapshot and then
    /// streams snapshots and additions.
    Subscribe { collection: String },
    Append { request_id: RequestId, record: Record },
    Remove { request_id: RequestId, record_id: RecordId },
    RemoveAll { request_id: RequestId },
    Query {
        request_id: RequestId,
        field: String,
        value: serde_json::Value,
    },
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full contents of the subscribed collection.
    Snapshot { revision: u64, entries: Vec<LogEntry> },
    /// A record appended by any client.
    Added { revision: u64, entry: LogEntry },
    /// Reply to `Append`.
    Appended { request_id: RequestId, record_id: RecordId },
    /// Reply to `Remove` / `RemoveAll`.
    Done { request_id: RequestId },
    /// Reply to `Query`.
    QueryResult { request_id: RequestId, entries: Vec<LogEntry> },
    /// A request failed, or the connection is in a bad state.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
        message: String,
    },
}
