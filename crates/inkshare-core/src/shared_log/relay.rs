//! Shared log backed by the `inkshare-server` WebSocket relay.
//!
//! Uses a background thread for the socket; requests are correlated with
//! replies by request id and resolved through oneshot channels, so the
//! returned futures can be polled from any executor.

use super::protocol::{ClientMessage, RequestId, ServerMessage};
use super::{
    Addition, BoxFuture, LogEntry, LogError, LogResult, RecordId, SharedLog, Snapshot,
    Subscription,
};
use crate::primitives::Record;
use futures::channel::mpsc::UnboundedSender;
use futures::channel::oneshot;
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket, connect};
use url::Url;

/// Commands sent to the WebSocket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// A request waiting for its reply.
enum Pending {
    Append(oneshot::Sender<LogResult<RecordId>>),
    Done(oneshot::Sender<LogResult<()>>),
    Query(oneshot::Sender<LogResult<Vec<LogEntry>>>),
}

impl Pending {
    fn fail(self, err: LogError) {
        // The caller may have dropped its future; nothing to do then.
        match self {
            Pending::Append(tx) => {
                let _ = tx.send(Err(err));
            }
            Pending::Done(tx) => {
                let _ = tx.send(Err(err));
            }
            Pending::Query(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// State shared between the handle and the socket thread.
#[derive(Default)]
struct Shared {
    pending: HashMap<RequestId, Pending>,
    snapshot_subs: Vec<UnboundedSender<Snapshot>>,
    addition_subs: Vec<UnboundedSender<Addition>>,
    last_snapshot: Option<Snapshot>,
    closed: bool,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared log client for the relay server.
pub struct RelayLog {
    shared: SharedState,
    cmd_tx: Sender<WsCommand>,
    next_request: AtomicU64,
    collection: String,
    _thread: JoinHandle<()>,
}

impl RelayLog {
    /// Connect to a relay and subscribe to `collection`.
    ///
    /// Returns once the socket thread is started; the connection itself is
    /// established in the background. Requests issued before it is up are
    /// queued.
    pub fn connect(url: &str, collection: &str) -> LogResult<Self> {
        let parsed = Url::parse(url).map_err(|e| LogError::Unreachable(format!("Invalid URL: {}", e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(LogError::Unreachable(format!(
                "Invalid WebSocket URL scheme: {}",
                parsed.scheme()
            )));
        }

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let shared = SharedState::default();

        let thread_shared = Arc::clone(&shared);
        let url = url.to_string();
        let subscribe = ClientMessage::Subscribe {
            collection: collection.to_string(),
        };
        let handle = thread::spawn(move || {
            run_socket(&url, subscribe, cmd_rx, &thread_shared);
            shut_down(&thread_shared);
        });

        Ok(Self {
            shared,
            cmd_tx,
            next_request: AtomicU64::new(1),
            collection: collection.to_string(),
            _thread: handle,
        })
    }

    /// The collection this client is attached to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// True once the socket thread has exited.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    fn next_request_id(&self) -> RequestId {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a pending reply and queue the request for the socket thread.
    fn dispatch(&self, request_id: RequestId, message: &ClientMessage, pending: Pending) -> LogResult<()> {
        let text = serde_json::to_string(message).map_err(|e| LogError::Protocol(e.to_string()))?;
        {
            let mut shared = lock(&self.shared);
            if shared.closed {
                return Err(LogError::Unreachable("relay connection closed".to_string()));
            }
            shared.pending.insert(request_id, pending);
        }
        if self.cmd_tx.send(WsCommand::Send(text)).is_err() {
            lock(&self.shared).pending.remove(&request_id);
            return Err(LogError::Unreachable("relay connection closed".to_string()));
        }
        Ok(())
    }
}

impl Drop for RelayLog {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

/// Await a oneshot reply, mapping a dropped sender to `Unreachable`.
async fn reply<T>(rx: oneshot::Receiver<LogResult<T>>) -> LogResult<T> {
    rx.await
        .unwrap_or_else(|_| Err(LogError::Unreachable("relay connection closed".to_string())))
}

impl SharedLog for RelayLog {
    fn append(&self, record: Record) -> BoxFuture<'_, LogResult<RecordId>> {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        let sent = self.dispatch(
            request_id,
            &ClientMessage::Append { request_id, record },
            Pending::Append(tx),
        );
        Box::pin(async move {
            sent?;
            reply(rx).await
        })
    }

    fn remove_by_id(&self, id: &RecordId) -> BoxFuture<'_, LogResult<()>> {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        let sent = self.dispatch(
            request_id,
            &ClientMessage::Remove {
                request_id,
                record_id: id.clone(),
            },
            Pending::Done(tx),
        );
        Box::pin(async move {
            sent?;
            reply(rx).await
        })
    }

    fn remove_all(&self) -> BoxFuture<'_, LogResult<()>> {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        let sent = self.dispatch(request_id, &ClientMessage::RemoveAll { request_id }, Pending::Done(tx));
        Box::pin(async move {
            sent?;
            reply(rx).await
        })
    }

    fn query_by_field(
        &self,
        field: &str,
        value: &serde_json::Value,
    ) -> BoxFuture<'_, LogResult<Vec<LogEntry>>> {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        let sent = self.dispatch(
            request_id,
            &ClientMessage::Query {
                request_id,
                field: field.to_string(),
                value: value.clone(),
            },
            Pending::Query(tx),
        );
        Box::pin(async move {
            sent?;
            reply(rx).await
        })
    }

    fn subscribe_snapshot(&self) -> Subscription<Snapshot> {
        let (tx, sub) = Subscription::channel();
        let mut shared = lock(&self.shared);
        let current_ok = match &shared.last_snapshot {
            Some(snapshot) => tx.unbounded_send(snapshot.clone()).is_ok(),
            None => true,
        };
        if current_ok && !shared.closed {
            shared.snapshot_subs.push(tx);
        }
        sub
    }

    fn subscribe_additions(&self) -> Subscription<Addition> {
        let (tx, sub) = Subscription::channel();
        let mut shared = lock(&self.shared);
        if !shared.closed {
            shared.addition_subs.push(tx);
        }
        sub
    }
}

/// First hundred characters of a frame, for logging.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Mark the connection closed and fail everything still waiting.
fn shut_down(shared: &SharedState) {
    let mut shared = lock(shared);
    shared.closed = true;
    for (_, pending) in shared.pending.drain() {
        pending.fail(LogError::Unreachable("relay connection closed".to_string()));
    }
    shared.snapshot_subs.clear();
    shared.addition_subs.clear();
}

fn run_socket(url: &str, subscribe: ClientMessage, cmd_rx: Receiver<WsCommand>, shared: &SharedState) {
    log::info!("Relay thread: connecting to {}", url);

    let mut socket = match connect(url) {
        Ok((socket, response)) => {
            log::info!("Relay connected, status: {}", response.status());
            socket
        }
        Err(e) => {
            log::error!("Relay connection failed: {}", e);
            return;
        }
    };

    // Read timeout so the loop can service outgoing commands.
    if let MaybeTlsStream::Plain(tcp) = socket.get_mut() {
        let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
        let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
    }

    match serde_json::to_string(&subscribe) {
        Ok(text) => {
            if let Err(e) = socket.send(Message::Text(text)) {
                log::error!("Relay subscribe failed: {}", e);
                return;
            }
        }
        Err(e) => {
            log::error!("Relay subscribe encode failed: {}", e);
            return;
        }
    }

    loop {
        match cmd_rx.try_recv() {
            Ok(WsCommand::Send(msg)) => {
                log::debug!("Relay sending: {}", preview(&msg));
                if let Err(e) = socket.send(Message::Text(msg)) {
                    log::error!("Relay send error: {}", e);
                    break;
                }
            }
            Ok(WsCommand::Close) => {
                log::info!("Relay close requested");
                let _ = socket.close(None);
                break;
            }
            Err(TryRecvError::Disconnected) => {
                log::info!("Relay command channel disconnected");
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        if !read_once(&mut socket, shared) {
            break;
        }
    }

    log::info!("Relay thread exiting");
}

/// Read and route at most one frame. Returns false when the socket is done.
fn read_once(socket: &mut WebSocket<MaybeTlsStream<TcpStream>>, shared: &SharedState) -> bool {
    match socket.read() {
        Ok(Message::Text(txt)) => {
            match serde_json::from_str::<ServerMessage>(&txt) {
                Ok(msg) => route(msg, shared),
                Err(e) => log::warn!("Failed to parse relay message: {} ({})", e, preview(&txt)),
            }
            true
        }
        Ok(Message::Ping(data)) => {
            let _ = socket.send(Message::Pong(data));
            true
        }
        Ok(Message::Close(_)) => {
            log::info!("Relay sent close frame");
            false
        }
        Ok(_) => true,
        Err(tungstenite::Error::Io(ref e))
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            true
        }
        Err(e) => {
            log::error!("Relay read error: {}", e);
            false
        }
    }
}

/// Deliver a server message to feeds or to the waiting request.
fn route(msg: ServerMessage, shared: &SharedState) {
    let mut shared = lock(shared);
    match msg {
        ServerMessage::Snapshot { revision, entries } => {
            let snapshot = Snapshot { revision, entries };
            shared
                .snapshot_subs
                .retain(|tx| tx.unbounded_send(snapshot.clone()).is_ok());
            shared.last_snapshot = Some(snapshot);
        }
        ServerMessage::Added { revision, entry } => {
            let addition = Addition { revision, entry };
            shared
                .addition_subs
                .retain(|tx| tx.unbounded_send(addition.clone()).is_ok());
        }
        ServerMessage::Appended { request_id, record_id } => match shared.pending.remove(&request_id) {
            Some(Pending::Append(tx)) => {
                let _ = tx.send(Ok(record_id));
            }
            other => mismatched(request_id, other),
        },
        ServerMessage::Done { request_id } => match shared.pending.remove(&request_id) {
            Some(Pending::Done(tx)) => {
                let _ = tx.send(Ok(()));
            }
            other => mismatched(request_id, other),
        },
        ServerMessage::QueryResult { request_id, entries } => match shared.pending.remove(&request_id) {
            Some(Pending::Query(tx)) => {
                let _ = tx.send(Ok(entries));
            }
            other => mismatched(request_id, other),
        },
        ServerMessage::Error {
            request_id: Some(request_id),
            message,
        } => match shared.pending.remove(&request_id) {
            Some(pending) => pending.fail(LogError::Rejected(message)),
            None => log::warn!("Relay error for unknown request {}: {}", request_id, message),
        },
        ServerMessage::Error { request_id: None, message } => {
            log::warn!("Relay error: {}", message);
        }
    }
}

fn mismatched(request_id: RequestId, pending: Option<Pending>) {
    match pending {
        Some(pending) => {
            log::warn!("Relay reply for request {} has the wrong kind", request_id);
            pending.fail(LogError::Protocol(format!("unexpected reply to request {}", request_id)));
        }
        None => log::warn!("Relay reply for unknown request {}", request_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_log::block_on;

    #[test]
    fn test_rejects_non_websocket_url() {
        let err = RelayLog::connect("http://localhost:3030", "drawings").err();
        assert!(matches!(err, Some(LogError::Unreachable(_))));
        assert!(RelayLog::connect("not a url", "drawings").is_err());
    }

    #[test]
    fn test_route_resolves_pending_append() {
        let shared = SharedState::default();
        let (tx, rx) = oneshot::channel();
        lock(&shared).pending.insert(9, Pending::Append(tx));

        route(
            ServerMessage::Appended {
                request_id: 9,
                record_id: RecordId::from("r9"),
            },
            &shared,
        );
        assert_eq!(block_on(reply(rx)), Ok(RecordId::from("r9")));
    }

    #[test]
    fn test_route_error_fails_pending() {
        let shared = SharedState::default();
        let (tx, rx) = oneshot::channel();
        lock(&shared).pending.insert(2, Pending::Done(tx));

        route(
            ServerMessage::Error {
                request_id: Some(2),
                message: "denied".into(),
            },
            &shared,
        );
        assert_eq!(block_on(reply(rx)), Err(LogError::Rejected("denied".into())));
    }

    #[test]
    fn test_route_mismatched_reply_is_protocol_error() {
        let shared = SharedState::default();
        let (tx, rx) = oneshot::channel();
        lock(&shared).pending.insert(4, Pending::Query(tx));

        route(ServerMessage::Done { request_id: 4 }, &shared);
        assert!(matches!(block_on(reply(rx)), Err(LogError::Protocol(_))));
    }

    #[test]
    fn test_route_fans_out_feeds() {
        let shared = SharedState::default();
        let (snap_tx, mut snaps) = Subscription::channel();
        let (add_tx, mut adds) = Subscription::channel();
        {
            let mut s = lock(&shared);
            s.snapshot_subs.push(snap_tx);
            s.addition_subs.push(add_tx);
        }
        let entry = LogEntry {
            id: RecordId::from("a"),
            record: Record::new(),
        };
        route(
            ServerMessage::Added {
                revision: 1,
                entry: entry.clone(),
            },
            &shared,
        );
        route(
            ServerMessage::Snapshot {
                revision: 1,
                entries: vec![entry],
            },
            &shared,
        );
        assert_eq!(adds.drain().len(), 1);
        assert_eq!(snaps.drain().len(), 1);
        assert!(lock(&shared).last_snapshot.is_some());
    }

    #[test]
    fn test_shut_down_fails_pending_and_closes_feeds() {
        let shared = SharedState::default();
        let (tx, rx) = oneshot::channel();
        let (add_tx, mut adds) = Subscription::<Addition>::channel();
        {
            let mut s = lock(&shared);
            s.pending.insert(1, Pending::Append(tx));
            s.addition_subs.push(add_tx);
        }
        shut_down(&shared);

        assert!(matches!(block_on(reply(rx)), Err(LogError::Unreachable(_))));
        assert!(adds.drain().is_empty());
        assert!(lock(&shared).closed);
    }
}
