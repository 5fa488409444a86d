//! InkShare WebSocket Relay Server
//!
//! Hosts named shared logs ("collections") that whiteboard clients append
//! to and subscribe to.
//!
//! ## Protocol
//!
//! Messages are JSON text frames:
//! ```json
//! { "type": "subscribe", "collection": "drawings" }
//! { "type": "append", "request_id": 1, "record": { "points": [0, 0, 4, 4], "color": "#000000", "width": 5 } }
//! { "type": "query", "request_id": 2, "field": "shapeId", "value": "…" }
//! ```
//! After subscribing, a client receives a `snapshot` on every change and an
//! `added` message for every append, from any client.

mod config;
mod dispatch;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use config::ServerConfig;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use inkshare_core::shared_log::protocol::{ClientMessage, ServerMessage};
use inkshare_core::shared_log::{Addition, MemoryLog, Snapshot, Subscription};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared application state
struct AppState {
    /// Hosted logs by collection name. Collections live as long as the server.
    collections: DashMap<String, Arc<MemoryLog>>,
}

impl AppState {
    fn new() -> Self {
        Self {
            collections: DashMap::new(),
        }
    }

    /// Get or create a collection
    fn collection(&self, name: &str) -> Arc<MemoryLog> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Creating collection {}", name);
                Arc::new(MemoryLog::new())
            })
            .clone()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkshare_server=info,inkshare_core=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let state = Arc::new(AppState::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("InkShare relay server listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);

    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
}

/// Index page
async fn index() -> &'static str {
    "InkShare Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serialize and send; false if the peer is gone.
async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to encode message: {}", e);
            true
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    // Attached collection and the feeds forwarded from it.
    let mut current: Option<(String, Arc<MemoryLog>)> = None;
    let mut snapshots: Option<Subscription<Snapshot>> = None;
    let mut additions: Option<Subscription<Addition>> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ignore binary/ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                };
                let request = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Invalid message from {}: {}", peer_id, e);
                        let err = ServerMessage::Error {
                            request_id: None,
                            message: format!("Invalid message: {}", e),
                        };
                        if !send(&mut sender, &err).await {
                            break;
                        }
                        continue;
                    }
                };

                if let ClientMessage::Subscribe { collection } = &request {
                    let log = state.collection(collection);
                    // The snapshot feed delivers the current contents first.
                    snapshots = Some(log.snapshots());
                    additions = Some(log.additions());
                    current = Some((collection.clone(), log));
                    info!("Peer {} subscribed to {}", peer_id, collection);
                    continue;
                }

                let reply = match &current {
                    Some((_, log)) => dispatch::handle_request(log, request),
                    None => Some(ServerMessage::Error {
                        request_id: None,
                        message: "Not subscribed to a collection".to_string(),
                    }),
                };
                if let Some(reply) = reply {
                    if !send(&mut sender, &reply).await {
                        break;
                    }
                }
            }

            snapshot = async {
                match &mut snapshots {
                    Some(feed) => feed.next().await,
                    None => std::future::pending::<Option<Snapshot>>().await,
                }
            } => {
                let Some(Snapshot { revision, entries }) = snapshot else {
                    break;
                };
                debug!("Snapshot r{} ({} entries) to {}", revision, entries.len(), peer_id);
                if !send(&mut sender, &ServerMessage::Snapshot { revision, entries }).await {
                    break;
                }
            }

            addition = async {
                match &mut additions {
                    Some(feed) => feed.next().await,
                    None => std::future::pending::<Option<Addition>>().await,
                }
            } => {
                let Some(Addition { revision, entry }) = addition else {
                    break;
                };
                if !send(&mut sender, &ServerMessage::Added { revision, entry }).await {
                    break;
                }
            }
        }
    }

    if let Some((name, _)) = current {
        info!("Peer {} left {}", peer_id, name);
    }
    info!("Connection closed: {}", peer_id);
}
