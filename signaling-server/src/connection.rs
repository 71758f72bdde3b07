use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};
use webrtc_relay_protocol::ConnectionId;

use crate::dispatcher::Dispatcher;
use crate::state::AppState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// WebSocket route serving the signaling protocol on `/{path}`.
pub fn routes(
    state: Arc<AppState>,
    path: String,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state = warp::any().map(move || state.clone());

    warp::path(path)
        .and(warp::path::end())
        .and(warp::ws())
        .and(state)
        .map(|ws: warp::ws::Ws, state| {
            ws.on_upgrade(move |socket| client_connected(socket, state))
        })
}

/// Drive one browser connection until it closes, then tear its session down.
pub async fn client_connected(ws: WebSocket, state: Arc<AppState>) {
    let connection_id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
    info!("new client connected: {}", connection_id);

    let (mut client_ws_tx, mut client_ws_rx) = ws.split();

    let (tx, rx) = mpsc::unbounded_channel();
    let mut rx = UnboundedReceiverStream::new(rx);

    tokio::task::spawn(async move {
        while let Some(message) = rx.next().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("failed to encode {:?}: {}", message, e);
                    continue;
                }
            };
            if let Err(e) = client_ws_tx.send(Message::text(text)).await {
                warn!("websocket send error ({}): {}", connection_id, e);
                break;
            }
        }
    });

    let mut dispatcher = Dispatcher::new(connection_id, state, tx);
    while let Some(result) = client_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!("websocket error ({}): {}", connection_id, e);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if let Ok(text) = msg.to_str() {
            dispatcher.handle_text(text).await;
        } else if msg.is_binary() {
            dispatcher.reject_binary();
        }
    }

    info!("client disconnected: {}", connection_id);
    dispatcher.close().await;
}
