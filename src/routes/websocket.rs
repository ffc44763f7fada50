use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    middleware::admin::is_admin_key,
    models::ws::{ClientFrame, ServerFrame},
    services::{
        metrics,
        viewer::{run_viewer, SessionOptions},
    },
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    pub admin_key: Option<String>,
}

/// GET /ws: One viewer session per connected screen.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
) -> Response {
    let is_admin = params
        .admin_key
        .as_deref()
        .is_some_and(|key| is_admin_key(&state, key));

    ws.on_upgrade(move |socket| async move {
        info!("WebSocket connected (admin={})", is_admin);
        metrics::VIEWER_SESSIONS_GAUGE.inc();
        handle_socket(socket, state, is_admin).await;
        metrics::VIEWER_SESSIONS_GAUGE.dec();
        info!("WebSocket disconnected");
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, is_admin: bool) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(64);
    let (in_tx, in_rx) = mpsc::channel::<ClientFrame>(16);

    let config = &state.config;
    let options = SessionOptions {
        ordering: config.broadcast_ordering(),
        sound: config.default_sound(),
        is_admin,
        tick_interval: config.tick_interval(),
        resync_interval: config.resync_interval(),
        reconnect_backoff: config.reconnect_backoff(),
    };

    // Session: board events → frames
    let mut session_task = tokio::spawn(run_viewer(
        state.board.store().clone(),
        state.board.feed().clone(),
        options,
        out_tx,
        in_rx,
    ));

    // Frames → WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Unserializable frame dropped: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // WebSocket → session
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        if in_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Unrecognized WS message: {}", e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut session_task) => {
            // Let frames already queued reach the screen.
            recv_task.abort();
            let _ = send_task.await;
        }
        _ = (&mut send_task) => {
            session_task.abort();
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            session_task.abort();
            send_task.abort();
        }
    }
}
