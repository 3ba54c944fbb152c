//! HTTP surface: the per-session WebSocket plus a few JSON endpoints.

use crate::model::{InboundMessage, OutboundMessage};
use crate::orchestrator::{
    gen_session_id, run_session, SessionDeps, SessionEvent, SessionInfo, SessionRegistry,
};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: SessionRegistry,
    pub deps: Arc<SessionDeps>,
    /// Fires on server shutdown; every session holds a child token.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Error)]
pub(crate) enum ApiError {
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("session closed: {0}")]
    SessionClosed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::UnknownSession(_) | ApiError::SessionClosed(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/ws", get(ws_upgrade))
        .route("/api/step_complete", post(step_complete))
        .route("/api/sessions", get(list_sessions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list().await)
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    session: String,
}

/// Out-of-band step completion. Goes through the session's own queue, so it
/// is ordered with the frames and instructions of that session.
async fn step_complete(
    State(state): State<AppState>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<OutboundMessage>, ApiError> {
    let tx = state
        .registry
        .sender(&req.session)
        .await
        .ok_or_else(|| ApiError::UnknownSession(req.session.clone()))?;
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(SessionEvent::Complete {
        reply: Some(reply_tx),
    })
    .await
    .map_err(|_| ApiError::SessionClosed(req.session.clone()))?;
    let msg = reply_rx
        .await
        .map_err(|_| ApiError::SessionClosed(req.session))?;
    Ok(Json(msg))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    session: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let session_id = params
        .session
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(gen_session_id);
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

fn to_event(msg: Message) -> Option<SessionEvent> {
    match msg {
        Message::Text(text) => match InboundMessage::parse(&text) {
            Some(InboundMessage::Instruction { task }) => Some(SessionEvent::Instruction(task)),
            Some(InboundMessage::StepComplete) => Some(SessionEvent::Complete { reply: None }),
            None => {
                debug!(len = text.len(), "ignoring unrecognised text message");
                None
            }
        },
        Message::Binary(data) => Some(SessionEvent::Frame(Bytes::from(data))),
        _ => None,
    }
}

async fn handle_socket(socket: WebSocket, session_id: String, state: AppState) {
    let (sink, stream) = socket.split();
    serve_connection(sink, stream, session_id, state).await;
}

/// Run one session over a message sink and stream: register it, pump inbound
/// messages into its queue, write its replies, and clean up on disconnect.
async fn serve_connection<K, S, E>(
    mut sink: K,
    mut stream: S,
    session_id: String,
    state: AppState,
) where
    K: Sink<Message> + Unpin + Send + 'static,
    S: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: std::fmt::Display + Send,
{
    let (event_tx, event_rx) = mpsc::channel(state.deps.cfg.event_queue_depth.max(1));
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let conn = state.registry.register(&session_id, event_tx.clone()).await;
    let session_token = state.shutdown.child_token();
    info!(session = %session_id, conn, "websocket connected");

    let actor = tokio::spawn(run_session(
        session_id.clone(),
        state.deps.clone(),
        event_rx,
        event_tx.downgrade(),
        out_tx,
        session_token.clone(),
    ));

    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(err) => {
                    warn!(session = %writer_session, error = %err, "failed to encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = session_token.cancelled() => break,
        };
        let msg = match next {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                debug!(session = %session_id, error = %err, "websocket receive failed");
                break;
            }
        };
        if let Some(event) = to_event(msg) {
            if event_tx.send(event).await.is_err() {
                break;
            }
        }
    }

    state.registry.unregister(&session_id, conn).await;
    session_token.cancel();
    drop(event_tx);
    let _ = actor.await;
    let _ = writer.await;
    info!(session = %session_id, conn, "websocket disconnected");
}
