//! Client Link transport: the axum router exposing the broker's WebSocket
//! endpoint and a health probe.

use crate::backend::BackendBridge;
use crate::config::BrokerConfig;
use crate::segmenter::SpeechRecognizer;
use crate::session;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared state handed to every Client Link connection.
pub struct AppState<R: SpeechRecognizer> {
    pub config: Arc<BrokerConfig>,
    pub bridge: Arc<BackendBridge>,
    pub recognizer: Arc<R>,
}

impl<R: SpeechRecognizer> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            bridge: self.bridge.clone(),
            recognizer: self.recognizer.clone(),
        }
    }
}

/// A trimmed view of the running configuration, safe to expose over
/// `/healthz` (no secrets live in `BrokerConfig`, but the full struct is
/// still more than callers need).
#[derive(Serialize)]
struct ConfigSnapshot {
    backend_url: String,
    client_bind: String,
    sample_rate: u32,
    max_pending: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_ready: bool,
    backend_connected: bool,
    config_snapshot: ConfigSnapshot,
}

/// `GET /healthz` — reports model readiness, current bridge connectivity,
/// and a snapshot of the configured backend URL.
async fn healthz<R: SpeechRecognizer>(State(state): State<AppState<R>>) -> Json<serde_json::Value> {
    let resp = HealthResponse {
        status: "ok",
        model_ready: true,
        backend_connected: state.bridge.is_connected(),
        config_snapshot: ConfigSnapshot {
            backend_url: state.config.server.backend_url.clone(),
            client_bind: state.config.server.client_bind.clone(),
            sample_rate: state.config.audio.sample_rate,
            max_pending: state.config.backend.max_pending,
        },
    };
    Json(serde_json::to_value(resp).unwrap_or(serde_json::json!({"status": "ok"})))
}

async fn ws_upgrade<R: SpeechRecognizer>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<R>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<R: SpeechRecognizer>(socket: WebSocket, state: AppState<R>) {
    let session_id = format!("s-{}", Uuid::new_v4().simple());
    session::run_session(
        socket,
        session_id,
        state.config.clone(),
        state.bridge.clone(),
        state.recognizer.clone(),
    )
    .await;
}

/// Build the axum router: `/ws` (Client Link) and `/healthz`.
pub fn create_router<R: SpeechRecognizer>(state: AppState<R>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade::<R>))
        .route("/healthz", get(healthz::<R>))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
