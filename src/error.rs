use thiserror::Error;

/// Crate-wide error type for the broker's session-facing operations.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend request timed out")]
    BackendTimeout,

    #[error("backend queue full")]
    QueueFull,

    #[error("session closed")]
    SessionClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BackendTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            Self::SessionClosed => StatusCode::GONE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for BrokerError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Errors from the persistent backend bridge connection, mirrored one-for-one
/// against the per-request lifecycle the dispatcher needs to react to. These
/// are the error variants actually produced by `backend::bridge`'s failure
/// paths (both the synthetic `llm_error` text delivered to callers and the
/// `tracing` fields logged by the runner).
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("backend websocket not ready")]
    NotReady,

    #[error("backend bridge disconnected")]
    Disconnected,

    #[error("backend bridge stopped")]
    Stopped,

    #[error("websocket io error: {0}")]
    Io(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
