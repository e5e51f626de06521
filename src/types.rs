//! Core data model shared across the broker pipeline.

use serde::{Deserialize, Serialize};

/// One finalized ASR output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedUtterance {
    pub raw_text: String,
    pub clean_text: String,
    pub language: String,
    pub emotion: String,
    /// "Speech" marks a real speech segment; anything else is treated as
    /// non-speech for admission purposes.
    pub audio_event: String,
    pub itn: String,
    pub ts_ms: i64,
}

/// Admission verdict for an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceClass {
    Normal,
    KeepShort,
    DropFiller,
}

/// Reason a committed merge window was flushed to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeReason {
    MaxWindow,
    Gap,
    Flush,
}

impl MergeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeReason::MaxWindow => "max_window",
            MergeReason::Gap => "gap",
            MergeReason::Flush => "flush",
        }
    }
}

/// A committed unit of work handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub request_id: String,
    pub session_id: String,
    pub text: String,
    pub emotion: String,
    pub audio_event: String,
    pub ts_ms: i64,
    pub merge_reason: MergeReason,
    pub merge_count: usize,
}

/// Outbound wire payload sent to the backend over the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct BackendOutboundRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request_id: String,
    pub session_id: String,
    pub text: String,
    pub emotion: String,
    pub event: String,
    #[serde(rename = "final")]
    pub final_: bool,
    pub ts_ms: i64,
    pub _merge_reason: String,
    pub _merge_count: usize,
}

impl BackendOutboundRequest {
    pub fn from_request(req: &BackendRequest) -> Self {
        Self {
            kind: "llm_request",
            request_id: req.request_id.clone(),
            session_id: req.session_id.clone(),
            text: req.text.clone(),
            emotion: req.emotion.clone(),
            event: req.audio_event.clone(),
            final_: true,
            ts_ms: req.ts_ms,
            _merge_reason: req.merge_reason.as_str().to_string(),
            _merge_count: req.merge_count,
        }
    }
}

/// Inbound wire message from the backend. `final` is a reserved
/// word in several client languages but not in Rust; kept as-is to match the
/// wire field name via serde rename only where needed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum BackendInboundMessage {
    #[serde(rename = "llm_stream")]
    LlmStream {
        request_id: String,
        delta: String,
        #[serde(default)]
        r#final: bool,
    },
    #[serde(rename = "llm_response")]
    LlmResponse {
        request_id: String,
        reply: String,
        #[serde(default)]
        r#final: bool,
    },
    #[serde(rename = "llm_error")]
    LlmError {
        request_id: String,
        error: String,
        #[serde(default)]
        r#final: bool,
    },
}

impl BackendInboundMessage {
    pub fn request_id(&self) -> &str {
        match self {
            BackendInboundMessage::LlmStream { request_id, .. } => request_id,
            BackendInboundMessage::LlmResponse { request_id, .. } => request_id,
            BackendInboundMessage::LlmError { request_id, .. } => request_id,
        }
    }

    pub fn is_final(&self) -> bool {
        match self {
            BackendInboundMessage::LlmStream { r#final, .. } => *r#final,
            BackendInboundMessage::LlmResponse { r#final, .. } => *r#final,
            BackendInboundMessage::LlmError { r#final, .. } => *r#final,
        }
    }
}

/// Client-visible events emitted over the Client Link.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ClientEvent {
    #[serde(rename = "status")]
    Status {
        session_id: String,
        message: String,
        backend_connected: bool,
    },
    #[serde(rename = "asr")]
    Asr {
        session_id: String,
        text: String,
        raw_text: String,
        language: String,
        emotion: String,
        audio_event: String,
        itn: String,
        #[serde(rename = "final")]
        final_: bool,
    },
    #[serde(rename = "filtered")]
    Filtered {
        session_id: String,
        reason: String,
        text: String,
    },
    #[serde(rename = "backend_state")]
    BackendState {
        session_id: String,
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        queue_size: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        merge_reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        merge_count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "backend_stream")]
    BackendStream {
        session_id: String,
        request_id: String,
        delta: String,
        #[serde(rename = "final")]
        final_: bool,
    },
    #[serde(rename = "backend_result")]
    BackendResult {
        session_id: String,
        request_id: String,
        reply: String,
        #[serde(rename = "final")]
        final_: bool,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        interrupted: bool,
    },
    #[serde(rename = "warn")]
    Warn {
        session_id: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong { session_id: String },
}

/// Inbound control frame from the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum ClientControl {
    #[serde(rename = "flush")]
    Flush,
    #[serde(rename = "ping")]
    Ping,
}
