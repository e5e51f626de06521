//! Backend Queue + Dispatcher: single in-flight request with interruption.

use crate::backend::BackendBridge;
use crate::types::{BackendInboundMessage, BackendOutboundRequest, BackendRequest, ClientEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Handle to the currently running request, shared between the dispatch
/// task and the session loop that needs to make interruption decisions.
pub struct InflightHandle {
    pub request_id: String,
    pub original_text: String,
    first_token_seen: Arc<AtomicBool>,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl InflightHandle {
    pub fn first_token_seen(&self) -> bool {
        self.first_token_seen.load(Ordering::SeqCst)
    }

    /// Cancel the inflight request and wait for its cleanup to finish.
    pub async fn cancel_and_join(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }

    /// True once the driver task has finished on its own (completed, failed,
    /// or timed out) without cancellation.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Spawn the task that drives one backend request end-to-end, translating
/// Bridge messages into Client Link events.
pub fn spawn_request(
    bridge: Arc<BackendBridge>,
    session_id: String,
    request: BackendRequest,
    req_timeout: Duration,
    events: mpsc::UnboundedSender<ClientEvent>,
    done: mpsc::UnboundedSender<String>,
) -> InflightHandle {
    let first_token_seen = Arc::new(AtomicBool::new(false));
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let request_id = request.request_id.clone();
    let original_text = request.text.clone();

    let task_first_token_seen = first_token_seen.clone();
    let done_request_id = request_id.clone();
    let task = tokio::spawn(async move {
        drive_request(
            bridge,
            session_id,
            request,
            req_timeout,
            events,
            cancel_rx,
            task_first_token_seen,
        )
        .await;
        let _ = done.send(done_request_id);
    });

    InflightHandle {
        request_id,
        original_text,
        first_token_seen,
        cancel_tx: Some(cancel_tx),
        task,
    }
}

fn backend_state(
    session_id: &str,
    stage: &str,
    request_id: &str,
    merge_reason: Option<String>,
    merge_count: Option<usize>,
    reason: Option<&str>,
) -> ClientEvent {
    ClientEvent::BackendState {
        session_id: session_id.to_string(),
        stage: stage.to_string(),
        request_id: Some(request_id.to_string()),
        queue_size: None,
        merge_reason,
        merge_count,
        reason: reason.map(|r| r.to_string()),
    }
}

async fn drive_request(
    bridge: Arc<BackendBridge>,
    session_id: String,
    request: BackendRequest,
    req_timeout: Duration,
    events: mpsc::UnboundedSender<ClientEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
    first_token_seen: Arc<AtomicBool>,
) {
    let request_id = request.request_id.clone();
    let payload = BackendOutboundRequest::from_request(&request);

    let _ = events.send(backend_state(&session_id, "thinking", &request_id, None, None, None));

    let mut rx = bridge.request_stream(payload).await;
    let mut accumulated_reply = String::new();

    let deadline = tokio::time::sleep(req_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                bridge.cancel(&request_id).await;
                if first_token_seen.load(Ordering::SeqCst) {
                    let _ = events.send(ClientEvent::BackendResult {
                        session_id: session_id.clone(),
                        request_id: request_id.clone(),
                        reply: accumulated_reply.clone(),
                        final_: true,
                        interrupted: true,
                    });
                }
                let _ = events.send(backend_state(&session_id, "interrupted", &request_id, None, None, None));
                return;
            }
            _ = &mut deadline => {
                bridge.cancel(&request_id).await;
                let _ = events.send(ClientEvent::Warn {
                    session_id: session_id.clone(),
                    message: "backend request timed out".to_string(),
                    request_id: Some(request_id.clone()),
                });
                let _ = events.send(backend_state(&session_id, "timeout", &request_id, None, None, None));
                return;
            }
            msg = rx.recv() => {
                match msg {
                    Some(BackendInboundMessage::LlmStream { delta, r#final, .. }) => {
                        if !delta.is_empty() {
                            if !first_token_seen.swap(true, Ordering::SeqCst) {
                                let _ = events.send(backend_state(&session_id, "streaming", &request_id, None, None, None));
                            }
                            accumulated_reply.push_str(&delta);
                            let _ = events.send(ClientEvent::BackendStream {
                                session_id: session_id.clone(),
                                request_id: request_id.clone(),
                                delta,
                                final_: r#final,
                            });
                        }
                        if r#final {
                            let _ = events.send(backend_state(&session_id, "completed", &request_id, None, None, None));
                            return;
                        }
                    }
                    Some(BackendInboundMessage::LlmResponse { reply, r#final, .. }) => {
                        let _ = events.send(ClientEvent::BackendResult {
                            session_id: session_id.clone(),
                            request_id: request_id.clone(),
                            reply,
                            final_: r#final,
                            interrupted: false,
                        });
                        if r#final {
                            let _ = events.send(backend_state(&session_id, "completed", &request_id, None, None, None));
                            return;
                        }
                    }
                    Some(BackendInboundMessage::LlmError { error, .. }) => {
                        let _ = events.send(ClientEvent::Warn {
                            session_id: session_id.clone(),
                            message: error,
                            request_id: Some(request_id.clone()),
                        });
                        let _ = events.send(backend_state(&session_id, "failed", &request_id, None, None, None));
                        return;
                    }
                    None => {
                        let _ = events.send(backend_state(&session_id, "failed", &request_id, None, None, None));
                        return;
                    }
                }
            }
        }
    }
}
