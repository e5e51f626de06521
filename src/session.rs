//! Session: wires the Client Link, Audio Ingestion, Segmenter, Classifier,
//! Merge Buffer, and Queue/Dispatcher stages together for one client
//! connection.
//!
//! All per-session state mutation happens cooperatively on a single task
//! (this function's event loop); cross-session parallelism comes from the
//! runtime scheduling many of these loops concurrently.

use crate::audio::{pcm16le_to_f32, AudioBuffer};
use crate::backend::BackendBridge;
use crate::classifier::{self, Admission};
use crate::clock::now_ms;
use crate::config::BrokerConfig;
use crate::dispatcher::{self, InflightHandle};
use crate::merge::MergeWindow;
use crate::queue::BackendQueue;
use crate::segmenter::{Segmenter, SpeechRecognizer};
use crate::types::{ClientControl, ClientEvent, MergeReason, ParsedUtterance};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Mutable state threaded through one session's event loop.
struct SessionCtx {
    session_id: String,
    config: Arc<BrokerConfig>,
    bridge: Arc<BackendBridge>,
    events: mpsc::UnboundedSender<ClientEvent>,
    done_tx: mpsc::UnboundedSender<String>,
    merge: MergeWindow,
    queue: BackendQueue,
    inflight: Option<InflightHandle>,
    last_submit_ms: i64,
}

impl SessionCtx {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Interruption decision, applied before the new utterance is appended
    /// to the merge buffer.
    async fn maybe_interrupt(&mut self, class: crate::types::UtteranceClass, clean_text: &str) {
        let Some(inflight) = self.inflight.take() else {
            return;
        };

        let first_token_seen = inflight.first_token_seen();
        let cfg = &self.config.interrupt;

        let pre_token = class == crate::types::UtteranceClass::Normal
            && !first_token_seen
            && cfg.interrupt_pre_token;

        let post_token_allowed = match cfg.interrupt_post_token_mode {
            crate::config::PostTokenInterruptMode::Always => {
                class != crate::types::UtteranceClass::DropFiller
                    && class != crate::types::UtteranceClass::KeepShort
            }
            crate::config::PostTokenInterruptMode::Never => false,
            crate::config::PostTokenInterruptMode::Conditional => {
                let trimmed_len = clean_text.trim().chars().count();
                trimmed_len >= cfg.interrupt_min_chars
                    || ['?', '？', '吗', '呢'].iter().any(|c| clean_text.contains(*c))
            }
        };

        if pre_token {
            self.emit(ClientEvent::BackendState {
                session_id: self.session_id.clone(),
                stage: "interrupting".to_string(),
                request_id: Some(inflight.request_id.clone()),
                queue_size: None,
                merge_reason: None,
                merge_count: None,
                reason: Some("pre_token".to_string()),
            });
            self.emit(ClientEvent::Warn {
                session_id: self.session_id.clone(),
                message: "llm interrupted: pre_token".to_string(),
                request_id: Some(inflight.request_id.clone()),
            });
            let stolen_text = inflight.original_text.clone();
            inflight.cancel_and_join().await;
            self.merge.steal_back(stolen_text, now_ms());
        } else if first_token_seen && post_token_allowed {
            self.emit(ClientEvent::Warn {
                session_id: self.session_id.clone(),
                message: "llm interrupted: post_token".to_string(),
                request_id: Some(inflight.request_id.clone()),
            });
            inflight.cancel_and_join().await;
            // No steal-back: the partial reply was already delivered.
        } else {
            // Not interrupted; put the handle back.
            self.inflight = Some(inflight);
        }
    }

    /// Run classification + admission, apply interruption, append to the
    /// merge window, and evaluate commit conditions.
    async fn handle_final(&mut self, utt: ParsedUtterance) {
        self.emit(ClientEvent::Asr {
            session_id: self.session_id.clone(),
            text: utt.clean_text.clone(),
            raw_text: utt.raw_text.clone(),
            language: utt.language.clone(),
            emotion: utt.emotion.clone(),
            audio_event: utt.audio_event.clone(),
            itn: utt.itn.clone(),
            final_: true,
        });

        let now = now_ms();
        match classifier::admit(&utt, now, self.last_submit_ms, &self.config.admission) {
            Admission::Reject { reason } => {
                self.emit(ClientEvent::Filtered {
                    session_id: self.session_id.clone(),
                    reason: reason.as_str().to_string(),
                    text: utt.clean_text,
                });
            }
            Admission::Admit { class } => {
                self.last_submit_ms = now;
                self.maybe_interrupt(class, &utt.clean_text).await;
                self.merge.push(&utt.clean_text, &utt.emotion, &utt.audio_event, now);

                if self.merge.exceeds_max_window(now, &self.config.merge) {
                    self.commit_and_dispatch(MergeReason::MaxWindow).await;
                }
                // Else: caller (the event loop) re-arms the debounce timer.
            }
        }
    }

    /// Commit the merge window and attempt to enqueue it; on queue pressure,
    /// restore the window instead of dropping data.
    async fn commit_and_dispatch(&mut self, reason: MergeReason) {
        if self.merge.is_empty() {
            return;
        }
        let merge_reason_str = reason.as_str().to_string();
        let merge_count = self.merge.merge_count();
        let now = now_ms();
        let req = self.merge.commit(reason, now);
        let request_id = req.request_id.clone();

        match self.queue.try_push(req) {
            Ok(()) => {
                self.emit(ClientEvent::BackendState {
                    session_id: self.session_id.clone(),
                    stage: "queued".to_string(),
                    request_id: Some(request_id),
                    queue_size: Some(self.queue.len()),
                    merge_reason: Some(merge_reason_str),
                    merge_count: Some(merge_count),
                    reason: None,
                });
                self.dispatch_next();
            }
            Err(req) => {
                self.emit(ClientEvent::Filtered {
                    session_id: self.session_id.clone(),
                    reason: "backend_queue_busy_buffering".to_string(),
                    text: req.text.clone(),
                });
                self.emit(ClientEvent::BackendState {
                    session_id: self.session_id.clone(),
                    stage: "queue_busy".to_string(),
                    request_id: None,
                    queue_size: Some(self.queue.len()),
                    merge_reason: None,
                    merge_count: None,
                    reason: None,
                });
                self.merge.restore_single(req.text, now);
            }
        }
    }

    /// Start the next queued request if the dispatcher is idle.
    fn dispatch_next(&mut self) {
        if self.inflight.is_some() {
            return;
        }
        let Some(req) = self.queue.pop() else {
            return;
        };
        let timeout = Duration::from_secs(self.config.backend.req_timeout_s);
        let handle = dispatcher::spawn_request(
            self.bridge.clone(),
            self.session_id.clone(),
            req,
            timeout,
            self.events.clone(),
            self.done_tx.clone(),
        );
        self.inflight = Some(handle);
    }

    /// React to a dispatch task finishing on its own (completed, failed, or
    /// timed out, not via our own cancellation).
    fn on_dispatch_done(&mut self, request_id: &str) {
        if self.inflight.as_ref().map(|h| h.request_id.as_str()) == Some(request_id) {
            self.inflight = None;
            self.dispatch_next();
        }
    }
}

/// Run one client session to completion. `recognizer` is the opaque
/// ASR/VAD collaborator.
pub async fn run_session<R: SpeechRecognizer>(
    socket: WebSocket,
    session_id: String,
    config: Arc<BrokerConfig>,
    bridge: Arc<BackendBridge>,
    recognizer: Arc<R>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ClientEvent>();

    // All client-visible emissions funnel through this single task, giving
    // the session a total send order.
    let send_task = tokio::spawn(async move {
        while let Some(ev) = events_rx.recv().await {
            let json = match serde_json::to_string(&ev) {
                Ok(j) => j,
                Err(e) => {
                    warn!(error = %e, "failed to serialize client event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let audio_cfg = &config.audio;
    let buffer = AudioBuffer::new(
        audio_cfg.vad_chunk_samples(),
        audio_cfg.pre_roll_samples(),
        audio_cfg.max_segment_samples(),
    );
    let mut segmenter = Segmenter::new(recognizer, buffer);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();
    let mut ctx = SessionCtx {
        session_id: session_id.clone(),
        config: config.clone(),
        bridge: bridge.clone(),
        events: events_tx.clone(),
        done_tx,
        merge: MergeWindow::new(session_id.clone()),
        queue: BackendQueue::new(config.backend.max_pending),
        inflight: None,
        last_submit_ms: 0,
    };

    ctx.emit(ClientEvent::Status {
        session_id: session_id.clone(),
        message: "connected".to_string(),
        backend_connected: bridge.is_connected(),
    });

    let far_future = Duration::from_secs(60 * 60 * 24);
    let mut timer = Box::pin(tokio::time::sleep(far_future));
    let mut timer_active = false;
    let mut timer_version: u64 = 0;

    loop {
        tokio::select! {
            biased;

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        let samples = pcm16le_to_f32(&bytes);
                        segmenter.push_samples(&samples);
                        let finals = segmenter.process_ready_chunks().await;
                        for utt in finals {
                            ctx.handle_final(utt).await;
                        }
                        rearm_timer(&mut ctx, &mut timer, &mut timer_active, &mut timer_version);
                    }
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientControl>(&text) {
                            Ok(ClientControl::Ping) => {
                                ctx.emit(ClientEvent::Pong { session_id: session_id.clone() });
                            }
                            Ok(ClientControl::Flush) => {
                                if let Some(utt) = segmenter.flush().await {
                                    ctx.handle_final(utt).await;
                                }
                                ctx.commit_and_dispatch(MergeReason::Flush).await;
                                timer_active = false;
                                ctx.emit(ClientEvent::Status {
                                    session_id: session_id.clone(),
                                    message: "flushed".to_string(),
                                    backend_connected: bridge.is_connected(),
                                });
                            }
                            Err(_) => {
                                debug!("ignoring malformed control frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "client websocket error");
                        break;
                    }
                }
            }

            _ = &mut timer, if timer_active => {
                timer_active = false;
                if ctx.merge.version() == timer_version && !ctx.merge.is_empty() {
                    ctx.commit_and_dispatch(MergeReason::Gap).await;
                }
                rearm_timer(&mut ctx, &mut timer, &mut timer_active, &mut timer_version);
            }

            Some(request_id) = done_rx.recv() => {
                ctx.on_dispatch_done(&request_id);
            }
        }
    }

    if let Some(handle) = ctx.inflight.take() {
        handle.cancel_and_join().await;
    }
    drop(events_tx);
    send_task.abort();
    debug!(session_id = %session_id, "session closed");
}

fn rearm_timer(
    ctx: &mut SessionCtx,
    timer: &mut std::pin::Pin<Box<tokio::time::Sleep>>,
    timer_active: &mut bool,
    timer_version: &mut u64,
) {
    if ctx.merge.is_empty() {
        *timer_active = false;
        return;
    }
    *timer_version = ctx.merge.bump_version();
    let now = now_ms();
    let deadline_ms = ctx.merge.next_deadline_ms(&ctx.config.merge);
    let delay_ms = (deadline_ms - now).max(0) as u64;
    timer.as_mut().reset(tokio::time::Instant::now() + Duration::from_millis(delay_ms));
    *timer_active = true;
}
