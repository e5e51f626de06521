//! Backend Bridge: a singleton, process-wide, auto-reconnecting full-duplex
//! connection to the LLM backend, multiplexed by `request_id`.
//!
//! Runs a single reconnect loop over one physical connection, with a
//! per-request `request_id` pending map so concurrent requests can be
//! multiplexed over that one connection.

use crate::config::BackendConfig;
use crate::error::BridgeError;
use crate::types::{BackendInboundMessage, BackendOutboundRequest};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Per-request response sink capacity. A full channel backpressures the
/// bridge's send side into this channel rather than growing unbounded.
const PENDING_CHANNEL_CAPACITY: usize = 64;

/// Process-wide bridge to the LLM backend (`Session`'s shared
/// collaborator; invariant at most one live physical connection).
pub struct BackendBridge {
    url: String,
    config: BackendConfig,
    write: Arc<Mutex<Option<WsSink>>>,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    pending: Arc<DashMap<String, mpsc::Sender<BackendInboundMessage>>>,
    stopped: Arc<AtomicBool>,
    runner: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BackendBridge {
    /// Start the bridge and its background runner task.
    pub fn start(url: impl Into<String>, config: BackendConfig) -> Arc<Self> {
        let (connected_tx, connected_rx) = watch::channel(false);
        let bridge = Arc::new(Self {
            url: url.into(),
            config,
            write: Arc::new(Mutex::new(None)),
            connected_tx,
            connected_rx,
            pending: Arc::new(DashMap::new()),
            stopped: Arc::new(AtomicBool::new(false)),
            runner: Mutex::new(None),
        });

        let runner_bridge = bridge.clone();
        let handle = tokio::spawn(async move { runner_bridge.run().await });
        // We can't `.await` here (start() is sync), so stash the handle
        // behind try_lock — the mutex is uncontended at construction time.
        if let Ok(mut guard) = bridge.runner.try_lock() {
            *guard = Some(handle);
        }

        bridge
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    async fn wait_connected(&self, timeout: Duration) -> bool {
        if self.is_connected() {
            return true;
        }
        let mut rx = self.connected_rx.clone();
        tokio::time::timeout(timeout, async {
            loop {
                if *rx.borrow() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok()
            && *rx.borrow()
    }

    /// Send a request and return a receiver yielding every response message
    /// addressed to it, terminating after the first `final=true` message.
    pub async fn request_stream(
        &self,
        payload: BackendOutboundRequest,
    ) -> mpsc::Receiver<BackendInboundMessage> {
        let (tx, rx) = mpsc::channel(PENDING_CHANNEL_CAPACITY);
        let request_id = payload.request_id.clone();
        self.pending.insert(request_id.clone(), tx.clone());

        let connected = self
            .wait_connected(Duration::from_secs(self.config.conn_timeout_s))
            .await;
        if !connected {
            self.pending.remove(&request_id);
            let _ = tx
                .send(BackendInboundMessage::LlmError {
                    request_id: request_id.clone(),
                    error: BridgeError::NotReady.to_string(),
                    r#final: true,
                })
                .await;
            return rx;
        }

        let json = match serde_json::to_string(&payload) {
            Ok(j) => j,
            Err(e) => {
                self.pending.remove(&request_id);
                let _ = tx
                    .send(BackendInboundMessage::LlmError {
                        request_id: request_id.clone(),
                        error: BridgeError::Serialization(e).to_string(),
                        r#final: true,
                    })
                    .await;
                return rx;
            }
        };

        let send_result = {
            let mut guard = self.write.lock().await;
            match guard.as_mut() {
                Some(w) => w.send(Message::Text(json.into())).await,
                None => {
                    drop(guard);
                    self.pending.remove(&request_id);
                    let _ = tx
                        .send(BackendInboundMessage::LlmError {
                            request_id: request_id.clone(),
                            error: BridgeError::NotReady.to_string(),
                            r#final: true,
                        })
                        .await;
                    return rx;
                }
            }
        };

        if let Err(e) = send_result {
            let bridge_err = BridgeError::Io(e);
            warn!(error = %bridge_err, request_id = %request_id, "failed to send request to backend");
            self.pending.remove(&request_id);
            let _ = tx
                .send(BackendInboundMessage::LlmError {
                    request_id: request_id.clone(),
                    error: BridgeError::Disconnected.to_string(),
                    r#final: true,
                })
                .await;
        }

        rx
    }

    /// Cancel a request, removing it from the pending map so any later
    /// (orphaned) backend response for it is silently discarded. The owning
    /// `request_stream` caller is the only one permitted to remove an entry
    /// it registered.
    pub async fn cancel(&self, request_id: &str) {
        self.pending.remove(request_id);
    }

    /// Stop the bridge: close the socket, cancel the runner, and push a
    /// terminal to every pending stream.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.runner.lock().await.take() {
            handle.abort();
        }
        *self.write.lock().await = None;
        self.connected_tx.send(false).ok();
        self.drain_pending_with(BridgeError::Stopped).await;
    }

    async fn drain_pending_with(&self, reason: BridgeError) {
        let message = reason.to_string();
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx
                    .send(BackendInboundMessage::LlmError {
                        request_id: id,
                        error: message.clone(),
                        r#final: true,
                    })
                    .await;
            }
        }
    }

    async fn run(self: Arc<Self>) {
        let ping_interval_dur = Duration::from_secs(self.config.ws_ping_interval_s.max(1));

        while !self.stopped.load(Ordering::SeqCst) {
            info!(url = %self.url, "connecting to backend");
            match connect_async(&self.url).await {
                Ok((ws, _response)) => {
                    info!("backend bridge connected");
                    let (write, mut read) = ws.split();
                    *self.write.lock().await = Some(write);
                    self.connected_tx.send(true).ok();

                    let mut ping_interval = tokio::time::interval(ping_interval_dur);
                    ping_interval.tick().await; // consume the immediate first tick

                    loop {
                        if self.stopped.load(Ordering::SeqCst) {
                            break;
                        }
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        self.handle_inbound_text(&text).await;
                                    }
                                    Some(Ok(Message::Binary(_))) => {
                                        // Binary frames are ignored.
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        info!("backend connection closed");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        let err = BridgeError::Io(e);
                                        error!(error = %err, "backend read error");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                            _ = ping_interval.tick() => {
                                let mut guard = self.write.lock().await;
                                if let Some(w) = guard.as_mut() {
                                    if let Err(e) = w.send(Message::Ping(Vec::new().into())).await {
                                        let err = BridgeError::Io(e);
                                        warn!(error = %err, "failed to ping backend");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    let err = BridgeError::Io(e);
                    error!(error = %err, "failed to connect to backend");
                }
            }

            self.connected_tx.send(false).ok();
            *self.write.lock().await = None;
            self.drain_pending_with(BridgeError::Disconnected).await;

            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_secs_f64(self.config.reconnect_s)).await;
        }
    }

    async fn handle_inbound_text(&self, text: &str) {
        match serde_json::from_str::<BackendInboundMessage>(text) {
            Ok(parsed) => {
                let request_id = parsed.request_id().to_string();
                let is_final = parsed.is_final();
                let sender = self.pending.get(&request_id).map(|e| e.value().clone());
                match sender {
                    Some(tx) => {
                        if tx.send(parsed).await.is_err() {
                            debug!(request_id = %request_id, "pending receiver dropped");
                        }
                        if is_final {
                            self.pending.remove(&request_id);
                        }
                    }
                    None => {
                        debug!(request_id = %request_id, "discarding orphan backend response");
                    }
                }
            }
            Err(e) => {
                let err = BridgeError::Serialization(e);
                warn!(error = %err, "failed to parse backend message");
            }
        }
    }
}
