//! End-to-end protocol tests driving the real axum router, a mock backend
//! WebSocket server, and a scripted ASR/VAD collaborator over real
//! WebSocket connections — not just unit-level assertions.
//!
//! Spins up a real server, connects a real client, and asserts on the wire
//! messages that actually cross the socket.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};

use voicebroker::backend::BackendBridge;
use voicebroker::config::{AdmissionConfig, AudioConfig, BackendConfig, BrokerConfig, InterruptConfig, MergeConfig};
use voicebroker::segmenter::{RecognizerOutput, SpeechRecognizer, VadBoundary};
use voicebroker::web;

/// A recognizer whose boundary decision always finalizes the chunk it is
/// given (begin==end==0), and whose transcription output is taken from a
/// pre-scripted queue. This keeps the collaborator's behavior deterministic
/// and test-controlled: one binary frame in, one `ParsedUtterance` final out.
struct ScriptedRecognizer {
    outputs: Mutex<VecDeque<RecognizerOutput>>,
}

impl ScriptedRecognizer {
    fn new(texts: Vec<(&str, &str)>) -> Self {
        let outputs = texts
            .into_iter()
            .map(|(text, audio_event)| RecognizerOutput {
                raw_text: text.to_string(),
                clean_text: text.to_string(),
                language: "zh".to_string(),
                emotion: "EMO_NEUTRAL".to_string(),
                audio_event: audio_event.to_string(),
                itn: "withitn".to_string(),
            })
            .collect();
        Self {
            outputs: Mutex::new(outputs),
        }
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn detect_boundary(&self, _chunk: &[f32]) -> VadBoundary {
        VadBoundary { begin_ms: 0, end_ms: 0 }
    }

    fn transcribe(&self, _segment: &[f32]) -> RecognizerOutput {
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RecognizerOutput {
                raw_text: String::new(),
                clean_text: String::new(),
                language: "unknown".to_string(),
                emotion: "EMO_NEUTRAL".to_string(),
                audio_event: "Noise".to_string(),
                itn: "withitn".to_string(),
            })
    }
}

/// Test-scale config: one PCM sample per VAD chunk (so every binary frame
/// we send becomes exactly one finalized utterance) and shrunk debounce
/// timings so tests complete in real wall-clock time quickly.
fn test_config(backend_url: String) -> BrokerConfig {
    BrokerConfig {
        audio: AudioConfig {
            sample_rate: 1000,
            vad_chunk_ms: 1,
            max_segment_ms: 30_000,
            pre_roll_ms: 0,
        },
        admission: AdmissionConfig {
            submit_min_text_chars: 1,
            submit_require_speech: true,
            submit_min_interval_ms: 20,
            filter_filler: true,
            filler_max_chars: 8,
        },
        merge: MergeConfig {
            final_merge_gap_ms: 150,
            final_merge_max_ms: 2000,
        },
        interrupt: InterruptConfig {
            interrupt_pre_token: true,
            interrupt_post_token_mode: voicebroker::config::PostTokenInterruptMode::Conditional,
            interrupt_min_chars: 4,
        },
        backend: BackendConfig {
            max_pending: 1,
            req_timeout_s: 5,
            conn_timeout_s: 5,
            reconnect_s: 0.3,
            ws_ping_interval_s: 20,
            ws_ping_timeout_s: None,
        },
        server: voicebroker::config::ServerConfig {
            client_bind: "127.0.0.1:0".to_string(),
            backend_url,
        },
        log: voicebroker::config::LogConfig {
            filter: "voicebroker=debug".to_string(),
        },
        recognizer: voicebroker::config::RecognizerConfig { strict_model: false },
    }
}

/// One fake "one sample per chunk" PCM frame.
fn pcm_frame(sample: i16) -> Vec<u8> {
    sample.to_le_bytes().to_vec()
}

/// A mock LLM backend: replies to every `llm_request` with two stream
/// deltas followed by one terminal `llm_response`.
async fn spawn_mock_backend() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{}", addr);

    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                let (mut write, mut read) = ws.split();
                while let Some(Ok(msg)) = read.next().await {
                    if let Message::Text(text) = msg {
                        let req: Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(_) => continue,
                        };
                        let request_id = req["request_id"].as_str().unwrap_or("").to_string();
                        let reply_text = format!("回复:{}", req["text"].as_str().unwrap_or(""));

                        let delta1 = json!({"type":"llm_stream","request_id":request_id,"delta":"好","final":false});
                        let delta2 = json!({"type":"llm_stream","request_id":request_id,"delta":"的","final":false});
                        let terminal = json!({"type":"llm_response","request_id":request_id,"reply":reply_text,"final":true});

                        if write.send(Message::Text(delta1.to_string().into())).await.is_err() {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        if write.send(Message::Text(delta2.to_string().into())).await.is_err() {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        if write.send(Message::Text(terminal.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    (url, task)
}

/// Boot a broker router with a scripted recognizer; returns the client-link
/// base URL and the backend bridge (so tests can inspect/stop it).
async fn spawn_broker(
    config: BrokerConfig,
    recognizer: ScriptedRecognizer,
) -> (String, Arc<BackendBridge>, tokio::task::JoinHandle<()>) {
    let bridge = BackendBridge::start(config.server.backend_url.clone(), config.backend.clone());
    let state = web::routes::AppState {
        config: Arc::new(config),
        bridge: bridge.clone(),
        recognizer: Arc::new(recognizer),
    };
    let app = web::create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{}/ws", addr);

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    // Give the bridge a moment to connect before the first client sends.
    tokio::time::sleep(Duration::from_millis(100)).await;

    (url, bridge, handle)
}

async fn recv_events(
    client: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    deadline: Duration,
) -> Vec<Value> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(deadline, async {
        while let Some(Ok(Message::Text(text))) = client.next().await {
            if let Ok(v) = serde_json::from_str::<Value>(&text) {
                events.push(v);
            }
        }
    })
    .await;
    events
}

#[tokio::test]
async fn s1_two_utterance_merge_reaches_completed_result() {
    let (backend_url, _backend_task) = spawn_mock_backend().await;
    let config = test_config(backend_url);
    let recognizer = ScriptedRecognizer::new(vec![
        ("帮我关灯", "Speech"),
        ("以及提醒我十分钟后喝水", "Speech"),
    ]);
    let (ws_url, bridge, _server) = spawn_broker(config, recognizer).await;

    let (mut client, _) = connect_async(&ws_url).await.expect("client connects");

    client.send(Message::Binary(pcm_frame(100).into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    client.send(Message::Binary(pcm_frame(200).into())).await.unwrap();

    let events = recv_events(&mut client, Duration::from_secs(2)).await;

    let asr_finals: Vec<&Value> = events.iter().filter(|e| e["event"] == "asr").collect();
    assert_eq!(asr_finals.len(), 2);

    let queued = events
        .iter()
        .find(|e| e["event"] == "backend_state" && e["stage"] == "queued")
        .expect("expected queued backend_state");
    assert_eq!(queued["merge_count"], 2);
    assert_eq!(queued["merge_reason"], "gap");

    let result = events
        .iter()
        .find(|e| e["event"] == "backend_result")
        .expect("expected a terminal backend_result");
    assert_eq!(result["reply"], "回复:帮我关灯 以及提醒我十分钟后喝水");

    let completed = events
        .iter()
        .any(|e| e["event"] == "backend_state" && e["stage"] == "completed");
    assert!(completed);

    bridge.stop().await;
}

#[tokio::test]
async fn s2_filler_utterance_is_filtered_not_dispatched() {
    let (backend_url, _backend_task) = spawn_mock_backend().await;
    let config = test_config(backend_url);
    let recognizer = ScriptedRecognizer::new(vec![("嗯", "Speech")]);
    let (ws_url, bridge, _server) = spawn_broker(config, recognizer).await;

    let (mut client, _) = connect_async(&ws_url).await.expect("client connects");
    client.send(Message::Binary(pcm_frame(50).into())).await.unwrap();

    let events = recv_events(&mut client, Duration::from_millis(500)).await;

    let filtered = events
        .iter()
        .find(|e| e["event"] == "filtered")
        .expect("expected a filtered event");
    assert_eq!(filtered["reason"], "filler_text");
    assert_eq!(filtered["text"], "嗯");

    assert!(!events.iter().any(|e| e["event"] == "backend_state"));

    bridge.stop().await;
}

#[tokio::test]
async fn s5_queue_full_backbuffers_instead_of_dropping() {
    let (backend_url, _backend_task) = spawn_mock_backend().await;
    let mut config = test_config(backend_url);
    config.backend.max_pending = 1;
    config.merge.final_merge_gap_ms = 2_000_000; // effectively never fires on its own
    let recognizer = ScriptedRecognizer::new(vec![
        ("第一句长句子占位内容", "Speech"),
        ("第二句长句子占位内容", "Speech"),
        ("第三句长句子占位内容", "Speech"),
    ]);
    let (ws_url, bridge, _server) = spawn_broker(config, recognizer).await;

    let (mut client, _) = connect_async(&ws_url).await.expect("client connects");

    // Force three independent commits via `flush`, so the queue fills while
    // the first request is dispatched and the second is still queued.
    for sample in [1i16, 2, 3] {
        client.send(Message::Binary(pcm_frame(sample).into())).await.unwrap();
        client
            .send(Message::Text(json!({"event":"flush"}).to_string().into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    let events = recv_events(&mut client, Duration::from_secs(2)).await;

    let queue_busy = events
        .iter()
        .any(|e| e["event"] == "backend_state" && e["stage"] == "queue_busy");
    assert!(queue_busy, "expected at least one queue_busy backend_state");

    let busy_filtered = events
        .iter()
        .any(|e| e["event"] == "filtered" && e["reason"] == "backend_queue_busy_buffering");
    assert!(busy_filtered, "expected backend_queue_busy_buffering filtered event");

    bridge.stop().await;
}

#[tokio::test]
async fn client_ping_receives_pong() {
    let (backend_url, _backend_task) = spawn_mock_backend().await;
    let config = test_config(backend_url);
    let recognizer = ScriptedRecognizer::new(vec![]);
    let (ws_url, bridge, _server) = spawn_broker(config, recognizer).await;

    let (mut client, _) = connect_async(&ws_url).await.expect("client connects");
    client
        .send(Message::Text(json!({"event":"ping"}).to_string().into()))
        .await
        .unwrap();

    let events = recv_events(&mut client, Duration::from_millis(300)).await;
    assert!(events.iter().any(|e| e["event"] == "pong"));

    bridge.stop().await;
}

#[tokio::test]
async fn healthz_reports_backend_connectivity() {
    let (backend_url, _backend_task) = spawn_mock_backend().await;
    let config = test_config(backend_url);
    let recognizer = ScriptedRecognizer::new(vec![]);
    let bridge = BackendBridge::start(config.server.backend_url.clone(), config.backend.clone());
    let state = web::routes::AppState {
        config: Arc::new(config),
        bridge: bridge.clone(),
        recognizer: Arc::new(recognizer),
    };
    let app = web::create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(150)).await;

    let resp = http_get_json(&format!("http://{}/healthz", addr)).await;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["backend_connected"], true);

    bridge.stop().await;
}

/// Minimal raw-TCP GET helper: `/healthz` is plain HTTP, and this crate has
/// no HTTP client dependency, so this test speaks HTTP/1.1 directly rather
/// than pulling one in just for an assertion.
async fn http_get_json(url: &str) -> Value {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let addr = url.trim_start_matches("http://");
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET /healthz HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    let text = String::from_utf8_lossy(&buf);
    let body = text.split("\r\n\r\n").nth(1).unwrap_or("");
    serde_json::from_str(body).expect("valid JSON health body")
}
