use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<BrokerConfig> = OnceLock::new();

/// Policy for interruption once the inflight request has already streamed a
/// token back to the client.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostTokenInterruptMode {
    Always,
    #[serde(alias = "off", alias = "none", alias = "never", alias = "0")]
    Never,
    Conditional,
}

fn default_post_token_mode() -> PostTokenInterruptMode {
    PostTokenInterruptMode::Conditional
}

/// Audio ingestion settings.
#[derive(Debug, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_vad_chunk_ms")]
    pub vad_chunk_ms: u32,
    #[serde(default = "default_max_segment_ms")]
    pub max_segment_ms: u32,
    #[serde(default = "default_pre_roll_ms")]
    pub pre_roll_ms: u32,
}

fn default_sample_rate() -> u32 {
    16000
}
fn default_vad_chunk_ms() -> u32 {
    200
}
fn default_max_segment_ms() -> u32 {
    30000
}
fn default_pre_roll_ms() -> u32 {
    120
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            vad_chunk_ms: default_vad_chunk_ms(),
            max_segment_ms: default_max_segment_ms(),
            pre_roll_ms: default_pre_roll_ms(),
        }
    }
}

impl AudioConfig {
    pub fn vad_chunk_samples(&self) -> usize {
        (self.sample_rate as u64 * self.vad_chunk_ms as u64 / 1000) as usize
    }

    pub fn max_segment_samples(&self) -> usize {
        (self.sample_rate as u64 * self.max_segment_ms as u64 / 1000) as usize
    }

    pub fn pre_roll_samples(&self) -> usize {
        (self.sample_rate as u64 * self.pre_roll_ms as u64 / 1000) as usize
    }
}

/// Admission filter thresholds.
#[derive(Debug, Deserialize, Clone)]
pub struct AdmissionConfig {
    #[serde(default = "default_submit_min_text_chars")]
    pub submit_min_text_chars: usize,
    #[serde(default = "default_true")]
    pub submit_require_speech: bool,
    #[serde(default = "default_submit_min_interval_ms")]
    pub submit_min_interval_ms: i64,
    #[serde(default = "default_true")]
    pub filter_filler: bool,
    #[serde(default = "default_filler_max_chars")]
    pub filler_max_chars: usize,
}

fn default_submit_min_text_chars() -> usize {
    2
}
fn default_submit_min_interval_ms() -> i64 {
    600
}
fn default_filler_max_chars() -> usize {
    8
}
fn default_true() -> bool {
    true
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            submit_min_text_chars: default_submit_min_text_chars(),
            submit_require_speech: true,
            submit_min_interval_ms: default_submit_min_interval_ms(),
            filter_filler: true,
            filler_max_chars: default_filler_max_chars(),
        }
    }
}

/// Merge window debounce settings.
#[derive(Debug, Deserialize, Clone)]
pub struct MergeConfig {
    #[serde(default = "default_final_merge_gap_ms")]
    pub final_merge_gap_ms: i64,
    #[serde(default = "default_final_merge_max_ms")]
    pub final_merge_max_ms: i64,
}

fn default_final_merge_gap_ms() -> i64 {
    500
}
fn default_final_merge_max_ms() -> i64 {
    2200
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            final_merge_gap_ms: default_final_merge_gap_ms(),
            final_merge_max_ms: default_final_merge_max_ms(),
        }
    }
}

/// Interruption policy.
#[derive(Debug, Deserialize, Clone)]
pub struct InterruptConfig {
    #[serde(default = "default_true")]
    pub interrupt_pre_token: bool,
    #[serde(default = "default_post_token_mode")]
    pub interrupt_post_token_mode: PostTokenInterruptMode,
    #[serde(default = "default_interrupt_min_chars")]
    pub interrupt_min_chars: usize,
}

fn default_interrupt_min_chars() -> usize {
    6
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            interrupt_pre_token: true,
            interrupt_post_token_mode: default_post_token_mode(),
            interrupt_min_chars: default_interrupt_min_chars(),
        }
    }
}

/// Backend queue / bridge timing.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_backend_max_pending")]
    pub max_pending: usize,
    #[serde(default = "default_backend_req_timeout_s")]
    pub req_timeout_s: u64,
    #[serde(default = "default_backend_conn_timeout_s")]
    pub conn_timeout_s: u64,
    #[serde(default = "default_backend_reconnect_s")]
    pub reconnect_s: f64,
    #[serde(default = "default_backend_ping_interval_s")]
    pub ws_ping_interval_s: u64,
    #[serde(default)]
    pub ws_ping_timeout_s: Option<u64>,
}

fn default_backend_max_pending() -> usize {
    8
}
fn default_backend_req_timeout_s() -> u64 {
    30
}
fn default_backend_conn_timeout_s() -> u64 {
    8
}
fn default_backend_reconnect_s() -> f64 {
    1.5
}
fn default_backend_ping_interval_s() -> u64 {
    20
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_pending: default_backend_max_pending(),
            req_timeout_s: default_backend_req_timeout_s(),
            conn_timeout_s: default_backend_conn_timeout_s(),
            reconnect_s: default_backend_reconnect_s(),
            ws_ping_interval_s: default_backend_ping_interval_s(),
            ws_ping_timeout_s: None,
        }
    }
}

/// Network-facing bind/target addresses: where the client link listens and
/// where the backend bridge connects.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_client_bind")]
    pub client_bind: String,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
}

fn default_client_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_backend_url() -> String {
    "ws://127.0.0.1:8090/ws/edge".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_bind: default_client_bind(),
            backend_url: default_backend_url(),
        }
    }
}

/// Recognizer collaborator startup policy.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RecognizerConfig {
    #[serde(default)]
    pub strict_model: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "voicebroker=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Root broker configuration, layered defaults file, optional local
/// override, then environment.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BrokerConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub interrupt: InterruptConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
}

impl BrokerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("VOICEBROKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn init() -> Result<&'static Self, ConfigError> {
        let config = Self::load()?;
        Ok(CONFIG.get_or_init(|| config))
    }

    pub fn get() -> &'static Self {
        CONFIG.get().expect("BrokerConfig not initialized. Call BrokerConfig::init() first.")
    }
}
