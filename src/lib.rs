//! Real-time voice-to-LLM edge broker: per-session ASR segmentation,
//! classification/admission, debounced merge, bounded backend queue and
//! single-in-flight dispatcher with interruption, and the process-wide
//! backend bridge.

pub mod audio;
pub mod backend;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod merge;
pub mod queue;
pub mod recognizer;
pub mod segmenter;
pub mod session;
pub mod types;
pub mod web;

pub use config::BrokerConfig;
pub use error::{BridgeError, BrokerError, BrokerResult};
