//! Default [`SpeechRecognizer`] wiring for the broker binary.
//!
//! The VAD+ASR model itself is out of scope here: the core pipeline only
//! depends on the [`SpeechRecognizer`] trait (`segmenter` module). This
//! module supplies the stand-in used by `main` so the binary links and runs;
//! a real deployment swaps it for a model-backed implementation (e.g. a
//! FunASR process bridged over a worker thread) without touching anything
//! under session/merge/queue/dispatcher/backend.

use crate::segmenter::{RecognizerOutput, SpeechRecognizer, VadBoundary};

/// A recognizer that never detects speech and never produces text.
///
/// Used as the default collaborator when no real ASR/VAD model is wired in.
/// Every chunk reports "no boundary", so sessions started with this
/// recognizer receive audio but never emit a `ParsedUtterance` — useful for
/// exercising the Client Link and Backend Bridge independently of a model.
pub struct NullRecognizer;

impl SpeechRecognizer for NullRecognizer {
    fn detect_boundary(&self, _chunk: &[f32]) -> VadBoundary {
        VadBoundary::none()
    }

    fn transcribe(&self, _segment: &[f32]) -> RecognizerOutput {
        RecognizerOutput {
            raw_text: String::new(),
            clean_text: String::new(),
            language: "unknown".to_string(),
            emotion: "EMO_NEUTRAL".to_string(),
            audio_event: "Noise".to_string(),
            itn: "withitn".to_string(),
        }
    }
}

/// Attempt to construct the configured recognizer collaborator.
///
/// When `strict_model` is set, failing to obtain a real recognizer is a
/// hard startup error rather than a silent fallback to [`NullRecognizer`].
pub fn build_recognizer(strict_model: bool) -> anyhow::Result<NullRecognizer> {
    if strict_model {
        anyhow::bail!(
            "no model-backed SpeechRecognizer is wired in and STRICT_MODEL is set; \
             refusing to start with a null recognizer"
        );
    }
    Ok(NullRecognizer)
}
