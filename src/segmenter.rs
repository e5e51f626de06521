//! Segmenter: drives the external VAD+ASR collaborator.
//!
//! The speech recognizer and voice-activity detector are explicitly out of
//! scope — they are opaque collaborators behind the
//! [`SpeechRecognizer`] trait so a real ASR backend can be plugged in
//! without touching the broker core.

use crate::audio::AudioBuffer;
use crate::types::ParsedUtterance;
use std::sync::Arc;

/// A voice-activity boundary decision for one chunk. Negative values mean
/// "no boundary in this chunk".
#[derive(Debug, Clone, Copy, Default)]
pub struct VadBoundary {
    pub begin_ms: i64,
    pub end_ms: i64,
}

impl VadBoundary {
    pub fn none() -> Self {
        Self {
            begin_ms: -1,
            end_ms: -1,
        }
    }

    pub fn has_begin(&self) -> bool {
        self.begin_ms >= 0
    }

    pub fn has_end(&self) -> bool {
        self.end_ms >= 0
    }
}

/// Raw ASR finalization output before timestamping (`ParsedUtterance`
/// minus `ts_ms`, which the segmenter stamps at finalization time).
#[derive(Debug, Clone)]
pub struct RecognizerOutput {
    pub raw_text: String,
    pub clean_text: String,
    pub language: String,
    pub emotion: String,
    pub audio_event: String,
    pub itn: String,
}

/// The external speech recognizer/VAD collaborator.
///
/// Implementations are expected to be cheap to clone (e.g. an `Arc` wrapping
/// a model handle) since the segmenter calls across a `spawn_blocking`
/// boundary so model inference never blocks the session's async loop.
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Decide whether this chunk starts or ends a speech segment.
    fn detect_boundary(&self, chunk: &[f32]) -> VadBoundary;

    /// Run ASR over an accumulated segment and return its tagged final.
    fn transcribe(&self, segment: &[f32]) -> RecognizerOutput;
}

/// Drives one session's [`AudioBuffer`] + [`SpeechRecognizer`] pair,
/// producing `final=true` [`ParsedUtterance`]s.
pub struct Segmenter<R: SpeechRecognizer> {
    recognizer: Arc<R>,
    buffer: AudioBuffer,
}

impl<R: SpeechRecognizer> Segmenter<R> {
    pub fn new(recognizer: Arc<R>, buffer: AudioBuffer) -> Self {
        Self { recognizer, buffer }
    }

    /// Feed newly arrived PCM samples into the buffer.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.buffer.push(samples);
    }

    /// Slice and process as many ready VAD chunks as are available, returning
    /// any finals produced along the way.
    pub async fn process_ready_chunks(&mut self) -> Vec<ParsedUtterance> {
        let mut finals = Vec::new();
        while let Some(chunk) = self.buffer.next_chunk() {
            if let Some(u) = self.process_chunk(chunk).await {
                finals.push(u);
            }
        }
        finals
    }

    async fn process_chunk(&mut self, chunk: Vec<f32>) -> Option<ParsedUtterance> {
        let recognizer = self.recognizer.clone();
        let chunk_for_vad = chunk.clone();
        let boundary = tokio::task::spawn_blocking(move || recognizer.detect_boundary(&chunk_for_vad))
            .await
            .unwrap_or_else(|_| VadBoundary::none());

        if boundary.has_begin() && !self.buffer.in_segment() {
            self.buffer.begin_segment(&chunk);
        } else if self.buffer.in_segment() {
            self.buffer.append_segment(&chunk);
        }
        self.buffer.record_history(&chunk);

        let should_finalize =
            (boundary.has_end() && self.buffer.in_segment()) || self.buffer.segment_over_cap();

        if should_finalize && self.buffer.in_segment() {
            return Some(self.finalize().await);
        }
        None
    }

    async fn finalize(&mut self) -> ParsedUtterance {
        let segment = self.buffer.finalize_segment();
        let recognizer = self.recognizer.clone();
        let now_ms = crate::clock::now_ms();
        let output = tokio::task::spawn_blocking(move || recognizer.transcribe(&segment))
            .await
            .unwrap_or_else(|_| RecognizerOutput {
                raw_text: String::new(),
                clean_text: String::new(),
                language: "unknown".to_string(),
                emotion: "EMO_NEUTRAL".to_string(),
                audio_event: "Noise".to_string(),
                itn: "withitn".to_string(),
            });

        ParsedUtterance {
            raw_text: output.raw_text,
            clean_text: output.clean_text,
            language: output.language,
            emotion: output.emotion,
            audio_event: output.audio_event,
            itn: output.itn,
            ts_ms: now_ms,
        }
    }

    /// `flush` control: drain pending samples (last sub-chunk terminal) and
    /// finalize any in-progress segment.
    pub async fn flush(&mut self) -> Option<ParsedUtterance> {
        if let Some(tail) = self.buffer.drain_tail() {
            if self.buffer.in_segment() {
                self.buffer.append_segment(&tail);
            } else if !tail.is_empty() {
                self.buffer.begin_segment(&tail);
            }
            self.buffer.record_history(&tail);
        }
        if self.buffer.in_segment() {
            Some(self.finalize().await)
        } else {
            None
        }
    }
}
