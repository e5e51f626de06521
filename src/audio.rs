//! Audio ingestion: rolling PCM accumulator.

use std::collections::VecDeque;

/// Converts a little-endian PCM16 byte slice into normalized f32 samples in
/// `[-1, 1]`.
pub fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect()
}

/// Rolling accumulator of incoming audio for one session.
pub struct AudioBuffer {
    vad_chunk_samples: usize,
    pre_roll_samples: usize,
    max_segment_samples: usize,

    /// Samples not yet sliced into a VAD chunk.
    pending: Vec<f32>,
    /// Rolling pre-roll history, bounded to `pre_roll_samples`.
    history: VecDeque<f32>,
    /// In-progress segment buffer (only meaningful while `in_segment`).
    segment: Vec<f32>,
    in_segment: bool,
}

impl AudioBuffer {
    pub fn new(vad_chunk_samples: usize, pre_roll_samples: usize, max_segment_samples: usize) -> Self {
        Self {
            vad_chunk_samples,
            pre_roll_samples,
            max_segment_samples,
            pending: Vec::new(),
            history: VecDeque::with_capacity(pre_roll_samples),
            segment: Vec::new(),
            in_segment: false,
        }
    }

    pub fn in_segment(&self) -> bool {
        self.in_segment
    }

    pub fn segment_len(&self) -> usize {
        self.segment.len()
    }

    pub fn max_segment_samples(&self) -> usize {
        self.max_segment_samples
    }

    /// Append freshly arrived samples to the pending queue.
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    /// Pull the next fixed-size VAD chunk out of `pending`, if one is ready.
    ///
    /// Does not touch `history` — the caller must call [`record_history`]
    /// with this chunk once it has decided whether to begin/append a segment
    /// with it, so `history` at that decision point still reflects only the
    /// audio that preceded this chunk.
    ///
    /// [`record_history`]: AudioBuffer::record_history
    pub fn next_chunk(&mut self) -> Option<Vec<f32>> {
        if self.pending.len() < self.vad_chunk_samples {
            return None;
        }
        let chunk: Vec<f32> = self.pending.drain(..self.vad_chunk_samples).collect();
        Some(chunk)
    }

    /// Drain whatever remains in `pending` as a final, possibly short, chunk
    /// (used by `flush`). Same history-ordering contract as [`next_chunk`].
    ///
    /// [`next_chunk`]: AudioBuffer::next_chunk
    pub fn drain_tail(&mut self) -> Option<Vec<f32>> {
        if self.pending.is_empty() {
            return None;
        }
        let chunk: Vec<f32> = self.pending.drain(..).collect();
        Some(chunk)
    }

    /// Fold a chunk already handed to [`begin_segment`]/[`append_segment`]
    /// into the rolling pre-roll history, for use as the prefix of some
    /// future segment.
    ///
    /// [`begin_segment`]: AudioBuffer::begin_segment
    /// [`append_segment`]: AudioBuffer::append_segment
    pub fn record_history(&mut self, chunk: &[f32]) {
        self.history.extend(chunk.iter().copied());
        while self.history.len() > self.pre_roll_samples {
            self.history.pop_front();
        }
    }

    /// Begin a new segment, prefixing the current pre-roll history.
    pub fn begin_segment(&mut self, chunk: &[f32]) {
        self.segment.clear();
        self.segment.extend(self.history.iter().copied());
        self.segment.extend_from_slice(chunk);
        self.in_segment = true;
    }

    /// Append a chunk to the in-progress segment.
    pub fn append_segment(&mut self, chunk: &[f32]) {
        self.segment.extend_from_slice(chunk);
    }

    /// Finalize and return the accumulated segment, resetting state.
    pub fn finalize_segment(&mut self) -> Vec<f32> {
        self.in_segment = false;
        std::mem::take(&mut self.segment)
    }

    /// True once the in-progress segment has reached the hard cap.
    pub fn segment_over_cap(&self) -> bool {
        self.segment.len() >= self.max_segment_samples
    }
}
