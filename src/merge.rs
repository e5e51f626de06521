//! Merge Buffer: debounced aggregator.

use crate::config::MergeConfig;
use crate::types::{BackendRequest, MergeReason};

/// In-progress aggregation of admitted utterances awaiting commit.
///
/// Empty iff `texts` is empty and `started_ms == last_ms == 0`.
pub struct MergeWindow {
    session_id: String,
    texts: Vec<String>,
    started_ms: i64,
    last_ms: i64,
    emotion: String,
    audio_event: String,
    version: u64,
    next_seq: u64,
}

impl MergeWindow {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            texts: Vec::new(),
            started_ms: 0,
            last_ms: 0,
            emotion: "EMO_NEUTRAL".to_string(),
            audio_event: "Speech".to_string(),
            version: 0,
            next_seq: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.started_ms == 0 && self.last_ms == 0
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn merge_count(&self) -> usize {
        self.texts.len()
    }

    /// Append an admitted utterance's clean text at `now_ms`.
    pub fn push(&mut self, clean_text: &str, emotion: &str, audio_event: &str, now_ms: i64) {
        if self.texts.is_empty() {
            self.started_ms = now_ms;
        }
        self.last_ms = now_ms;
        self.emotion = emotion.to_string();
        self.audio_event = audio_event.to_string();
        self.texts.push(clean_text.to_string());
    }

    /// Insert interrupted text at the front (steal-back). Used
    /// instead of re-running admission, since the stolen text was already
    /// admitted once.
    pub fn steal_back(&mut self, text: String, now_ms: i64) {
        if self.texts.is_empty() {
            self.started_ms = now_ms;
        }
        self.last_ms = now_ms;
        self.texts.insert(0, text);
    }

    /// True once the window must commit immediately regardless of the gap
    /// timer.
    pub fn exceeds_max_window(&self, now_ms: i64, cfg: &MergeConfig) -> bool {
        !self.is_empty() && now_ms - self.started_ms >= cfg.final_merge_max_ms
    }

    /// Deadline (ms, same clock as `now_ms`) at which the debounce timer
    /// should next fire.
    pub fn next_deadline_ms(&self, cfg: &MergeConfig) -> i64 {
        (self.last_ms + cfg.final_merge_gap_ms).min(self.started_ms + cfg.final_merge_max_ms)
    }

    /// Bump the version counter on every (re)schedule; a timer fired with a
    /// stale `version_snapshot` is a no-op.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Produce a committed [`BackendRequest`] and clear the window.
    pub fn commit(&mut self, reason: MergeReason, now_ms: i64) -> BackendRequest {
        let text = self.texts.join(" ").trim().to_string();
        let merge_count = self.texts.len();
        self.next_seq += 1;
        let request_id = format!("{}-r{}", self.session_id, self.next_seq);

        let req = BackendRequest {
            request_id,
            session_id: self.session_id.clone(),
            text,
            emotion: self.emotion.clone(),
            audio_event: self.audio_event.clone(),
            ts_ms: now_ms,
            merge_reason: reason,
            merge_count,
        };

        self.texts.clear();
        self.started_ms = 0;
        self.last_ms = 0;
        req
    }

    /// Restore the window to a single merged string after a failed commit
    /// attempt (queue full): no data is lost.
    pub fn restore_single(&mut self, text: String, now_ms: i64) {
        self.texts = vec![text];
        self.started_ms = now_ms;
        self.last_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MergeConfig {
        MergeConfig {
            final_merge_gap_ms: 500,
            final_merge_max_ms: 2200,
        }
    }

    #[test]
    fn test_empty_invariant() {
        let w = MergeWindow::new("s-1");
        assert!(w.is_empty());
    }

    #[test]
    fn test_push_sets_started_and_last() {
        let mut w = MergeWindow::new("s-1");
        w.push("帮我关灯", "EMO_NEUTRAL", "Speech", 1000);
        assert!(!w.is_empty());
        w.push("以及提醒我十分钟后喝水", "EMO_NEUTRAL", "Speech", 1300);
        assert_eq!(w.merge_count(), 2);
    }

    #[test]
    fn test_commit_joins_texts_and_clears() {
        let mut w = MergeWindow::new("s-1");
        w.push("帮我关灯", "EMO_NEUTRAL", "Speech", 1000);
        w.push("以及提醒我十分钟后喝水", "EMO_NEUTRAL", "Speech", 1300);
        let req = w.commit(MergeReason::Gap, 1800);
        assert_eq!(req.text, "帮我关灯 以及提醒我十分钟后喝水");
        assert_eq!(req.request_id, "s-1-r1");
        assert_eq!(req.merge_count, 2);
        assert!(w.is_empty());
    }

    #[test]
    fn test_sequential_commits_increment_request_id() {
        let mut w = MergeWindow::new("s-1");
        w.push("a", "EMO_NEUTRAL", "Speech", 0);
        let r1 = w.commit(MergeReason::Gap, 100);
        w.push("b", "EMO_NEUTRAL", "Speech", 200);
        let r2 = w.commit(MergeReason::Gap, 300);
        assert_eq!(r1.request_id, "s-1-r1");
        assert_eq!(r2.request_id, "s-1-r2");
    }

    #[test]
    fn test_exceeds_max_window() {
        let mut w = MergeWindow::new("s-1");
        w.push("a", "EMO_NEUTRAL", "Speech", 0);
        assert!(!w.exceeds_max_window(1000, &cfg()));
        assert!(w.exceeds_max_window(2200, &cfg()));
    }

    #[test]
    fn test_next_deadline_is_min_of_gap_and_max() {
        let mut w = MergeWindow::new("s-1");
        w.push("a", "EMO_NEUTRAL", "Speech", 0);
        // gap deadline = 0 + 500 = 500; max deadline = 0 + 2200 = 2200 -> min is 500
        assert_eq!(w.next_deadline_ms(&cfg()), 500);
    }

    #[test]
    fn test_version_bump_guards_stale_timers() {
        let mut w = MergeWindow::new("s-1");
        let v1 = w.bump_version();
        let v2 = w.bump_version();
        assert!(v2 > v1);
        assert_eq!(w.version(), v2);
    }

    #[test]
    fn test_steal_back_inserts_at_front() {
        let mut w = MergeWindow::new("s-1");
        w.push("换成讲个悲伤的故事", "EMO_NEUTRAL", "Speech", 1000);
        w.steal_back("讲个冷笑话".to_string(), 999);
        assert_eq!(w.merge_count(), 2);
        let req = w.commit(MergeReason::Gap, 1100);
        assert_eq!(req.text, "讲个冷笑话 换成讲个悲伤的故事");
    }

    #[test]
    fn test_restore_single_preserves_text() {
        let mut w = MergeWindow::new("s-1");
        w.push("a", "EMO_NEUTRAL", "Speech", 0);
        w.push("b", "EMO_NEUTRAL", "Speech", 100);
        let merged = format!("{} {}", "a", "b");
        w.restore_single(merged.clone(), 200);
        assert_eq!(w.merge_count(), 1);
        let req = w.commit(MergeReason::Gap, 700);
        assert_eq!(req.text, merged);
    }
}
