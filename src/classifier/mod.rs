//! Classifier & Admission Filter.

pub mod vocab;

use crate::config::AdmissionConfig;
use crate::types::{ParsedUtterance, UtteranceClass};
use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

fn word_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z]+").expect("static regex"))
}

/// NFKC-fold, lowercase, strip whitespace/punctuation, and collapse any run
/// of the same character longer than 2 down to length 2.
pub fn normalize_token(text: &str) -> String {
    let folded: String = text.nfkc().collect();
    let lowered = folded.to_lowercase();

    let stripped: String = lowered
        .chars()
        .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
        .collect();

    collapse_runs(&stripped)
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '，' | '。'
                | '！'
                | '？'
                | '；'
                | '：'
                | '“'
                | '”'
                | '‘'
                | '’'
                | '（'
                | '）'
                | '、'
                | '…'
                | '—'
                | '·'
        )
}

fn collapse_runs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev: Option<char> = None;
    let mut run_len = 0usize;
    for c in s.chars() {
        if Some(c) == prev {
            run_len += 1;
        } else {
            prev = Some(c);
            run_len = 1;
        }
        if run_len <= 2 {
            out.push(c);
        }
    }
    out
}

/// Pure classification of a single utterance's clean text.
pub fn classify_utterance(clean_text: &str, filler_max_chars: usize) -> UtteranceClass {
    let token = normalize_token(clean_text);

    if token.is_empty() {
        return UtteranceClass::DropFiller;
    }
    if vocab::KEEP_SHORT_TOKENS.contains(&token.as_str()) {
        return UtteranceClass::KeepShort;
    }
    if vocab::DROP_FILLER_TOKENS.contains(&token.as_str())
        || vocab::COMMON_FILLERS.contains(&token.as_str())
    {
        return UtteranceClass::DropFiller;
    }
    if vocab::LOW_SEMANTIC_SINGLE_TOKENS.contains(&token.as_str()) {
        return UtteranceClass::DropFiller;
    }
    if token.chars().count() <= filler_max_chars
        && token.chars().all(|c| vocab::ZH_FILLER_CHARS.contains(&c))
    {
        return UtteranceClass::DropFiller;
    }

    let lower_source = clean_text.to_lowercase();
    let words: Vec<&str> = word_pattern()
        .find_iter(&lower_source)
        .map(|m| m.as_str())
        .collect();
    if !words.is_empty() {
        if words.len() <= 2 && words.iter().all(|w| vocab::EN_LOW_SEMANTIC_WORDS.contains(w)) {
            return UtteranceClass::DropFiller;
        }
        let letter_count: usize = words.iter().map(|w| w.len()).sum();
        if letter_count <= 2 * filler_max_chars
            && words.iter().all(|w| vocab::EN_FILLER_WORDS.contains(w))
        {
            return UtteranceClass::DropFiller;
        }
    }

    UtteranceClass::Normal
}

/// Reasons an utterance can be rejected by the admission filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    FillerText,
    TextTooShort,
    NotSpeechEvent,
    SubmitIntervalLimited,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::FillerText => "filler_text",
            RejectReason::TextTooShort => "text_too_short",
            RejectReason::NotSpeechEvent => "not_speech_event",
            RejectReason::SubmitIntervalLimited => "submit_interval_limited",
        }
    }
}

pub enum Admission {
    Admit { class: UtteranceClass },
    Reject { reason: RejectReason },
}

/// Ordered short-circuit admission check.
pub fn admit(
    utterance: &ParsedUtterance,
    now_ms: i64,
    last_submit_ms: i64,
    cfg: &AdmissionConfig,
) -> Admission {
    let class = classify_utterance(&utterance.clean_text, cfg.filler_max_chars);

    if cfg.filter_filler && class == UtteranceClass::DropFiller {
        return Admission::Reject {
            reason: RejectReason::FillerText,
        };
    }
    if class != UtteranceClass::KeepShort
        && utterance.clean_text.chars().count() < cfg.submit_min_text_chars
    {
        return Admission::Reject {
            reason: RejectReason::TextTooShort,
        };
    }
    if cfg.submit_require_speech && utterance.audio_event != "Speech" {
        return Admission::Reject {
            reason: RejectReason::NotSpeechEvent,
        };
    }
    if now_ms - last_submit_ms < cfg.submit_min_interval_ms {
        return Admission::Reject {
            reason: RejectReason::SubmitIntervalLimited,
        };
    }

    Admission::Admit { class }
}
