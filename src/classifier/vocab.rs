//! Classifier vocabulary constants.
//!
//! These sets are a compatibility surface: once published they must not
//! silently change, since the admission filter's behavior is defined in
//! terms of exact membership. Covers the usual hesitation particles,
//! laugh-tokens, and generic deictics per locale as plain token sets rather
//! than regexes.

/// Utterances that are short but carry a complete, actionable meaning and
/// must bypass the minimum-length admission check.
pub const KEEP_SHORT_TOKENS: &[&str] = &[
    "好", "对", "是", "不", "不是", "好的", "停", "停止", "暂停", "可以", "行",
    "ok", "okay", "yes", "no", "stop", "wait",
];

/// Exact tokens that are pure filler once run-collapsed and punctuation
/// stripped.
pub const DROP_FILLER_TOKENS: &[&str] = &[
    "啊啊", "哦哦", "嗯嗯", "呃呃", "诶诶", "哈哈", "呵呵", "嘻嘻", "哎哎",
];

/// Hesitation markers and discourse fillers that carry no admissible content
/// on their own.
pub const COMMON_FILLERS: &[&str] = &[
    "那个", "这个", "就是", "然后呢", "嗯那个", "emmm", "emm",
];

/// Single low-semantic deictic/filler tokens.
pub const LOW_SEMANTIC_SINGLE_TOKENS: &[&str] =
    &["什么", "这样", "那样", "怎么说", "嗯哼", "诶"];

/// Individual characters treated as filler when the whole token is short and
/// composed only of these.
pub const ZH_FILLER_CHARS: &[char] = &[
    '啊', '哦', '嗯', '唉', '哎', '呃', '额', '噢', '喔', '呗', '诶',
];

/// English words that are filler even in short multi-word runs.
pub const EN_LOW_SEMANTIC_WORDS: &[&str] =
    &["um", "uh", "okay", "yeah", "hmm", "like", "so", "well", "ah"];

/// English filler words admissible under the total-letter-count cap.
pub const EN_FILLER_WORDS: &[&str] = &["um", "uh", "ah", "er", "hmm", "mm", "oh"];
