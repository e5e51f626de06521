//! Wall-clock milliseconds, used throughout the pipeline's timing rules
//! (segment timestamps, merge window bookkeeping, admission rate limiting).

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
