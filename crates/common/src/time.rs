//! Wall-clock helpers for store timestamps and token minting.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
///
/// Clamps to 0 if the system clock is before the epoch rather than panicking.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Truncate a string to at most `max` characters, appending `...` when cut.
///
/// Used when echoing user-generated content into logs and notifications.
#[must_use]
pub fn preview(content: &str, max: usize) -> String {
    if content.chars().count() <= max {
        return content.to_string();
    }
    let cut: String = content.chars().take(max).collect();
    format!("{}... (len={})", cut.replace('\n', "\\n"), content.chars().count())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_now_is_recent() {
        // Anything after 2024-01-01 proves the clock path works.
        assert!(unix_now() > 1_704_067_200);
    }

    #[test]
    fn test_preview_short_passthrough() {
        assert_eq!(preview("hello", 20), "hello");
    }

    #[test]
    fn test_preview_truncates_and_counts() {
        let out = preview("abcdefghij", 4);
        assert_eq!(out, "abcd... (len=10)");
    }

    #[test]
    fn test_preview_escapes_newlines() {
        let out = preview("a\nbcdef", 3);
        assert!(out.starts_with("a\\nb"));
    }
}
