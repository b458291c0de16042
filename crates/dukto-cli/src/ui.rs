//! UI utilities for Dukto CLI.

use std::time::Duration;

/// Parse a duration string like "5m", "30s", or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix('m') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 60))
    } else if let Some(num_str) = s.strip_suffix('s') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 3600))
    } else {
        None
    }
}

/// Shorten `s` to at most `max` characters, ending in `...` when cut.
pub fn truncate_string(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(
            truncate_string("Marcus at marcus-laptop (Linux)", 16),
            "Marcus at mar..."
        );
    }
}
