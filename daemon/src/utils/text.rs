use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ANSI_PATTERN: Regex =
        Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("Failed to compile ANSI_PATTERN regex");
    static ref COLOR_PATTERN: Regex =
        Regex::new("(?i)§[0-9a-fk-or]").expect("Failed to compile COLOR_PATTERN regex");
}

/// Strips ANSI control sequences (cursor movement, colors) from console
/// output before it enters the log buffer.
pub fn strip_ansi(input: &str) -> String {
    ANSI_PATTERN.replace_all(input, "").into_owned()
}

/// Strips presentation color codes (`§x`) and ANSI sequences from a
/// command response before it is returned to the caller.
pub fn strip_color(input: &str) -> String {
    COLOR_PATTERN.replace_all(&strip_ansi(input), "").into_owned()
}

/// Timestamp suffix safe for directory names on every platform.
pub fn sanitize_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// Backup labels end up in directory names; anything outside
/// `[A-Za-z0-9_-]` becomes `-`.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "backup".to_string()
    } else {
        cleaned
    }
}
