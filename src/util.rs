//! Shared utility functions for the remote-ops crate.

/// Quote a string for safe use as a single POSIX shell word.
///
/// Wraps the value in single quotes; embedded single quotes become `'\''`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Shorten a command for one-line summaries, keeping the first line only.
pub fn truncate_command(command: &str, max_chars: usize) -> String {
    let first_line = command.lines().next().unwrap_or("");
    let multi_line = command.lines().nth(1).is_some();
    if first_line.chars().count() <= max_chars && !multi_line {
        return first_line.to_string();
    }
    let kept: String = first_line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}
