//! Small shared helpers.

use std::io::{BufRead, Write};

/// Best-effort local hostname, used for the lock owner token and the
/// `applied_by` column.
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Truncate for display, respecting char boundaries.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Print a `[y/N]` prompt and read one line from stdin. Anything except
/// `y`/`yes` (case-insensitive) declines.
pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush()?;

    let mut response = String::new();
    std::io::stdin().lock().read_line(&mut response)?;
    let response = response.trim().to_lowercase();
    Ok(response == "y" || response == "yes")
}

/// Read one line from stdin after a prompt.
pub fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;

    let mut response = String::new();
    std::io::stdin().lock().read_line(&mut response)?;
    Ok(response.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_shortens_long_strings() {
        assert_eq!(truncate("short", 120), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        // Multi-byte characters never split.
        assert_eq!(truncate("ééééé", 2), "éé...");
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!hostname().is_empty());
    }
}
