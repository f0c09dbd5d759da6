//! Utility functions for chatling.

use std::fs;
use std::path::{Path, PathBuf};

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref().to_path_buf();
    if !path.exists() {
        let _ = fs::create_dir_all(&path);
    }
    path
}

/// Get the chatling data directory (~/.chatling).
pub fn get_data_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    ensure_dir(home.join(".chatling"))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(rest)
    } else if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else {
        PathBuf::from(path)
    }
}

/// Find the largest byte index `<= idx` that lies on a UTF-8 char boundary.
///
/// Equivalent to the nightly `str::floor_char_boundary`.
pub fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while !s.is_char_boundary(i) && i > 0 {
        i -= 1;
    }
    i
}

/// Truncate a string to max length, adding a suffix if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    let suffix = "...";
    if s.len() <= max_len {
        return s.to_string();
    }
    if max_len <= suffix.len() {
        let end = floor_char_boundary(s, max_len);
        return s[..end].to_string();
    }
    let end = floor_char_boundary(s, max_len - suffix.len());
    let mut result = s[..end].to_string();
    result.push_str(suffix);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate_string("hello world", 8), "hello...");
    }

    #[test]
    fn test_expand_tilde() {
        let p = expand_tilde("~/foo/bar");
        assert!(p.ends_with("foo/bar"));
        assert!(!p.to_string_lossy().contains('~'));
    }

    #[test]
    fn test_expand_tilde_plain_path_untouched() {
        assert_eq!(expand_tilde("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_floor_char_boundary_ascii() {
        assert_eq!(floor_char_boundary("hello", 3), 3);
        assert_eq!(floor_char_boundary("hello", 10), 5);
        assert_eq!(floor_char_boundary("hello", 0), 0);
    }

    #[test]
    fn test_floor_char_boundary_multibyte() {
        // "héllo" — 'é' is 2 bytes (0xC3 0xA9), so byte indices 1..=2
        let s = "héllo";
        assert_eq!(s.len(), 6);
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 3), 3);
    }

    #[test]
    fn test_truncate_string_multibyte() {
        // Should not panic on multi-byte strings
        let s = "café résumé";
        let t = truncate_string(s, 6);
        assert!(t.len() <= 9);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let created = ensure_dir(&nested);
        assert!(created.is_dir());
    }
}
