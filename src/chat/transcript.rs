//! Conversation transcript persistence.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::providers::base::ChatMessage;

/// A saved conversation: a title plus the full message history.
///
/// Stored as pretty-printed JSON so transcripts stay hand-readable and
/// diffable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl Transcript {
    /// Load a transcript from `path`.
    ///
    /// A missing file yields an empty transcript; an unreadable or corrupt
    /// file is an error so a bad transcript never silently resets history.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read transcript {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse transcript {}", path.display()))
    }

    /// Save the transcript to `path`, creating parent directories and
    /// stamping `saved_at`.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        self.saved_at = Some(Local::now());
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("write transcript {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_returns_empty() {
        let transcript = Transcript::load(Path::new("/tmp/chatling_no_such_transcript.json"))
            .unwrap();
        assert!(transcript.messages.is_empty());
        assert!(transcript.title.is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.json");

        let mut transcript = Transcript {
            title: "list files".into(),
            saved_at: None,
            messages: vec![
                ChatMessage::user("list files"),
                ChatMessage::assistant("done"),
            ],
        };
        transcript.save(&path).unwrap();

        let loaded = Transcript::load(&path).unwrap();
        assert_eq!(loaded.title, "list files");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].role, "user");
        assert!(loaded.saved_at.is_some());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Transcript::load(&path).unwrap_err();
        assert!(err.to_string().contains("parse transcript"));
    }
}
