//! Channel history from a Telegram Desktop export (`result.json`).
//!
//! The Bot API cannot page through old channel posts, so scans read them from
//! an export instead: Settings → Advanced → Export Telegram Data, pick the
//! channel, choose JSON.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::maintenance::HistoryItem;

#[derive(Debug)]
pub enum ExportError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    /// The export is a DM or bot chat, which this tool never manages.
    NotAChannel(String),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read export '{}': {}", path.display(), source)
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse export '{}': {}", path.display(), source)
            }
            Self::NotAChannel(kind) => write!(f, "export is a {kind}, not a channel or group"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::NotAChannel(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct RawExport {
    name: Option<String>,
    #[serde(rename = "type")]
    chat_type: String,
    id: i64,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    id: i64,
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    text: TextContent,
    photo: Option<String>,
    file: Option<String>,
    media_type: Option<String>,
}

impl RawMessage {
    fn has_media(&self) -> bool {
        self.photo.is_some() || self.file.is_some() || self.media_type.is_some()
    }
}

/// Text is either a plain string or an array of plain/formatted pieces.
#[derive(Deserialize, Default)]
#[serde(untagged)]
enum TextContent {
    #[default]
    Empty,
    Simple(String),
    Complex(Vec<TextEntity>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextEntity {
    Plain(String),
    Formatted { text: String },
}

impl fmt::Display for TextContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextContent::Empty => Ok(()),
            TextContent::Simple(s) => write!(f, "{}", s),
            TextContent::Complex(entities) => {
                for e in entities {
                    match e {
                        TextEntity::Plain(s) => write!(f, "{}", s)?,
                        TextEntity::Formatted { text } => write!(f, "{}", text)?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// A parsed export.
pub struct ChannelExport {
    pub name: String,
    /// Bot API chat id (`-100…` form).
    pub chat_id: i64,
    /// Ascending by id, service messages dropped.
    items: Vec<HistoryItem>,
}

/// Exports store channels and supergroups without the `-100` prefix the Bot
/// API uses.
pub fn bot_api_chat_id(export_id: i64) -> i64 {
    if export_id > 0 {
        -1_000_000_000_000 - export_id
    } else {
        export_id
    }
}

impl ChannelExport {
    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let json = std::fs::read_to_string(path).map_err(|source| ExportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&json).map_err(|e| match e {
            ParseFailure::Json(source) => ExportError::Parse {
                path: path.to_path_buf(),
                source,
            },
            ParseFailure::Kind(kind) => ExportError::NotAChannel(kind),
        })
    }

    fn parse(json: &str) -> Result<Self, ParseFailure> {
        let raw: RawExport = serde_json::from_str(json).map_err(ParseFailure::Json)?;
        if matches!(raw.chat_type.as_str(), "personal_chat" | "bot_chat" | "saved_messages") {
            return Err(ParseFailure::Kind(raw.chat_type));
        }

        let mut items: Vec<HistoryItem> = raw
            .messages
            .into_iter()
            .filter(|m| m.msg_type == "message")
            .map(|m| {
                let text = m.text.to_string();
                let text = (!text.is_empty()).then_some(text);
                if m.has_media() {
                    HistoryItem { id: m.id, text: None, caption: text }
                } else {
                    HistoryItem { id: m.id, text, caption: None }
                }
            })
            .collect();
        items.sort_by_key(|item| item.id);

        Ok(Self {
            name: raw.name.unwrap_or_default(),
            chat_id: bot_api_chat_id(raw.id),
            items,
        })
    }

    /// Up to `limit` messages, newest first.
    pub fn history(&self, limit: usize) -> Vec<HistoryItem> {
        self.items.iter().rev().take(limit).cloned().collect()
    }

    pub fn message_count(&self) -> usize {
        self.items.len()
    }
}

enum ParseFailure {
    Json(serde_json::Error),
    Kind(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const EXPORT: &str = r#"{
        "name": "My Channel",
        "type": "public_channel",
        "id": 1234567890,
        "messages": [
            {"id": 1, "type": "service", "action": "create_channel", "text": ""},
            {"id": 2, "type": "message", "text": "hello @there"},
            {"id": 3, "type": "message", "photo": "photos/1.jpg", "text": "look at this"},
            {"id": 4, "type": "message", "text": ["visit ", {"type": "link", "text": "https://x.io"}, " now"]},
            {"id": 5, "type": "message", "file": "video.mp4", "media_type": "video_file", "text": ""}
        ]
    }"#;

    #[test]
    fn test_parse_channel_export() {
        let export = ChannelExport::parse(EXPORT).ok().unwrap();
        assert_eq!(export.name, "My Channel");
        assert_eq!(export.chat_id, -1001234567890);
        assert_eq!(export.message_count(), 4);
    }

    #[test]
    fn test_history_newest_first_with_limit() {
        let export = ChannelExport::parse(EXPORT).ok().unwrap();
        let ids: Vec<i64> = export.history(3).iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[test]
    fn test_media_text_is_caption() {
        let export = ChannelExport::parse(EXPORT).ok().unwrap();
        let history = export.history(10);
        let photo = history.iter().find(|i| i.id == 3).unwrap();
        assert_eq!(photo.caption.as_deref(), Some("look at this"));
        assert_eq!(photo.text, None);

        let video = history.iter().find(|i| i.id == 5).unwrap();
        assert_eq!(video.caption, None);
        assert_eq!(video.text, None);
    }

    #[test]
    fn test_rich_text_is_flattened() {
        let export = ChannelExport::parse(EXPORT).ok().unwrap();
        let history = export.history(10);
        let rich = history.iter().find(|i| i.id == 4).unwrap();
        assert_eq!(rich.text.as_deref(), Some("visit https://x.io now"));
    }

    #[test]
    fn test_personal_chat_rejected() {
        let json = r#"{"name": "Bob", "type": "personal_chat", "id": 42, "messages": []}"#;
        assert!(matches!(ChannelExport::parse(json), Err(ParseFailure::Kind(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(EXPORT.as_bytes()).unwrap();
        let export = ChannelExport::load(file.path()).unwrap();
        assert_eq!(export.chat_id, -1001234567890);

        let err = ChannelExport::load(Path::new("/nonexistent/result.json")).err().unwrap();
        assert!(matches!(err, ExportError::Read { .. }));
    }

    #[test]
    fn test_bot_api_chat_id() {
        assert_eq!(bot_api_chat_id(1234567890), -1001234567890);
        assert_eq!(bot_api_chat_id(-1001234567890), -1001234567890);
    }
}
