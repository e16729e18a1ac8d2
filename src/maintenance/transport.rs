//! Remote side of the engine: what a chat backend must provide.

use async_trait::async_trait;
use std::time::Duration;

use crate::maintenance::store::ContentKind;

/// One history entry as the backend reports it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryItem {
    pub id: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
}

impl HistoryItem {
    /// The content worth tracking, preferring the caption.
    pub fn content(&self) -> Option<(ContentKind, &str)> {
        non_empty(&self.caption)
            .map(|c| (ContentKind::Caption, c))
            .or_else(|| non_empty(&self.text).map(|t| (ContentKind::PlainText, t)))
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.trim().is_empty())
}

/// Result of a single edit attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Edited,
    /// The remote already holds this exact content.
    NotModified,
    /// Throttled; retry after the given wait.
    RateLimited(Duration),
    Failed(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Turn a user-supplied channel reference into its numeric id.
    async fn resolve_target(&self, identifier: &str) -> Result<i64, String>;

    /// Up to `limit` most recent messages, newest first.
    async fn fetch_history(&self, target_id: i64, limit: usize) -> Result<Vec<HistoryItem>, String>;

    async fn edit_content(
        &self,
        target_id: i64,
        message_id: i64,
        kind: ContentKind,
        text: &str,
    ) -> EditOutcome;

    async fn delete_message(&self, target_id: i64, message_id: i64) -> Result<(), String>;
}
