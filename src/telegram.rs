//! Telegram transport using teloxide.

use async_trait::async_trait;
use std::path::PathBuf;
use teloxide::prelude::*;
use teloxide::types::{MessageId, Recipient};
use teloxide::{ApiError, RequestError};
use tracing::{info, warn};

use crate::export::ChannelExport;
use crate::maintenance::{ContentKind, EditOutcome, HistoryItem, Transport};

/// Telegram API client for the managed channel.
pub struct TelegramClient {
    bot: Bot,
    /// Desktop export that stands in for channel history.
    history_export: Option<PathBuf>,
}

impl TelegramClient {
    pub fn new(bot: Bot, history_export: Option<PathBuf>) -> Self {
        Self { bot, history_export }
    }
}

/// Accepts `-100123…`, `@name`, `name`, and `t.me/name` links.
pub fn parse_identifier(identifier: &str) -> Result<Recipient, String> {
    let identifier = identifier.trim();
    if let Ok(id) = identifier.parse::<i64>() {
        return Ok(Recipient::Id(ChatId(id)));
    }

    let name = ["https://t.me/", "http://t.me/", "t.me/", "@"]
        .iter()
        .find_map(|prefix| identifier.strip_prefix(prefix))
        .unwrap_or(identifier);
    let name = name.split('/').next().unwrap_or_default();

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("'{identifier}' is not a chat id or channel username"));
    }
    Ok(Recipient::ChannelUsername(format!("@{name}")))
}

/// Bot API message ids are 32-bit; anything wider cannot exist remotely.
fn to_message_id(message_id: i64) -> Result<MessageId, String> {
    i32::try_from(message_id)
        .map(MessageId)
        .map_err(|_| format!("message id {message_id} is out of range"))
}

fn classify_edit_error(err: RequestError) -> EditOutcome {
    match err {
        RequestError::RetryAfter(wait) => EditOutcome::RateLimited(wait.duration()),
        RequestError::Api(ApiError::MessageNotModified) => EditOutcome::NotModified,
        other => EditOutcome::Failed(other.to_string()),
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn resolve_target(&self, identifier: &str) -> Result<i64, String> {
        let recipient = parse_identifier(identifier)?;
        info!("Resolving chat {}", identifier);

        let chat = self.bot.get_chat(recipient).await.map_err(|e| {
            let msg = format!("Failed to resolve '{identifier}': {e}");
            warn!("{}", msg);
            msg
        })?;

        Ok(chat.id.0)
    }

    async fn fetch_history(&self, target_id: i64, limit: usize) -> Result<Vec<HistoryItem>, String> {
        let path = self
            .history_export
            .as_ref()
            .ok_or("no history_export configured; the Bot API cannot read channel history")?;

        let export = ChannelExport::load(path).map_err(|e| e.to_string())?;
        if export.chat_id != target_id {
            return Err(format!(
                "export '{}' is for chat {}, not {}",
                export.name, export.chat_id, target_id
            ));
        }

        info!("📂 Reading history from export '{}' ({} messages)", export.name, export.message_count());
        Ok(export.history(limit))
    }

    async fn edit_content(
        &self,
        target_id: i64,
        message_id: i64,
        kind: ContentKind,
        text: &str,
    ) -> EditOutcome {
        let chat_id = ChatId(target_id);
        let message_id = match to_message_id(message_id) {
            Ok(id) => id,
            Err(reason) => return EditOutcome::Failed(reason),
        };

        let result = match kind {
            ContentKind::PlainText => self
                .bot
                .edit_message_text(chat_id, message_id, text)
                .await
                .map(|_| ()),
            ContentKind::Caption => self
                .bot
                .edit_message_caption(chat_id, message_id)
                .caption(text)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => EditOutcome::Edited,
            Err(e) => classify_edit_error(e),
        }
    }

    async fn delete_message(&self, target_id: i64, message_id: i64) -> Result<(), String> {
        info!("🗑️ Deleting message {} in chat {}", message_id, target_id);
        let id = to_message_id(message_id)?;

        self.bot
            .delete_message(ChatId(target_id), id)
            .await
            .map_err(|e| {
                let msg = format!("Failed to delete message: {e}");
                warn!("{}", msg);
                msg
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_id() {
        assert_eq!(
            parse_identifier("-1001234567890").unwrap(),
            Recipient::Id(ChatId(-1001234567890))
        );
    }

    #[test]
    fn test_parse_usernames_and_links() {
        let expected = Recipient::ChannelUsername("@my_channel".to_string());
        assert_eq!(parse_identifier("@my_channel").unwrap(), expected);
        assert_eq!(parse_identifier("my_channel").unwrap(), expected);
        assert_eq!(parse_identifier("t.me/my_channel").unwrap(), expected);
        assert_eq!(parse_identifier("https://t.me/my_channel/42").unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_identifier("").is_err());
        assert!(parse_identifier("@").is_err());
        assert!(parse_identifier("not a channel").is_err());
    }

    #[test]
    fn test_message_id_range() {
        assert_eq!(to_message_id(42).unwrap(), MessageId(42));
        assert_eq!(to_message_id(i32::MAX as i64).unwrap(), MessageId(i32::MAX));
        assert!(to_message_id(i32::MAX as i64 + 1).is_err());
        assert!(to_message_id(i64::MIN).is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_edit_fails_without_request() {
        let client = TelegramClient::new(Bot::new("123456789:ABCdef"), None);
        let outcome = client
            .edit_content(-100, 1 << 40, ContentKind::PlainText, "x")
            .await;
        assert!(matches!(outcome, EditOutcome::Failed(reason) if reason.contains("out of range")));

        let err = client.delete_message(-100, 1 << 40).await.unwrap_err();
        assert!(err.contains("out of range"));
    }

    #[test]
    fn test_not_modified_is_not_a_failure() {
        let outcome = classify_edit_error(RequestError::Api(ApiError::MessageNotModified));
        assert_eq!(outcome, EditOutcome::NotModified);
    }

    #[test]
    fn test_other_api_errors_fail() {
        let outcome = classify_edit_error(RequestError::Api(ApiError::MessageToEditNotFound));
        assert!(matches!(outcome, EditOutcome::Failed(_)));
    }
}
