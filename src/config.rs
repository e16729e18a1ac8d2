use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

use crate::maintenance::Pacing;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    /// Admins allowed to drive the bot from a private chat.
    owner_ids: Vec<u64>,
    telegram_bot_token: String,
    /// Directory for the snapshot, lock set and logs. Defaults to current directory.
    data_dir: Option<String>,
    /// Telegram Desktop export (result.json) used as channel history.
    history_export: Option<String>,
    #[serde(default = "default_edit_delay_ms")]
    edit_delay_ms: u64,
    #[serde(default = "default_delete_delay_ms")]
    delete_delay_ms: u64,
    #[serde(default = "default_scan_limit")]
    default_scan_limit: usize,
    log_chat_id: Option<i64>,
}

fn default_edit_delay_ms() -> u64 {
    1500
}

fn default_delete_delay_ms() -> u64 {
    1000
}

fn default_scan_limit() -> usize {
    1000
}

pub struct Config {
    pub owner_ids: HashSet<UserId>,
    pub telegram_bot_token: String,
    /// Directory for state files (snapshot, locks, logs).
    pub data_dir: PathBuf,
    pub history_export: Option<PathBuf>,
    pub edit_delay: Duration,
    pub delete_delay: Duration,
    /// Used when `/scan` is given no limit.
    pub default_scan_limit: usize,
    pub log_chat_id: Option<ChatId>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        // Validate required fields
        if file.owner_ids.is_empty() {
            return Err(ConfigError::Validation("owner_ids must contain at least one owner ID".into()));
        }
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.default_scan_limit == 0 {
            return Err(ConfigError::Validation("default_scan_limit must be at least 1".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            owner_ids: file.owner_ids.into_iter().map(UserId).collect(),
            telegram_bot_token: file.telegram_bot_token,
            data_dir,
            history_export: file.history_export.map(PathBuf::from),
            edit_delay: Duration::from_millis(file.edit_delay_ms),
            delete_delay: Duration::from_millis(file.delete_delay_ms),
            default_scan_limit: file.default_scan_limit,
            log_chat_id: file.log_chat_id.map(ChatId),
        })
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner_ids.contains(&user_id)
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            edit_delay: self.edit_delay,
            delete_delay: self.delete_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let file = write_config(r#"{
            "owner_ids": [123456],
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert!(config.is_owner(UserId(123456)));
        assert!(!config.is_owner(UserId(1)));
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.history_export, None);
        assert_eq!(config.edit_delay, Duration::from_millis(1500));
        assert_eq!(config.delete_delay, Duration::from_millis(1000));
        assert_eq!(config.default_scan_limit, 1000);
        assert!(config.log_chat_id.is_none());
    }

    #[test]
    fn test_full_config() {
        let file = write_config(r#"{
            "owner_ids": [1, 2],
            "telegram_bot_token": "123456789:ABCdef",
            "data_dir": "/var/lib/sweeper",
            "history_export": "/exports/result.json",
            "edit_delay_ms": 250,
            "delete_delay_ms": 50,
            "default_scan_limit": 200,
            "log_chat_id": -100987
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.owner_ids.len(), 2);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/sweeper"));
        assert_eq!(config.history_export, Some(PathBuf::from("/exports/result.json")));
        let pacing = config.pacing();
        assert_eq!(pacing.edit_delay, Duration::from_millis(250));
        assert_eq!(pacing.delete_delay, Duration::from_millis(50));
        assert_eq!(config.default_scan_limit, 200);
        assert_eq!(config.log_chat_id, Some(ChatId(-100987)));
    }

    #[test]
    fn test_empty_owner_ids() {
        let file = write_config(r#"{
            "owner_ids": [],
            "telegram_bot_token": "123456789:ABCdef"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("owner_ids"));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{
            "owner_ids": [123],
            "telegram_bot_token": ""
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["invalid_token_no_colon", "notanumber:ABCdef", "123456789:"] {
            let file = write_config(&format!(
                r#"{{"owner_ids": [123], "telegram_bot_token": "{token}"}}"#
            ));
            let err = assert_err(Config::load(file.path()));
            assert!(matches!(err, ConfigError::Validation(_)), "token {token:?}");
        }
    }

    #[test]
    fn test_zero_scan_limit() {
        let file = write_config(r#"{
            "owner_ids": [123],
            "telegram_bot_token": "123456789:ABCdef",
            "default_scan_limit": 0
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("default_scan_limit"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
