mod commands;
mod config;
mod export;
mod maintenance;
mod telegram;
mod telegram_log;

use std::sync::Arc;
use tokio::sync::Mutex;

use teloxide::prelude::*;
use teloxide::types::ChatKind;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use commands::{Command, HELP, parse_command, render_report, render_stats, split_message};
use config::Config;
use maintenance::{CancelHandle, Maintainer, SnapshotStore};
use telegram::TelegramClient;

struct BotState {
    config: Config,
    /// Held for the whole duration of an operation; one at a time.
    engine: Arc<Mutex<Maintainer>>,
    cancel: CancelHandle,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sweeper.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("sweeper.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let chat_layer = telegram_log::ChatLogLayer::new(bot.clone(), log_chat_id);
        registry.with(chat_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting sweeper...");
    info!("Loaded config from {config_path}");
    info!("Owner IDs: {:?}", config.owner_ids);
    info!("Data dir: {}", config.data_dir.display());
    match config.history_export {
        Some(ref path) => info!("History export: {}", path.display()),
        None => warn!("No history_export configured, /scan will fail"),
    }

    let transport = Arc::new(TelegramClient::new(bot.clone(), config.history_export.clone()));
    let engine = Maintainer::new(SnapshotStore::new(&config.data_dir), transport, config.pacing());
    let cancel = engine.cancel_handle();

    let state = Arc::new(BotState {
        config,
        engine: Arc::new(Mutex::new(engine)),
        cancel,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        return Ok(());
    }
    let Some(ref user) = msg.from else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let username = user.username.as_deref().unwrap_or(&user.first_name);
    if !state.config.is_owner(user.id) {
        info!("Command from non-owner {} ({}) - denied", username, user.id);
        bot.send_message(msg.chat.id, "Access denied.").await?;
        return Ok(());
    }

    let command = match parse_command(text) {
        Ok(Some(command)) => command,
        Ok(None) => return Ok(()),
        Err(e) => {
            send_reply(&bot, msg.chat.id, &format!("⚠️ {e}")).await;
            return Ok(());
        }
    };
    info!("📨 {} ({}): {:?}", username, user.id, command);

    if !command.is_operation() {
        let reply = match command {
            Command::Cancel => {
                state.cancel.cancel();
                "⏹️ Cancel requested, stopping after the current message.".to_string()
            }
            _ => HELP.to_string(),
        };
        send_reply(&bot, msg.chat.id, &reply).await;
        return Ok(());
    }

    let Ok(engine) = state.engine.clone().try_lock_owned() else {
        send_reply(&bot, msg.chat.id, "⏳ Another operation is running. Wait for it or /cancel it.").await;
        return Ok(());
    };
    // Cleared while holding the slot, before any /cancel for this run can land.
    state.cancel.clear();

    // Run detached so /cancel can still be received.
    let chat_id = msg.chat.id;
    let state = state.clone();
    tokio::spawn(async move {
        let reply = run_command(&engine, &state.config, command).await;
        drop(engine);
        send_reply(&bot, chat_id, &reply).await;
    });

    Ok(())
}

async fn run_command(engine: &Maintainer, config: &Config, command: Command) -> String {
    let result = match command {
        Command::Scan { channel, limit } => engine
            .scan(&channel, limit.unwrap_or(config.default_scan_limit))
            .await
            .map(|count| format!("🔍 Scanned {channel}: {count} message(s) tracked")),
        Command::Lock(item) => engine.lock_add(&item).map(|added| {
            if added {
                format!("🔒 Locked {}", item.trim())
            } else {
                format!("{} is already locked", item.trim())
            }
        }),
        Command::Unlock(item) => engine.lock_remove(&item).map(|removed| {
            if removed {
                format!("🔓 Unlocked {}", item.trim())
            } else {
                format!("{} was not locked", item.trim())
            }
        }),
        Command::Locks => engine.lock_list().map(|locks| {
            if locks.is_empty() {
                "No locks.".to_string()
            } else {
                let items: Vec<String> = locks.into_iter().collect();
                format!("🔒 Locks ({}):\n{}", items.len(), items.join("\n"))
            }
        }),
        Command::Clean { dry_run } => engine.clean(dry_run).await.map(|report| {
            render_report(if dry_run { "🧹 Would clean" } else { "🧹 Cleaned" }, &report)
        }),
        Command::Replace { target, replacement, dry_run } => engine
            .replace(&target, &replacement, dry_run)
            .await
            .map(|report| {
                render_report(if dry_run { "🔁 Would replace" } else { "🔁 Replaced" }, &report)
            }),
        Command::Dedup { dry_run } => engine.deduplicate(dry_run).await.map(|report| {
            render_report(if dry_run { "🧬 Would delete" } else { "🧬 Deleted" }, &report)
        }),
        Command::Restore => engine
            .restore()
            .await
            .map(|report| render_report("⏪ Restored", &report)),
        Command::Stats => engine.stats().map(|stats| render_stats(&stats)),
        Command::Help | Command::Cancel => Ok(HELP.to_string()),
    };

    match result {
        Ok(reply) => reply,
        Err(e) => {
            error!("Operation failed: {e}");
            format!("❌ {e}")
        }
    }
}

async fn send_reply(bot: &Bot, chat_id: ChatId, text: &str) {
    for chunk in split_message(text) {
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            warn!("Failed to send reply: {e}");
            return;
        }
    }
}
