//! Admin commands: parsing chat text into [`Command`] and rendering results.

use std::fmt;

use crate::maintenance::{Report, Stats};

/// Telegram's message length limit, minus some headroom.
const MAX_REPLY_CHARS: usize = 4000;

/// Log lines shown per report before the rest is summarized.
const MAX_REPORT_LINES: usize = 40;

pub const HELP: &str = "\
Channel maintenance commands:
/scan <channel> [limit] - snapshot the channel history
/lock <item> - never remove this link or @username
/unlock <item> - remove a lock
/locks - list locks
/clean [--dry] - strip unlocked links and @usernames
/replace [--dry] <text> | <replacement> - literal find and replace
/dedup [--dry] - delete repeated posts, keeping the oldest
/restore - put every edited post back to its original text
/stats - snapshot summary
/cancel - stop the running operation
/help - this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Scan { channel: String, limit: Option<usize> },
    Lock(String),
    Unlock(String),
    Locks,
    Clean { dry_run: bool },
    Replace { target: String, replacement: String, dry_run: bool },
    Dedup { dry_run: bool },
    Restore,
    Stats,
    Cancel,
}

impl Command {
    /// Whether the command needs the single operation slot.
    pub fn is_operation(&self) -> bool {
        !matches!(self, Command::Help | Command::Cancel)
    }
}

/// Bad or missing arguments, with a hint on correct use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError {
    pub message: String,
    pub usage: &'static str,
}

impl UsageError {
    fn new(message: impl Into<String>, usage: &'static str) -> Self {
        Self { message: message.into(), usage }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\nUsage: {}", self.message, self.usage)
    }
}

impl std::error::Error for UsageError {}

/// Split off a `--dry` flag wherever it appears among the arguments.
fn take_dry_flag(args: &str) -> (bool, String) {
    let mut dry_run = false;
    let rest: Vec<&str> = args
        .split(' ')
        .filter(|word| {
            if *word == "--dry" {
                dry_run = true;
                false
            } else {
                true
            }
        })
        .collect();
    (dry_run, rest.join(" ").trim().to_string())
}

fn no_args(name: &str, args: &str, usage: &'static str) -> Result<(), UsageError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(UsageError::new(format!("/{name} takes no arguments"), usage))
    }
}

/// Parse a message. `Ok(None)` means it is not a command at all.
pub fn parse_command(text: &str) -> Result<Option<Command>, UsageError> {
    let text = text.trim();
    let Some(body) = text.strip_prefix('/') else {
        return Ok(None);
    };
    let (head, args) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    let args = args.trim();
    // "/clean@my_bot" in groups
    let name = head.split('@').next().unwrap_or_default().to_lowercase();

    let command = match name.as_str() {
        "help" | "start" => Command::Help,
        "scan" => {
            const USAGE: &str = "/scan <channel> [limit]";
            let mut parts = args.split_whitespace();
            let channel = parts
                .next()
                .ok_or_else(|| UsageError::new("missing channel", USAGE))?
                .to_string();
            let limit = match parts.next() {
                None => None,
                Some(raw) => match raw.parse::<usize>() {
                    Ok(n) if n > 0 => Some(n),
                    _ => return Err(UsageError::new(format!("invalid limit '{raw}'"), USAGE)),
                },
            };
            if parts.next().is_some() {
                return Err(UsageError::new("too many arguments", USAGE));
            }
            Command::Scan { channel, limit }
        }
        "lock" | "unlock" => {
            if args.is_empty() {
                return Err(UsageError::new("missing item", "/lock <item> or /unlock <item>"));
            }
            if name == "lock" {
                Command::Lock(args.to_string())
            } else {
                Command::Unlock(args.to_string())
            }
        }
        "locks" => {
            no_args("locks", args, "/locks")?;
            Command::Locks
        }
        "clean" => {
            let (dry_run, rest) = take_dry_flag(args);
            no_args("clean", &rest, "/clean [--dry]")?;
            Command::Clean { dry_run }
        }
        "replace" => {
            const USAGE: &str = "/replace [--dry] <text> | <replacement>";
            let (dry_run, rest) = take_dry_flag(args);
            let (target, replacement) = rest
                .split_once('|')
                .ok_or_else(|| UsageError::new("missing '|' between text and replacement", USAGE))?;
            let target = target.trim();
            if target.is_empty() {
                return Err(UsageError::new("text to replace must not be empty", USAGE));
            }
            Command::Replace {
                target: target.to_string(),
                replacement: replacement.trim().to_string(),
                dry_run,
            }
        }
        "dedup" => {
            let (dry_run, rest) = take_dry_flag(args);
            no_args("dedup", &rest, "/dedup [--dry]")?;
            Command::Dedup { dry_run }
        }
        "restore" => {
            no_args("restore", args, "/restore")?;
            Command::Restore
        }
        "stats" => {
            no_args("stats", args, "/stats")?;
            Command::Stats
        }
        "cancel" => Command::Cancel,
        other => return Err(UsageError::new(format!("unknown command /{other}"), "/help")),
    };
    Ok(Some(command))
}

/// Render an operation report: headline, capped log, failure/cancel notes.
pub fn render_report(title: &str, report: &Report) -> String {
    let mut out = format!("{title}: {}", report.count);
    if report.failed > 0 {
        out.push_str(&format!(", {} failed", report.failed));
    }
    if report.cancelled {
        out.push_str(" (cancelled)");
    }

    for line in report.logs.iter().take(MAX_REPORT_LINES) {
        out.push('\n');
        out.push_str(line);
    }
    if report.logs.len() > MAX_REPORT_LINES {
        out.push_str(&format!("\n... and {} more", report.logs.len() - MAX_REPORT_LINES));
    }
    out
}

pub fn render_stats(stats: &Stats) -> String {
    let target = stats
        .target_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "📊 Target: {}\nScanned: {}\nTracked: {} ({} modified, {} deleted)\nLocks: {}\nStorage: {} bytes",
        target,
        stats.scanned_at.as_deref().unwrap_or("never"),
        stats.tracked_count,
        stats.modified_count,
        stats.deleted_count,
        stats.lock_count,
        stats.storage_size_bytes,
    )
}

/// Break text into chunks Telegram will accept, preferring line boundaries.
pub fn split_message(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let mut line = line;
        // Lines longer than a whole chunk are hard-split on char boundaries.
        while line.chars().count() > MAX_REPLY_CHARS {
            let cut = line
                .char_indices()
                .nth(MAX_REPLY_CHARS)
                .map(|(i, _)| i)
                .unwrap_or(line.len());
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(line[..cut].to_string());
            line = &line[cut..];
        }

        if !current.is_empty() && current.chars().count() + line.chars().count() + 1 > MAX_REPLY_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}
