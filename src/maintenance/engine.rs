//! Transform engine: scan a channel into the snapshot, then clean, replace,
//! deduplicate or restore it.
//!
//! Every operation first builds a plan from the snapshot alone. Dry runs log
//! the plan; live runs apply the same plan through [`Maintainer::safe_edit`],
//! so a preview always predicts the live run. Remote calls are strictly
//! sequential and paced by [`Pacing`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::maintenance::policy::{extract_entities, fingerprint, redact};
use crate::maintenance::store::{ContentKind, MessageRecord, Snapshot, SnapshotStore, StorageError};
use crate::maintenance::transport::{EditOutcome, Transport};

/// Max chars of message text shown in a log line.
const LOG_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Usage(String),

    #[error("no channel scanned yet, run /scan first")]
    NotScanned,
}

/// Delays between remote writes.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub edit_delay: Duration,
    pub delete_delay: Duration,
}

/// Outcome of a mutating operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub logs: Vec<String>,
    /// Items edited, deleted or restored (or that would be, in a dry run).
    pub count: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub target_id: Option<i64>,
    pub scanned_at: Option<String>,
    pub tracked_count: usize,
    pub modified_count: usize,
    pub deleted_count: usize,
    pub lock_count: usize,
    pub storage_size_bytes: u64,
}

/// A content change computed from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEdit {
    pub message_id: i64,
    pub kind: ContentKind,
    pub old: String,
    pub new: String,
}

/// Messages sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// Oldest message, kept.
    pub keep: i64,
    /// Younger copies, ascending.
    pub remove: Vec<i64>,
}

/// Stops a running operation at its next message boundary.
///
/// The engine never clears it. Whoever starts an operation clears it first,
/// so a cancel that arrives before the first message is still honored.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub fn plan_clean(snapshot: &Snapshot, locks: &BTreeSet<String>) -> Vec<PlannedEdit> {
    plan_with(snapshot, |record| {
        let cleaned = redact(&record.current_content, locks);
        (cleaned != record.current_content).then_some(cleaned)
    })
}

/// Literal, all-occurrence substring replacement. `target` must be non-empty.
pub fn plan_replace(snapshot: &Snapshot, target: &str, replacement: &str) -> Vec<PlannedEdit> {
    plan_with(snapshot, |record| {
        let replaced = record.current_content.replace(target, replacement);
        (record.current_content.contains(target) && replaced != record.current_content)
            .then_some(replaced)
    })
}

pub fn plan_restore(snapshot: &Snapshot) -> Vec<PlannedEdit> {
    plan_with(snapshot, |record| {
        record.is_modified().then(|| record.original_content.clone())
    })
}

fn plan_with(
    snapshot: &Snapshot,
    mut change: impl FnMut(&MessageRecord) -> Option<String>,
) -> Vec<PlannedEdit> {
    snapshot
        .live_records()
        .filter_map(|(id, record)| {
            change(record).map(|new| PlannedEdit {
                message_id: id,
                kind: record.content_kind,
                old: record.current_content.clone(),
                new,
            })
        })
        .collect()
}

pub fn plan_dedup(snapshot: &Snapshot) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    for (id, record) in snapshot.live_records() {
        if let Some(fp) = record.fingerprint.as_deref() {
            groups.entry(fp).or_default().push(id);
        }
    }

    let mut plan: Vec<DuplicateGroup> = groups
        .into_values()
        .filter(|ids| ids.len() > 1)
        .map(|mut ids| {
            ids.sort_unstable();
            let keep = ids.remove(0);
            DuplicateGroup { keep, remove: ids }
        })
        .collect();
    plan.sort_by_key(|group| group.keep);
    plan
}

fn preview(text: &str) -> String {
    if text.chars().count() <= LOG_PREVIEW_CHARS {
        return format!("{text:?}");
    }
    let truncated: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
    format!("{truncated:?}…")
}

/// The engine. One instance per data directory; callers must not run two
/// operations on it at once.
pub struct Maintainer {
    store: SnapshotStore,
    transport: Arc<dyn Transport>,
    pacing: Pacing,
    cancel: CancelHandle,
}

impl Maintainer {
    pub fn new(store: SnapshotStore, transport: Arc<dyn Transport>, pacing: Pacing) -> Self {
        Self {
            store,
            transport,
            pacing,
            cancel: CancelHandle::default(),
        }
    }

    /// Handle that stays usable while an operation holds the engine.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Replace the snapshot with the `limit` most recent messages of a channel.
    pub async fn scan(&self, identifier: &str, limit: usize) -> Result<usize, EngineError> {
        if limit == 0 {
            return Err(EngineError::Usage("scan limit must be at least 1".into()));
        }

        let target_id = self
            .transport
            .resolve_target(identifier)
            .await
            .map_err(EngineError::Transport)?;
        info!("🔍 Scanning {} ({}) limit={}", identifier, target_id, limit);

        let history = self
            .transport
            .fetch_history(target_id, limit)
            .await
            .map_err(EngineError::Transport)?;

        let mut messages = BTreeMap::new();
        for item in history.iter().take(limit) {
            let Some((kind, content)) = item.content() else {
                continue;
            };
            messages.insert(
                item.id,
                MessageRecord {
                    original_content: content.to_string(),
                    current_content: content.to_string(),
                    content_kind: kind,
                    fingerprint: fingerprint(content),
                    entities: extract_entities(content),
                    deleted: false,
                },
            );
        }

        let count = messages.len();
        self.store.replace_snapshot(target_id, messages)?;
        info!("🔍 Scan done: {} of {} messages have content", count, history.len());
        Ok(count)
    }

    pub fn lock_add(&self, item: &str) -> Result<bool, EngineError> {
        let item = item.trim();
        if item.is_empty() {
            return Err(EngineError::Usage("lock item must not be empty".into()));
        }
        let added = self.store.add_lock(item)?;
        info!("🔒 Lock {}: {}", if added { "added" } else { "already present" }, item);
        Ok(added)
    }

    pub fn lock_remove(&self, item: &str) -> Result<bool, EngineError> {
        let removed = self.store.remove_lock(item.trim())?;
        info!("🔓 Lock {}: {}", if removed { "removed" } else { "not found" }, item.trim());
        Ok(removed)
    }

    pub fn lock_list(&self) -> Result<BTreeSet<String>, EngineError> {
        Ok(self.store.load_locks()?)
    }

    /// Strip unlocked links and usernames from every tracked message.
    pub async fn clean(&self, dry_run: bool) -> Result<Report, EngineError> {
        let snapshot = self.store.load_snapshot()?;
        let target_id = snapshot.target_id.ok_or(EngineError::NotScanned)?;
        let locks = self.store.load_locks()?;
        let plan = plan_clean(&snapshot, &locks);
        info!("🧹 Clean: {} candidate(s), {} lock(s), dry_run={}", plan.len(), locks.len(), dry_run);
        Ok(self.apply_edits(target_id, plan, dry_run).await?)
    }

    pub async fn replace(
        &self,
        target: &str,
        replacement: &str,
        dry_run: bool,
    ) -> Result<Report, EngineError> {
        if target.is_empty() {
            return Err(EngineError::Usage("replace target must not be empty".into()));
        }
        let snapshot = self.store.load_snapshot()?;
        let target_id = snapshot.target_id.ok_or(EngineError::NotScanned)?;
        let plan = plan_replace(&snapshot, target, replacement);
        info!("🔁 Replace {:?} → {:?}: {} candidate(s), dry_run={}", target, replacement, plan.len(), dry_run);
        Ok(self.apply_edits(target_id, plan, dry_run).await?)
    }

    /// Delete younger copies of repeated messages, keeping the oldest.
    pub async fn deduplicate(&self, dry_run: bool) -> Result<Report, EngineError> {
        let snapshot = self.store.load_snapshot()?;
        let target_id = snapshot.target_id.ok_or(EngineError::NotScanned)?;
        let plan = plan_dedup(&snapshot);
        info!(
            "🧬 Dedup: {} group(s), {} candidate(s), dry_run={}",
            plan.len(),
            plan.iter().map(|g| g.remove.len()).sum::<usize>(),
            dry_run
        );

        let mut report = Report::default();
        'groups: for group in &plan {
            for &id in &group.remove {
                if self.stop_requested(&mut report) {
                    break 'groups;
                }
                if dry_run {
                    report
                        .logs
                        .push(format!("[DRY RUN] #{id}: would delete (duplicate of #{})", group.keep));
                    report.count += 1;
                    continue;
                }
                match self.transport.delete_message(target_id, id).await {
                    Ok(()) => {
                        self.store.mark_deleted(id)?;
                        info!("🗑️ Deleted duplicate #{} (kept #{})", id, group.keep);
                        report.logs.push(format!("🗑️ #{id}: deleted (duplicate of #{})", group.keep));
                        report.count += 1;
                        tokio::time::sleep(self.pacing.delete_delay).await;
                    }
                    Err(e) => {
                        warn!("Failed to delete #{}: {}", id, e);
                        report.logs.push(format!("❌ #{id}: delete failed: {e}"));
                        report.failed += 1;
                    }
                }
            }
        }
        finish(&mut report, "delete");
        Ok(report)
    }

    /// Put every modified message back to its scanned content.
    pub async fn restore(&self) -> Result<Report, EngineError> {
        let snapshot = self.store.load_snapshot()?;
        let target_id = snapshot.target_id.ok_or(EngineError::NotScanned)?;
        let plan = plan_restore(&snapshot);
        info!("⏪ Restore: {} modified message(s)", plan.len());
        Ok(self.apply_edits(target_id, plan, false).await?)
    }

    pub fn stats(&self) -> Result<Stats, EngineError> {
        let snapshot = self.store.load_snapshot()?;
        let locks = self.store.load_locks()?;
        let records = snapshot.messages.values();
        Ok(Stats {
            target_id: snapshot.target_id,
            scanned_at: snapshot.scanned_at.clone(),
            tracked_count: snapshot.messages.len(),
            modified_count: records.clone().filter(|r| r.is_modified()).count(),
            deleted_count: records.filter(|r| r.deleted).count(),
            lock_count: locks.len(),
            storage_size_bytes: self.store.storage_size_bytes(),
        })
    }

    async fn apply_edits(
        &self,
        target_id: i64,
        plan: Vec<PlannedEdit>,
        dry_run: bool,
    ) -> Result<Report, StorageError> {
        let mut report = Report::default();

        for edit in plan {
            if self.stop_requested(&mut report) {
                break;
            }
            let id = edit.message_id;
            if dry_run {
                report.logs.push(format!(
                    "[DRY RUN] #{id}: {} → {}",
                    preview(&edit.old),
                    preview(&edit.new)
                ));
                report.count += 1;
                continue;
            }
            match self.safe_edit(target_id, id, edit.kind, &edit.new).await {
                Ok(()) => {
                    self.store.update_record_content(id, &edit.new)?;
                    info!("✏️ Edited #{}", id);
                    report.logs.push(format!("✏️ #{id}: {} → {}", preview(&edit.old), preview(&edit.new)));
                    report.count += 1;
                }
                Err(reason) => {
                    report.logs.push(format!("❌ #{id}: {reason}"));
                    report.failed += 1;
                }
            }
        }

        finish(&mut report, "edit");
        Ok(report)
    }

    /// The one path for remote content writes.
    ///
    /// Not-modified counts as success. Rate limits are waited out and retried
    /// for as long as the remote keeps asking; any other failure is returned
    /// to the caller, which moves on.
    pub async fn safe_edit(
        &self,
        target_id: i64,
        message_id: i64,
        kind: ContentKind,
        text: &str,
    ) -> Result<(), String> {
        loop {
            match self.transport.edit_content(target_id, message_id, kind, text).await {
                EditOutcome::Edited => {
                    tokio::time::sleep(self.pacing.edit_delay).await;
                    return Ok(());
                }
                EditOutcome::NotModified => {
                    debug!("#{} already up to date", message_id);
                    return Ok(());
                }
                EditOutcome::RateLimited(wait) => {
                    warn!("⏳ Rate limited editing #{}, waiting {:?}", message_id, wait);
                    tokio::time::sleep(wait).await;
                }
                EditOutcome::Failed(reason) => {
                    warn!("Failed to edit #{}: {}", message_id, reason);
                    return Err(reason);
                }
            }
        }
    }

    fn stop_requested(&self, report: &mut Report) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        info!("⏹️ Operation cancelled after {} item(s)", report.count + report.failed);
        report.cancelled = true;
        report
            .logs
            .push(format!("⏹️ Cancelled after {} item(s)", report.count + report.failed));
        true
    }
}

fn finish(report: &mut Report, verb: &str) {
    if report.failed > 0 {
        report
            .logs
            .push(format!("⚠️ {} {verb}(s) failed", report.failed));
    }
}
