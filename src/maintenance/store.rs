//! Durable snapshot and lock set, stored as JSON files.
//!
//! Every write goes to a sibling `.tmp` file first and is renamed into
//! place, so a reader sees either the old document or the new one.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Snapshot format version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

const SNAPSHOT_FILE: &str = "snapshot.json";
const LOCKS_FILE: &str = "locks.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("'{}' is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("'{}' has schema version {found}, this build reads up to {max}", .path.display(), max = SCHEMA_VERSION)]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

/// Which remote field the content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Caption,
    PlainText,
}

/// One scanned message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub original_content: String,
    /// Last value confirmed on the remote side.
    pub current_content: String,
    pub content_kind: ContentKind,
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub entities: BTreeSet<String>,
    /// The remote message was removed by deduplication.
    #[serde(default)]
    pub deleted: bool,
}

impl MessageRecord {
    pub fn is_modified(&self) -> bool {
        self.current_content != self.original_content
    }
}

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub target_id: Option<i64>,
    #[serde(default)]
    pub scanned_at: Option<String>,
    #[serde(default)]
    pub messages: BTreeMap<i64, MessageRecord>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            target_id: None,
            scanned_at: None,
            messages: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    /// Records that still exist remotely, in ascending id order.
    pub fn live_records(&self) -> impl Iterator<Item = (i64, &MessageRecord)> {
        self.messages
            .iter()
            .filter(|(_, record)| !record.deleted)
            .map(|(&id, record)| (id, record))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LockFile {
    items: BTreeSet<String>,
}

/// File-backed store rooted at a data directory.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn locks_path(&self) -> PathBuf {
        self.dir.join(LOCKS_FILE)
    }

    /// Load the snapshot, or an empty one when nothing was scanned yet.
    pub fn load_snapshot(&self) -> Result<Snapshot, StorageError> {
        let path = self.snapshot_path();
        let Some(snapshot) = read_json::<Snapshot>(&path)? else {
            return Ok(Snapshot::default());
        };
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion {
                path,
                found: snapshot.schema_version,
            });
        }
        Ok(snapshot)
    }

    /// Replace the whole snapshot with a fresh scan.
    pub fn replace_snapshot(
        &self,
        target_id: i64,
        messages: BTreeMap<i64, MessageRecord>,
    ) -> Result<(), StorageError> {
        let snapshot = Snapshot {
            schema_version: SCHEMA_VERSION,
            target_id: Some(target_id),
            scanned_at: Some(chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string()),
            messages,
        };
        write_json_atomic(&self.snapshot_path(), &snapshot)?;
        info!("💾 Saved snapshot for {} ({} messages)", target_id, snapshot.messages.len());
        Ok(())
    }

    /// Set one record's `current_content`. Unknown ids are ignored.
    pub fn update_record_content(&self, message_id: i64, content: &str) -> Result<(), StorageError> {
        self.update_record(message_id, |record| record.current_content = content.to_string())
    }

    /// Flag one record as deleted remotely. Unknown ids are ignored.
    pub fn mark_deleted(&self, message_id: i64) -> Result<(), StorageError> {
        self.update_record(message_id, |record| record.deleted = true)
    }

    fn update_record(
        &self,
        message_id: i64,
        mutate: impl FnOnce(&mut MessageRecord),
    ) -> Result<(), StorageError> {
        let mut snapshot = self.load_snapshot()?;
        let Some(record) = snapshot.messages.get_mut(&message_id) else {
            debug!("Record {} not in snapshot, skipping update", message_id);
            return Ok(());
        };
        mutate(record);
        write_json_atomic(&self.snapshot_path(), &snapshot)
    }

    pub fn load_locks(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(read_json::<LockFile>(&self.locks_path())?
            .unwrap_or_default()
            .items)
    }

    /// Add a lock. Returns `false` if it was already present.
    pub fn add_lock(&self, item: &str) -> Result<bool, StorageError> {
        let mut items = self.load_locks()?;
        if !items.insert(item.to_string()) {
            return Ok(false);
        }
        write_json_atomic(&self.locks_path(), &LockFile { items })?;
        Ok(true)
    }

    /// Remove a lock. Returns `false` if it was not present.
    pub fn remove_lock(&self, item: &str) -> Result<bool, StorageError> {
        let mut items = self.load_locks()?;
        if !items.remove(item) {
            return Ok(false);
        }
        write_json_atomic(&self.locks_path(), &LockFile { items })?;
        Ok(true)
    }

    /// Combined on-disk size of the snapshot and lock files.
    pub fn storage_size_bytes(&self) -> u64 {
        [self.snapshot_path(), self.locks_path()]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let io_err = |source: std::io::Error| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp_path = path.with_extension("json.tmp");
    let mut file = std::fs::File::create(&tmp_path).map_err(io_err)?;
    file.write_all(&json).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(content: &str) -> MessageRecord {
        MessageRecord {
            original_content: content.to_string(),
            current_content: content.to_string(),
            content_kind: ContentKind::PlainText,
            fingerprint: crate::maintenance::policy::fingerprint(content),
            entities: BTreeSet::new(),
            deleted: false,
        }
    }

    fn store() -> (TempDir, SnapshotStore) {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let (_dir, store) = store();
        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.target_id, None);
        assert!(snapshot.messages.is_empty());
    }

    #[test]
    fn test_replace_and_load() {
        let (_dir, store) = store();
        let messages = BTreeMap::from([(1, record("one")), (2, record("two"))]);
        store.replace_snapshot(-100, messages.clone()).unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.target_id, Some(-100));
        assert_eq!(snapshot.messages, messages);
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);
        assert!(snapshot.scanned_at.is_some());
    }

    #[test]
    fn test_rescan_replaces_everything() {
        let (_dir, store) = store();
        store.replace_snapshot(-100, BTreeMap::from([(1, record("one"))])).unwrap();
        store.replace_snapshot(-200, BTreeMap::from([(7, record("seven"))])).unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.target_id, Some(-200));
        assert_eq!(snapshot.messages.keys().copied().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let (dir, store) = store();
        store.replace_snapshot(-100, BTreeMap::from([(1, record("one"))])).unwrap();
        store.add_lock("@keep").unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "leftover: {names:?}");
    }

    #[test]
    fn test_update_record_content() {
        let (_dir, store) = store();
        store.replace_snapshot(-100, BTreeMap::from([(1, record("one"))])).unwrap();
        store.update_record_content(1, "uno").unwrap();

        let snapshot = store.load_snapshot().unwrap();
        let rec = &snapshot.messages[&1];
        assert_eq!(rec.current_content, "uno");
        assert_eq!(rec.original_content, "one");
        assert!(rec.is_modified());
    }

    #[test]
    fn test_update_unknown_record_is_noop() {
        let (_dir, store) = store();
        store.replace_snapshot(-100, BTreeMap::from([(1, record("one"))])).unwrap();
        store.update_record_content(42, "nope").unwrap();
        store.mark_deleted(42).unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[&1].current_content, "one");
    }

    #[test]
    fn test_mark_deleted_hides_record_from_live_view() {
        let (_dir, store) = store();
        store
            .replace_snapshot(-100, BTreeMap::from([(1, record("one")), (2, record("two"))]))
            .unwrap();
        store.mark_deleted(1).unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert!(snapshot.messages[&1].deleted);
        let live: Vec<i64> = snapshot.live_records().map(|(id, _)| id).collect();
        assert_eq!(live, vec![2]);
    }

    #[test]
    fn test_corrupt_snapshot_is_error() {
        let (dir, store) = store();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), "{ not json").unwrap();
        let err = store.load_snapshot().unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join(SNAPSHOT_FILE),
            r#"{"schema_version": 99, "target_id": 1, "messages": {}}"#,
        )
        .unwrap();
        let err = store.load_snapshot().unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn test_missing_schema_version_reads_as_v1() {
        let (dir, store) = store();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), r#"{"target_id": 5, "messages": {}}"#).unwrap();
        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.schema_version, 1);
        assert_eq!(snapshot.target_id, Some(5));
    }

    #[test]
    fn test_lock_set_semantics() {
        let (_dir, store) = store();
        assert!(store.add_lock("@keep").unwrap());
        assert!(!store.add_lock("@keep").unwrap());
        assert!(store.add_lock("example.com").unwrap());
        assert_eq!(store.load_locks().unwrap().len(), 2);

        assert!(store.remove_lock("@keep").unwrap());
        assert!(!store.remove_lock("@keep").unwrap());
        assert_eq!(
            store.load_locks().unwrap(),
            BTreeSet::from(["example.com".to_string()])
        );
    }

    #[test]
    fn test_locks_survive_rescan() {
        let (_dir, store) = store();
        store.add_lock("@keep").unwrap();
        store.replace_snapshot(-100, BTreeMap::new()).unwrap();
        assert!(store.load_locks().unwrap().contains("@keep"));
    }

    #[test]
    fn test_storage_size() {
        let (_dir, store) = store();
        assert_eq!(store.storage_size_bytes(), 0);
        store.add_lock("@keep").unwrap();
        assert!(store.storage_size_bytes() > 0);
    }
}
