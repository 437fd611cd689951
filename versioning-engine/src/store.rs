//! Per-project snapshot history: the `versioning.json` metadata log,
//! ordered listing and bounded retention.
//!
//! One log per project, a JSON array of records, field names matching the
//! historical on-disk layout. The log is append-only in normal operation;
//! a malformed or missing log reads as empty rather than failing, so a
//! partial write never bricks a project's history.

use crate::error::Result;
use crate::integrity::sidecar_path;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Name of the per-project metadata log.
pub const LOG_FILE: &str = "versioning.json";

/// One immutable snapshot record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// Creation time, `YYYYMMDD_HHMMSS`; sort key and snapshot id.
    pub timestamp: String,

    /// Archive filename (relative to the project's backup directory).
    pub archive: String,

    /// Hex SHA-256 of the archive's byte content.
    pub sha256: String,

    /// Archive size in bytes at creation.
    pub size: u64,

    /// Number of files stored in the archive.
    #[serde(default)]
    pub files_count: u64,

    /// True for scheduled (bulk) snapshots, false for user-triggered ones.
    #[serde(default)]
    pub auto_backup: bool,

    /// True for the safety snapshot taken before a restore.
    #[serde(default)]
    pub pre_restore: bool,
}

/// Durable per-project snapshot history rooted at a backups directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    backups_root: PathBuf,
}

impl SnapshotStore {
    pub fn new(backups_root: impl Into<PathBuf>) -> Self {
        Self {
            backups_root: backups_root.into(),
        }
    }

    /// Backup directory for one project (archives, sidecars, log).
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.backups_root.join(project)
    }

    pub fn log_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(LOG_FILE)
    }

    pub fn archive_path(&self, project: &str, archive: &str) -> PathBuf {
        self.project_dir(project).join(archive)
    }

    /// Raw log contents in append order. Absent or malformed logs read as
    /// empty (with a warning) so a torn write never blocks new snapshots.
    pub fn read_log(&self, project: &str) -> Vec<SnapshotRecord> {
        let path = self.log_path(project);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<Vec<SnapshotRecord>>(&content) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "Malformed metadata log {} ({}); treating as empty",
                    path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Append a record and persist the log atomically (temp file + rename).
    ///
    /// A prior record with the same archive filename is replaced: two
    /// snapshots within one second reuse the archive name, and the later
    /// write overwrote the earlier archive on disk.
    pub fn append(&self, project: &str, record: SnapshotRecord) -> Result<()> {
        std::fs::create_dir_all(self.project_dir(project))?;

        let mut records = self.read_log(project);
        records.retain(|r| r.archive != record.archive);
        records.push(record);

        self.write_log(project, &records)
    }

    fn write_log(&self, project: &str, records: &[SnapshotRecord]) -> Result<()> {
        let path = self.log_path(project);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(records)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Committed records, most recent first, restricted to snapshots whose
    /// archive still exists on disk. Re-reads storage on every call.
    pub fn list(&self, project: &str) -> Vec<SnapshotRecord> {
        let mut records = self.read_log(project);
        records.retain(|r| self.archive_path(project, &r.archive).is_file());
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records
    }

    /// Look up a record by snapshot id (its timestamp), without the
    /// archive-exists filter: restore must see records whose archive has
    /// gone missing so it can report corruption instead of absence.
    ///
    /// When a manual snapshot and a pre-restore safety snapshot share one
    /// timestamp, the manual one wins.
    pub fn find(&self, project: &str, snapshot_id: &str) -> Option<SnapshotRecord> {
        let records = self.read_log(project);
        let mut matches: Vec<&SnapshotRecord> = records
            .iter()
            .filter(|r| r.timestamp == snapshot_id)
            .collect();
        matches.sort_by_key(|r| r.pre_restore);
        matches.first().map(|r| (*r).clone())
    }

    /// Bound the on-disk archive set to `max` files, deleting the oldest by
    /// file modification time together with their sidecars. Deletion is
    /// best-effort; failures are logged and skipped. The log is rewritten
    /// afterwards so it never references deleted archives.
    pub fn prune(&self, project: &str, max: usize) -> Result<usize> {
        let dir = self.project_dir(project);
        let mut archives: Vec<(PathBuf, SystemTime)> = Vec::new();

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "zip").unwrap_or(false) {
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                archives.push((path, mtime));
            }
        }

        // Most recently modified first; everything past `max` is deleted.
        archives.sort_by(|a, b| b.1.cmp(&a.1));

        let mut deleted = 0usize;
        for (path, _) in archives.into_iter().skip(max) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    deleted += 1;
                    let _ = std::fs::remove_file(sidecar_path(&path));
                    debug!("Pruned old archive {}", path.display());
                }
                Err(e) => {
                    warn!("Failed to prune archive {}: {}", path.display(), e);
                }
            }
        }

        if deleted > 0 {
            let mut records = self.read_log(project);
            records.retain(|r| self.archive_path(project, &r.archive).is_file());
            self.write_log(project, &records)?;
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(timestamp: &str, archive: &str) -> SnapshotRecord {
        SnapshotRecord {
            timestamp: timestamp.to_string(),
            archive: archive.to_string(),
            sha256: "00".repeat(32),
            size: 128,
            files_count: 2,
            auto_backup: false,
            pre_restore: false,
        }
    }

    #[test]
    fn test_append_and_read_log() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        store
            .append("demo", record("20250101_100000", "demo_20250101_100000.zip"))
            .unwrap();
        store
            .append("demo", record("20250101_110000", "demo_20250101_110000.zip"))
            .unwrap();

        let records = store.read_log("demo");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, "20250101_100000");
    }

    #[test]
    fn test_append_replaces_same_archive() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        let mut first = record("20250101_100000", "demo_20250101_100000.zip");
        first.size = 10;
        store.append("demo", first).unwrap();

        let mut second = record("20250101_100000", "demo_20250101_100000.zip");
        second.size = 20;
        store.append("demo", second).unwrap();

        let records = store.read_log("demo");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size, 20);
    }

    #[test]
    fn test_malformed_log_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        fs::create_dir_all(store.project_dir("demo")).unwrap();
        fs::write(store.log_path("demo"), b"{ not json").unwrap();

        assert!(store.read_log("demo").is_empty());

        // Appending over a malformed log succeeds and starts fresh.
        store
            .append("demo", record("20250101_100000", "demo_20250101_100000.zip"))
            .unwrap();
        assert_eq!(store.read_log("demo").len(), 1);
    }

    #[test]
    fn test_list_sorted_descending_and_self_healing() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        for ts in ["20250101_100000", "20250103_100000", "20250102_100000"] {
            let archive = format!("demo_{ts}.zip");
            store.append("demo", record(ts, &archive)).unwrap();
            fs::write(store.archive_path("demo", &archive), b"zip").unwrap();
        }

        // Remove one archive from disk; its record must disappear from list.
        fs::remove_file(store.archive_path("demo", "demo_20250102_100000.zip")).unwrap();

        let records = store.list("demo");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, "20250103_100000");
        assert_eq!(records[1].timestamp, "20250101_100000");
    }

    #[test]
    fn test_find_ignores_missing_archive_and_prefers_manual() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        store
            .append("demo", record("20250101_100000", "demo_20250101_100000.zip"))
            .unwrap();
        let mut safety = record("20250101_100000", "demo_20250101_100000_prerestore.zip");
        safety.pre_restore = true;
        store.append("demo", safety).unwrap();

        // No archives exist on disk, but find still returns the record.
        let found = store.find("demo", "20250101_100000").unwrap();
        assert!(!found.pre_restore);
        assert!(store.find("demo", "20990101_000000").is_none());
    }

    #[test]
    fn test_prune_keeps_newest_by_mtime_and_rewrites_log() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        for i in 0..5 {
            let ts = format!("2025010{}_100000", i + 1);
            let archive = format!("demo_{ts}.zip");
            store.append("demo", record(&ts, &archive)).unwrap();
            let path = store.archive_path("demo", &archive);
            fs::write(&path, b"zip").unwrap();
            fs::write(sidecar_path(&path), b"digest").unwrap();

            // Distinct mtimes, oldest timestamp oldest on disk.
            let mtime = std::time::SystemTime::UNIX_EPOCH
                + std::time::Duration::from_secs(1_700_000_000 + i * 60);
            let file = fs::File::options().append(true).open(&path).unwrap();
            file.set_modified(mtime).unwrap();
        }

        let deleted = store.prune("demo", 3).unwrap();
        assert_eq!(deleted, 2);

        let remaining: Vec<_> = fs::read_dir(store.project_dir("demo"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".zip"))
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(!remaining.contains(&"demo_20250101_100000.zip".to_string()));
        assert!(!remaining.contains(&"demo_20250102_100000.zip".to_string()));

        // Sidecars of pruned archives are gone too.
        assert!(!store
            .project_dir("demo")
            .join("demo_20250101_100000.zip.sha256")
            .exists());

        // Log no longer references deleted archives.
        let records = store.read_log("demo");
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.timestamp >= "20250103_100000".to_string()));
    }
}
