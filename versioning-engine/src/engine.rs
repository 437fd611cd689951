//! Snapshot/restore orchestration.
//!
//! Ties the archive codec, integrity guard and snapshot store together into
//! the user-facing operations. Operations on the same project are
//! serialized through a per-project async mutex; different projects proceed
//! fully in parallel. All filesystem-heavy work runs on blocking worker
//! threads.

use crate::archive;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::integrity;
use crate::store::{SnapshotRecord, SnapshotStore};
use crate::walker;
use chrono::Local;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Archive timestamp format, second resolution. Doubles as the snapshot id.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Filename tag for safety snapshots taken before a restore.
const PRE_RESTORE_TAG: &str = "_prerestore";

/// How a snapshot is being taken; decides the exclude set and log flags.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Marks scheduled (bulk) snapshots in the metadata log.
    pub auto_backup: bool,

    /// Path fragments to skip while packing.
    pub excludes: Vec<String>,

    pre_restore: bool,
}

impl SnapshotOptions {
    /// User-triggered snapshot: archives everything, no exclusions.
    pub fn interactive() -> Self {
        Self {
            auto_backup: false,
            excludes: Vec::new(),
            pre_restore: false,
        }
    }

    /// Scheduled snapshot with the driver-supplied exclude set.
    pub fn scheduled(excludes: Vec<String>) -> Self {
        Self {
            auto_backup: true,
            excludes,
            pre_restore: false,
        }
    }

    fn pre_restore() -> Self {
        Self {
            auto_backup: false,
            excludes: Vec::new(),
            pre_restore: true,
        }
    }
}

/// Phases of a restore. `Failed` is reachable from every phase before
/// `Swapping` completes; once the swap lands the restore is `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Validating,
    SafetySnapshotting,
    Staging,
    Swapping,
    Done,
    Failed,
}

/// Outcome of a bulk snapshot pass over all projects.
#[derive(Debug)]
pub struct BulkReport {
    pub total: usize,
    pub succeeded: usize,
    /// Per-project failures, in iteration order.
    pub failures: Vec<(String, EngineError)>,
}

impl BulkReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// The versioning engine. Cheap to clone via `Arc` in a host application;
/// holds no per-operation state besides the lock map.
pub struct VersioningEngine {
    config: Config,
    store: SnapshotStore,
    locks: DashMap<String, Arc<Mutex<()>>>,
    cancel: CancellationToken,
}

impl VersioningEngine {
    pub fn new(config: Config) -> Self {
        Self::with_cancel(config, CancellationToken::new())
    }

    /// Engine whose blocking archive work aborts when `cancel` fires.
    pub fn with_cancel(config: Config, cancel: CancellationToken) -> Self {
        let store = SnapshotStore::new(config.backups_root.clone());
        Self {
            config,
            store,
            locks: DashMap::new(),
            cancel,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock_for(&self, project: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(project.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn project_path(&self, project: &str) -> PathBuf {
        self.config.projects_root.join(project)
    }

    /// Snapshot the current state of a project.
    ///
    /// Always produces a new snapshot; there is no "unchanged, skip"
    /// optimization. Returns the committed record.
    pub async fn create_snapshot(
        &self,
        project: &str,
        options: SnapshotOptions,
    ) -> Result<SnapshotRecord> {
        validate_project_name(project)?;
        let lock = self.lock_for(project);
        let _guard = lock.lock().await;
        self.create_snapshot_locked(project, options).await
    }

    /// Snapshot body; caller must hold the project lock.
    async fn create_snapshot_locked(
        &self,
        project: &str,
        options: SnapshotOptions,
    ) -> Result<SnapshotRecord> {
        let project_path = self.project_path(project);
        if !project_path.is_dir() {
            return Err(EngineError::ProjectNotFound(project.to_string()));
        }

        tokio::fs::create_dir_all(self.store.project_dir(project)).await?;

        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let tag = if options.pre_restore { PRE_RESTORE_TAG } else { "" };
        let archive_name = format!("{project}_{timestamp}{tag}.zip");
        let archive_path = self.store.archive_path(project, &archive_name);

        let stats = {
            let src = project_path.clone();
            let dst = archive_path.clone();
            let excludes = options.excludes.clone();
            let cancel = self.cancel.clone();
            tokio::task::spawn_blocking(move || archive::pack(&src, &dst, &excludes, &cancel))
                .await
                .map_err(join_error)??
        };

        if stats.file_count == 0 || !archive_path.is_file() {
            // Nothing worth keeping; drop the empty archive.
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(EngineError::EmptyArchive(project.to_string()));
        }

        let sha256 = {
            let path = archive_path.clone();
            tokio::task::spawn_blocking(move || integrity::write_sidecar(&path))
                .await
                .map_err(join_error)??
        };

        let record = SnapshotRecord {
            timestamp,
            archive: archive_name,
            sha256,
            size: stats.archive_size,
            files_count: stats.file_count as u64,
            auto_backup: options.auto_backup,
            pre_restore: options.pre_restore,
        };

        {
            let store = self.store.clone();
            let name = project.to_string();
            let rec = record.clone();
            tokio::task::spawn_blocking(move || store.append(&name, rec))
                .await
                .map_err(join_error)??;
        }

        // Retention is best-effort: a prune failure never fails the
        // snapshot that triggered it. Safety snapshots skip pruning
        // entirely: a restore in flight must never delete the archive it
        // is about to extract, so retention catches up on the next
        // regular snapshot instead.
        if !options.pre_restore {
            let store = self.store.clone();
            let name = project.to_string();
            let max = self.config.max_snapshots;
            let pruned = tokio::task::spawn_blocking(move || store.prune(&name, max))
                .await
                .map_err(join_error)?;
            match pruned {
                Ok(n) if n > 0 => info!("Pruned {} old archive(s) for '{}'", n, project),
                Ok(_) => {}
                Err(e) => warn!("Retention pruning failed for '{}': {}", project, e),
            }
        }

        info!(
            "Snapshot created for '{}': {} ({} files, {} bytes)",
            project, record.archive, record.files_count, record.size
        );

        Ok(record)
    }

    /// Committed snapshots for a project, most recent first. Empty if the
    /// project has no history.
    pub async fn list_snapshots(&self, project: &str) -> Result<Vec<SnapshotRecord>> {
        validate_project_name(project)?;
        let store = self.store.clone();
        let name = project.to_string();
        tokio::task::spawn_blocking(move || store.list(&name))
            .await
            .map_err(join_error)
    }

    /// Restore a project to a prior snapshot.
    ///
    /// Runs `Validating -> SafetySnapshotting -> Staging -> Swapping`.
    /// The archive is verified before anything is touched, a safety
    /// snapshot of the live state is taken before anything is deleted, and
    /// the new tree is fully extracted into a sibling staging directory
    /// before it is swapped into place by rename. A corrupted snapshot can
    /// therefore never destroy good data, and there is no window in which
    /// the project directory is partially populated.
    pub async fn restore_snapshot(&self, project: &str, snapshot_id: &str) -> Result<()> {
        validate_project_name(project)?;
        validate_snapshot_id(snapshot_id)?;

        let lock = self.lock_for(project);
        let _guard = lock.lock().await;

        match self.restore_locked(project, snapshot_id).await {
            Ok(()) => {
                info!(
                    "Restore of '{}' to {} complete ({:?})",
                    project,
                    snapshot_id,
                    RestorePhase::Done
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Restore of '{}' to {} failed ({:?}): {}",
                    project,
                    snapshot_id,
                    RestorePhase::Failed,
                    e
                );
                Err(e)
            }
        }
    }

    async fn restore_locked(&self, project: &str, snapshot_id: &str) -> Result<()> {
        // Validating: the record, its archive and its sidecar must all
        // check out before the live project is touched.
        info!(
            "Restoring '{}' to {} ({:?})",
            project,
            snapshot_id,
            RestorePhase::Validating
        );
        let record = self.store.find(project, snapshot_id).ok_or_else(|| {
            EngineError::SnapshotNotFound {
                project: project.to_string(),
                snapshot_id: snapshot_id.to_string(),
            }
        })?;
        let archive_path = self.store.archive_path(project, &record.archive);
        {
            let path = archive_path.clone();
            tokio::task::spawn_blocking(move || integrity::verify(&path))
                .await
                .map_err(join_error)??;
        }

        // SafetySnapshotting: capture the live state before destroying it.
        // Skipped when the project has no files to protect.
        let project_path = self.project_path(project);
        let live_files = {
            let path = project_path.clone();
            tokio::task::spawn_blocking(move || {
                if path.is_dir() {
                    walker::collect_files(&path, &[]).map(|files| files.len())
                } else {
                    Ok(0)
                }
            })
            .await
            .map_err(join_error)??
        };
        if live_files > 0 {
            info!(
                "Taking pre-restore snapshot of '{}' ({:?})",
                project,
                RestorePhase::SafetySnapshotting
            );
            let safety = self
                .create_snapshot_locked(project, SnapshotOptions::pre_restore())
                .await?;
            info!("Safety snapshot: {}", safety.archive);
        }

        // Staging: extract into a hidden sibling of the project directory.
        // Valid project names cannot start with '.', so staging paths can
        // never collide with a real project.
        info!("Extracting '{}' ({:?})", record.archive, RestorePhase::Staging);
        let staging = self
            .config
            .projects_root
            .join(format!(".{project}.restore-{snapshot_id}"));
        let old = self.config.projects_root.join(format!(".{project}.old"));
        {
            let staging_dir = staging.clone();
            let archive_path = archive_path.clone();
            let cancel = self.cancel.clone();
            let result = tokio::task::spawn_blocking(move || {
                if staging_dir.exists() {
                    std::fs::remove_dir_all(&staging_dir)?;
                }
                std::fs::create_dir_all(&staging_dir)?;
                archive::unpack(&archive_path, &staging_dir, &cancel)
            })
            .await
            .map_err(join_error)?;
            if let Err(e) = result {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(e);
            }
        }

        // Swapping: two renames. The project directory is always either
        // the old tree or the restored one, never a mix.
        info!("Swapping '{}' into place ({:?})", project, RestorePhase::Swapping);
        {
            let staging = staging.clone();
            let old = old.clone();
            let project_path = project_path.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                if old.exists() {
                    std::fs::remove_dir_all(&old)?;
                }
                let had_previous = project_path.exists();
                if had_previous {
                    std::fs::rename(&project_path, &old)?;
                }
                if let Err(e) = std::fs::rename(&staging, &project_path) {
                    // Put the original tree back; the staging dir stays
                    // behind for inspection.
                    if had_previous {
                        if let Err(rb) = std::fs::rename(&old, &project_path) {
                            warn!(
                                "Rollback rename failed for {}: {}",
                                project_path.display(),
                                rb
                            );
                        }
                    }
                    return Err(e.into());
                }
                if had_previous {
                    if let Err(e) = std::fs::remove_dir_all(&old) {
                        warn!("Failed to remove old tree {}: {}", old.display(), e);
                    }
                }
                Ok(())
            })
            .await
            .map_err(join_error)??;
        }

        Ok(())
    }

    /// Snapshot every project under the projects root with the scheduled
    /// exclude set, continuing past individual failures. Reserved names
    /// and entries that fail name validation are skipped.
    pub async fn snapshot_all(&self) -> Result<BulkReport> {
        let projects = {
            let root = self.config.projects_root.clone();
            let reserved = self.config.reserved_projects.clone();
            tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
                let mut names = Vec::new();
                for entry in std::fs::read_dir(&root)? {
                    let entry = entry?;
                    if !entry.file_type()?.is_dir() {
                        continue;
                    }
                    let name = entry.file_name().to_string_lossy().to_string();
                    if reserved.iter().any(|r| r == &name) {
                        continue;
                    }
                    if validate_project_name(&name).is_err() {
                        warn!("Skipping directory with invalid project name: {:?}", name);
                        continue;
                    }
                    names.push(name);
                }
                names.sort();
                Ok(names)
            })
            .await
            .map_err(join_error)??
        };

        let mut report = BulkReport {
            total: projects.len(),
            succeeded: 0,
            failures: Vec::new(),
        };

        for project in projects {
            let options = SnapshotOptions::scheduled(self.config.exclude_patterns.clone());
            match self.create_snapshot(&project, options).await {
                Ok(record) => {
                    report.succeeded += 1;
                    info!("Bulk snapshot ok for '{}': {}", project, record.archive);
                }
                Err(EngineError::Cancelled) => {
                    report.failures.push((project, EngineError::Cancelled));
                    break;
                }
                Err(e) => {
                    warn!("Bulk snapshot failed for '{}' ({:?}): {}", project, e.kind(), e);
                    report.failures.push((project, e));
                }
            }
        }

        info!(
            "Bulk snapshot finished: {}/{} projects saved",
            report.succeeded, report.total
        );

        Ok(report)
    }
}

fn join_error(e: JoinError) -> EngineError {
    EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Project names are a single path component: `[A-Za-z0-9_-]+`. Rejects
/// separators, `..` and the empty string by construction.
fn validate_project_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidProjectName(name.to_string()))
    }
}

/// Snapshot ids are timestamps: `YYYYMMDD_HHMMSS`.
fn validate_snapshot_id(id: &str) -> Result<()> {
    let bytes = id.as_bytes();
    let ok = bytes.len() == 15
        && bytes[8] == b'_'
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[9..].iter().all(u8::is_ascii_digit);
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidSnapshotId(id.to_string()))
    }
}
