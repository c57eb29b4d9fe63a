//! Scan, diff and rename engine for one watched directory.
//!
//! A pass observes every non-ignored regular file, folds it into the identity
//! and content indices, prunes records for files that are gone, ranks the
//! survivors by `(recorded_ctime, inode)` and renames each to
//! `<NN>-<base name>`. Per-file problems (lock contention, files vanishing
//! under us) are logged and skipped; only an unusable directory fails a pass.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ChronoError, Result};
use crate::ignore::IgnoreSet;
use crate::index::{ContentIndex, FileKey, IdentityIndex};
use crate::lock::{self, RENAME_LOCK_TIMEOUT};
use crate::schedule::ReconcileTarget;

pub mod plan;

pub use plan::{PlannedRename, RankedFile, RenamePlan, ranked_name, strip_rank_prefix};

use plan::RESTAGE_SUFFIX;

/// Why a planned rename did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    LockTimeout,
    SourceVanished,
    TargetOccupied,
    Io(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LockTimeout => f.write_str("lock held by another process"),
            SkipReason::SourceVanished => f.write_str("source vanished before rename"),
            SkipReason::TargetOccupied => f.write_str("target name already taken"),
            SkipReason::Io(message) => write!(f, "io error: {message}"),
        }
    }
}

impl From<ChronoError> for SkipReason {
    fn from(err: ChronoError) -> Self {
        if !err.is_transient() {
            return SkipReason::Io(err.to_string());
        }
        match err {
            ChronoError::LockTimeout { .. } => SkipReason::LockTimeout,
            _ => SkipReason::SourceVanished,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRename {
    pub rename: PlannedRename,
    pub reason: SkipReason,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    /// Regular, non-ignored files seen on disk.
    pub observed: usize,
    /// Identity records dropped because their file is gone.
    pub pruned: usize,
    /// Full rename plan in rank order.
    pub planned: Vec<PlannedRename>,
    /// Renames that completed (always empty for dry runs).
    pub renamed: Vec<PlannedRename>,
    pub skipped: Vec<SkippedRename>,
}

impl ReconcileReport {
    /// True when the directory was already in canonical ranked form.
    pub fn is_clean(&self) -> bool {
        self.planned.is_empty()
    }
}

/// Owns the in-memory indices for one directory.
#[derive(Debug)]
pub struct Reconciler {
    dir: PathBuf,
    ignore: IgnoreSet,
    identity: IdentityIndex,
    content: ContentIndex,
    rename_lock_timeout: Duration,
}

impl Reconciler {
    /// Create a reconciler for `dir`, loading both indices from it. Relative
    /// paths are resolved against the current directory.
    pub fn new(dir: impl Into<PathBuf>, ignore: IgnoreSet) -> Self {
        let dir = absolutize(dir.into());
        let identity = IdentityIndex::load_in(&dir);
        let content = ContentIndex::load_in(&dir);
        Self {
            dir,
            ignore,
            identity,
            content,
            rename_lock_timeout: RENAME_LOCK_TIMEOUT,
        }
    }

    pub fn with_rename_lock_timeout(mut self, timeout: Duration) -> Self {
        self.rename_lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ignore_set(&self) -> &IgnoreSet {
        &self.ignore
    }

    pub fn identity(&self) -> &IdentityIndex {
        &self.identity
    }

    /// Mutable access for seeding creation times (for example from version
    /// control history) before the first pass.
    pub fn identity_mut(&mut self) -> &mut IdentityIndex {
        &mut self.identity
    }

    pub fn content(&self) -> &ContentIndex {
        &self.content
    }

    /// Run one pass. `dry_run` computes and reports the plan without
    /// touching files or index documents.
    pub fn reconcile(&mut self, dry_run: bool) -> Result<ReconcileReport> {
        fs::create_dir_all(&self.dir).map_err(|source| {
            ChronoError::DirectoryUnavailable {
                path: self.dir.clone(),
                source,
            }
        })?;

        let files = self.scan()?;
        let observed = self.observe(files);
        let pruned = self.prune(&observed);
        let plan = self.plan(&observed);

        let mut report = ReconcileReport {
            dry_run,
            observed: observed.len(),
            pruned,
            planned: plan.entries().to_vec(),
            ..ReconcileReport::default()
        };

        if dry_run {
            for entry in plan.entries() {
                info!(
                    dry_run = true,
                    from = %entry.from_name(),
                    to = %entry.to_name(),
                    "would rename"
                );
            }
            return Ok(report);
        }

        self.execute(&plan, &mut report);
        self.persist();

        debug!(
            dir = %self.dir.display(),
            observed = report.observed,
            pruned = report.pruned,
            renamed = report.renamed.len(),
            skipped = report.skipped.len(),
            "reconciliation pass finished"
        );
        Ok(report)
    }

    fn scan(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|source| {
            ChronoError::DirectoryUnavailable {
                path: self.dir.clone(),
                source,
            }
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        dir = %self.dir.display(),
                        error = %err,
                        "skipping unreadable directory entry"
                    );
                    continue;
                }
            };
            let path = entry.path();
            if self.ignore.is_ignored(&path) {
                continue;
            }
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => files.push(path),
                Ok(_) => {}
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "entry vanished during scan")
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Fold every scanned file into both indices. Files renamed behind our
    /// back keep their identity record; their content record follows them.
    fn observe(&mut self, files: Vec<PathBuf>) -> BTreeMap<FileKey, PathBuf> {
        let mut observed: BTreeMap<FileKey, PathBuf> = BTreeMap::new();

        for path in files {
            let key = match IdentityIndex::key(&path) {
                Ok(key) => key,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "file vanished mid-scan, skipping");
                    continue;
                }
            };
            if let Some(first) = observed.get(&key) {
                warn!(
                    path = %path.display(),
                    other = %first.display(),
                    "hard link to an already observed file, skipping"
                );
                continue;
            }

            let current_name = file_name(&path);
            let moved_from = self
                .identity
                .get(&key)
                .filter(|record| record.filename != current_name)
                .map(|record| self.dir.join(&record.filename));

            if let Err(err) = self.identity.add_file(&path) {
                warn!(path = %path.display(), error = %err, "could not index file, skipping");
                continue;
            }

            match moved_from {
                Some(old_path) => {
                    debug!(
                        from = %old_path.display(),
                        to = %path.display(),
                        "file renamed externally"
                    );
                    if let Err(err) = self.identity.record_rename(&key, &path) {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "could not record external rename"
                        );
                    }
                    self.content.update_file(&path, Some(&old_path));
                }
                None => {
                    self.content.update_file(&path, None);
                }
            }

            observed.insert(key, path);
        }

        observed
    }

    fn prune(&mut self, observed: &BTreeMap<FileKey, PathBuf>) -> usize {
        let stale: Vec<FileKey> = self
            .identity
            .keys()
            .filter(|key| !observed.contains_key(*key))
            .cloned()
            .collect();

        for key in &stale {
            if let Some(record) = self.identity.remove_key(key) {
                debug!(file = %record.filename, "pruning missing file");
                self.content.remove_file(&self.dir.join(&record.filename));
            }
        }

        let present: Vec<PathBuf> = observed.values().cloned().collect();
        let orphaned = self.content.retain_paths(&present);
        if orphaned > 0 {
            debug!(orphaned, "dropped content records with no file on disk");
        }

        stale.len()
    }

    fn plan(&self, observed: &BTreeMap<FileKey, PathBuf>) -> RenamePlan {
        let ranked = observed
            .iter()
            .filter_map(|(key, path)| {
                let record = self.identity.get(key)?;
                Some(RankedFile {
                    key: key.clone(),
                    path: path.clone(),
                    recorded_ctime: record.recorded_ctime,
                    inode: record.inode.unwrap_or_default(),
                })
            })
            .collect();
        RenamePlan::build(ranked)
    }

    /// Apply renames in ascending rank order.
    fn execute(&mut self, plan: &RenamePlan, report: &mut ReconcileReport) {
        // Where each planned source currently lives; differs from `from`
        // once a file has been restaged out of an earlier target's way.
        let mut sources: Vec<PathBuf> =
            plan.entries().iter().map(|entry| entry.from.clone()).collect();

        for (idx, entry) in plan.entries().iter().enumerate() {
            match self.rename_one(plan, idx, &mut sources) {
                Ok(()) => {
                    info!(from = %entry.from_name(), to = %entry.to_name(), "renamed");
                    report.renamed.push(entry.clone());
                }
                Err(reason) => {
                    warn!(
                        from = %entry.from_name(),
                        to = %entry.to_name(),
                        %reason,
                        "skipping rename"
                    );
                    report.skipped.push(SkippedRename {
                        rename: entry.clone(),
                        reason,
                    });
                }
            }
        }
    }

    fn rename_one(
        &mut self,
        plan: &RenamePlan,
        idx: usize,
        sources: &mut [PathBuf],
    ) -> std::result::Result<(), SkipReason> {
        let entry = &plan.entries()[idx];
        let source = sources[idx].clone();

        let _guard = lock::acquire_ephemeral(
            &lock::lock_path_for(&entry.from),
            self.rename_lock_timeout,
        )?;

        if !source.exists() {
            return Err(SkipReason::SourceVanished);
        }

        if entry.to.exists() {
            let Some(blocker) = (idx + 1..sources.len())
                .find(|&later| sources[later] == entry.to)
            else {
                return Err(SkipReason::TargetOccupied);
            };
            sources[blocker] = self.restage(&plan.entries()[blocker], &entry.to)?;
        }

        fs::rename(&source, &entry.to)
            .map_err(|err| SkipReason::from(ChronoError::io(&source, err)))?;

        self.content.update_file(&entry.to, Some(&source));
        if let Err(err) = self.identity.record_rename(&entry.key, &entry.to) {
            warn!(
                path = %entry.to.display(),
                error = %err,
                "could not update identity after rename"
            );
        }
        Ok(())
    }

    /// Move a later plan entry's file out of the way under its own lock.
    fn restage(
        &mut self,
        blocker: &PlannedRename,
        current: &Path,
    ) -> std::result::Result<PathBuf, SkipReason> {
        let _guard = lock::acquire_ephemeral(
            &lock::lock_path_for(&blocker.from),
            self.rename_lock_timeout,
        )?;

        let mut staged_name = current
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        staged_name.push(RESTAGE_SUFFIX);
        let staged = current.with_file_name(staged_name);

        fs::rename(current, &staged)
            .map_err(|err| SkipReason::from(ChronoError::io(current, err)))?;
        self.content.move_record(current, &staged);
        if let Err(err) = self.identity.record_rename(&blocker.key, &staged) {
            warn!(
                path = %staged.display(),
                error = %err,
                "could not update identity after restage"
            );
        }
        debug!(from = %current.display(), to = %staged.display(), "restaged blocking file");
        Ok(staged)
    }

    /// Save both indices; a failure in one does not prevent the other.
    fn persist(&self) {
        if let Err(err) = self.identity.save() {
            warn!(
                path = %self.identity.path().display(),
                error = %err,
                "failed to save identity index"
            );
        }
        if let Err(err) = self.content.save() {
            warn!(
                path = %self.content.path().display(),
                error = %err,
                "failed to save content index"
            );
        }
    }
}

impl ReconcileTarget for Reconciler {
    fn run_pass(&mut self) -> Result<ReconcileReport> {
        self.reconcile(false)
    }

    fn label(&self) -> String {
        self.dir.display().to_string()
    }
}

fn absolutize(dir: PathBuf) -> PathBuf {
    if dir.is_absolute() {
        return dir;
    }
    env::current_dir()
        .map(|cwd| cwd.join(&dir))
        .unwrap_or(dir)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
