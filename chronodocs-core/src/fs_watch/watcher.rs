use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{AccessKind, AccessMode, CreateKind, EventKind, ModifyKind, RemoveKind};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::spawn_blocking;
use tracing::{info, warn};

use super::{ChangeEvent, ChangeKind};
use crate::error::{ChronoError, Result};
use crate::reconcile::Reconciler;
use crate::schedule::{ReconcileScheduler, SchedulerConfig};

/// Keeps one phase directory reconciled while it changes.
pub struct PhaseWatcher {
    dir: PathBuf,
    scheduler: Arc<ReconcileScheduler>,
    watcher: Option<RecommendedWatcher>,
}

impl fmt::Debug for PhaseWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseWatcher")
            .field("dir", &self.dir)
            .field("scheduler", &self.scheduler)
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

impl PhaseWatcher {
    /// Create the directory if needed, run one pass immediately, then start
    /// watching. Fails only if that first pass cannot use the directory or
    /// the OS watcher cannot be attached.
    pub async fn start(
        mut reconciler: Reconciler,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let dir = reconciler.dir().to_path_buf();
        let ignore = reconciler.ignore_set().clone();

        let (reconciler, initial) = spawn_blocking(move || {
            let report = reconciler.reconcile(false);
            (reconciler, report)
        })
        .await
        .map_err(|err| {
            ChronoError::Internal(format!("initial pass panicked: {err}"))
        })?;
        let initial = initial?;
        info!(
            dir = %dir.display(),
            observed = initial.observed,
            renamed = initial.renamed.len(),
            "initial reconciliation finished"
        );

        let scheduler =
            Arc::new(ReconcileScheduler::spawn(reconciler, config, ignore));
        let watcher = attach(&dir, Arc::clone(&scheduler))?;

        Ok(Self {
            dir,
            scheduler,
            watcher: Some(watcher),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scheduler(&self) -> &ReconcileScheduler {
        &self.scheduler
    }

    /// Detach the OS watcher, then stop the scheduler, waiting for any pass
    /// in flight.
    pub async fn stop(&mut self) {
        self.watcher.take();
        self.scheduler.stop().await;
    }
}

fn attach(
    dir: &Path,
    scheduler: Arc<ReconcileScheduler>,
) -> Result<RecommendedWatcher> {
    let watched = dir.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if event.need_rescan() || event.paths.is_empty() {
                    scheduler.request();
                    return;
                }
                for change in translate_event(&event) {
                    scheduler.notify(&change);
                }
            }
            Err(err) => {
                warn!(dir = %watched.display(), error = %err, "watcher error, scheduling rescan");
                scheduler.request();
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|err| {
        ChronoError::Watcher(format!(
            "failed to create watcher for {}: {err}",
            dir.display()
        ))
    })?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|err| {
            ChronoError::Watcher(format!("failed to watch {}: {err}", dir.display()))
        })?;

    Ok(watcher)
}

/// Map a notify event kind onto the scheduler's event vocabulary.
pub fn classify_event(kind: &EventKind) -> ChangeKind {
    match kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Moved,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => ChangeKind::Modified,
        EventKind::Access(AccessKind::Close(_)) => ChangeKind::ClosedWithoutWrite,
        EventKind::Access(_) => ChangeKind::Opened,
        EventKind::Any | EventKind::Other => ChangeKind::Modified,
    }
}

/// One [`ChangeEvent`] per path carried by `event`.
pub fn translate_event(event: &Event) -> Vec<ChangeEvent> {
    let kind = classify_event(&event.kind);
    let folder_kind = matches!(
        event.kind,
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder)
    );

    event
        .paths
        .iter()
        .map(|path| ChangeEvent {
            path: path.clone(),
            kind,
            is_directory: folder_kind || path.is_dir(),
        })
        .collect()
}
