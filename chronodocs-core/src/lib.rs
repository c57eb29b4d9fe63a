//! # Chronodocs Core
//!
//! Keeps a directory of evolving documents labeled with two-digit rank
//! prefixes that follow true creation order, even while files are added,
//! edited or renamed behind its back.
//!
//! ## Overview
//!
//! - **Identity index**: rename-stable [`FileKey`] to first-seen creation time
//! - **Content index**: SHA-256 per path, so touches and identical re-saves are
//!   not mistaken for edits
//! - **Reconciler**: scan, plan and rename pass under per-file advisory locks
//! - **Scheduler**: trailing-edge debounce plus minimum spacing between passes,
//!   with at most one pass in flight
//!
//! ## Feature Flags
//!
//! - `watch` (default): [`PhaseWatcher`], a `notify`-backed watcher feeding the
//!   scheduler
//!
//! ## Examples
//!
//! ```no_run
//! use chronodocs_core::{IgnoreSet, Reconciler};
//!
//! fn relabel() -> chronodocs_core::Result<()> {
//!     let mut reconciler =
//!         Reconciler::new(".devcontext/progress/phase-1", IgnoreSet::default());
//!     let report = reconciler.reconcile(false)?;
//!     for rename in &report.renamed {
//!         println!("{} -> {}", rename.from_name(), rename.to_name());
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Error type shared by every module
pub mod error;

/// Change notifications and the notify-backed phase watcher
pub mod fs_watch;

/// File-name ignore globs and the reserved document names
pub mod ignore;

/// Identity and content indices persisted inside each watched directory
pub mod index;

/// Bounded advisory file locks
pub mod lock;

/// Scan, plan and rename passes
pub mod reconcile;

/// Debounce and throttle coordinator
pub mod schedule;

pub use error::{ChronoError, Result};
pub use fs_watch::{ChangeEvent, ChangeKind};
#[cfg(feature = "watch")]
pub use fs_watch::PhaseWatcher;
pub use ignore::IgnoreSet;
pub use index::{
    ContentIndex, ContentRecord, ContentUpdate, CreationRecord, FileKey, IdentityIndex,
};
pub use reconcile::{
    PlannedRename, ReconcileReport, Reconciler, SkipReason, SkippedRename,
};
pub use schedule::{ReconcileScheduler, ReconcileTarget, SchedulerConfig, SchedulerState};
