//! Filesystem change notifications for watched phase directories.
//!
//! [`ChangeEvent`] is the notifier-neutral event type the scheduler consumes.
//! With the `watch` feature, [`PhaseWatcher`] wires a non-recursive `notify`
//! watcher to a [`ReconcileScheduler`](crate::schedule::ReconcileScheduler).

mod events;
#[cfg(feature = "watch")]
mod watcher;

pub use events::{ChangeEvent, ChangeKind};
#[cfg(feature = "watch")]
pub use watcher::{PhaseWatcher, classify_event, translate_event};
