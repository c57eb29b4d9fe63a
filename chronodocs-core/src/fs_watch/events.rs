use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kind of filesystem change delivered to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
    Opened,
    ClosedWithoutWrite,
}

impl ChangeKind {
    /// Events that cannot have changed anything on disk.
    pub fn is_read_only(self) -> bool {
        matches!(self, ChangeKind::Opened | ChangeKind::ClosedWithoutWrite)
    }
}

/// A single change notification for a path inside a watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub is_directory: bool,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_directory: false,
        }
    }

    pub fn directory(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            is_directory: true,
            ..Self::new(path, kind)
        }
    }
}
