//! Persistent per-directory indices.
//!
//! Two independent JSON documents live inside each watched directory:
//!
//! - [`IdentityIndex`] (`.creation_index.json`): rename-stable [`FileKey`] to
//!   the first-seen creation time.
//! - [`ContentIndex`] (`.update_index.json`): path to content hash, the time
//!   of the last real content change and the path history.
//!
//! Both are read and written through [`IndexDocument`], which guards each load
//! and save with a bounded advisory lock and writes via temp file plus atomic
//! replace. Malformed or unreadable documents load as empty indices.

use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ChronoError, Result};
use crate::lock::{self, INDEX_LOCK_TIMEOUT, LockGuard};

pub mod content;
pub mod identity;

pub use content::{ContentIndex, ContentRecord, ContentUpdate};
pub use identity::{CreationRecord, FileKey, IdentityIndex};

/// A JSON document on disk plus its sidecar lock file.
#[derive(Debug, Clone)]
pub struct IndexDocument {
    path: PathBuf,
    lock_path: PathBuf,
}

impl IndexDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock::lock_path_for(&path);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, falling back to `T::default()` when it is missing,
    /// unreadable or malformed. If the lock cannot be taken in time the file
    /// is read unlocked; replacement is atomic so a reader never observes a
    /// torn write.
    pub fn load<T>(&self) -> T
    where
        T: DeserializeOwned + Default,
    {
        let parent_exists = self.path.parent().is_some_and(Path::is_dir);
        if !parent_exists {
            return T::default();
        }

        let _guard = self.lock_best_effort("load");

        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return T::default();
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "index unreadable, starting empty"
                );
                return T::default();
            }
        };

        match serde_json::from_reader(BufReader::new(file)) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "index malformed, starting empty");
                T::default()
            }
        }
    }

    /// Serialize `value` to a temp file next to the document and atomically
    /// replace the document with it.
    pub fn save<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| {
                ChronoError::Internal(format!(
                    "index path {} has no parent directory",
                    self.path.display()
                ))
            })?
            .to_path_buf();
        fs::create_dir_all(&parent)
            .map_err(|err| ChronoError::io(&parent, err))?;

        let _guard = self.lock_best_effort("save");

        let prefix = self
            .path
            .file_name()
            .map(|name| format!("{}.", name.to_string_lossy()))
            .unwrap_or_else(|| ".index.".to_string());
        let tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|err| ChronoError::io(&parent, err))?;

        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer
                .flush()
                .map_err(|err| ChronoError::io(tmp.path(), err))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|err| ChronoError::io(tmp.path(), err))?;

        tmp.persist(&self.path)
            .map_err(|err| ChronoError::io(&self.path, err.error))?;
        debug!(path = %self.path.display(), "index saved");
        Ok(())
    }

    fn lock_best_effort(&self, op: &'static str) -> Option<LockGuard> {
        match lock::acquire(&self.lock_path, INDEX_LOCK_TIMEOUT) {
            Ok(guard) => Some(guard),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    op,
                    error = %err,
                    "index lock unavailable, proceeding without it"
                );
                None
            }
        }
    }
}
