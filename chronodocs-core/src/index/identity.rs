//! Stable creation-order index keyed by file identity.
//!
//! On Unix the key is derived from `(st_dev, st_ino)`, so it survives renames
//! within a filesystem. Elsewhere the file name is used, which is weaker:
//! a rename looks like a delete plus a new file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::IndexDocument;
use crate::error::{ChronoError, Result};
use crate::ignore::CREATION_INDEX_FILE;

/// Rename-stable identity of a file.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FileKey(String);

impl FileKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First sighting of a file. `recorded_ctime` is never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationRecord {
    pub key: FileKey,
    /// Last known file name (without directory).
    pub filename: String,
    /// Seconds since the Unix epoch at first observation.
    pub recorded_ctime: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<u64>,
}

#[derive(Debug)]
pub struct IdentityIndex {
    document: IndexDocument,
    entries: BTreeMap<FileKey, CreationRecord>,
}

struct FileIdentity {
    key: FileKey,
    inode: Option<u64>,
    device: Option<u64>,
}

impl IdentityIndex {
    /// Load the index stored at `index_path`. Never fails: unreadable
    /// storage yields an empty index.
    pub fn load(index_path: impl Into<PathBuf>) -> Self {
        let document = IndexDocument::new(index_path);
        let entries = document.load();
        Self { document, entries }
    }

    /// Load the index kept inside `dir`.
    pub fn load_in(dir: &Path) -> Self {
        Self::load(dir.join(CREATION_INDEX_FILE))
    }

    pub fn save(&self) -> Result<()> {
        self.document.save(&self.entries)
    }

    pub fn path(&self) -> &Path {
        self.document.path()
    }

    /// Derive the identity key for an existing file.
    pub fn key(path: &Path) -> Result<FileKey> {
        identify(path).map(|identity| identity.key)
    }

    /// Record `path` with the current wall-clock time unless its key is
    /// already indexed. Returns whether a record was inserted.
    pub fn add_file(&mut self, path: &Path) -> Result<bool> {
        self.add_file_with_ctime(path, now_epoch_secs())
    }

    /// Same as [`add_file`](Self::add_file) with an explicit creation time.
    pub fn add_file_with_ctime(
        &mut self,
        path: &Path,
        recorded_ctime: f64,
    ) -> Result<bool> {
        let identity = identify(path)?;
        if self.entries.contains_key(&identity.key) {
            return Ok(false);
        }

        let record = CreationRecord {
            key: identity.key.clone(),
            filename: file_name_of(path),
            recorded_ctime,
            inode: identity.inode,
            device: identity.device,
        };
        self.entries.insert(identity.key, record);
        Ok(true)
    }

    pub fn remove_file(&mut self, path: &Path) -> Result<Option<CreationRecord>> {
        let key = Self::key(path)?;
        Ok(self.entries.remove(&key))
    }

    pub fn remove_key(&mut self, key: &FileKey) -> Option<CreationRecord> {
        self.entries.remove(key)
    }

    /// Stored creation time, or `None` if the file is unknown or cannot be
    /// inspected.
    pub fn creation_time_of(&self, path: &Path) -> Option<f64> {
        let key = Self::key(path).ok()?;
        self.entries.get(&key).map(|record| record.recorded_ctime)
    }

    /// Update the last known file name of an indexed file that now lives at
    /// `path`, re-keying the record if the identity is name based. The
    /// creation time is carried over untouched. Returns the previous file
    /// name when it changed.
    pub fn record_rename(
        &mut self,
        previous_key: &FileKey,
        path: &Path,
    ) -> Result<Option<String>> {
        let Some(mut record) = self.entries.remove(previous_key) else {
            return Ok(None);
        };

        let identity = match identify(path) {
            Ok(identity) => identity,
            Err(err) => {
                self.entries.insert(previous_key.clone(), record);
                return Err(err);
            }
        };

        let new_name = file_name_of(path);
        let previous_name = std::mem::replace(&mut record.filename, new_name);
        record.key = identity.key.clone();
        record.inode = identity.inode.or(record.inode);
        record.device = identity.device.or(record.device);
        let changed = previous_name != record.filename;
        self.entries.insert(identity.key, record);

        Ok(changed.then_some(previous_name))
    }

    pub fn get(&self, key: &FileKey) -> Option<&CreationRecord> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FileKey> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&FileKey, &CreationRecord)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn identify(path: &Path) -> Result<FileIdentity> {
    let metadata = fs::metadata(path).map_err(|err| ChronoError::io(path, err))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let (device, inode) = (metadata.dev(), metadata.ino());
        Ok(FileIdentity {
            key: FileKey(format!("dev:{device}-ino:{inode}")),
            inode: Some(inode),
            device: Some(device),
        })
    }

    #[cfg(not(unix))]
    {
        let _ = metadata;
        Ok(FileIdentity {
            key: FileKey(format!("name:{}", file_name_of(path))),
            inode: None,
            device: None,
        })
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
