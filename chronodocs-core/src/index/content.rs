//! Content-hash index: tells real edits apart from metadata churn.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::IndexDocument;
use crate::error::Result;
use crate::ignore::CONTENT_INDEX_FILE;

/// Bytes read per hashing step.
const HASH_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Lowercase hex SHA-256 of the file contents.
    pub hash: String,
    /// When `hash` last changed. Updated together with `hash`, never alone.
    pub last_content_update: DateTime<Utc>,
    /// Every path this record has been associated with, oldest first.
    #[serde(default)]
    pub path_history: Vec<String>,
}

impl ContentRecord {
    fn new(path_key: String, hash: String) -> Self {
        Self {
            hash,
            last_content_update: Utc::now(),
            path_history: vec![path_key],
        }
    }

    fn remember_path(&mut self, path_key: &str) {
        if !self.path_history.iter().any(|known| known == path_key) {
            self.path_history.push(path_key.to_string());
        }
    }
}

/// What [`ContentIndex::update_file`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentUpdate {
    Created,
    Changed,
    Unchanged,
    /// The file could not be read; any moved record was kept as is.
    Unreadable,
}

#[derive(Debug)]
pub struct ContentIndex {
    document: IndexDocument,
    entries: BTreeMap<String, ContentRecord>,
}

impl ContentIndex {
    pub fn load(index_path: impl Into<PathBuf>) -> Self {
        let document = IndexDocument::new(index_path);
        let entries = document.load();
        Self { document, entries }
    }

    pub fn load_in(dir: &Path) -> Self {
        Self::load(dir.join(CONTENT_INDEX_FILE))
    }

    pub fn save(&self) -> Result<()> {
        self.document.save(&self.entries)
    }

    pub fn path(&self) -> &Path {
        self.document.path()
    }

    /// SHA-256 over the whole file, or `None` if it cannot be read.
    pub fn hash_of(path: &Path) -> Option<String> {
        match hash_file(path) {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not hash file");
                None
            }
        }
    }

    /// Bring the record for `path` up to date.
    ///
    /// When `old_path` has a record it is first moved to `path` (a rename is
    /// not a content change). The hash and timestamp are then rewritten only
    /// if the bytes differ, so repeated calls on an unchanged file are no-ops.
    pub fn update_file(
        &mut self,
        path: &Path,
        old_path: Option<&Path>,
    ) -> ContentUpdate {
        let key = path_key(path);

        if let Some(old_path) = old_path {
            let old_key = path_key(old_path);
            if old_key != key
                && let Some(mut record) = self.entries.remove(&old_key)
            {
                record.remember_path(&key);
                self.entries.insert(key.clone(), record);
            }
        }

        let Some(hash) = Self::hash_of(path) else {
            return ContentUpdate::Unreadable;
        };

        match self.entries.get_mut(&key) {
            None => {
                let record = ContentRecord::new(key.clone(), hash);
                self.entries.insert(key, record);
                ContentUpdate::Created
            }
            Some(record) if record.hash != hash => {
                record.hash = hash;
                record.last_content_update = Utc::now();
                record.remember_path(&key);
                ContentUpdate::Changed
            }
            Some(_) => ContentUpdate::Unchanged,
        }
    }

    /// Whether the current bytes differ from the stored hash (or nothing is
    /// stored yet).
    pub fn has_changed(&self, path: &Path) -> bool {
        Self::hash_of(path) != self.stored_hash(path).map(str::to_string)
    }

    pub fn stored_hash(&self, path: &Path) -> Option<&str> {
        self.record(path).map(|record| record.hash.as_str())
    }

    pub fn record(&self, path: &Path) -> Option<&ContentRecord> {
        self.entries.get(&path_key(path))
    }

    /// Move the record for `from` to `to` without hashing or touching the
    /// path history. Used for intermediate names that should not be
    /// remembered. Returns whether a record moved.
    pub fn move_record(&mut self, from: &Path, to: &Path) -> bool {
        match self.entries.remove(&path_key(from)) {
            Some(record) => {
                self.entries.insert(path_key(to), record);
                true
            }
            None => false,
        }
    }

    pub fn remove_file(&mut self, path: &Path) -> Option<ContentRecord> {
        self.entries.remove(&path_key(path))
    }

    /// Drop records whose path is not in `present`. Returns how many went.
    pub fn retain_paths(&mut self, present: &[PathBuf]) -> usize {
        let keep: Vec<String> = present.iter().map(|p| path_key(p)).collect();
        let before = self.entries.len();
        self.entries.retain(|key, _| keep.contains(key));
        before - self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ContentRecord)> {
        self.entries.iter().map(|(key, record)| (key.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    const HELLO_SHA256: &str =
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn hash_of_matches_known_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, "hello").unwrap();
        assert_eq!(ContentIndex::hash_of(&path).as_deref(), Some(HELLO_SHA256));
    }

    #[test]
    fn hash_of_spans_multiple_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let body = vec![7u8; HASH_CHUNK_SIZE * 3 + 17];
        fs::write(&path, &body).unwrap();
        let expected = hex::encode(Sha256::digest(&body));
        assert_eq!(ContentIndex::hash_of(&path), Some(expected));
    }

    #[test]
    fn hash_of_missing_file_is_none() {
        let dir = tempdir().unwrap();
        assert_eq!(ContentIndex::hash_of(&dir.path().join("nope")), None);
    }

    #[test]
    fn update_creates_then_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "v1").unwrap();
        let mut index = ContentIndex::load_in(dir.path());

        assert_eq!(index.update_file(&path, None), ContentUpdate::Created);
        let first = index.record(&path).cloned().unwrap();

        assert_eq!(index.update_file(&path, None), ContentUpdate::Unchanged);
        assert_eq!(index.update_file(&path, None), ContentUpdate::Unchanged);
        assert_eq!(index.record(&path), Some(&first));
        assert!(!index.has_changed(&path));
    }

    #[test]
    fn touch_without_byte_change_is_not_a_content_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "same").unwrap();
        let mut index = ContentIndex::load_in(dir.path());
        index.update_file(&path, None);
        let before = index.record(&path).cloned().unwrap();

        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        drop(file);
        fs::write(&path, "same").unwrap();

        assert_eq!(index.update_file(&path, None), ContentUpdate::Unchanged);
        let after = index.record(&path).unwrap();
        assert_eq!(after.hash, before.hash);
        assert_eq!(after.last_content_update, before.last_content_update);
    }

    #[test]
    fn overwrite_updates_hash_and_timestamp_together() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "v1").unwrap();
        let mut index = ContentIndex::load_in(dir.path());
        index.update_file(&path, None);
        let before = index.record(&path).cloned().unwrap();

        fs::write(&path, "v2").unwrap();
        assert!(index.has_changed(&path));
        assert_eq!(index.update_file(&path, None), ContentUpdate::Changed);

        let after = index.record(&path).unwrap();
        assert_ne!(after.hash, before.hash);
        assert!(after.last_content_update >= before.last_content_update);
        assert_eq!(after.path_history, before.path_history);
    }

    #[test]
    fn rename_moves_record_without_counting_as_change() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("notes.md");
        let new = dir.path().join("00-notes.md");
        fs::write(&old, "body").unwrap();
        let mut index = ContentIndex::load_in(dir.path());
        index.update_file(&old, None);
        let before = index.record(&old).cloned().unwrap();

        fs::rename(&old, &new).unwrap();
        assert_eq!(index.update_file(&new, Some(&old)), ContentUpdate::Unchanged);

        assert!(index.record(&old).is_none());
        let moved = index.record(&new).unwrap();
        assert_eq!(moved.hash, before.hash);
        assert_eq!(moved.last_content_update, before.last_content_update);
        assert_eq!(
            moved.path_history,
            vec![path_key(&old), path_key(&new)]
        );

        // Renaming back does not duplicate history entries.
        fs::rename(&new, &old).unwrap();
        index.update_file(&old, Some(&new));
        assert_eq!(index.record(&old).unwrap().path_history.len(), 2);
    }

    #[test]
    fn unreadable_file_leaves_index_untouched() {
        let dir = tempdir().unwrap();
        let mut index = ContentIndex::load_in(dir.path());
        let ghost = dir.path().join("ghost.md");
        assert_eq!(index.update_file(&ghost, None), ContentUpdate::Unreadable);
        assert!(index.is_empty());
        assert!(!index.has_changed(&ghost));
    }

    #[test]
    fn move_record_leaves_history_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        let staged = dir.path().join("notes.md.restage");
        fs::write(&path, "body").unwrap();
        let mut index = ContentIndex::load_in(dir.path());
        index.update_file(&path, None);

        assert!(index.move_record(&path, &staged));
        assert!(!index.move_record(&path, &staged));
        assert_eq!(
            index.record(&staged).unwrap().path_history,
            vec![path_key(&path)]
        );
    }

    #[test]
    fn remove_and_retain() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        let mut index = ContentIndex::load_in(dir.path());
        index.update_file(&a, None);
        index.update_file(&b, None);

        assert!(index.remove_file(&a).is_some());
        assert_eq!(index.len(), 1);
        assert_eq!(index.retain_paths(&[]), 1);
        assert!(index.is_empty());
    }

    #[test]
    fn persists_timestamps_in_utc() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "v1").unwrap();
        let mut index = ContentIndex::load_in(dir.path());
        index.update_file(&path, None);
        index.save().unwrap();

        let raw = fs::read_to_string(dir.path().join(CONTENT_INDEX_FILE)).unwrap();
        assert!(raw.contains("\"last_content_update\""));
        assert!(raw.contains('Z'));

        let reloaded = ContentIndex::load_in(dir.path());
        assert_eq!(reloaded.record(&path), index.record(&path));
    }
}
