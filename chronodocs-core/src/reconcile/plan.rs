use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::index::FileKey;

/// Suffix given to a file moved out of the way when its current name is the
/// target of an earlier rename in the same pass. A file left with it (its own
/// rename was skipped) gets it stripped on the next pass.
pub(crate) const RESTAGE_SUFFIX: &str = ".restage";

/// Widest rank prefix recognised when stripping; ranks up to 999.
const MAX_PREFIX_DIGITS: usize = 3;

/// Strip a leading rank prefix (two or three ASCII digits and a dash) if the
/// name continues past it.
///
/// The check is purely syntactic: a document legitimately named `12-rules.md`
/// is indistinguishable from one carrying rank 12.
pub fn strip_rank_prefix(name: &str) -> &str {
    let digits = name.bytes().take_while(u8::is_ascii_digit).count();
    if (2..=MAX_PREFIX_DIGITS).contains(&digits)
        && name.as_bytes().get(digits) == Some(&b'-')
        && name.len() > digits + 1
    {
        &name[digits + 1..]
    } else {
        name
    }
}

fn rank_prefix(rank: usize) -> String {
    format!("{rank:02}-")
}

/// Canonical name for a file holding `rank`. A name already carrying the
/// rank's prefix is canonical as is.
pub fn ranked_name(rank: usize, current_name: &str) -> String {
    let base = current_name
        .strip_suffix(RESTAGE_SUFFIX)
        .filter(|base| !base.is_empty())
        .unwrap_or(current_name);
    let prefix = rank_prefix(rank);
    if base.starts_with(&prefix) && base.len() > prefix.len() {
        return base.to_string();
    }
    format!("{prefix}{}", strip_rank_prefix(base))
}

/// A file present both on disk and in the identity index, with its sort key.
#[derive(Debug, Clone)]
pub struct RankedFile {
    pub key: FileKey,
    pub path: PathBuf,
    pub recorded_ctime: f64,
    pub inode: u64,
}

impl RankedFile {
    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Ascending `(recorded_ctime, inode)`, then file name so the order is total.
pub fn rank_order(a: &RankedFile, b: &RankedFile) -> Ordering {
    a.recorded_ctime
        .total_cmp(&b.recorded_ctime)
        .then(a.inode.cmp(&b.inode))
        .then_with(|| a.file_name().cmp(&b.file_name()))
}

/// One intended rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRename {
    pub rank: usize,
    pub from: PathBuf,
    pub to: PathBuf,
    #[serde(skip)]
    pub key: FileKey,
}

impl PlannedRename {
    pub fn from_name(&self) -> String {
        display_name(&self.from)
    }

    pub fn to_name(&self) -> String {
        display_name(&self.to)
    }
}

/// Ordered renames for one pass. Files already carrying their canonical name
/// do not appear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenamePlan {
    entries: Vec<PlannedRename>,
}

impl RenamePlan {
    /// Sort `files` into rank order and compute target names.
    pub fn build(mut files: Vec<RankedFile>) -> Self {
        files.sort_by(rank_order);

        let entries = files
            .into_iter()
            .enumerate()
            .filter_map(|(rank, file)| {
                let current = file.file_name();
                let target = ranked_name(rank, &current);
                (target != current).then(|| PlannedRename {
                    rank,
                    to: file.path.with_file_name(&target),
                    from: file.path,
                    key: file.key,
                })
            })
            .collect();

        Self { entries }
    }

    pub fn entries(&self) -> &[PlannedRename] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
