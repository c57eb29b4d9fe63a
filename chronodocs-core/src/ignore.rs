use std::path::Path;

use glob::Pattern;
use tracing::warn;

/// Identity index document kept inside every watched directory.
pub const CREATION_INDEX_FILE: &str = ".creation_index.json";

/// Content index document kept inside every watched directory.
pub const CONTENT_INDEX_FILE: &str = ".update_index.json";

/// Change log file kept next to the documents; never ranked.
pub const REPORT_FILE: &str = "change_log.md";

/// Temp, lock and editor backup files that never take part in ranking.
pub const DEFAULT_TRANSIENT_PATTERNS: &[&str] =
    &["*.tmp", "*.lock", "~*", ".*.swp"];

/// Compiled set of file-name globs excluded from scans and event handling.
///
/// Matching is applied to the final path component only, with shell
/// (`fnmatch`) semantics.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    patterns: Vec<Pattern>,
}

impl IgnoreSet {
    /// Build from configured patterns plus the mandatory index/report names
    /// and the default transient patterns. Patterns that fail to compile are
    /// logged and dropped.
    pub fn new<I, S>(configured: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mandatory = [CREATION_INDEX_FILE, CONTENT_INDEX_FILE, REPORT_FILE];
        let mut patterns = Vec::new();

        let configured = configured
            .into_iter()
            .map(|raw| raw.as_ref().trim().trim_matches('/').to_string())
            .filter(|raw| !raw.is_empty());
        let builtin = mandatory
            .iter()
            .chain(DEFAULT_TRANSIENT_PATTERNS)
            .map(|raw| raw.to_string());

        for raw in configured.chain(builtin) {
            if patterns.iter().any(|p: &Pattern| p.as_str() == raw) {
                continue;
            }
            match Pattern::new(&raw) {
                Ok(pattern) => patterns.push(pattern),
                Err(err) => {
                    warn!(pattern = %raw, error = %err, "skipping invalid ignore pattern")
                }
            }
        }

        Self { patterns }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        self.patterns.iter().any(|pattern| pattern.matches(name))
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_report_files_are_always_ignored() {
        let set = IgnoreSet::default();
        assert!(set.is_ignored(Path::new("/p/.creation_index.json")));
        assert!(set.is_ignored(Path::new("/p/.update_index.json")));
        assert!(set.is_ignored(Path::new("/p/change_log.md")));
        assert!(!set.is_ignored(Path::new("/p/notes.md")));
    }

    #[test]
    fn transient_patterns_match_by_name() {
        let set = IgnoreSet::default();
        assert!(set.is_ignored(Path::new("draft.tmp")));
        assert!(set.is_ignored(Path::new("00-notes.md.lock")));
        assert!(set.is_ignored(Path::new("~notes.md")));
        assert!(set.is_ignored(Path::new(".notes.md.swp")));
        assert!(set.is_ignored(Path::new(".creation_index.abc123.tmp")));
    }

    #[test]
    fn configured_patterns_are_trimmed_and_deduplicated() {
        let set = IgnoreSet::new([".git/", "*.bak", "*.tmp", "  "]);
        assert!(set.is_ignored(Path::new("/repo/.git")));
        assert!(set.is_ignored(Path::new("notes.bak")));
        assert_eq!(set.patterns().filter(|p| *p == "*.tmp").count(), 1);
        assert!(!set.patterns().any(str::is_empty));
    }

    #[test]
    fn invalid_patterns_are_dropped() {
        let set = IgnoreSet::new(["[unclosed", "*.log"]);
        assert!(set.is_ignored(Path::new("run.log")));
        assert!(!set.patterns().any(|p| p == "[unclosed"));
    }
}
