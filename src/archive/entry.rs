use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::ArchiveFormat;

/// One path record inside an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub path: String,
    pub is_directory: bool,
    #[serde(default)]
    pub uncompressed_size: Option<u64>,
    pub source_format: ArchiveFormat,
}

/// Sorted, junk-free, path-unique listing of an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryIndex {
    entries: Vec<Entry>,
}

impl EntryIndex {
    /// Normalize separators, drop archiver sidecar files, keep the first
    /// record of any duplicated path and sort by path.
    pub fn build(raw: impl IntoIterator<Item = Entry>) -> Self {
        let mut seen = HashSet::new();
        let mut entries: Vec<Entry> = raw
            .into_iter()
            .map(|mut e| {
                e.path = normalize_path(&e.path);
                e
            })
            .filter(|e| !e.path.is_empty() && !is_junk(&e.path))
            .filter(|e| seen.insert(e.path.clone()))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// True if `path` names a file (not a directory) in this index.
    pub fn contains_file(&self, path: &str) -> bool {
        self.get(path).is_some_and(|e| !e.is_directory)
    }

    /// Paths of every non-directory entry, in index order.
    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.path.as_str())
    }

    /// Entries whose path matches a glob pattern (`*` and `?`).
    pub fn matching<'a>(&'a self, pattern: &'a str) -> impl Iterator<Item = &'a Entry> {
        self.entries
            .iter()
            .filter(move |e| glob_match(pattern, &e.path))
    }

    pub fn total_size(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|e| e.uncompressed_size)
            .sum()
    }
}

impl<'a> IntoIterator for &'a EntryIndex {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// POSIX separators, no leading `./`.
pub fn normalize_path(raw: &str) -> String {
    let path = raw.replace('\\', "/");
    let mut path = path.as_str();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.to_string()
}

/// Metadata that archivers and desktop shells inject next to real content.
pub fn is_junk(path: &str) -> bool {
    path.split('/').filter(|s| !s.is_empty()).any(|segment| {
        segment == "__MACOSX"
            || segment == ".DS_Store"
            || segment == ".Spotlight-V100"
            || segment == ".Trashes"
            || segment == ".fseventsd"
            || segment.starts_with("._")
            || segment.eq_ignore_ascii_case("Thumbs.db")
            || segment.eq_ignore_ascii_case("desktop.ini")
    })
}

/// Glob matching supporting `*` (any run of characters) and `?` (exactly one).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> Entry {
        Entry {
            path: path.to_string(),
            is_directory: path.ends_with('/'),
            uncompressed_size: Some(1),
            source_format: ArchiveFormat::Zip,
        }
    }

    #[test]
    fn sorts_and_interleaves_directories() {
        let index = EntryIndex::build(["b.txt", "a/", "a/z.txt", "A.txt"].map(file));
        let paths: Vec<_> = index.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["A.txt", "a/", "a/z.txt", "b.txt"]);
    }

    #[test]
    fn drops_sidecar_files() {
        let index = EntryIndex::build(
            [
                "__MACOSX/",
                "__MACOSX/._photo.jpg",
                "photo.jpg",
                "dir/.DS_Store",
                "dir/Thumbs.db",
                "dir/._resource",
                "dir/real.txt",
            ]
            .map(file),
        );
        let paths: Vec<_> = index.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["dir/real.txt", "photo.jpg"]);
        assert!(index.iter().all(|e| !is_junk(&e.path)));
    }

    #[test]
    fn first_duplicate_wins_after_normalization() {
        let mut second = file("dir/x.txt");
        second.uncompressed_size = Some(99);
        let index = EntryIndex::build([file("dir\\x.txt"), second]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("dir/x.txt").unwrap().uncompressed_size, Some(1));
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let once = EntryIndex::build(["./c", "b/", "b/a", "a"].map(file));
        let twice = EntryIndex::build(once.iter().cloned());
        assert_eq!(once, twice);
    }

    #[test]
    fn file_paths_skip_directories() {
        let index = EntryIndex::build(["d/", "d/f", "g"].map(file));
        assert_eq!(index.file_paths().collect::<Vec<_>>(), ["d/f", "g"]);
        assert!(index.contains_file("d/f"));
        assert!(!index.contains_file("d/"));
        assert!(!index.contains_file("missing"));
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(glob_match("docs/*", "docs/a/b.md"));
        assert!(!glob_match("*.txt", "readme.md"));
    }
}
