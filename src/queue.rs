use serde::{Deserialize, Serialize};

use crate::archive::EntryIndex;

/// Ordered set of entry paths selected for extraction.
///
/// Insertion order is kept for listing; membership is unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadQueue {
    paths: Vec<String>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every file of a freshly opened archive, in index order.
    pub fn seeded(index: &EntryIndex) -> Self {
        Self {
            paths: index.file_paths().map(str::to_string).collect(),
        }
    }

    /// Returns false if the path was already queued.
    pub fn add(&mut self, path: &str) -> bool {
        if self.contains(path) {
            return false;
        }
        self.paths.push(path.to_string());
        true
    }

    /// Returns false if the path was not queued.
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| p != path);
        self.paths.len() != before
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Drop every path that is no longer a file in `index`.
    pub fn retain_files_of(&mut self, index: &EntryIndex) {
        let mut seen = std::collections::HashSet::new();
        self.paths
            .retain(|p| index.contains_file(p) && seen.insert(p.clone()));
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.paths.clone()
    }
}

impl FromIterator<String> for DownloadQueue {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let mut queue = Self::new();
        for path in iter {
            queue.add(&path);
        }
        queue
    }
}
