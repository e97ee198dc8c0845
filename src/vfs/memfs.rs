// src/vfs/memfs.rs
//! In-memory filesystem owned by a sandboxed execution context
//!
//! Paths are absolute, `/`-separated strings. Directories are implicit:
//! a directory exists while some file lives beneath it or after `mkdir_all`.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct MemFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `path` and all of its parents
    pub fn mkdir_all(&mut self, path: &str) {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.dirs.insert(current.clone());
        }
    }

    /// Write a file, creating parent directories
    pub fn write(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.mkdir_all(parent);
        }
        self.files.insert(path.to_string(), contents.into());
    }

    pub fn read(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Read a file as UTF-8 (lossy)
    pub fn read_to_string(&self, path: &str) -> Option<String> {
        self.read(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path.trim_end_matches('/'))
    }

    /// Remove `root` and everything below it
    pub fn remove_tree(&mut self, root: &str) {
        let root = root.trim_end_matches('/');
        let prefix = format!("{root}/");
        self.files
            .retain(|path, _| path != root && !path.starts_with(&prefix));
        self.dirs
            .retain(|path| path != root && !path.starts_with(&prefix));
    }

    /// Paths of all files below `root`
    pub fn list(&self, root: &str) -> Vec<String> {
        let prefix = format!("{}/", root.trim_end_matches('/'));
        self.files
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect()
    }
}
