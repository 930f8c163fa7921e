// backuptool/src/storage/folder_cache.rs
use std::collections::HashMap;

/// Folder path -> provider folder id, owned by one backend session.
///
/// Entries are never invalidated: folders are only ever added during a run.
#[derive(Debug, Default)]
pub struct FolderCache {
    ids: HashMap<String, String>,
}

impl FolderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical key for a folder path: no leading, trailing or doubled slashes.
    pub fn normalize(path: &str) -> String {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.ids.get(&Self::normalize(path)).map(String::as_str)
    }

    pub fn insert(&mut self, path: &str, id: impl Into<String>) {
        self.ids.insert(Self::normalize(path), id.into());
    }
}
