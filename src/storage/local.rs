// backuptool/src/storage/local.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use super::{guess_content_type, BackendKind, RemoteEntry, StorageBackend};
use crate::utils::fs::write_file_atomically;

/// Plain directory on the local filesystem.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: PathBuf) -> Self {
        LocalBackend { root }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        name.split('/')
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn entry_for(&self, name: String, path: &Path) -> Result<RemoteEntry> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to read metadata for {}", path.display()))?;
        let modified = metadata
            .modified()
            .with_context(|| format!("No modification time for {}", path.display()))?;
        Ok(RemoteEntry {
            name,
            size: metadata.len(),
            last_modified: DateTime::<Utc>::from(modified),
        })
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk directory: {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).with_context(|| {
                format!(
                    "Failed to strip prefix {} from {}",
                    self.root.display(),
                    entry.path().display()
                )
            })?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(self.entry_for(name, entry.path())?);
        }
        Ok(entries)
    }

    async fn stat(&self, name: &str) -> Result<Option<RemoteEntry>> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(None);
        }
        self.entry_for(name.to_string(), &path).map(Some)
    }

    async fn fetch(&self, name: &str) -> Result<(Vec<u8>, String)> {
        let path = self.path_for(name);
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok((content, guess_content_type(name).to_string()))
    }

    async fn upload(&self, name: &str, content: Vec<u8>, _content_type: &str) -> Result<String> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                info!("Creating folder for archive storage: {}", parent.display());
            }
        }
        info!("Writing to filesystem: {}", path.display());

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_file_atomically(&target, &content))
            .await
            .context("Filesystem write task panicked")??;

        Ok(path.to_string_lossy().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_creates_tree_and_lists() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = LocalBackend::new(dir.path().to_path_buf());

        let id = backend
            .upload("2024-01-01__2024-01-07/a.gz.encrypted", b"abc".to_vec(), "application/octet-stream")
            .await?;
        assert!(id.ends_with("a.gz.encrypted"));
        backend.upload("top.txt", b"12345".to_vec(), "text/plain").await?;

        let entries = backend.list().await?;
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["2024-01-01__2024-01-07/a.gz.encrypted", "top.txt"]);
        assert_eq!(entries[1].size, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_is_idempotent_overwrite() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = LocalBackend::new(dir.path().to_path_buf());

        backend.upload("x/y.bin", b"one".to_vec(), "").await?;
        backend.upload("x/y.bin", b"two!".to_vec(), "").await?;

        let (content, _) = backend.fetch("x/y.bin").await?;
        assert_eq!(content, b"two!");
        assert_eq!(backend.stat("x/y.bin").await?.map(|e| e.size), Some(4));
        Ok(())
    }

    #[tokio::test]
    async fn test_stat_missing_and_traversal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = LocalBackend::new(dir.path().join("root"));
        assert!(backend.stat("nope.txt").await?.is_none());
        assert!(backend.list().await?.is_empty());
        assert_eq!(backend.path_for("../../etc/passwd"), dir.path().join("root/etc/passwd"));
        Ok(())
    }
}
