// backuptool/src/storage/memory.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use super::{BackendKind, RemoteEntry, StorageBackend};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

/// Object store kept in memory, for tests of the router and reconciler.
#[derive(Default)]
pub struct MemoryBackend {
    pub objects: Mutex<BTreeMap<String, StoredObject>>,
    /// Uploads of these names fail.
    pub failing: HashSet<String>,
    pub uploads: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing(names: &[&str]) -> Self {
        MemoryBackend {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn insert(&self, name: &str, content: &[u8], last_modified: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            name.to_string(),
            StoredObject {
                content: content.to_vec(),
                content_type: super::guess_content_type(name).to_string(),
                last_modified,
            },
        );
    }

    pub fn content(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(name).map(|o| o.content.clone())
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(name, object)| RemoteEntry {
                name: name.clone(),
                size: object.content.len() as u64,
                last_modified: object.last_modified,
            })
            .collect())
    }

    async fn stat(&self, name: &str) -> Result<Option<RemoteEntry>> {
        Ok(self.objects.lock().unwrap().get(name).map(|object| RemoteEntry {
            name: name.to_string(),
            size: object.content.len() as u64,
            last_modified: object.last_modified,
        }))
    }

    async fn fetch(&self, name: &str) -> Result<(Vec<u8>, String)> {
        let objects = self.objects.lock().unwrap();
        let object = objects.get(name).with_context(|| format!("{} not found", name))?;
        Ok((object.content.clone(), object.content_type.clone()))
    }

    async fn upload(&self, name: &str, content: Vec<u8>, content_type: &str) -> Result<String> {
        if self.failing.contains(name) {
            anyhow::bail!("simulated upload failure for {}", name);
        }
        self.uploads.lock().unwrap().push(name.to_string());
        self.objects.lock().unwrap().insert(
            name.to_string(),
            StoredObject {
                content,
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
        Ok(name.to_string())
    }
}
