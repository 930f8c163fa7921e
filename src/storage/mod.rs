//! Storage backends addressed by destination URL.
//!
//! Every backend is opened from a [`Destination`] and exposes the same small
//! surface: `list`, `stat`, `fetch` and `upload`. Names passed in and out are
//! slash-separated paths relative to the destination root.

pub mod destination;
pub mod dropbox;
pub mod drive;
pub mod folder_cache;
pub mod local;
pub mod s3;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use destination::{Destination, Scheme};

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Metadata for one object already present at a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    ObjectStore,
    Hierarchical,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Human-readable locator, safe to log.
    fn describe(&self) -> String;

    fn kind(&self) -> BackendKind;

    /// Every object under the destination root.
    async fn list(&self) -> anyhow::Result<Vec<RemoteEntry>>;

    /// Metadata for a single object, `None` when absent.
    async fn stat(&self, name: &str) -> anyhow::Result<Option<RemoteEntry>>;

    /// Full object content and its content type.
    async fn fetch(&self, name: &str) -> anyhow::Result<(Vec<u8>, String)>;

    /// Stores `content` under `name`, returning a backend-specific identifier.
    async fn upload(&self, name: &str, content: Vec<u8>, content_type: &str) -> anyhow::Result<String>;
}

/// Single dispatch point from destination scheme to backend implementation.
/// Each call builds a fresh session, so folder caches never outlive one run.
pub async fn open_backend(
    destination: &Destination,
    app_config: &AppConfig,
) -> Result<Box<dyn StorageBackend>> {
    match destination.scheme {
        Scheme::File => {
            let root = destination
                .local_root()
                .cloned()
                .ok_or_else(|| AppError::Storage(format!("No local root for {}", destination)))?;
            Ok(Box::new(local::LocalBackend::new(root)))
        }
        Scheme::S3 => {
            let backend = s3::S3Backend::connect(
                app_config.s3.as_ref(),
                &destination.host,
                &destination.path_prefix,
            )
            .await;
            Ok(Box::new(backend))
        }
        Scheme::Dropbox => {
            let token = destination.credentials.clone().ok_or_else(|| {
                AppError::Config(format!("No Dropbox access token in {}", destination))
            })?;
            Ok(Box::new(dropbox::DropboxBackend::new(
                &app_config.dropbox,
                token,
                &destination.path_prefix,
            )?))
        }
        Scheme::Drive => {
            let token = app_config.drive.access_token.clone().ok_or_else(|| {
                AppError::Config(
                    "Please define drive.access_token in the config file or DRIVE_ACCESS_TOKEN in the environment."
                        .to_string(),
                )
            })?;
            let api = drive::DriveHttpApi::new(&app_config.drive, token)?;
            Ok(Box::new(drive::HierarchicalBackend::new(
                api,
                destination.host.clone(),
                &destination.path_prefix,
            )))
        }
    }
}

/// Content type derived from the file name, enough for Drive/Dropbox metadata.
pub fn guess_content_type(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".encrypted") {
        OCTET_STREAM
    } else if lower.ends_with(".gz") {
        "application/gzip"
    } else if lower.ends_with(".json") {
        "application/json"
    } else if lower.ends_with(".txt") || lower.ends_with(".csv") {
        "text/plain"
    } else {
        OCTET_STREAM
    }
}
