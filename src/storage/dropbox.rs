// backuptool/src/storage/dropbox.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{guess_content_type, BackendKind, RemoteEntry, StorageBackend, OCTET_STREAM};
use crate::config::DropboxSettings;
use crate::errors::AppError;
use crate::utils::join_remote_path;

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<DropboxEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct DropboxEntry {
    #[serde(rename = ".tag")]
    tag: String,
    path_display: Option<String>,
    size: Option<u64>,
    server_modified: Option<DateTime<Utc>>,
    id: Option<String>,
}

/// Dropbox folder reached through the HTTP API with a long-lived token.
pub struct DropboxBackend {
    client: Client,
    token: String,
    root: String,
    api_base: String,
    content_base: String,
}

impl DropboxBackend {
    pub fn new(settings: &DropboxSettings, token: String, root: &str) -> Result<Self, AppError> {
        Ok(DropboxBackend {
            client: Client::builder().build()?,
            token,
            root: root.trim_matches('/').to_string(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            content_base: settings.content_base.trim_end_matches('/').to_string(),
        })
    }

    fn dropbox_path(&self, name: &str) -> String {
        let joined = join_remote_path(&self.root, name);
        if joined.is_empty() {
            String::new()
        } else {
            format!("/{}", joined)
        }
    }

    /// Path of `entry` below the root, keeping the provider's display case.
    ///
    /// Dropbox paths are case-insensitive, so root segments are compared
    /// lowercased one by one; lowercasing may change a segment's byte length.
    fn relative_name(&self, entry: &DropboxEntry) -> Option<String> {
        let display = entry.path_display.as_deref()?;
        let mut segments = display.split('/').filter(|s| !s.is_empty());
        for root_segment in self.root.split('/').filter(|s| !s.is_empty()) {
            if segments.next()?.to_lowercase() != root_segment.to_lowercase() {
                return None;
            }
        }
        let rest = segments.collect::<Vec<_>>().join("/");
        (!rest.is_empty()).then_some(rest)
    }

    async fn rpc(&self, endpoint: &str, body: serde_json::Value) -> Result<Response> {
        self.client
            .post(format!("{}/{}", self.api_base, endpoint))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Dropbox request {} failed", endpoint))
    }
}

/// The `Dropbox-API-Arg` header must be ASCII: non-ASCII characters in the
/// JSON argument are written as `\uXXXX` escapes.
pub(crate) fn header_safe_json(value: &serde_json::Value) -> String {
    let mut escaped = String::new();
    for c in value.to_string().chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    escaped
}

async fn error_text(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("HTTP {}: {}", status, body)
}

fn is_not_found(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT && body.contains("not_found")
}

#[async_trait]
impl StorageBackend for DropboxBackend {
    fn describe(&self) -> String {
        format!("dropbox://<token>/{}", self.root)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut response = self
            .rpc(
                "files/list_folder",
                json!({ "path": self.dropbox_path(""), "recursive": true }),
            )
            .await?;

        loop {
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                if is_not_found(status, &body) {
                    return Ok(entries);
                }
                anyhow::bail!("Dropbox listing of {} failed: HTTP {}: {}", self.describe(), status, body);
            }

            let page: ListFolderResult = response
                .json()
                .await
                .context("Failed to decode Dropbox folder listing")?;

            for entry in &page.entries {
                if entry.tag != "file" {
                    continue;
                }
                if let Some(name) = self.relative_name(entry) {
                    entries.push(RemoteEntry {
                        name,
                        size: entry.size.unwrap_or(0),
                        last_modified: entry.server_modified.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    });
                }
            }

            if !page.has_more {
                break;
            }
            response = self
                .rpc("files/list_folder/continue", json!({ "cursor": page.cursor }))
                .await?;
        }

        Ok(entries)
    }

    async fn stat(&self, name: &str) -> Result<Option<RemoteEntry>> {
        let response = self
            .rpc("files/get_metadata", json!({ "path": self.dropbox_path(name) }))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_not_found(status, &body) {
                return Ok(None);
            }
            anyhow::bail!("Dropbox metadata lookup for {} failed: HTTP {}: {}", name, status, body);
        }

        let entry: DropboxEntry = response
            .json()
            .await
            .context("Failed to decode Dropbox metadata")?;
        if entry.tag != "file" {
            return Ok(None);
        }
        Ok(Some(RemoteEntry {
            name: name.to_string(),
            size: entry.size.unwrap_or(0),
            last_modified: entry.server_modified.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }))
    }

    async fn fetch(&self, name: &str) -> Result<(Vec<u8>, String)> {
        let arg = header_safe_json(&json!({ "path": self.dropbox_path(name) }));
        let response = self
            .client
            .post(format!("{}/files/download", self.content_base))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .send()
            .await
            .with_context(|| format!("Dropbox download of {} failed", name))?;

        if !response.status().is_success() {
            anyhow::bail!("Dropbox download of {} failed: {}", name, error_text(response).await);
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read Dropbox download body for {}", name))?;
        Ok((bytes.to_vec(), guess_content_type(name).to_string()))
    }

    async fn upload(&self, name: &str, content: Vec<u8>, _content_type: &str) -> Result<String> {
        let path = self.dropbox_path(name);
        info!("Uploading to Dropbox: {}", path);

        let arg = header_safe_json(&json!({
            "path": path,
            "mode": "overwrite",
            "autorename": false,
            "mute": true,
        }));
        let response = self
            .client
            .post(format!("{}/files/upload", self.content_base))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
            .body(content)
            .send()
            .await
            .with_context(|| format!("Dropbox upload of {} failed", path))?;

        if !response.status().is_success() {
            anyhow::bail!("Dropbox upload of {} failed: {}", path, error_text(response).await);
        }

        let metadata: DropboxEntry = response
            .json()
            .await
            .context("Failed to decode Dropbox upload result")?;
        Ok(metadata.id.unwrap_or(path))
    }
}
