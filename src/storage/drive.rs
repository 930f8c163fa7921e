// backuptool/src/storage/drive.rs
//! Drive-like hierarchical store.
//!
//! Objects live in a folder tree addressed by provider ids, so every
//! slash-separated name must first be resolved to the id of its parent folder.
//! Resolution walks the path one component at a time and records every
//! intermediate folder in the session's [`FolderCache`]. Uploads create missing
//! folders on the way; reads only look them up.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::folder_cache::FolderCache;
use super::{BackendKind, OCTET_STREAM, RemoteEntry, StorageBackend};
use crate::config::DriveSettings;
use crate::errors::AppError;
use crate::utils::{join_remote_path, split_parent};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Deeper paths are rejected rather than walked.
pub const MAX_FOLDER_DEPTH: usize = 64;

const FILE_FIELDS: &str = "nextPageToken, files(id, name, size, parents, modifiedTime, mimeType)";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    /// Drive reports sizes as decimal strings.
    pub fn size_bytes(&self) -> u64 {
        self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    fn to_entry(&self, name: String) -> RemoteEntry {
        RemoteEntry {
            name,
            size: self.size_bytes(),
            last_modified: self.modified_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// Provider calls the hierarchical backend needs.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// First child of `parent_id` called `name`, restricted to folders if asked.
    async fn find_child(&self, parent_id: &str, name: &str, folders_only: bool) -> Result<Option<DriveFile>>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String>;

    async fn list_children(&self, parent_id: &str) -> Result<Vec<DriveFile>>;

    async fn create_file(&self, parent_id: &str, name: &str, content: Vec<u8>, mime_type: &str) -> Result<String>;

    async fn update_file(&self, file_id: &str, content: Vec<u8>, mime_type: &str) -> Result<String>;

    async fn download(&self, file_id: &str) -> Result<(Vec<u8>, String)>;
}

/// Drive v3 REST API with a bearer access token.
pub struct DriveHttpApi {
    client: Client,
    token: String,
    api_base: String,
    upload_base: String,
}

impl DriveHttpApi {
    pub fn new(settings: &DriveSettings, token: String) -> Result<Self, AppError> {
        Ok(DriveHttpApi {
            client: Client::builder().build()?,
            token,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            upload_base: settings.upload_base.trim_end_matches('/').to_string(),
        })
    }

    async fn query_files(&self, query: &str, page_size: u32, page_token: Option<&str>) -> Result<FileList> {
        let mut params = vec![
            ("q", query.to_string()),
            ("pageSize", page_size.to_string()),
            ("fields", FILE_FIELDS.to_string()),
            ("supportsAllDrives", "true".to_string()),
            ("includeItemsFromAllDrives", "true".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(&self.token)
            .query(&params)
            .send()
            .await
            .context("Drive file query failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Drive file query failed: HTTP {}: {}", status, body);
        }

        response.json().await.context("Failed to decode Drive file list")
    }

    async fn created_id(response: reqwest::Response, what: &str) -> Result<String> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Drive {} failed: HTTP {}: {}", what, status, body);
        }
        let created: CreatedFile = response
            .json()
            .await
            .with_context(|| format!("Failed to decode Drive {} response", what))?;
        Ok(created.id)
    }
}

/// Quotes a value for use inside a Drive search query string literal.
pub(crate) fn quote_query_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub(crate) fn child_query(parent_id: &str, name: Option<&str>, folders_only: bool) -> String {
    let mut query = format!("{} in parents and trashed = false", quote_query_value(parent_id));
    if let Some(name) = name {
        query.push_str(&format!(" and name = {}", quote_query_value(name)));
    }
    if folders_only {
        query.push_str(&format!(" and mimeType = {}", quote_query_value(FOLDER_MIME_TYPE)));
    }
    query
}

/// A part separator that does not occur anywhere in `content`.
pub(crate) fn multipart_boundary(content: &[u8]) -> String {
    (0u32..)
        .map(|attempt| format!("backuptool_part_{:08x}", attempt))
        .find(|candidate| !content.windows(candidate.len()).any(|w| w == candidate.as_bytes()))
        .unwrap_or_else(|| "backuptool_part".to_string())
}

pub(crate) fn multipart_related_body(
    metadata: &serde_json::Value,
    content: Vec<u8>,
    mime_type: &str,
    boundary: &str,
) -> Vec<u8> {
    let head = format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {mime}\r\n\r\n",
        b = boundary,
        meta = metadata,
        mime = mime_type,
    );
    let tail = format!("\r\n--{}--\r\n", boundary);

    let mut body = Vec::with_capacity(head.len() + content.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(&content);
    drop(content);
    body.extend_from_slice(tail.as_bytes());
    body
}

#[async_trait]
impl DriveApi for DriveHttpApi {
    async fn find_child(&self, parent_id: &str, name: &str, folders_only: bool) -> Result<Option<DriveFile>> {
        let query = child_query(parent_id, Some(name), folders_only);
        let page = self.query_files(&query, 100, None).await?;
        Ok(page.files.into_iter().next())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/files", self.api_base))
            .bearer_auth(&self.token)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&json!({
                "name": name,
                "parents": [parent_id],
                "mimeType": FOLDER_MIME_TYPE,
            }))
            .send()
            .await
            .with_context(|| format!("Drive folder creation for {} failed", name))?;
        Self::created_id(response, "folder creation").await
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<DriveFile>> {
        let query = child_query(parent_id, None, false);
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.query_files(&query, 1000, page_token.as_deref()).await?;
            children.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(children)
    }

    /// Metadata and content travel in one `multipart/related` request.
    async fn create_file(&self, parent_id: &str, name: &str, content: Vec<u8>, mime_type: &str) -> Result<String> {
        let metadata = json!({
            "name": name,
            "parents": [parent_id],
            "mimeType": mime_type,
        });
        let boundary = multipart_boundary(&content);
        let body = multipart_related_body(&metadata, content, mime_type, &boundary);

        let response = self
            .client
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "multipart"), ("fields", "id"), ("supportsAllDrives", "true")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .with_context(|| format!("Drive file upload for {} failed", name))?;
        Self::created_id(response, "file upload").await
    }

    async fn update_file(&self, file_id: &str, content: Vec<u8>, mime_type: &str) -> Result<String> {
        let response = self
            .client
            .patch(format!("{}/files/{}", self.upload_base, file_id))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "media"), ("fields", "id"), ("supportsAllDrives", "true")])
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(content)
            .send()
            .await
            .with_context(|| format!("Drive content upload for {} failed", file_id))?;
        Self::created_id(response, "content upload").await
    }

    async fn download(&self, file_id: &str) -> Result<(Vec<u8>, String)> {
        let response = self
            .client
            .get(format!("{}/files/{}", self.api_base, file_id))
            .bearer_auth(&self.token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await
            .with_context(|| format!("Drive download of {} failed", file_id))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Drive download of {} failed: HTTP {}: {}", file_id, status, body);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(OCTET_STREAM)
            .to_string();
        let bytes = response.bytes().await.context("Failed to read Drive download body")?;
        Ok((bytes.to_vec(), content_type))
    }
}

/// Hierarchical backend over any [`DriveApi`], with a per-session folder cache.
pub struct HierarchicalBackend<A: DriveApi> {
    api: A,
    root_id: String,
    base: String,
    cache: Mutex<FolderCache>,
}

impl<A: DriveApi> HierarchicalBackend<A> {
    pub fn new(api: A, root_id: String, base: &str) -> Self {
        HierarchicalBackend {
            api,
            root_id,
            base: FolderCache::normalize(base),
            cache: Mutex::new(FolderCache::new()),
        }
    }

    /// Resolves (creating as needed) the folder at `path` below the backend
    /// base and returns its id.
    pub async fn resolve_folder(&self, path: &str) -> Result<String> {
        self.walk_folders(path, true)
            .await?
            .with_context(|| format!("Drive folder {} could not be resolved", path))
    }

    /// Like [`resolve_folder`](Self::resolve_folder) but never creates
    /// anything; `None` when some component does not exist.
    pub async fn lookup_folder(&self, path: &str) -> Result<Option<String>> {
        self.walk_folders(path, false).await
    }

    /// Starts from the deepest cached ancestor and walks the remaining
    /// components iteratively, caching each folder it passes through.
    async fn walk_folders(&self, path: &str, create: bool) -> Result<Option<String>> {
        let full_path = join_remote_path(&self.base, path);
        let components: Vec<&str> = full_path.split('/').filter(|c| !c.is_empty()).collect();

        if components.len() > MAX_FOLDER_DEPTH {
            anyhow::bail!(
                "Folder path has {} components, more than the supported {}: {}",
                components.len(),
                MAX_FOLDER_DEPTH,
                full_path
            );
        }
        if components.is_empty() {
            return Ok(Some(self.root_id.clone()));
        }

        let mut cache = self.cache.lock().await;

        let mut parent_id = self.root_id.clone();
        let mut resolved = 0;
        for depth in (1..=components.len()).rev() {
            if let Some(id) = cache.get(&components[..depth].join("/")) {
                parent_id = id.to_string();
                resolved = depth;
                break;
            }
        }

        for depth in resolved..components.len() {
            let name = components[depth];
            let folder_path = components[..=depth].join("/");

            let folder_id = match self.api.find_child(&parent_id, name, true).await? {
                Some(existing) => existing.id,
                None if create => {
                    debug!("Creating Drive folder {}", folder_path);
                    self.api
                        .create_folder(&parent_id, name)
                        .await
                        .with_context(|| format!("Failed to create Drive folder {}", folder_path))?
                }
                None => return Ok(None),
            };

            cache.insert(&folder_path, folder_id.clone());
            parent_id = folder_id;
        }

        Ok(Some(parent_id))
    }

    async fn find_file(&self, name: &str) -> Result<Option<DriveFile>> {
        let (parent, leaf) = split_parent(name);
        let Some(folder_id) = self.lookup_folder(parent).await? else {
            return Ok(None);
        };
        Ok(self
            .api
            .find_child(&folder_id, leaf, false)
            .await?
            .filter(|file| !file.is_folder()))
    }

    #[cfg(test)]
    pub(crate) async fn cached_folder(&self, path: &str) -> Option<String> {
        self.cache.lock().await.get(path).map(str::to_string)
    }
}

#[async_trait]
impl<A: DriveApi> StorageBackend for HierarchicalBackend<A> {
    fn describe(&self) -> String {
        format!("drive://{}/{}", self.root_id, self.base)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Hierarchical
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let Some(base_id) = self.lookup_folder("").await? else {
            debug!("Drive base folder {} does not exist yet", self.base);
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        let mut pending = VecDeque::from([(base_id, String::new())]);

        while let Some((folder_id, folder_path)) = pending.pop_front() {
            for child in self.api.list_children(&folder_id).await? {
                let child_path = join_remote_path(&folder_path, &child.name);
                if child.is_folder() {
                    self.cache
                        .lock()
                        .await
                        .insert(&join_remote_path(&self.base, &child_path), child.id.clone());
                    pending.push_back((child.id, child_path));
                } else {
                    entries.push(child.to_entry(child_path));
                }
            }
        }

        Ok(entries)
    }

    async fn stat(&self, name: &str) -> Result<Option<RemoteEntry>> {
        Ok(self
            .find_file(name)
            .await?
            .map(|file| file.to_entry(name.to_string())))
    }

    async fn fetch(&self, name: &str) -> Result<(Vec<u8>, String)> {
        let file = self
            .find_file(name)
            .await?
            .with_context(|| format!("{} not found in {}", name, self.describe()))?;
        self.api.download(&file.id).await
    }

    async fn upload(&self, name: &str, content: Vec<u8>, content_type: &str) -> Result<String> {
        let (parent, leaf) = split_parent(name);
        if leaf.is_empty() {
            anyhow::bail!("Cannot upload to an empty file name");
        }
        let folder_id = self.resolve_folder(parent).await?;
        info!("Uploading to Drive: {}", join_remote_path(&self.base, name));

        match self.api.find_child(&folder_id, leaf, false).await? {
            Some(existing) if !existing.is_folder() => {
                self.api.update_file(&existing.id, content, content_type).await
            }
            _ => self.api.create_file(&folder_id, leaf, content, content_type).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub struct FakeState {
        pub next_id: usize,
        /// id -> (parent id, file)
        pub nodes: HashMap<String, (String, DriveFile)>,
        pub contents: HashMap<String, Vec<u8>>,
        pub find_calls: usize,
        pub create_folder_calls: usize,
        pub create_file_calls: usize,
        pub update_calls: usize,
    }

    /// In-memory Drive that counts provider calls.
    #[derive(Default)]
    pub struct FakeDriveApi {
        pub state: StdMutex<FakeState>,
    }

    impl FakeDriveApi {
        pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
            let mut state = self.state.lock().unwrap();
            Self::insert_node(&mut state, parent_id, name, FOLDER_MIME_TYPE, None)
        }

        pub fn add_file(&self, parent_id: &str, name: &str, content: &[u8], modified: DateTime<Utc>) -> String {
            let mut state = self.state.lock().unwrap();
            let id = Self::insert_node(&mut state, parent_id, name, OCTET_STREAM, Some(content.len()));
            if let Some((_, file)) = state.nodes.get_mut(&id) {
                file.modified_time = Some(modified);
            }
            state.contents.insert(id.clone(), content.to_vec());
            id
        }

        pub fn calls(&self) -> (usize, usize) {
            let state = self.state.lock().unwrap();
            (state.find_calls, state.create_folder_calls)
        }

        fn insert_node(state: &mut FakeState, parent_id: &str, name: &str, mime: &str, size: Option<usize>) -> String {
            state.next_id += 1;
            let id = format!("id-{}", state.next_id);
            let file = DriveFile {
                id: id.clone(),
                name: name.to_string(),
                size: size.map(|s| s.to_string()),
                modified_time: Some(Utc::now()),
                mime_type: Some(mime.to_string()),
            };
            state.nodes.insert(id.clone(), (parent_id.to_string(), file));
            id
        }
    }

    #[async_trait]
    impl DriveApi for FakeDriveApi {
        async fn find_child(&self, parent_id: &str, name: &str, folders_only: bool) -> Result<Option<DriveFile>> {
            let mut state = self.state.lock().unwrap();
            state.find_calls += 1;
            let mut matches: Vec<&DriveFile> = state
                .nodes
                .values()
                .filter(|(parent, file)| parent == parent_id && file.name == name && (!folders_only || file.is_folder()))
                .map(|(_, file)| file)
                .collect();
            matches.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(matches.first().map(|f| (*f).clone()))
        }

        async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.create_folder_calls += 1;
            Ok(Self::insert_node(&mut state, parent_id, name, FOLDER_MIME_TYPE, None))
        }

        async fn list_children(&self, parent_id: &str) -> Result<Vec<DriveFile>> {
            let state = self.state.lock().unwrap();
            let mut children: Vec<DriveFile> = state
                .nodes
                .values()
                .filter(|(parent, _)| parent == parent_id)
                .map(|(_, file)| file.clone())
                .collect();
            children.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(children)
        }

        async fn create_file(&self, parent_id: &str, name: &str, content: Vec<u8>, mime_type: &str) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.create_file_calls += 1;
            let id = Self::insert_node(&mut state, parent_id, name, mime_type, Some(content.len()));
            state.contents.insert(id.clone(), content);
            Ok(id)
        }

        async fn update_file(&self, file_id: &str, content: Vec<u8>, _mime_type: &str) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.update_calls += 1;
            let len = content.len();
            state.contents.insert(file_id.to_string(), content);
            let (_, file) = state
                .nodes
                .get_mut(file_id)
                .with_context(|| format!("no such file {}", file_id))?;
            file.size = Some(len.to_string());
            file.modified_time = Some(Utc::now());
            Ok(file_id.to_string())
        }

        async fn download(&self, file_id: &str) -> Result<(Vec<u8>, String)> {
            let state = self.state.lock().unwrap();
            let content = state
                .contents
                .get(file_id)
                .cloned()
                .with_context(|| format!("no content for {}", file_id))?;
            Ok((content, OCTET_STREAM.to_string()))
        }
    }
}
