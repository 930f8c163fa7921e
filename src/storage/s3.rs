// backuptool/src/storage/s3.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::primitives::ByteStream;
use tracing::{debug, info};

use super::{BackendKind, OCTET_STREAM, RemoteEntry, StorageBackend};
use crate::config::S3Settings;
use crate::utils::join_remote_path;

const DELIMITER: char = '/';

/// Flat key space in an S3-compatible bucket.
pub struct S3Backend {
    client: s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    /// Builds a client from `s3_storage` settings when present, otherwise from
    /// the default AWS provider chain (environment, profile, instance role).
    pub async fn connect(settings: Option<&S3Settings>, bucket: &str, prefix: &str) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .retry_config(RetryConfig::standard().with_max_attempts(10));

        if let Some(settings) = settings {
            if let Some(endpoint) = &settings.endpoint_url {
                loader = loader.endpoint_url(endpoint);
            }
            if let Some(region) = &settings.region {
                loader = loader.region(Region::new(region.clone()));
            }
            if let Some((access_key_id, secret_access_key)) = settings.static_credentials() {
                loader = loader.credentials_provider(s3::config::Credentials::new(
                    access_key_id,
                    secret_access_key,
                    None, // session_token
                    None, // expiry
                    "Static",
                ));
            }
        }

        let sdk_config = loader.load().await;
        S3Backend {
            client: s3::Client::new(&sdk_config),
            bucket: bucket.to_string(),
            prefix: prefix.trim_start_matches(DELIMITER).to_string(),
        }
    }

    fn key_for(&self, name: &str) -> String {
        join_remote_path(&self.prefix, name)
    }
}

/// Where the next listing page starts.
///
/// A prefix ending in the delimiter names a folder: its own placeholder key
/// is skipped by starting after the prefix. Any other prefix starts from the
/// beginning. Later pages resume after the last key already seen.
pub(crate) fn resume_after(prefix: &str, last_seen: Option<&str>) -> Option<String> {
    if prefix.ends_with(DELIMITER) {
        Some(last_seen.unwrap_or(prefix).to_string())
    } else {
        last_seen.map(str::to_string)
    }
}

/// Maps an object key to a name relative to `prefix`, treating the prefix as
/// a folder. Folder placeholders and keys outside the folder yield `None`.
pub(crate) fn relative_name(prefix: &str, key: &str) -> Option<String> {
    if key.ends_with(DELIMITER) {
        return None;
    }
    if prefix.is_empty() {
        return Some(key.to_string());
    }
    let folder = if prefix.ends_with(DELIMITER) {
        prefix.to_string()
    } else {
        format!("{}{}", prefix, DELIMITER)
    };
    key.strip_prefix(folder.as_str())
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

fn to_chrono(timestamp: Option<&s3::primitives::DateTime>) -> DateTime<Utc> {
    timestamp
        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut last_seen: Option<String> = None;
        let prefix = (!self.prefix.is_empty()).then(|| self.prefix.clone());

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(prefix.clone())
                .set_start_after(resume_after(&self.prefix, last_seen.as_deref()))
                .send()
                .await
                .with_context(|| format!("Failed to list objects in {}", self.describe()))?;

            let contents = page.contents();
            for object in contents {
                let Some(key) = object.key() else { continue };
                last_seen = Some(key.to_string());
                match relative_name(&self.prefix, key) {
                    Some(name) => entries.push(RemoteEntry {
                        name,
                        size: object.size().unwrap_or(0).max(0) as u64,
                        last_modified: to_chrono(object.last_modified()),
                    }),
                    None => debug!("Skipping key outside listing folder: {}", key),
                }
            }

            if contents.is_empty() || !page.is_truncated().unwrap_or(false) {
                break;
            }
        }

        Ok(entries)
    }

    async fn stat(&self, name: &str) -> Result<Option<RemoteEntry>> {
        let key = self.key_for(name);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(head) => Ok(Some(RemoteEntry {
                name: name.to_string(),
                size: head.content_length().unwrap_or(0).max(0) as u64,
                last_modified: to_chrono(head.last_modified()),
            })),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(anyhow::Error::new(service_err))
                        .with_context(|| format!("Failed to stat s3://{}/{}", self.bucket, key))
                }
            }
        }
    }

    async fn fetch(&self, name: &str) -> Result<(Vec<u8>, String)> {
        let key = self.key_for(name);
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("Failed to get object s3://{}/{}", self.bucket, key))?;

        let content_type = object.content_type().unwrap_or(OCTET_STREAM).to_string();
        let body = object
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", self.bucket, key))?;
        Ok((body.into_bytes().to_vec(), content_type))
    }

    async fn upload(&self, name: &str, content: Vec<u8>, content_type: &str) -> Result<String> {
        let key = self.key_for(name);
        info!("Uploading to S3: s3://{}/{}", self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(content))
            .send()
            .await
            .with_context(|| format!("Failed to upload to S3 bucket {} with key {}", self.bucket, key))?;

        Ok(key)
    }
}
