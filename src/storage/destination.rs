// backuptool/src/storage/destination.rs
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    File,
    Dropbox,
    S3,
    Drive,
}

impl Scheme {
    fn from_url_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "file" => Some(Scheme::File),
            "dropbox" => Some(Scheme::Dropbox),
            "s3" => Some(Scheme::S3),
            "drive" | "google-drive" | "google_drive" => Some(Scheme::Drive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::File => "file",
            Scheme::Dropbox => "dropbox",
            Scheme::S3 => "s3",
            Scheme::Drive => "drive",
        }
    }
}

/// A parsed `scheme://host-or-bucket/path` destination descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct Destination {
    pub scheme: Scheme,
    /// Bucket name, Drive root folder id, or empty for `file://`.
    pub host: String,
    /// Path component without the leading slash. For `file://` this is the
    /// absolute directory path instead.
    pub path_prefix: String,
    /// Provider secret carried inside the descriptor (the Dropbox token).
    pub credentials: Option<String>,
    local_root: Option<PathBuf>,
}

impl Destination {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let url = Url::parse(descriptor.trim())
            .map_err(|e| AppError::InvalidInput(format!("Invalid destination {}: {}", redact(descriptor), e)))?;

        let scheme = Scheme::from_url_scheme(url.scheme())
            .ok_or_else(|| AppError::UnsupportedDestination(redact(descriptor)))?;

        let host = url.host_str().unwrap_or_default().to_string();

        let destination = match scheme {
            Scheme::File => {
                let root = url.to_file_path().map_err(|_| {
                    AppError::InvalidInput(format!("file destination must be an absolute path: {}", descriptor))
                })?;
                Destination {
                    scheme,
                    host: String::new(),
                    path_prefix: root.to_string_lossy().to_string(),
                    credentials: None,
                    local_root: Some(root),
                }
            }
            Scheme::Dropbox => {
                if host.is_empty() {
                    return Err(AppError::InvalidInput(
                        "dropbox destination requires an access token as host".to_string(),
                    ));
                }
                Destination {
                    scheme,
                    host: String::new(),
                    path_prefix: url.path().trim_start_matches('/').to_string(),
                    credentials: Some(host),
                    local_root: None,
                }
            }
            Scheme::S3 | Scheme::Drive => {
                if host.is_empty() {
                    return Err(AppError::InvalidInput(format!(
                        "{} destination requires a {} as host: {}",
                        scheme.as_str(),
                        if scheme == Scheme::S3 { "bucket name" } else { "root folder id" },
                        descriptor
                    )));
                }
                Destination {
                    scheme,
                    host,
                    path_prefix: url.path().trim_start_matches('/').to_string(),
                    credentials: None,
                    local_root: None,
                }
            }
        };

        Ok(destination)
    }

    pub fn local_root(&self) -> Option<&PathBuf> {
        self.local_root.as_ref()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::File => write!(f, "file://{}", self.path_prefix),
            Scheme::Dropbox => write!(f, "dropbox://<token>/{}", self.path_prefix),
            Scheme::S3 | Scheme::Drive => {
                write!(f, "{}://{}/{}", self.scheme.as_str(), self.host, self.path_prefix)
            }
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Destination({})", self)
    }
}

/// Strips anything that looks like a secret from a raw descriptor before it is
/// logged. Dropbox descriptors carry the token as host.
pub fn redact(descriptor: &str) -> String {
    if let Some(rest) = descriptor.trim().strip_prefix("dropbox://") {
        let path = rest.split_once('/').map(|(_, p)| p).unwrap_or("");
        return format!("dropbox://<token>/{}", path);
    }
    descriptor.trim().to_string()
}
