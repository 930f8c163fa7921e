// backuptool/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::codec::BackupKey;
use crate::errors::AppError;
use crate::storage::destination::{Destination, Scheme};

pub const DEFAULT_FOLDER_FORMAT: &str = "{start_date}__{end_date}";
pub const DEFAULT_ARTIFACT_PREFIX: &str = "simple_backup";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDriveConfig {
    pub access_token: Option<String>,
    pub api_base: Option<String>,
    pub upload_base: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDropboxConfig {
    pub api_base: Option<String>,
    pub content_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonProducerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub filter_sensitive_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub backup_key: Option<String>,
    pub destinations: Option<Vec<String>>,
    pub folder_format: Option<String>,
    pub staging_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub artifact_prefix: Option<String>,
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default)]
    pub producers: HashMap<String, JsonProducerConfig>,
    #[serde(default)]
    pub clear_archived: bool,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub drive: Option<JsonDriveConfig>,
    pub dropbox: Option<JsonDropboxConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
}

impl S3Settings {
    /// Static credentials are used only when both halves are present.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriveSettings {
    pub access_token: Option<String>,
    pub api_base: String,
    pub upload_base: String,
}

#[derive(Debug, Clone)]
pub struct DropboxSettings {
    pub api_base: String,
    pub content_base: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup_key: Option<String>,
    pub destinations: Vec<String>,
    pub folder_format: String,
    pub staging_dir: PathBuf,
    pub host: String,
    pub artifact_prefix: String,
    pub apps: Vec<String>,
    pub producers: HashMap<String, JsonProducerConfig>,
    pub clear_archived: bool,
    pub s3: Option<S3Settings>,
    pub drive: DriveSettings,
    pub dropbox: DropboxSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig::from_raw(RawJsonConfig::default())
    }
}

impl AppConfig {
    /// Loads `config.json`-style settings, then applies environment overrides.
    /// A missing file is not an error: every setting can come from the environment.
    pub fn load(config_path: &Path) -> Result<Self> {
        let raw = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
            serde_json::from_str::<RawJsonConfig>(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            debug!(
                "No config file at {}, using environment and defaults",
                config_path.display()
            );
            RawJsonConfig::default()
        };

        let mut config = AppConfig::from_raw(raw);
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Self {
        let s3 = raw.s3_storage.map(|s3_raw| S3Settings {
            region: s3_raw.region.filter(|s| !s.is_empty()),
            access_key_id: s3_raw.access_key_id.filter(|s| !s.is_empty()),
            secret_access_key: s3_raw.secret_access_key.filter(|s| !s.is_empty()),
            endpoint_url: s3_raw.endpoint_url.filter(|s| !s.is_empty()),
        });

        let drive_raw = raw.drive.unwrap_or_default();
        let dropbox_raw = raw.dropbox.unwrap_or_default();

        AppConfig {
            backup_key: raw.backup_key.filter(|s| !s.trim().is_empty()),
            destinations: raw.destinations.unwrap_or_default(),
            folder_format: raw
                .folder_format
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_FOLDER_FORMAT.to_string()),
            staging_dir: raw.staging_dir.unwrap_or_else(env::temp_dir),
            host: raw.host.unwrap_or_else(|| "localhost".to_string()),
            artifact_prefix: raw
                .artifact_prefix
                .unwrap_or_else(|| DEFAULT_ARTIFACT_PREFIX.to_string()),
            apps: raw.apps,
            producers: raw.producers,
            clear_archived: raw.clear_archived,
            s3,
            drive: DriveSettings {
                access_token: drive_raw.access_token.filter(|s| !s.is_empty()),
                api_base: drive_raw
                    .api_base
                    .unwrap_or_else(|| "https://www.googleapis.com/drive/v3".to_string()),
                upload_base: drive_raw
                    .upload_base
                    .unwrap_or_else(|| "https://www.googleapis.com/upload/drive/v3".to_string()),
            },
            dropbox: DropboxSettings {
                api_base: dropbox_raw
                    .api_base
                    .unwrap_or_else(|| "https://api.dropboxapi.com/2".to_string()),
                content_base: dropbox_raw
                    .content_base
                    .unwrap_or_else(|| "https://content.dropboxapi.com/2".to_string()),
            },
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = env::var("BACKUP_KEY") {
            if !key.trim().is_empty() {
                self.backup_key = Some(key);
            }
        }
        if let Ok(list) = env::var("BACKUP_DESTINATIONS") {
            let parsed = parse_destination_list(&list);
            if !parsed.is_empty() {
                self.destinations = parsed;
            }
        }
        if let Ok(dir) = env::var("BACKUP_STAGING_DIR") {
            if !dir.is_empty() {
                self.staging_dir = PathBuf::from(dir);
            }
        }
        if let Ok(token) = env::var("DRIVE_ACCESS_TOKEN") {
            if !token.is_empty() {
                self.drive.access_token = Some(token);
            }
        }
    }

    /// Decodes the configured backup key. Absence is a configuration error.
    pub fn backup_key(&self) -> Result<BackupKey, AppError> {
        let encoded = self.backup_key.as_deref().ok_or_else(|| {
            AppError::Config(
                "Please define backup_key in the config file or BACKUP_KEY in the environment."
                    .to_string(),
            )
        })?;
        BackupKey::from_base64(encoded)
    }

    /// Destinations to back up to. An empty list is a configuration error.
    pub fn required_destinations(&self) -> Result<&[String], AppError> {
        if self.destinations.is_empty() {
            return Err(AppError::Config(
                "Please define destinations in the config file or BACKUP_DESTINATIONS in the environment."
                    .to_string(),
            ));
        }
        Ok(&self.destinations)
    }
}

fn parse_destination_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// One finding of [`check_settings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub id: &'static str,
    pub message: String,
    pub hint: String,
}

impl ConfigWarning {
    fn new(id: &'static str, message: impl Into<String>, hint: impl Into<String>) -> Self {
        ConfigWarning {
            id,
            message: message.into(),
            hint: hint.into(),
        }
    }
}

/// Static sanity checks over the loaded configuration. Nothing is contacted.
pub fn check_settings(config: &AppConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.destinations.is_empty() {
        warnings.push(ConfigWarning::new(
            "W001",
            "destinations parameter not defined",
            "Update configuration to include destinations.",
        ));
    }

    for descriptor in &config.destinations {
        let destination = match Destination::parse(descriptor) {
            Ok(destination) => destination,
            Err(e) => {
                warnings.push(ConfigWarning::new(
                    "W030",
                    format!("{}", e),
                    "Use one of file://, dropbox://, s3:// or drive:// destinations.",
                ));
                continue;
            }
        };

        match destination.scheme {
            Scheme::S3 => {
                let s3 = config.s3.as_ref();
                if s3.and_then(|s| s.access_key_id.as_ref()).is_none() {
                    warnings.push(ConfigWarning::new(
                        "W010",
                        "s3_storage.access_key_id parameter not defined",
                        "Update configuration to include s3_storage.access_key_id.",
                    ));
                }
                if s3.and_then(|s| s.secret_access_key.as_ref()).is_none() {
                    warnings.push(ConfigWarning::new(
                        "W011",
                        "s3_storage.secret_access_key parameter not defined",
                        "Update configuration to include s3_storage.secret_access_key.",
                    ));
                }
                if s3.and_then(|s| s.region.as_ref()).is_none() {
                    warnings.push(ConfigWarning::new(
                        "W012",
                        "s3_storage.region parameter not defined",
                        "Update configuration to include s3_storage.region.",
                    ));
                }
            }
            Scheme::Drive if config.drive.access_token.is_none() => {
                warnings.push(ConfigWarning::new(
                    "W020",
                    "drive.access_token parameter not defined",
                    "Update configuration to include drive.access_token or set DRIVE_ACCESS_TOKEN.",
                ));
            }
            _ => {}
        }
    }

    if config.backup_key.is_none() {
        warnings.push(ConfigWarning::new(
            "W002",
            "backup_key parameter not defined",
            "Update configuration to include backup_key or set BACKUP_KEY.",
        ));
    } else if let Err(e) = config.backup_key() {
        warnings.push(ConfigWarning::new(
            "W003",
            format!("{}", e),
            "Generate a key with `head -c 32 /dev/urandom | base64`.",
        ));
    }

    for app in &config.apps {
        if !config.producers.contains_key(app) {
            warnings.push(ConfigWarning::new(
                "W040",
                format!("app '{}' has no registered dump producer", app),
                "Add an entry under producers or remove the app from apps.",
            ));
        }
    }

    if !warnings.is_empty() {
        warn!("Configuration check produced {} warning(s)", warnings.len());
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_from(value: serde_json::Value) -> anyhow::Result<AppConfig> {
        let raw: RawJsonConfig = serde_json::from_value(value)?;
        Ok(AppConfig::from_raw(raw))
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let config = config_from(json!({}))?;
        assert_eq!(config.folder_format, DEFAULT_FOLDER_FORMAT);
        assert_eq!(config.artifact_prefix, DEFAULT_ARTIFACT_PREFIX);
        assert_eq!(config.staging_dir, env::temp_dir());
        assert!(config.destinations.is_empty());
        assert!(!config.clear_archived);
        Ok(())
    }

    #[test]
    fn test_full_config_parses() -> anyhow::Result<()> {
        let config = config_from(json!({
            "backup_key": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
            "destinations": ["file:///var/backups", "s3://bucket/prefix"],
            "folder_format": "{clear}/{start_date}",
            "staging_dir": "/srv/staging",
            "host": "example.org",
            "apps": ["auth"],
            "producers": {
                "auth": {"command": "dump-auth", "args": ["--json"], "filter_sensitive_args": ["--redact"]}
            },
            "s3_storage": {"region": "eu-west-1", "access_key_id": "", "secret_access_key": "s"}
        }))?;

        assert_eq!(config.destinations.len(), 2);
        assert_eq!(config.staging_dir, PathBuf::from("/srv/staging"));
        assert_eq!(config.producers["auth"].filter_sensitive_args, vec!["--redact"]);
        let s3 = config.s3.as_ref().unwrap();
        assert_eq!(s3.region.as_deref(), Some("eu-west-1"));
        assert!(s3.access_key_id.is_none(), "empty strings are treated as unset");
        assert!(s3.static_credentials().is_none());
        assert_eq!(config.backup_key()?.as_bytes(), &[0u8; 32]);
        Ok(())
    }

    #[test]
    fn test_missing_key_and_destinations_are_config_errors() -> anyhow::Result<()> {
        let config = config_from(json!({}))?;
        assert!(matches!(config.backup_key(), Err(AppError::Config(_))));
        assert!(matches!(config.required_destinations(), Err(AppError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_parse_destination_list() {
        assert_eq!(
            parse_destination_list(" file:///a , ,s3://b/c"),
            vec!["file:///a".to_string(), "s3://b/c".to_string()]
        );
    }

    #[test]
    fn test_check_settings_reports_missing_pieces() -> anyhow::Result<()> {
        let config = config_from(json!({
            "destinations": ["s3://bucket/", "drive://ROOT/", "foo://x"],
            "apps": ["auth"]
        }))?;
        let ids: Vec<&str> = check_settings(&config).iter().map(|w| w.id).collect();
        for expected in ["W010", "W011", "W012", "W020", "W030", "W002", "W040"] {
            assert!(ids.contains(&expected), "missing {} in {:?}", expected, ids);
        }
        assert!(!ids.contains(&"W001"));
        Ok(())
    }

    #[test]
    fn test_check_settings_clean_config() -> anyhow::Result<()> {
        let config = config_from(json!({
            "backup_key": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
            "destinations": ["file:///tmp/backups"]
        }))?;
        assert!(check_settings(&config).is_empty());
        Ok(())
    }

    #[test]
    fn test_check_settings_flags_bad_key() -> anyhow::Result<()> {
        let config = config_from(json!({
            "backup_key": "c2hvcnQ=",
            "destinations": ["file:///tmp/backups"]
        }))?;
        let ids: Vec<&str> = check_settings(&config).iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["W003"]);
        Ok(())
    }
}
