// backuptool/src/backup/producer.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};
use which::which;

use super::run::BackupRun;
use crate::codec::compress;
use crate::config::{AppConfig, JsonProducerConfig};
use crate::errors::AppError;
use crate::utils::fs::write_file_atomically;
use crate::utils::slug::slugify;

pub const ARTIFACT_EXTENSION: &str = "json-dumpdata.gz";
pub const ARTIFACT_CONTENT_TYPE: &str = "application/gzip";

/// Source of raw export bytes for one named application.
#[async_trait]
pub trait DumpProducer: Send + Sync {
    async fn dump(&self, app: &str, run: &BackupRun) -> Result<Vec<u8>>;
}

/// Runs an external command and takes its stdout as the dump.
#[derive(Debug, Clone)]
pub struct CommandProducer {
    program: PathBuf,
    args: Vec<String>,
    filter_sensitive_args: Vec<String>,
}

impl CommandProducer {
    /// Resolves the configured command on `PATH`.
    pub fn from_config(config: &JsonProducerConfig) -> Result<Self> {
        let program = which(&config.command)
            .with_context(|| format!("executable {} not found in PATH", config.command))?;
        Ok(CommandProducer {
            program,
            args: config.args.clone(),
            filter_sensitive_args: config.filter_sensitive_args.clone(),
        })
    }

    fn command_args(&self, run: &BackupRun) -> Vec<String> {
        let mut args = self.args.clone();
        if run.filter_sensitive {
            args.extend(self.filter_sensitive_args.iter().cloned());
        }
        args
    }
}

#[async_trait]
impl DumpProducer for CommandProducer {
    async fn dump(&self, app: &str, run: &BackupRun) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .args(self.command_args(run))
            .env("BACKUP_APP", app)
            .env("BACKUP_START", run.range_start_label())
            .env("BACKUP_END", run.range_end_label())
            .env("BACKUP_FILTER_SENSITIVE", run.filter_sensitive.to_string())
            .env("BACKUP_CLEAR_ARCHIVED", run.clear_archived.to_string())
            .output()
            .await
            .with_context(|| format!("Failed to execute {} for {}", self.program.display(), app))?;

        if !output.status.success() {
            anyhow::bail!(
                "Dump command {} for {} failed with status {}: {}",
                self.program.display(),
                app,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

/// Name -> producer table built once at startup. Names whose producer could
/// not be set up are remembered with the reason.
#[derive(Default)]
pub struct ProducerRegistry {
    producers: HashMap<String, Arc<dyn DumpProducer>>,
    unavailable: HashMap<String, String>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(app_config: &AppConfig) -> Self {
        let mut registry = Self::new();
        for (name, config) in &app_config.producers {
            match CommandProducer::from_config(config) {
                Ok(producer) => registry.register(name, Arc::new(producer)),
                Err(e) => {
                    registry.unavailable.insert(name.clone(), format!("{:#}", e));
                }
            }
        }
        registry
    }

    pub fn register(&mut self, name: &str, producer: Arc<dyn DumpProducer>) {
        self.unavailable.remove(name);
        self.producers.insert(name.to_string(), producer);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DumpProducer>, AppError> {
        self.producers.get(name).cloned().ok_or_else(|| AppError::Producer {
            name: name.to_string(),
            reason: self
                .unavailable
                .get(name)
                .cloned()
                .unwrap_or_else(|| "no dump producer registered".to_string()),
        })
    }

    /// Every known name, registered or not, in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .producers
            .keys()
            .chain(self.unavailable.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// One compressed, not yet encrypted, export waiting in staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub logical_name: String,
    pub local_path: PathBuf,
    pub content_type: String,
    pub raw_size: u64,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.logical_name.clone())
    }
}

/// Where and under which names artifacts are staged.
#[derive(Debug, Clone)]
pub struct Staging {
    pub dir: PathBuf,
    pub prefix: String,
    pub host: String,
}

impl Staging {
    pub fn from_config(app_config: &AppConfig) -> Self {
        Staging {
            dir: app_config.staging_dir.clone(),
            prefix: app_config.artifact_prefix.clone(),
            host: app_config.host.clone(),
        }
    }

    /// `<prefix>_<host>_<slug>.json-dumpdata.gz`
    pub fn file_name(&self, app: &str) -> String {
        format!("{}_{}_{}.{}", self.prefix, self.host, slugify(app), ARTIFACT_EXTENSION)
    }
}

/// Dumps, compresses and stages every app in order.
///
/// Apps without a usable producer are logged and skipped. A producer that runs
/// but fails aborts the run.
pub async fn produce(
    run: &BackupRun,
    apps: &[String],
    registry: &ProducerRegistry,
    staging: &Staging,
) -> Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();

    for app in apps {
        let producer = match registry.get(app) {
            Ok(producer) => producer,
            Err(e) => {
                warn!("Skipping {}: {}", app, e);
                println!("⚠️ Skipping {}: {}", app, e);
                continue;
            }
        };

        info!("Backing up {}...", app);

        let (compressed, raw_size) = {
            let raw = producer
                .dump(app, run)
                .await
                .with_context(|| format!("Dump producer for {} failed", app))?;
            let raw_size = raw.len() as u64;
            (compress(&raw)?, raw_size)
        };

        let local_path = staging.dir.join(staging.file_name(app));
        write_staged(local_path.clone(), compressed).await?;

        info!("Staged {} ({} bytes raw) at {}", app, raw_size, local_path.display());
        artifacts.push(Artifact {
            logical_name: app.clone(),
            local_path,
            content_type: ARTIFACT_CONTENT_TYPE.to_string(),
            raw_size,
        });
    }

    Ok(artifacts)
}

async fn write_staged(path: PathBuf, compressed: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_file_atomically(&path, &compressed))
        .await
        .context("Staging write task panicked")?
}

/// Removes staged artifacts once every destination has accepted them.
pub fn cleanup_artifacts(artifacts: &[Artifact]) -> Result<()> {
    for artifact in artifacts {
        remove_if_present(&artifact.local_path)?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove staged artifact {}", path.display())),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingProducer, StaticProducer};
    use super::*;
    use crate::codec::decompress;
    use chrono::NaiveDate;

    fn run() -> BackupRun {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        BackupRun::from_options(None, None, false, false, day).unwrap()
    }

    fn staging(dir: &Path) -> Staging {
        Staging {
            dir: dir.to_path_buf(),
            prefix: "simple_backup".to_string(),
            host: "example.org".to_string(),
        }
    }

    #[test]
    fn test_artifact_file_name() {
        let staging = staging(Path::new("/tmp"));
        assert_eq!(
            staging.file_name("Auth Users"),
            "simple_backup_example.org_auth-users.json-dumpdata.gz"
        );
    }

    #[tokio::test]
    async fn test_produce_stages_compressed_dump() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut registry = ProducerRegistry::new();
        registry.register("auth", Arc::new(StaticProducer(b"data".to_vec())));

        let artifacts = produce(&run(), &["auth".to_string()], &registry, &staging(dir.path())).await?;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].raw_size, 4);
        assert_eq!(artifacts[0].file_name(), "simple_backup_example.org_auth.json-dumpdata.gz");

        let staged = std::fs::read(&artifacts[0].local_path)?;
        assert_eq!(decompress(&staged)?, b"data");

        cleanup_artifacts(&artifacts)?;
        assert!(!artifacts[0].local_path.exists());
        cleanup_artifacts(&artifacts)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_producer_is_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut registry = ProducerRegistry::new();
        registry.register("auth", Arc::new(StaticProducer(b"x".to_vec())));

        let apps = vec!["missing".to_string(), "auth".to_string()];
        let artifacts = produce(&run(), &apps, &registry, &staging(dir.path())).await?;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].logical_name, "auth");
        assert!(matches!(registry.get("missing"), Err(AppError::Producer { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_producer_aborts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut registry = ProducerRegistry::new();
        registry.register("broken", Arc::new(FailingProducer));

        let result = produce(&run(), &["broken".to_string()], &registry, &staging(dir.path())).await;
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_registry_records_unresolvable_commands() {
        let mut config = AppConfig::default();
        config.producers.insert(
            "ghost".to_string(),
            JsonProducerConfig {
                command: "definitely-not-a-real-dump-command-xyz".to_string(),
                args: vec![],
                filter_sensitive_args: vec![],
            },
        );
        let registry = ProducerRegistry::from_config(&config);
        assert_eq!(registry.names(), vec!["ghost".to_string()]);
        match registry.get("ghost") {
            Err(e @ AppError::Producer { .. }) => {
                let message = e.to_string();
                assert_eq!(message.matches("unavailable").count(), 1, "{}", message);
                assert!(message.contains("definitely-not-a-real-dump-command-xyz not found in PATH"));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_producer_captures_stdout() -> Result<()> {
        let producer = CommandProducer::from_config(&JsonProducerConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "printf '%s:%s' \"$BACKUP_APP\" \"$BACKUP_START\"".to_string()],
            filter_sensitive_args: vec!["--redact".to_string()],
        })?;
        let output = producer.dump("auth", &run()).await?;
        assert_eq!(output, b"auth:2024-01-01T00:00:00");

        let mut filtered = run();
        filtered.filter_sensitive = true;
        assert_eq!(
            producer.command_args(&filtered).last().map(String::as_str),
            Some("--redact")
        );
        Ok(())
    }
}
