// backuptool/src/backup/router.rs
use std::path::Path;
use tracing::{info, warn};

use super::producer::Artifact;
use super::run::BackupRun;
use crate::codec::{encrypt, BackupKey};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::storage::destination::Destination;
use crate::storage::{open_backend, StorageBackend, OCTET_STREAM};
use crate::utils::join_remote_path;

pub const ENCRYPTED_SUFFIX: &str = ".encrypted";

/// Chooses the key each destination's ciphertext is sealed with.
pub trait KeyResolver: Send + Sync {
    fn key_for(&self, destination: &Destination) -> &BackupKey;
}

/// One key for every destination.
pub struct SharedKey(pub BackupKey);

impl KeyResolver for SharedKey {
    fn key_for(&self, _destination: &Destination) -> &BackupKey {
        &self.0
    }
}

/// Expands the folder template for a run.
///
/// Placeholders: `{start_date}`, `{end_date}` and `{clear}`, the latter being
/// `data-cleared` or `data-retained`.
pub fn folder_for(run: &BackupRun, template: &str) -> String {
    let clear = if run.clear_archived {
        "data-cleared"
    } else {
        "data-retained"
    };
    template
        .replace("{start_date}", &run.start_date.to_string())
        .replace("{end_date}", &run.end_date.to_string())
        .replace("{clear}", clear)
}

pub fn remote_name(folder: &str, artifact: &Artifact) -> String {
    join_remote_path(folder, &format!("{}{}", artifact.file_name(), ENCRYPTED_SUFFIX))
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    /// (destination, remote name) per successful upload, in upload order.
    pub uploaded: Vec<(String, String)>,
    pub skipped_destinations: Vec<String>,
}

/// Sends every artifact to every destination, one destination at a time.
///
/// Unknown schemes are skipped with a warning. The first failed upload aborts
/// the run with [`AppError::Dispatch`]; uploads that already succeeded stay.
pub async fn dispatch(
    artifacts: &[Artifact],
    descriptors: &[String],
    run: &BackupRun,
    keys: &dyn KeyResolver,
    app_config: &AppConfig,
) -> Result<DispatchReport> {
    let mut report = DispatchReport::default();
    let mut destinations = Vec::new();

    for descriptor in descriptors {
        match Destination::parse(descriptor) {
            Ok(destination) => destinations.push(destination),
            Err(AppError::UnsupportedDestination(reason)) => {
                warn!("Unknown destination, skipping: {}", reason);
                println!("⚠️ Unknown destination: {}", reason);
                report.skipped_destinations.push(reason);
            }
            Err(e) => return Err(e),
        }
    }

    let folder = folder_for(run, &app_config.folder_format);

    for destination in &destinations {
        let label = destination.to_string();
        info!("Dispatching {} artifact(s) to {}", artifacts.len(), label);

        let backend = open_backend(destination, app_config)
            .await
            .map_err(|e| AppError::Dispatch {
                destination: label.clone(),
                artifact: "<all>".to_string(),
                reason: e.to_string(),
            })?;

        let uploaded = upload_artifacts(
            backend.as_ref(),
            &label,
            artifacts,
            &folder,
            keys.key_for(destination),
        )
        .await?;
        report
            .uploaded
            .extend(uploaded.into_iter().map(|name| (label.clone(), name)));
    }

    Ok(report)
}

/// Encrypts and uploads each artifact to one backend, in order.
///
/// Every artifact is sealed fresh for this destination. Buffers are released
/// as soon as they have been handed to the next stage.
pub async fn upload_artifacts(
    backend: &dyn StorageBackend,
    label: &str,
    artifacts: &[Artifact],
    folder: &str,
    key: &BackupKey,
) -> Result<Vec<String>> {
    let mut uploaded = Vec::with_capacity(artifacts.len());

    for artifact in artifacts {
        let dispatch_error = |reason: String| AppError::Dispatch {
            destination: label.to_string(),
            artifact: artifact.logical_name.clone(),
            reason,
        };

        info!(
            "Sealing {} ({}, {} bytes before compression)",
            artifact.logical_name, artifact.content_type, artifact.raw_size
        );
        let sealed = {
            let compressed = read_artifact(&artifact.local_path)
                .await
                .map_err(|e| dispatch_error(e.to_string()))?;
            encrypt(key, &compressed).map_err(|e| dispatch_error(e.to_string()))?
        };

        let name = remote_name(folder, artifact);
        backend
            .upload(&name, sealed, OCTET_STREAM)
            .await
            .map_err(|e| dispatch_error(format!("{:#}", e)))?;

        println!("📤 Uploaded {} to {}", name, label);
        uploaded.push(name);
    }

    Ok(uploaded)
}

async fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    Ok(tokio::fs::read(path).await?)
}
