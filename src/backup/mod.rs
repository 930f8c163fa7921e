// backuptool/src/backup/mod.rs
pub(crate) mod producer;
pub(crate) mod router;
pub(crate) mod run;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::AppConfig;
use producer::{cleanup_artifacts, produce, ProducerRegistry, Staging};
use router::{dispatch, DispatchReport, SharedKey};
use run::{split_windows, BackupRun};

/// Entry point for `run-incremental-backup`.
pub async fn run_incremental_backup(
    app_config: &AppConfig,
    registry: &ProducerRegistry,
    run: &BackupRun,
) -> Result<DispatchReport> {
    perform_backup(app_config, registry, run).await
}

/// Entry point for `run-batch-backup`: one incremental backup per window.
pub async fn run_batch_backup(
    app_config: &AppConfig,
    registry: &ProducerRegistry,
    start: NaiveDate,
    end: NaiveDate,
    window_days: u32,
    filter_sensitive: bool,
) -> Result<Vec<DispatchReport>> {
    let windows = split_windows(start, end, window_days)?;
    let mut reports = Vec::with_capacity(windows.len());

    for (index, (window_start, window_end)) in windows.iter().enumerate() {
        println!(
            "🗓 Window {} of {}: {} to {}",
            index + 1,
            windows.len(),
            window_start,
            window_end
        );
        let run = BackupRun::from_options(
            Some(*window_start),
            Some(*window_end),
            filter_sensitive,
            app_config.clear_archived,
            *window_end,
        )?;
        let report = perform_backup(app_config, registry, &run)
            .await
            .with_context(|| format!("Backup of window {} to {} failed", window_start, window_end))?;
        reports.push(report);
    }

    Ok(reports)
}

/// Produce, dispatch, then clean up.
///
/// Key and destinations are checked before any producer runs. Staged artifacts
/// are only removed after every destination accepted them.
pub async fn perform_backup(
    app_config: &AppConfig,
    registry: &ProducerRegistry,
    run: &BackupRun,
) -> Result<DispatchReport> {
    let key = app_config.backup_key()?;
    let destinations = app_config.required_destinations()?;

    println!("🚀 Starting backup for {} to {}...", run.start_date, run.end_date);

    let apps = if app_config.apps.is_empty() {
        registry.names()
    } else {
        app_config.apps.clone()
    };
    let staging = Staging::from_config(app_config);

    let artifacts = produce(run, &apps, registry, &staging)
        .await
        .context("Failed to produce backup artifacts")?;

    if artifacts.is_empty() {
        warn!("No artifacts produced for {} to {}", run.start_date, run.end_date);
        return Ok(DispatchReport::default());
    }

    let keys = SharedKey(key);
    let report = match dispatch(&artifacts, destinations, run, &keys, app_config).await {
        Ok(report) => report,
        Err(e) => {
            for artifact in &artifacts {
                warn!("Leaving {} in staging for retry", artifact.local_path.display());
            }
            return Err(e.into());
        }
    };

    cleanup_artifacts(&artifacts)?;
    info!(
        "Backup for {} to {} finished: {} upload(s)",
        run.start_date,
        run.end_date,
        report.uploaded.len()
    );
    Ok(report)
}
