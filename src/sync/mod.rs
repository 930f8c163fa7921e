// backuptool/src/sync/mod.rs
pub(crate) mod logic;
pub(crate) mod plan;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::AppConfig;
use crate::storage::destination::Destination;
use crate::storage::open_backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub transferred: usize,
    pub skipped: usize,
}

/// Entry point for `sync <source> <destination>`: list, plan, transfer.
pub async fn run_sync_flow(app_config: &AppConfig, source: &str, destination: &str) -> Result<SyncSummary> {
    let source = Destination::parse(source).context("Invalid sync source")?;
    let destination = Destination::parse(destination).context("Invalid sync destination")?;

    let source_backend = open_backend(&source, app_config).await?;
    let destination_backend = open_backend(&destination, app_config).await?;

    println!("⚙️ Syncing {} to {}...", source, destination);

    let listing = source_backend
        .list()
        .await
        .with_context(|| format!("Failed to list {}", source))?;
    info!("{} item(s) at {}", listing.len(), source);

    let plan = plan::plan(&listing, destination_backend.as_ref())
        .await
        .with_context(|| format!("Failed to compare against {}", destination))?;

    let transferred = logic::execute_plan(&plan, source_backend.as_ref(), destination_backend.as_ref()).await?;

    Ok(SyncSummary {
        transferred,
        skipped: plan.skipped.len(),
    })
}
