// backuptool/src/sync/plan.rs
use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::storage::{BackendKind, RemoteEntry, StorageBackend};

/// True when `source` must be (re)sent: missing at the destination, a
/// different size, or modified strictly after the destination copy.
///
/// Only the source side's freshness is considered; changes made directly at
/// the destination are not detected.
pub fn is_stale(source: &RemoteEntry, existing: Option<&RemoteEntry>) -> bool {
    match existing {
        None => true,
        Some(remote) => source.size != remote.size || source.last_modified > remote.last_modified,
    }
}

#[derive(Debug, Default)]
pub struct SyncPlan {
    pub transfer: Vec<RemoteEntry>,
    /// Entries already current at the destination.
    pub skipped: Vec<RemoteEntry>,
}

/// Decides which source entries need transferring. Performs no transfers.
///
/// Flat destinations are listed once and matched by name. Hierarchical ones
/// are asked per entry, which resolves each parent folder through the
/// backend's folder cache.
pub async fn plan(source_listing: &[RemoteEntry], destination: &dyn StorageBackend) -> Result<SyncPlan> {
    let known: Option<HashMap<String, RemoteEntry>> = match destination.kind() {
        BackendKind::Hierarchical => None,
        BackendKind::Local | BackendKind::ObjectStore => Some(
            destination
                .list()
                .await?
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect(),
        ),
    };

    let mut plan = SyncPlan::default();
    for entry in source_listing {
        let existing = match &known {
            Some(known) => known.get(&entry.name).cloned(),
            None => destination.stat(&entry.name).await?,
        };

        if is_stale(entry, existing.as_ref()) {
            debug!("{} needs transfer", entry.name);
            plan.transfer.push(entry.clone());
        } else {
            info!("Skipping {}: destination copy is current", entry.name);
            plan.skipped.push(entry.clone());
        }
    }

    Ok(plan)
}
