// backuptool/src/sync/logic.rs
use tracing::info;

use super::plan::SyncPlan;
use crate::errors::{AppError, Result};
use crate::storage::StorageBackend;

/// Copies every planned entry from `source` to `destination`, in plan order.
///
/// The first failed fetch or upload aborts the whole run with
/// [`AppError::Transfer`] naming the item. Returns the number of transfers.
pub async fn execute_plan(
    plan: &SyncPlan,
    source: &dyn StorageBackend,
    destination: &dyn StorageBackend,
) -> Result<usize> {
    let total = plan.transfer.len();

    for (index, entry) in plan.transfer.iter().enumerate() {
        let transfer_error = |e: anyhow::Error| AppError::Transfer {
            item: entry.name.clone(),
            reason: format!("{:#}", e),
        };

        let (content, content_type) = source.fetch(&entry.name).await.map_err(transfer_error)?;
        destination
            .upload(&entry.name, content, &content_type)
            .await
            .map_err(transfer_error)?;

        println!("Synced {}... ({} of {})", entry.name, index + 1, total);
    }

    info!(
        "Transferred {} item(s) from {} to {}, {} already current",
        total,
        source.describe(),
        destination.describe(),
        plan.skipped.len()
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;
    use crate::storage::RemoteEntry;
    use chrono::Utc;

    fn planned(names: &[&str]) -> SyncPlan {
        SyncPlan {
            transfer: names
                .iter()
                .map(|name| RemoteEntry {
                    name: name.to_string(),
                    size: 1,
                    last_modified: Utc::now(),
                })
                .collect(),
            skipped: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_execute_copies_content() -> anyhow::Result<()> {
        let source = MemoryBackend::new();
        source.insert("a.txt", b"alpha", Utc::now());
        source.insert("dir/b.txt", b"beta", Utc::now());
        let destination = MemoryBackend::new();

        let count = execute_plan(&planned(&["a.txt", "dir/b.txt"]), &source, &destination).await?;
        assert_eq!(count, 2);
        assert_eq!(destination.content("dir/b.txt"), Some(b"beta".to_vec()));
        assert_eq!(destination.uploaded(), vec!["a.txt", "dir/b.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_first_failure_aborts_with_item() -> anyhow::Result<()> {
        let source = MemoryBackend::new();
        for name in ["1", "2", "3"] {
            source.insert(name, b"x", Utc::now());
        }
        let destination = MemoryBackend::with_failing(&["2"]);

        let result = execute_plan(&planned(&["1", "2", "3"]), &source, &destination).await;
        match result {
            Err(AppError::Transfer { item, .. }) => assert_eq!(item, "2"),
            other => panic!("expected transfer error, got {:?}", other),
        }
        assert_eq!(destination.uploaded(), vec!["1"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_source_item_is_a_transfer_error() {
        let source = MemoryBackend::new();
        let destination = MemoryBackend::new();
        let result = execute_plan(&planned(&["ghost"]), &source, &destination).await;
        assert!(matches!(result, Err(AppError::Transfer { item, .. }) if item == "ghost"));
    }
}
