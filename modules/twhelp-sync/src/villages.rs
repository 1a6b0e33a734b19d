//! Removal of villages that no longer exist upstream.

use anyhow::{Context, Result};
use twhelp_common::Server;
use twhelp_store::Store;

use crate::loader::SnapshotLoader;
use crate::matcher::SortedById;

/// Hard-delete stored villages missing from the current village list.
pub async fn delete_non_existent_villages(
    store: &dyn Store,
    loader: &dyn SnapshotLoader,
    server: &Server,
) -> Result<u64> {
    let mut villages = loader
        .load_villages()
        .await
        .with_context(|| format!("{}: couldn't load villages", server.key))?;
    let current = SortedById::sort(&mut villages);

    let mut tx = store.begin(&server.key).await?;
    let vanished: Vec<i32> = tx
        .village_ids()
        .await?
        .into_iter()
        .filter(|id| !current.contains(*id))
        .collect();

    let deleted = tx.delete_villages(&vanished).await?;
    tx.commit().await?;

    tracing::info!(server = %server.key, deleted, "Non-existent villages deleted");
    Ok(deleted)
}
