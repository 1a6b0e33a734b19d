//! Server selection for the fan-out tasks.
//!
//! A fan-out task turns one trigger into one task per server. This module
//! decides which servers; building and submitting the tasks is the queue's job.

use anyhow::{Context, Result};
use twhelp_common::{Server, Version};
use twhelp_store::{ServerFilter, Store};

use crate::loader::DirectoryLoader;

/// A server and the URL its world data is served from.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerTarget {
    pub url: String,
    pub server: Server,
}

impl From<Server> for ServerTarget {
    fn from(server: Server) -> Self {
        Self {
            url: server.url(),
            server,
        }
    }
}

/// Stored servers matching `filter`.
pub async fn targets(store: &dyn Store, filter: &ServerFilter) -> Result<Vec<ServerTarget>> {
    Ok(store
        .servers(filter)
        .await?
        .into_iter()
        .map(ServerTarget::from)
        .collect())
}

/// Bring the stored server list of `version` in line with its directory.
///
/// Listed servers (minus the version's special servers) get a partition and
/// are marked open; stored servers of the version that are no longer listed
/// are closed. Returns the listed servers.
pub async fn sync_version_servers(
    store: &dyn Store,
    directory: &dyn DirectoryLoader,
    version: &Version,
) -> Result<Vec<ServerTarget>> {
    tracing::info!(host = %version.host, "Loading servers");
    let listings = directory
        .load_servers(&version.host)
        .await
        .with_context(|| format!("{}: couldn't load servers", version.host))?;

    let mut listed = Vec::new();
    for listing in listings {
        if version.special_servers.contains(&listing.key) {
            continue;
        }
        if let Err(e) = store.provision_partition(&listing.key).await {
            tracing::warn!(server = %listing.key, error = %e, "Couldn't create the schema");
            continue;
        }
        listed.push(ServerTarget {
            url: listing.url,
            server: Server::open(listing.key, version.clone()),
        });
    }

    let servers: Vec<Server> = listed.iter().map(|t| t.server.clone()).collect();
    store
        .upsert_open_servers(&servers)
        .await
        .context("couldn't insert/update servers")?;

    let keys: Vec<String> = servers.iter().map(|s| s.key.clone()).collect();
    let closed = store
        .close_unlisted_servers(&version.code, &keys)
        .await
        .context("couldn't update server statuses")?;

    tracing::info!(
        host = %version.host,
        open = listed.len(),
        closed,
        "Servers have been loaded"
    );
    Ok(listed)
}
