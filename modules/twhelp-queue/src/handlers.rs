//! Wiring from tasks to the sync jobs.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use twhelp_store::{ServerFilter, Store};
use twhelp_sync::{
    delete_non_existent_villages, sync_server_data, sync_version_servers, targets,
    update_server_ennoblements, update_server_history, update_server_stats, vacuum_server_data,
    LoaderFactory, ServerTarget,
};

use crate::registry::{no_follow_ups, FollowUps, TaskHandler, TaskRegistry};
use crate::task::{Task, TaskKind};

/// Runs every task kind against one store and one set of loaders.
pub struct Jobs {
    store: Arc<dyn Store>,
    loaders: Arc<dyn LoaderFactory>,
    history_retention_days: i64,
}

impl Jobs {
    pub fn new(
        store: Arc<dyn Store>,
        loaders: Arc<dyn LoaderFactory>,
        history_retention_days: i64,
    ) -> Self {
        Self {
            store,
            loaders,
            history_retention_days,
        }
    }

    /// A registry with this handler behind every task kind.
    pub fn into_registry(self) -> TaskRegistry {
        let jobs: Arc<dyn TaskHandler> = Arc::new(self);
        let mut registry = TaskRegistry::new();
        for kind in TaskKind::ALL {
            registry.register(kind, jobs.clone());
        }
        registry
    }

    async fn fan_out<F>(&self, filter: ServerFilter, to_task: F) -> Result<FollowUps>
    where
        F: Fn(ServerTarget) -> Task + Send + 'static,
    {
        let targets = targets(self.store.as_ref(), &filter).await?;
        Ok(Box::new(targets.into_iter().map(to_task)))
    }
}

#[async_trait]
impl TaskHandler for Jobs {
    async fn handle(&self, task: Task) -> Result<FollowUps> {
        let store = self.store.as_ref();
        let now = Utc::now();

        match task {
            // --- Fan-out ---
            Task::LoadVersionsAndUpdateServerData => {
                let versions = store.versions().await?;
                Ok(Box::new(
                    versions
                        .into_iter()
                        .map(|version| Task::LoadServersAndUpdateData { version }),
                ))
            }
            Task::LoadServersAndUpdateData { version } => {
                let directory = self.loaders.directory();
                let listed = sync_version_servers(store, directory.as_ref(), &version).await?;
                Ok(Box::new(listed.into_iter().map(|t| Task::UpdateServerData {
                    url: t.url,
                    server: t.server,
                })))
            }
            Task::UpdateEnnoblements => {
                self.fan_out(ServerFilter::open(), |t| Task::UpdateServerEnnoblements {
                    url: t.url,
                    server: t.server,
                })
                .await
            }
            Task::UpdateHistory { timezone } => {
                let filter = ServerFilter::open().with_timezone(timezone.clone());
                self.fan_out(filter, move |t| Task::UpdateServerHistory {
                    timezone: timezone.clone(),
                    server: t.server,
                })
                .await
            }
            Task::UpdateStats { timezone } => {
                let filter = ServerFilter::open().with_timezone(timezone.clone());
                self.fan_out(filter, move |t| Task::UpdateServerStats {
                    timezone: timezone.clone(),
                    server: t.server,
                })
                .await
            }
            Task::Vacuum => {
                self.fan_out(ServerFilter::default(), |t| Task::VacuumServerData {
                    server: t.server,
                })
                .await
            }
            Task::DeleteNonExistentVillages => {
                self.fan_out(ServerFilter::open(), |t| Task::ServerDeleteNonExistentVillages {
                    url: t.url,
                    server: t.server,
                })
                .await
            }

            // --- Per server ---
            Task::UpdateServerData { url, server } => {
                let loader = self.loaders.world(&url);
                sync_server_data(store, loader.as_ref(), &server, now).await?;
                Ok(no_follow_ups())
            }
            Task::UpdateServerEnnoblements { url, server } => {
                let loader = self.loaders.world(&url);
                update_server_ennoblements(store, loader.as_ref(), &server, now).await?;
                Ok(no_follow_ups())
            }
            Task::UpdateServerHistory { server, .. } => {
                update_server_history(store, &server, now).await?;
                Ok(no_follow_ups())
            }
            Task::UpdateServerStats { server, .. } => {
                update_server_stats(store, &server, now).await?;
                Ok(no_follow_ups())
            }
            Task::VacuumServerData { server } => {
                vacuum_server_data(store, &server, now, self.history_retention_days).await?;
                Ok(no_follow_ups())
            }
            Task::ServerDeleteNonExistentVillages { url, server } => {
                let loader = self.loaders.world(&url);
                delete_non_existent_villages(store, loader.as_ref(), &server).await?;
                Ok(no_follow_ups())
            }
        }
    }
}
