//! Units of work and the lane each one runs on.

use std::fmt;

use serde::{Deserialize, Serialize};
use twhelp_common::{parse_timezone, PayloadError, Server, Version};

/// Every task the updater knows. Serialized as `{"task": ..., "args": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "args", rename_all = "snake_case")]
pub enum Task {
    LoadVersionsAndUpdateServerData,
    LoadServersAndUpdateData { version: Version },
    UpdateServerData { url: String, server: Server },
    UpdateEnnoblements,
    UpdateServerEnnoblements { url: String, server: Server },
    UpdateHistory { timezone: String },
    UpdateServerHistory { timezone: String, server: Server },
    UpdateStats { timezone: String },
    UpdateServerStats { timezone: String, server: Server },
    Vacuum,
    VacuumServerData { server: Server },
    DeleteNonExistentVillages,
    ServerDeleteNonExistentVillages { url: String, server: Server },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::LoadVersionsAndUpdateServerData => TaskKind::LoadVersionsAndUpdateServerData,
            Task::LoadServersAndUpdateData { .. } => TaskKind::LoadServersAndUpdateData,
            Task::UpdateServerData { .. } => TaskKind::UpdateServerData,
            Task::UpdateEnnoblements => TaskKind::UpdateEnnoblements,
            Task::UpdateServerEnnoblements { .. } => TaskKind::UpdateServerEnnoblements,
            Task::UpdateHistory { .. } => TaskKind::UpdateHistory,
            Task::UpdateServerHistory { .. } => TaskKind::UpdateServerHistory,
            Task::UpdateStats { .. } => TaskKind::UpdateStats,
            Task::UpdateServerStats { .. } => TaskKind::UpdateServerStats,
            Task::Vacuum => TaskKind::Vacuum,
            Task::VacuumServerData { .. } => TaskKind::VacuumServerData,
            Task::DeleteNonExistentVillages => TaskKind::DeleteNonExistentVillages,
            Task::ServerDeleteNonExistentVillages { .. } => {
                TaskKind::ServerDeleteNonExistentVillages
            }
        }
    }

    /// The server a per-server task targets.
    pub fn server(&self) -> Option<&Server> {
        match self {
            Task::UpdateServerData { server, .. }
            | Task::UpdateServerEnnoblements { server, .. }
            | Task::UpdateServerHistory { server, .. }
            | Task::UpdateServerStats { server, .. }
            | Task::VacuumServerData { server }
            | Task::ServerDeleteNonExistentVillages { server, .. } => Some(server),
            _ => None,
        }
    }

    /// Reject payloads that can never succeed.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if let Some(server) = self.server() {
            if server.key.is_empty() {
                return Err(PayloadError::EmptyServerKey);
            }
        }
        match self {
            Task::UpdateServerData { url, server }
            | Task::UpdateServerEnnoblements { url, server }
            | Task::ServerDeleteNonExistentVillages { url, server }
                if url.is_empty() =>
            {
                Err(PayloadError::EmptyUrl(server.key.clone()))
            }
            Task::UpdateServerHistory { timezone, server }
            | Task::UpdateServerStats { timezone, server } => {
                parse_timezone(timezone)?;
                if *timezone != server.version.timezone {
                    return Err(PayloadError::TimezoneMismatch {
                        server: server.key.clone(),
                        timezone: timezone.clone(),
                    });
                }
                Ok(())
            }
            Task::UpdateHistory { timezone } | Task::UpdateStats { timezone } => {
                parse_timezone(timezone).map(|_| ())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    LoadVersionsAndUpdateServerData,
    LoadServersAndUpdateData,
    UpdateServerData,
    UpdateEnnoblements,
    UpdateServerEnnoblements,
    UpdateHistory,
    UpdateServerHistory,
    UpdateStats,
    UpdateServerStats,
    Vacuum,
    VacuumServerData,
    DeleteNonExistentVillages,
    ServerDeleteNonExistentVillages,
}

impl TaskKind {
    pub const ALL: [TaskKind; 13] = [
        TaskKind::LoadVersionsAndUpdateServerData,
        TaskKind::LoadServersAndUpdateData,
        TaskKind::UpdateServerData,
        TaskKind::UpdateEnnoblements,
        TaskKind::UpdateServerEnnoblements,
        TaskKind::UpdateHistory,
        TaskKind::UpdateServerHistory,
        TaskKind::UpdateStats,
        TaskKind::UpdateServerStats,
        TaskKind::Vacuum,
        TaskKind::VacuumServerData,
        TaskKind::DeleteNonExistentVillages,
        TaskKind::ServerDeleteNonExistentVillages,
    ];

    /// Ennoblement ingestion runs every minute and gets its own lane so a
    /// long data sync never delays it.
    pub fn lane(self) -> Lane {
        match self {
            TaskKind::UpdateEnnoblements | TaskKind::UpdateServerEnnoblements => Lane::Ennoblements,
            _ => Lane::Main,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::LoadVersionsAndUpdateServerData => "load_versions_and_update_server_data",
            TaskKind::LoadServersAndUpdateData => "load_servers_and_update_data",
            TaskKind::UpdateServerData => "update_server_data",
            TaskKind::UpdateEnnoblements => "update_ennoblements",
            TaskKind::UpdateServerEnnoblements => "update_server_ennoblements",
            TaskKind::UpdateHistory => "update_history",
            TaskKind::UpdateServerHistory => "update_server_history",
            TaskKind::UpdateStats => "update_stats",
            TaskKind::UpdateServerStats => "update_server_stats",
            TaskKind::Vacuum => "vacuum",
            TaskKind::VacuumServerData => "vacuum_server_data",
            TaskKind::DeleteNonExistentVillages => "delete_non_existent_villages",
            TaskKind::ServerDeleteNonExistentVillages => "server_delete_non_existent_villages",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    Main,
    Ennoblements,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Main, Lane::Ennoblements];

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Main => "main",
            Lane::Ennoblements => "ennoblements",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
