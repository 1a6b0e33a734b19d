//! Periodic triggers.
//!
//! Each trigger submits one fan-out task on a cron schedule; the per-server
//! work is produced by the task's handler. History and stats run shortly after
//! local midnight, once per distinct version timezone.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use twhelp_common::{parse_timezone, Version};
use twhelp_queue::{Router, Task};

// Six-field cron expressions: sec min hour day-of-month month day-of-week.
const SERVER_DATA_CRON: &str = "0 0 * * * *";
const ENNOBLEMENTS_CRON: &str = "0 * * * * *";
const VACUUM_CRON: &str = "0 0 1 * * *";
const DELETE_VILLAGES_CRON: &str = "0 30 1 * * *";
const HISTORY_CRON: &str = "0 5 0 * * *";
const STATS_CRON: &str = "0 20 0 * * *";

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub name: String,
    pub cron: &'static str,
    /// Clock the cron expression is read in.
    pub tz: Tz,
    pub task: Task,
}

impl Trigger {
    fn utc(name: &str, cron: &'static str, task: Task) -> Self {
        Self {
            name: name.to_string(),
            cron,
            tz: Tz::UTC,
            task,
        }
    }

    /// A cron job that submits this trigger's task to `router`.
    pub fn job(&self, router: Arc<Router>) -> Result<Job> {
        let name = self.name.clone();
        let task = self.task.clone();
        Job::new_async_tz(self.cron, self.tz, move |_id, _scheduler| {
            let router = router.clone();
            let name = name.clone();
            let task = task.clone();
            Box::pin(async move {
                match router.submit(task).await {
                    Ok(()) => tracing::debug!(trigger = %name, "Triggered"),
                    Err(e) => {
                        tracing::error!(trigger = %name, error = %e, "Couldn't submit task")
                    }
                }
            })
        })
        .with_context(|| format!("creating scheduler job {} ({})", self.name, self.cron))
    }
}

/// Distinct, valid timezones across `versions`.
pub fn timezones(versions: &[Version]) -> Vec<Tz> {
    let names: BTreeSet<&str> = versions.iter().map(|v| v.timezone.as_str()).collect();
    names
        .into_iter()
        .filter_map(|name| match parse_timezone(name) {
            Ok(tz) => Some(tz),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping version timezone");
                None
            }
        })
        .collect()
}

/// The standing schedule.
pub fn triggers(timezones: &[Tz]) -> Vec<Trigger> {
    let mut triggers = vec![
        Trigger::utc(
            "server-data",
            SERVER_DATA_CRON,
            Task::LoadVersionsAndUpdateServerData,
        ),
        Trigger::utc("ennoblements", ENNOBLEMENTS_CRON, Task::UpdateEnnoblements),
        Trigger::utc("vacuum", VACUUM_CRON, Task::Vacuum),
        Trigger::utc(
            "delete-non-existent-villages",
            DELETE_VILLAGES_CRON,
            Task::DeleteNonExistentVillages,
        ),
    ];

    for tz in timezones {
        let timezone = tz.name().to_string();
        triggers.push(Trigger {
            name: format!("history:{timezone}"),
            cron: HISTORY_CRON,
            tz: *tz,
            task: Task::UpdateHistory {
                timezone: timezone.clone(),
            },
        });
        triggers.push(Trigger {
            name: format!("stats:{timezone}"),
            cron: STATS_CRON,
            tz: *tz,
            task: Task::UpdateStats { timezone },
        });
    }
    triggers
}

/// Submit every trigger's task once, for `RUN_ON_INIT`.
pub async fn run_all_now(router: &Router, triggers: &[Trigger]) -> Result<()> {
    for trigger in triggers {
        router.submit(trigger.task.clone()).await?;
        tracing::info!(trigger = %trigger.name, "Triggered on init");
    }
    Ok(())
}

pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    pub async fn start(router: Arc<Router>, triggers: &[Trigger]) -> Result<Self> {
        let inner = JobScheduler::new().await.context("creating scheduler")?;
        for trigger in triggers {
            inner
                .add(trigger.job(router.clone())?)
                .await
                .with_context(|| format!("adding scheduler job {}", trigger.name))?;
            tracing::info!(
                trigger = %trigger.name,
                cron = trigger.cron,
                tz = trigger.tz.name(),
                "Trigger scheduled"
            );
        }
        inner.start().await.context("starting scheduler")?;
        Ok(Self { inner })
    }

    pub async fn stop(mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::error!(error = %e, "Scheduler didn't shut down cleanly");
        }
    }
}
