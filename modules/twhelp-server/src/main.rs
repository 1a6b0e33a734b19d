use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use twhelp_common::AppConfig;
use twhelp_queue::{Jobs, Lane, LaneConfig, LocalQueue, Router};
use twhelp_server::scheduler::{self, Scheduler};
use twhelp_store::{PgStore, Store};
use twhelp_sync::HttpLoaders;

#[derive(Parser)]
#[command(name = "twhelp-server", about = "Tribal Wars world data updater")]
struct Cli {
    /// Run the workers without the periodic triggers.
    #[arg(long, env = "NO_SCHEDULER")]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting twhelp-server");

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await
        .context("couldn't connect to the database")?;
    tracing::info!(max_connections = config.max_db_connections, "Connected to database");

    let store = Arc::new(PgStore::new(pool));
    store.migrate().await?;
    tracing::info!("Migrations complete");

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;
    let loaders = Arc::new(HttpLoaders::new(http_client));

    let registry = Jobs::new(store.clone(), loaders, config.history_retention_days).into_registry();
    let lane = |workers: usize| {
        LaneConfig::new(workers)
            .with_reservation_timeout(config.reservation_timeout)
            .with_retry_limit(config.retry_limit)
    };
    let router = Arc::new(
        Router::builder(registry, Arc::new(LocalQueue::new()))
            .with_lane(Lane::Main, lane(config.worker_limit))
            .with_lane(Lane::Ennoblements, lane(config.ennoblement_worker_limit))
            .build(),
    );
    router.start().await;

    let versions = store.versions().await.context("couldn't load versions")?;
    let triggers = scheduler::triggers(&scheduler::timezones(&versions));

    if config.run_on_init {
        scheduler::run_all_now(&router, &triggers).await?;
    }

    let scheduler = if cli.no_scheduler {
        tracing::info!("Scheduler disabled");
        None
    } else {
        Some(Scheduler::start(router.clone(), &triggers).await?)
    };

    tokio::signal::ctrl_c()
        .await
        .context("couldn't listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    router.stop().await;

    tracing::info!("twhelp-server stopped");
    Ok(())
}
