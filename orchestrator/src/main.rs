//! Service binary: wires the shard clients, store, and periodic jobs, then
//! runs until interrupted.

use std::process;
use std::sync::Arc;

use account_store::memory::MemoryStore;
use account_store::Store;
use core_types::{AppConfig, RetryPolicy};
use log::info;
use shard_client::api::WgShardClient;
use shard_client::fanout::FanOut;
use shard_client::rotator::{CredentialRotator, EmptyCredentialList};
use snapshot_engine::jobs::MaintenanceJobs;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Credentials(#[from] EmptyCredentialList),
    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("shutdown signal listener failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        eprintln!("orchestrator failed: {err}");
        process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("wows-orchestrator/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let rotator = Arc::new(CredentialRotator::new(config.api.application_ids.clone())?);

    let policy = RetryPolicy::new(config.retry.max_attempts, config.retry.base_delay());
    let mut fanout = FanOut::new(
        policy,
        config.fanout.search_limit,
        config.fanout.total_timeout(),
    );
    for region in &config.api.regions {
        fanout = fanout.with_client(Arc::new(WgShardClient::new(
            *region,
            http.clone(),
            Arc::clone(&rotator),
        )));
    }
    let fanout = Arc::new(fanout);
    info!(
        "shard fan-out over {:?} with {} credential(s)",
        fanout.regions(),
        rotator.len()
    );

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let jobs = MaintenanceJobs::new(Arc::clone(&fanout), Arc::clone(&store));

    let cancel = CancellationToken::new();
    let clan_loop =
        jobs.spawn_clan_refresh_loop(config.jobs.clan_refresh_interval(), cancel.clone());
    let snapshot_loop = jobs.spawn_snapshot_loop(config.jobs.snapshot_interval(), cancel.clone());
    info!(
        "maintenance loops running (clan refresh every {}s, snapshots every {}s)",
        config.jobs.clan_refresh_interval_secs, config.jobs.snapshot_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received; stopping maintenance loops");
    cancel.cancel();
    let _ = clan_loop.await;
    let _ = snapshot_loop.await;
    Ok(())
}
