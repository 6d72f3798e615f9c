//! Long-running worker: polls the deployment API and runs pending deployments.

use anyhow::{Context, Result};
use devex_config::WorkerConfig;
use devex_executor::ProcessExecutor;
use devex_scheduler::{DaemonSettings, DeploymentEngine, SchedulerDaemon, StoreRunner};
use devex_store::HttpStore;
use std::sync::Arc;
use tracing::info;

pub async fn run(config: WorkerConfig) -> Result<()> {
    let settings = DaemonSettings::from(&config);
    let store = Arc::new(HttpStore::new(&config.api_url, config.api_token.clone()));

    info!(
        api_url = %config.api_url,
        plugin_dir = %config.plugin_dir.display(),
        work_dir = %config.work_dir.display(),
        max_concurrent = settings.max_concurrent,
        poll_interval_secs = settings.poll_interval.as_secs(),
        "Starting devex daemon"
    );

    let engine = DeploymentEngine::new(Arc::new(ProcessExecutor::new()), Arc::new(config));
    let launcher = Arc::new(StoreRunner::new(store.clone(), engine));
    let handle = SchedulerDaemon::new(store, launcher, settings).start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown requested, waiting for in-flight deployments");
    handle.stop().await.context("Daemon did not shut down cleanly")?;
    info!("Daemon stopped");

    Ok(())
}
