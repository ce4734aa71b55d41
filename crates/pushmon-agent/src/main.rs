use anyhow::{Context, Result};
use pushmon_agent::config::AgentConfig;
use pushmon_agent::orchestrator::Orchestrator;
use pushmon_agent::shutdown::cancel_on_signal;
use pushmon_agent::transport::HttpTransport;
use pushmon_runtime::{RetryExecutor, WorkerPool};
use pushmon_storage::StorageController;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pushmon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;
    tracing::info!(agent_id = %config.agent_id, "pushmon-agent starting");

    let collectors = pushmon_collector::build(&config.collectors)?;
    let endpoint = config.http_endpoint();
    let transport = HttpTransport::new(
        &endpoint,
        &config.agent_id,
        config.auth_token.clone(),
        config.request_timeout(),
    )
    .context("failed to build HTTP transport")?;
    tracing::info!(url = transport.url(), "Reporting to collector");

    let storage = Arc::new(StorageController::new());
    let retry = RetryExecutor::from_secs(&config.backoff_schedule_secs);
    let pool = Arc::new(WorkerPool::new(config.worker_count, config.queue_capacity));

    let orchestrator = Orchestrator::new(
        config.orchestrator_config(),
        storage,
        Arc::new(transport),
        retry,
        pool,
    )
    .with_collectors(collectors);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(signal::ctrl_c(), cancel.clone()));

    orchestrator.run(cancel).await?;
    tracing::info!("pushmon-agent stopped");
    Ok(())
}
