use anyhow::Result;
use pushmon_server::app;
use pushmon_server::config::ServerConfig;
use pushmon_server::state::AppState;
use std::net::SocketAddr;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pushmon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load(&config_path)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!(
        %addr,
        require_agent_auth = config.require_agent_auth,
        agents_configured = config.agent_tokens.len(),
        "pushmon-server starting"
    );

    let state = AppState::new(config);
    let http_app = app::build_http_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, http_app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    tracing::info!("pushmon-server stopped");
    Ok(())
}
