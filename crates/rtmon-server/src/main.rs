use anyhow::Result;
use rtmon_server::app;
use rtmon_server::config::ServerConfig;
use rtmon_server::state::{self, AppState};
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rtmon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::resolve(&config_path)?;

    tracing::info!(config = %config_path, "rtmon-server starting");

    let repo = state::open_repository(&config).await?;
    let app = app::build_http_app(AppState::new(repo.clone()).with_key(config.signing_key()));

    let listener = tokio::net::TcpListener::bind(&config.address).await?;
    tracing::info!(address = %config.address, "Server started");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "HTTP server error");
    }

    repo.shutdown().await?;
    tracing::info!("Server stopped");
    served?;
    Ok(())
}
