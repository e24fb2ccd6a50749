use anyhow::Result;
use rtmon_agent::{AgentConfig, HttpTransport};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rtmon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::resolve(&config_path)?;
    let transport = HttpTransport::new(&config.address)?.with_key(config.signing_key());
    tracing::info!(
        url = transport.url(),
        signed = transport.is_signing(),
        "rtmon-agent starting"
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for shutdown signal");
            return;
        }
        tracing::info!("Shutting down gracefully");
        trigger.cancel();
    });

    rtmon_agent::run(config, Arc::new(transport), shutdown).await?;
    Ok(())
}
