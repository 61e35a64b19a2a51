//! SWIM node binary
//!
//! Runs one membership node on UDP until interrupted.

use swim_node::{NodeConfig, NodeRuntime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "swim_node=info,swim_detector=info,swim_relay=info,swim_membership=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env()?;
    tracing::info!(node_id = config.node_id, bind = %config.bind, open = config.open, "Starting SWIM node");

    let runtime = NodeRuntime::bind(config).await?;
    tracing::info!(address = %runtime.self_address(), "bound");

    let host = runtime
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    let view = host.detector().directory();
    tracing::info!(
        alive = view.alive().len(),
        suspected = view.suspected().len(),
        dead = view.dead().len(),
        "stopped"
    );
    Ok(())
}
