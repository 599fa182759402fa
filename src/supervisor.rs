//! Process-wide construction and lifecycle.
//!
//! Builds the singletons (agent manager, chat cache, LLM client, connection
//! registry), binds the transport, and runs the background idle sweeper.
//! Ctrl-C cancels the shared shutdown token; every task watches it.

use std::sync::Arc;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::llm::providers;
use crate::server::{self, Gateway};

/// Period between idle-connection sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the gateway until shutdown.
pub async fn run(config: GatewayConfig) -> Result<(), AppError> {
    let llm = providers::build(&config.llm).map_err(|e| AppError::Config(e.to_string()))?;
    let gateway = Arc::new(Gateway::new(config, llm));

    // Shared shutdown token — Ctrl-C cancels it, all tasks watch it.
    let shutdown = CancellationToken::new();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    spawn_idle_sweeper(gateway.clone(), shutdown.clone());

    server::run(gateway, shutdown.clone()).await?;

    // Transport is down; stop the sweeper and any straggler tasks.
    shutdown.cancel();
    info!("gateway stopped");
    Ok(())
}

fn spawn_idle_sweeper(gateway: Arc<Gateway>, shutdown: CancellationToken) {
    let timeout = gateway.config.connection_timeout;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // consume the first (immediate) tick
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = gateway.registry.cleanup_stale(timeout);
                    if evicted > 0 {
                        info!(evicted, "idle sweeper closed connections");
                    }
                }
            }
        }
    });
}
