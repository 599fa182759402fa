//! Chat Gateway — supervisor entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Init logger
//!   3. Load config (fatal on missing API key)
//!   4. Run the supervisor until shutdown

use tracing::info;

use chat_gateway::{config, error, logger, supervisor};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), error::AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    logger::init("info")?;

    let config = config::load()?;

    info!(
        bind = %config.bind_addr(),
        provider = %config.llm.provider,
        model = %config.llm.model,
        agent_cache = config.agent_cache_size,
        chat_cache = config.chat_cache_size,
        "config loaded"
    );

    supervisor::run(config).await
}
