//! WebSocket transport — one bidirectional JSON-frame channel per client.
//!
//! Binds `HOST:PORT` and upgrades `GET /` (or `/ws`) to a WebSocket driven
//! by [`session`]. The existing [`CancellationToken`] is wired to axum's
//! graceful shutdown.

pub mod frames;
pub mod registry;
mod session;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::{AgentDefaults, AgentManager};
use crate::cache::chat::{ChatCache, SessionLimits};
use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::llm::LlmClient;
use registry::ConnectionRegistry;

/// Process-wide collaborators, constructed once by the supervisor and shared
/// by every connection task.
pub struct Gateway {
    pub config: GatewayConfig,
    pub agents: AgentManager,
    chats: Mutex<ChatCache>,
    pub llm: LlmClient,
    pub registry: ConnectionRegistry,
}

impl Gateway {
    pub fn new(config: GatewayConfig, llm: LlmClient) -> Self {
        let agents = AgentManager::new(
            config.agent_cache_size,
            AgentDefaults {
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_tokens,
            },
        );
        let chats = Mutex::new(ChatCache::new(
            config.chat_cache_size,
            SessionLimits {
                max_messages: config.max_chat_messages,
                max_tokens: config.max_chat_tokens,
                context_window: config.context_window,
            },
        ));
        Self {
            config,
            agents,
            chats,
            llm,
            registry: ConnectionRegistry::new(),
        }
    }

    /// Lock the chat cache. Never held across an await point.
    pub fn chats(&self) -> MutexGuard<'_, ChatCache> {
        self.chats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serve the transport until `shutdown` is cancelled.
pub async fn run(gateway: Arc<Gateway>, shutdown: CancellationToken) -> Result<(), AppError> {
    let bind_addr = gateway.config.bind_addr();

    let router = Router::new()
        .route("/", get(upgrade))
        .route("/ws", get(upgrade))
        .with_state(gateway);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("server error: {e}")))?;

    info!("transport closed");
    Ok(())
}

async fn upgrade(State(gateway): State<Arc<Gateway>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session::handle_connection(gateway, socket))
}
