//! Wire frames for the WebSocket transport.
//!
//! Client frames use the `*_uuid` field names of the protocol; the in-memory
//! entities use `*_id`. The translation happens here and nowhere else.
//! Unknown fields are ignored on input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::agent::AgentCacheStats;
use crate::cache::chat::{ChatCacheStats, SyncMode};
use crate::entities::{Message, ParticipantKind};
use crate::error::TurnError;
use crate::server::registry::ConnectionPoolStats;

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Everything a session can push to its connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// One JSON text frame.
    Frame(ServerFrame),
    /// Liveness probe; the writer maps it to a WebSocket ping.
    Ping,
    /// Close the connection with a code and reason, then stop writing.
    Close { code: u16, reason: &'static str },
}

/// Sending half of a connection's outbound queue.
///
/// Held by the registry (for idle eviction) and by every stream buffer the
/// session creates. A send failure means the connection is gone.
pub type OutboundTx = mpsc::UnboundedSender<Outbound>;

/// Server → client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// One fragment of a streamed response.
    StreamToken {
        chat_uuid: String,
        agent_uuid: String,
        content: String,
        partial: bool,
    },
    /// Terminal frame finalising a turn; `content` is the full response.
    StreamEnd {
        chat_uuid: String,
        agent_uuid: String,
        content: String,
        partial: bool,
        message_uuid: String,
        message_content_uuid: String,
    },
    Identified {
        #[serde(rename = "type")]
        kind: &'static str,
        connection_id: String,
    },
    Stats {
        #[serde(rename = "type")]
        kind: &'static str,
        agent_cache: AgentCacheStats,
        chat_cache: ChatCacheStats,
        connection_pool: ConnectionPoolStats,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chat_uuid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        connection_id: Option<String>,
    },
}

impl ServerFrame {
    pub fn identified(connection_id: &str) -> Self {
        ServerFrame::Identified { kind: "identified", connection_id: connection_id.to_string() }
    }

    pub fn stats(
        agent_cache: AgentCacheStats,
        chat_cache: ChatCacheStats,
        connection_pool: ConnectionPoolStats,
    ) -> Self {
        ServerFrame::Stats { kind: "stats", agent_cache, chat_cache, connection_pool }
    }

    pub fn error(err: &TurnError, chat_uuid: Option<String>, connection_id: Option<String>) -> Self {
        ServerFrame::Error { error: err.to_string(), chat_uuid, connection_id }
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// Explicit commands. A frame without `command` is a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Identify,
    Stats,
}

/// Client → server frame. Field presence is validated per command by the
/// session handler, not by serde.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientFrame {
    pub command: Option<Command>,
    pub auth_uuid: Option<String>,
    pub chat_uuid: Option<String>,
    pub content: Option<String>,
    pub sender_uuid: Option<String>,
    pub sender_type: Option<ParticipantKind>,
    pub receiver_uuid: Option<String>,
    pub receiver_type: Option<ParticipantKind>,
    pub agent_uuid: Option<String>,
    pub agent_name: Option<String>,
    pub agent_description: Option<String>,
    pub category_id: Option<String>,
    pub system_prompt: Option<String>,
    pub chat_history: Option<Vec<HistoryItem>>,
    #[serde(default)]
    pub sync_mode: SyncMode,
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<Self, TurnError> {
        serde_json::from_str(raw).map_err(|_| TurnError::MalformedFrame)
    }
}

/// Raw `chat_history` element as sent by clients.
///
/// The shape is heterogeneous at the source: `content` is sometimes a
/// literal string and sometimes nested under `MessageContent.Content`.
/// [`HistoryItem::into_message`] is the single normalising decode.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryItem {
    pub message_uuid: Option<String>,
    pub message_content_uuid: Option<String>,
    pub sender_uuid: Option<String>,
    pub sender_type: Option<ParticipantKind>,
    pub receiver_uuid: Option<String>,
    pub receiver_type: Option<ParticipantKind>,
    pub content: Option<String>,
    #[serde(rename = "MessageContent")]
    pub message_content: Option<MessageContentRef>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageContentRef {
    #[serde(rename = "Content")]
    pub content: Option<String>,
}

impl HistoryItem {
    /// Normalise into a [`Message`] for `chat_id`.
    ///
    /// Missing identifiers are minted, missing timestamps default to now
    /// (stable sort preserves their arrival order). Missing sender/receiver
    /// fields or content are a [`TurnError::BadHistoryItem`].
    pub fn into_message(self, chat_id: &str) -> Result<Message, TurnError> {
        let content = self
            .content
            .or(self.message_content.and_then(|mc| mc.content))
            .ok_or_else(|| TurnError::BadHistoryItem("missing content".into()))?;
        let sender_id = self
            .sender_uuid
            .ok_or_else(|| TurnError::BadHistoryItem("missing sender_uuid".into()))?;
        let sender_kind = self
            .sender_type
            .ok_or_else(|| TurnError::BadHistoryItem("missing sender_type".into()))?;
        let receiver_id = self
            .receiver_uuid
            .ok_or_else(|| TurnError::BadHistoryItem("missing receiver_uuid".into()))?;
        let receiver_kind = self
            .receiver_type
            .ok_or_else(|| TurnError::BadHistoryItem("missing receiver_type".into()))?;

        Ok(Message {
            message_id: self
                .message_uuid
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            sender_id,
            sender_kind,
            receiver_id,
            receiver_kind,
            chat_id: chat_id.to_string(),
            content_id: self
                .message_content_uuid
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            content,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
