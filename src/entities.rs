//! Value types for agents, chats and messages.
//!
//! These are the in-memory shapes owned by the caches. Wire representations
//! (the `*_uuid` field names of the transport frames) live in
//! [`crate::server::frames`]; nothing here is serialised directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fallback system prompt used when an agent preset is missing or empty.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Who a message endpoint is: a human identity or an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParticipantKind {
    Auth,
    Agent,
}

impl ParticipantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantKind::Auth => "AUTH",
            ParticipantKind::Agent => "AGENT",
        }
    }
}

// ── Agent ─────────────────────────────────────────────────────────────────────

/// Model parameters attached to an agent system.
///
/// `system_prompt` may be absent or empty; [`Agent::get_system_prompt`]
/// guarantees callers never see that.
#[derive(Debug, Clone, Default)]
pub struct AgentPreset {
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AgentSystem {
    pub system_id: String,
    pub preset: AgentPreset,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub config_id: String,
    pub system: AgentSystem,
}

/// A named configuration bundle a user addresses for inference.
///
/// Owned exclusively by the agent cache; sessions refer to agents by id only.
#[derive(Debug, Clone)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub auth_id: String,
    pub category_id: Option<String>,
    pub config: AgentConfig,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl Agent {
    /// The effective system prompt. Never empty: falls back to
    /// [`DEFAULT_SYSTEM_PROMPT`] when the preset has none.
    pub fn get_system_prompt(&self) -> &str {
        match &self.config.system.preset.system_prompt {
            Some(p) if !p.trim().is_empty() => p,
            _ => DEFAULT_SYSTEM_PROMPT,
        }
    }
}

// ── Chat / Message ────────────────────────────────────────────────────────────

/// Identity of one conversation. `agent_id` and `auth_id` are fixed for the
/// life of the cached session.
#[derive(Debug, Clone)]
pub struct Chat {
    pub chat_id: String,
    pub agent_id: String,
    pub auth_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Chat {
    pub fn new(chat_id: &str, agent_id: &str, auth_id: &str) -> Self {
        let now = Utc::now();
        Self {
            chat_id: chat_id.to_string(),
            agent_id: agent_id.to_string(),
            auth_id: auth_id.to_string(),
            created_at: now,
            updated_at: now,
            last_accessed: now,
        }
    }
}

/// One turn in a chat. Append-only: never mutated after construction.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    pub sender_kind: ParticipantKind,
    pub receiver_id: String,
    pub receiver_kind: ParticipantKind,
    pub chat_id: String,
    pub content_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Mint a fresh message with new `message_id`/`content_id` and `now` as
    /// its timestamp.
    pub fn mint(
        sender_id: &str,
        sender_kind: ParticipantKind,
        receiver_id: &str,
        receiver_kind: ParticipantKind,
        chat_id: &str,
        content: &str,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            sender_kind,
            receiver_id: receiver_id.to_string(),
            receiver_kind,
            chat_id: chat_id.to_string(),
            content_id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_with_prompt(prompt: Option<&str>) -> Agent {
        let now = Utc::now();
        Agent {
            agent_id: "a1".into(),
            name: "helper".into(),
            description: String::new(),
            auth_id: "u1".into(),
            category_id: None,
            config: AgentConfig {
                config_id: "c1".into(),
                system: AgentSystem {
                    system_id: "s1".into(),
                    preset: AgentPreset {
                        system_prompt: prompt.map(str::to_string),
                        temperature: None,
                        max_tokens: None,
                    },
                },
            },
            created_at: now,
            last_used: now,
        }
    }

    #[test]
    fn system_prompt_present() {
        let a = agent_with_prompt(Some("Answer in French."));
        assert_eq!(a.get_system_prompt(), "Answer in French.");
    }

    #[test]
    fn system_prompt_falls_back_when_missing() {
        let a = agent_with_prompt(None);
        assert_eq!(a.get_system_prompt(), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn system_prompt_falls_back_when_blank() {
        let a = agent_with_prompt(Some("   "));
        assert_eq!(a.get_system_prompt(), DEFAULT_SYSTEM_PROMPT);
        assert!(!a.get_system_prompt().is_empty());
    }

    #[test]
    fn participant_kind_serde_uppercase() {
        let k: ParticipantKind = serde_json::from_str("\"AGENT\"").unwrap();
        assert_eq!(k, ParticipantKind::Agent);
        assert_eq!(serde_json::to_string(&ParticipantKind::Auth).unwrap(), "\"AUTH\"");
        assert!(serde_json::from_str::<ParticipantKind>("\"BOT\"").is_err());
    }

    #[test]
    fn minted_messages_get_distinct_ids() {
        let m1 = Message::mint("u1", ParticipantKind::Auth, "a1", ParticipantKind::Agent, "c1", "hi");
        let m2 = Message::mint("u1", ParticipantKind::Auth, "a1", ParticipantKind::Agent, "c1", "hi");
        assert_ne!(m1.message_id, m2.message_id);
        assert_ne!(m1.content_id, m2.content_id);
    }
}
