//! LLM client abstraction.
//!
//! `LlmClient` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//! Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
//!
//! Provider instances are shared immutable capabilities — clone them freely.
//! Each call streams tokens into a caller-supplied [`TokenSink`] and returns
//! the full assistant text on completion.

pub mod providers;

use serde::Serialize;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Chat turns ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of assembled context, ready for the completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: &str) -> Self {
        Self { role: Role::System, content: content.to_string() }
    }

    pub fn user(content: &str) -> Self {
        Self { role: Role::User, content: content.to_string() }
    }

    pub fn assistant(content: &str) -> Self {
        Self { role: Role::Assistant, content: content.to_string() }
    }
}

// ── Token sink ────────────────────────────────────────────────────────────────

/// Capability surfaced to a provider for delivering generated tokens.
///
/// Two methods only: providers know nothing about transports or buffering
/// policy. The stream buffer is the production implementation.
pub trait TokenSink {
    /// One generated token fragment, in arrival order.
    fn on_token(&mut self, token: &str) -> impl Future<Output = ()> + Send;
    /// Generation finished; `full_response` is the complete assistant text.
    fn on_complete(&mut self, full_response: &str) -> impl Future<Output = ()> + Send;
}

// ── Client enum ───────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Adding a backend = new module + new variant + new `stream_chat` arm.
#[derive(Debug, Clone)]
pub enum LlmClient {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmClient {
    /// Stream a completion for `turns` into `sink`, returning the full
    /// assistant text. The sink sees every token and then the completion.
    pub async fn stream_chat<S: TokenSink + Send>(
        &self,
        turns: &[ChatTurn],
        sink: &mut S,
    ) -> Result<String, ProviderError> {
        match self {
            LlmClient::Dummy(p) => p.stream_chat(turns, sink).await,
            LlmClient::OpenAiCompatible(p) => p.stream_chat(turns, sink).await,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialise_lowercase() {
        let turn = ChatTurn::system("be brief");
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains("\"role\":\"system\""));
        assert!(json.contains("\"content\":\"be brief\""));
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
