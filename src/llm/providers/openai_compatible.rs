//! OpenAI-compatible streaming chat completion provider
//! (`/v1/chat/completions` with `stream: true`).
//!
//! All OpenAI wire types are private to this module — callers never see
//! them. Tokens are extracted from SSE `data:` lines
//! (`choices[0].delta.content`) and forwarded to the [`TokenSink`] as they
//! arrive; `[DONE]` terminates the stream.

use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::llm::{ChatTurn, ProviderError, TokenSink};

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Covers OpenAI, OpenAI-compatible local servers (Ollama, LM Studio…),
/// and hosted alternatives. Constructed once at startup, then cheaply cloned
/// because `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        // No overall request timeout: a streaming completion is bounded by
        // the server, not by us.
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, temperature, max_tokens, api_key })
    }

    /// Stream a completion for `turns` into `sink` and return the full text.
    pub async fn stream_chat<S: TokenSink + Send>(
        &self,
        turns: &[ChatTurn],
        sink: &mut S,
    ) -> Result<String, ProviderError> {
        // Some models (gpt-5 family) do not accept a temperature parameter.
        let temperature = if self.model.starts_with("gpt-5") {
            None
        } else {
            Some(self.temperature)
        };

        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: turns,
            temperature,
            max_tokens: self.max_tokens,
            stream: true,
        };

        debug!(
            model = %payload.model,
            temperature = ?payload.temperature,
            turns = turns.len(),
            "sending streaming LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut pending = String::new();
        let mut full = String::new();
        let mut done = false;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| ProviderError::Request(format!("stream read failed: {e}")))?;
            pending.push_str(&String::from_utf8_lossy(&chunk));

            // SSE events are newline-delimited; a chunk may carry a partial line.
            while let Some(pos) = pending.find('\n') {
                let line: String = pending.drain(..=pos).collect();
                let Some(data) = line.trim_end().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    done = true;
                    break 'read;
                }
                if data.is_empty() {
                    continue;
                }
                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(parsed) => {
                        if let Some(token) = parsed
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content)
                            .filter(|t| !t.is_empty())
                        {
                            full.push_str(&token);
                            sink.on_token(&token).await;
                        }
                    }
                    Err(e) => trace!(error = %e, %data, "skipping unparseable SSE chunk"),
                }
            }
        }

        if !done {
            debug!("stream ended without [DONE] terminator");
        }
        if full.trim().is_empty() {
            return Err(ProviderError::Request("empty or missing content in stream".into()));
        }

        sink.on_complete(&full).await;
        Ok(full)
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: String,
    messages: &'a [ChatTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_chunk_parses() {
        let raw = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));
    }

    #[test]
    fn role_only_delta_parses_without_content() {
        let raw = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }

    #[test]
    fn request_payload_shape() {
        let turns = vec![ChatTurn::system("be brief"), ChatTurn::user("hi")];
        let payload = ChatCompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: &turns,
            temperature: Some(0.2),
            max_tokens: 500,
            stream: true,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn gpt5_payload_omits_temperature() {
        let payload = ChatCompletionRequest {
            model: "gpt-5-mini".into(),
            messages: &[],
            temperature: None,
            max_tokens: 500,
            stream: true,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("temperature").is_none());
    }
}
