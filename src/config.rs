//! Environment-variable configuration.
//!
//! Every knob is optional with a documented default, except the LLM API key
//! which is fatal at startup when the configured provider needs one.
//! Invalid numeric values are a startup error rather than a silent default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// How the context window is assembled for each LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStrategy {
    /// Send only the last `MAX_CONTEXT_MESSAGES` history turns.
    SlidingWindow,
    /// Send the full cached history.
    FullHistory,
}

impl ContextStrategy {
    fn from_env_value(value: &str) -> Self {
        // Anything other than the literal "sliding_window" means full history.
        if value == "sliding_window" {
            ContextStrategy::SlidingWindow
        } else {
            ContextStrategy::FullHistory
        }
    }

    pub fn is_sliding(&self) -> bool {
        matches!(self, ContextStrategy::SlidingWindow)
    }
}

/// LLM provider configuration. `api_key` comes from `LLM_API_KEY` env only.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key: Option<String>,
}

/// Stream-buffer flush tunables.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Minimum buffered chars before a word-boundary flush.
    pub min_chunk: usize,
    /// Maximum time between flushes.
    pub max_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub agent_cache_size: usize,
    pub chat_cache_size: usize,
    pub max_chat_messages: usize,
    pub max_chat_tokens: usize,
    pub context_window: usize,
    pub context_strategy: ContextStrategy,
    pub llm: LlmConfig,
    pub heartbeat_interval: Duration,
    pub connection_timeout: Duration,
    pub stream: StreamConfig,
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::Config(format!("invalid {key}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Load the full gateway configuration from the environment.
pub fn load() -> Result<GatewayConfig, AppError> {
    let provider = env_string("LLM_PROVIDER", "openai");
    let api_key = env::var("LLM_API_KEY").ok().filter(|k| !k.trim().is_empty());

    // Keyless operation is only valid for the offline dummy provider.
    if api_key.is_none() && provider != "dummy" {
        return Err(AppError::Config(format!(
            "LLM_API_KEY is required for provider {provider:?}"
        )));
    }

    let llm = LlmConfig {
        provider,
        api_base_url: env_string(
            "LLM_API_BASE",
            "https://api.openai.com/v1/chat/completions",
        ),
        model: env_string("LLM_MODEL", "gpt-4o-mini"),
        temperature: env_parse("LLM_TEMPERATURE", 0.2_f32)?,
        max_tokens: env_parse("LLM_MAX_TOKENS", 500_u32)?,
        api_key,
    };

    Ok(GatewayConfig {
        host: env_string("WS_HOST", "localhost"),
        port: env_parse("WS_PORT", 8765_u16)?,
        agent_cache_size: env_parse("MAX_AGENT_CACHE_SIZE", 50)?,
        chat_cache_size: env_parse("MAX_CHAT_CACHE_SIZE", 100)?,
        max_chat_messages: env_parse("MAX_CHAT_MESSAGES", 200)?,
        max_chat_tokens: env_parse("MAX_CHAT_TOKENS", 50_000)?,
        context_window: env_parse("MAX_CONTEXT_MESSAGES", 20)?,
        context_strategy: ContextStrategy::from_env_value(&env_string(
            "CONTEXT_STRATEGY",
            "sliding_window",
        )),
        llm,
        heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_INTERVAL", 30_u64)?),
        connection_timeout: Duration::from_secs(env_parse("CONNECTION_TIMEOUT", 300_u64)?),
        stream: StreamConfig {
            min_chunk: env_parse("STREAM_MIN_CHUNK_SIZE", 50)?,
            max_delay: Duration::try_from_secs_f64(env_parse("STREAM_MAX_DELAY", 0.3_f64)?)
                .map_err(|e| AppError::Config(format!("invalid STREAM_MAX_DELAY: {e}")))?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_strategy_parses() {
        assert_eq!(
            ContextStrategy::from_env_value("sliding_window"),
            ContextStrategy::SlidingWindow
        );
        assert_eq!(
            ContextStrategy::from_env_value("everything"),
            ContextStrategy::FullHistory
        );
        assert!(ContextStrategy::SlidingWindow.is_sliding());
        assert!(!ContextStrategy::FullHistory.is_sliding());
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let config = GatewayConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            agent_cache_size: 50,
            chat_cache_size: 100,
            max_chat_messages: 200,
            max_chat_tokens: 50_000,
            context_window: 20,
            context_strategy: ContextStrategy::SlidingWindow,
            llm: LlmConfig {
                provider: "dummy".into(),
                api_base_url: String::new(),
                model: "test".into(),
                temperature: 0.2,
                max_tokens: 500,
                api_key: None,
            },
            heartbeat_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(300),
            stream: StreamConfig {
                min_chunk: 50,
                max_delay: Duration::from_millis(300),
            },
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }
}
