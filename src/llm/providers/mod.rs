//! Provider construction.

pub mod dummy;
pub mod openai_compatible;

use crate::config::LlmConfig;
use crate::llm::{LlmClient, ProviderError};

/// Build the configured provider backend.
///
/// `"openai"` covers any endpoint implementing `/v1/chat/completions`;
/// `"dummy"` is the offline echo backend used in development and tests.
pub fn build(config: &LlmConfig) -> Result<LlmClient, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(LlmClient::Dummy(dummy::DummyProvider)),
        "openai" => Ok(LlmClient::OpenAiCompatible(
            openai_compatible::OpenAiCompatibleProvider::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.temperature,
                config.max_tokens,
                config.api_key.clone(),
            )?,
        )),
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}
