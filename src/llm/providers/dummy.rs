//! Dummy LLM provider — echoes the last user turn back, one word at a time.
//! Used for testing the full streaming round-trip without a real API key.

use crate::llm::{ChatTurn, ProviderError, Role, TokenSink};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn stream_chat<S: TokenSink + Send>(
        &self,
        turns: &[ChatTurn],
        sink: &mut S,
    ) -> Result<String, ProviderError> {
        let last_user = turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or_default();

        let full = format!("[echo] {last_user}");
        for token in full.split_inclusive(' ') {
            sink.on_token(token).await;
        }
        sink.on_complete(&full).await;
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CollectingSink {
        tokens: Vec<String>,
        completed: Option<String>,
    }

    impl TokenSink for CollectingSink {
        async fn on_token(&mut self, token: &str) {
            self.tokens.push(token.to_string());
        }

        async fn on_complete(&mut self, full_response: &str) {
            self.completed = Some(full_response.to_string());
        }
    }

    #[tokio::test]
    async fn echoes_last_user_turn() {
        let turns = vec![
            ChatTurn::system("be brief"),
            ChatTurn::user("first"),
            ChatTurn::assistant("ok"),
            ChatTurn::user("hello world"),
        ];
        let mut sink = CollectingSink::default();
        let full = DummyProvider.stream_chat(&turns, &mut sink).await.unwrap();

        assert_eq!(full, "[echo] hello world");
        assert_eq!(sink.tokens.concat(), full);
        assert!(sink.tokens.len() > 1);
        assert_eq!(sink.completed.as_deref(), Some("[echo] hello world"));
    }

    #[tokio::test]
    async fn no_user_turn_echoes_empty() {
        let turns = vec![ChatTurn::system("sys")];
        let mut sink = CollectingSink::default();
        let full = DummyProvider.stream_chat(&turns, &mut sink).await.unwrap();
        assert_eq!(full, "[echo] ");
    }
}
