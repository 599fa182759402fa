//! Token accumulator between the LLM stream and the transport.
//!
//! Buffers model tokens and flushes them as `partial: true` frames on word
//! boundaries, under size-and-delay constraints; the terminal frame carries
//! the full response with freshly minted message identifiers.
//!
//! A dead connection stops the outbound frames but never the accumulation:
//! the session handler still persists the completed response to the cache.

use tokio::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::llm::TokenSink;
use crate::server::frames::{Outbound, OutboundTx, ServerFrame};

/// Characters a partial flush may end on.
pub const WORD_BOUNDARIES: &[char] = &[' ', '\t', '\n', '.', ',', '!', '?', ';', ':', '-'];

pub struct StreamBuffer {
    tx: OutboundTx,
    chat_id: String,
    agent_id: String,
    full_response: String,
    buffer: String,
    last_send: Instant,
    min_chunk: usize,
    max_delay: Duration,
    minted: Option<(String, String)>,
}

impl StreamBuffer {
    pub fn new(tx: OutboundTx, chat_id: &str, agent_id: &str, config: StreamConfig) -> Self {
        Self {
            tx,
            chat_id: chat_id.to_string(),
            agent_id: agent_id.to_string(),
            full_response: String::new(),
            buffer: String::new(),
            last_send: Instant::now(),
            min_chunk: config.min_chunk,
            max_delay: config.max_delay,
            minted: None,
        }
    }

    /// The accumulated response so far (complete after `on_complete`).
    pub fn full_response(&self) -> &str {
        &self.full_response
    }

    /// `(message_id, content_id)` minted for the terminal frame.
    /// `None` until `on_complete` has run.
    pub fn minted_ids(&self) -> Option<(&str, &str)> {
        self.minted
            .as_ref()
            .map(|(m, c)| (m.as_str(), c.as_str()))
    }

    fn should_flush(&self, now: Instant) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        if now.duration_since(self.last_send) >= self.max_delay {
            return true;
        }
        let boundary = self
            .buffer
            .chars()
            .next_back()
            .is_some_and(|c| WORD_BOUNDARIES.contains(&c));
        if self.buffer.len() >= self.min_chunk && boundary {
            return true;
        }
        // Hard ceiling: ship even mid-word.
        self.buffer.len() >= 2 * self.min_chunk
    }

    fn send(&self, frame: ServerFrame) {
        if self.tx.send(Outbound::Frame(frame)).is_err() {
            warn!(chat_id = %self.chat_id, "client gone — dropping stream frame");
        }
    }

    fn flush_partial(&mut self, now: Instant) {
        let content = std::mem::take(&mut self.buffer);
        self.send(ServerFrame::StreamToken {
            chat_uuid: self.chat_id.clone(),
            agent_uuid: self.agent_id.clone(),
            content,
            partial: true,
        });
        self.last_send = now;
    }
}

impl TokenSink for StreamBuffer {
    async fn on_token(&mut self, token: &str) {
        self.full_response.push_str(token);
        self.buffer.push_str(token);

        let now = Instant::now();
        if self.should_flush(now) {
            self.flush_partial(now);
        }
    }

    async fn on_complete(&mut self, _full_response: &str) {
        if !self.buffer.is_empty() {
            self.flush_partial(Instant::now());
        }

        let message_id = Uuid::new_v4().to_string();
        let content_id = Uuid::new_v4().to_string();
        self.send(ServerFrame::StreamEnd {
            chat_uuid: self.chat_id.clone(),
            agent_uuid: self.agent_id.clone(),
            content: self.full_response.clone(),
            partial: false,
            message_uuid: message_id.clone(),
            message_content_uuid: content_id.clone(),
        });
        debug!(
            chat_id = %self.chat_id,
            response_chars = self.full_response.chars().count(),
            "stream complete"
        );
        self.minted = Some((message_id, content_id));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
