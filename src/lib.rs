//! Conversational inference gateway.
//!
//! A long-lived server that accepts concurrent WebSocket sessions, enriches
//! each user turn with cached conversation context, streams the completion
//! back token-by-token, and reconciles its in-memory state against an
//! authoritative external history store.
//!
//! Layering, leaves first:
//!
//! - [`entities`] — value types for agents, chats, messages
//! - [`cache`] — the two LRU tiers (agents, chat sessions)
//! - [`agents`] — create-or-fetch façade over the agent cache
//! - [`llm`] — provider abstraction with a streaming token sink
//! - [`stream`] — word-boundary flush buffering between LLM and transport
//! - [`server`] — transport bind, connection registry, per-session loop
//! - [`supervisor`] — construction, background sweepers, shutdown

pub mod agents;
pub mod cache;
pub mod config;
pub mod entities;
pub mod error;
pub mod llm;
pub mod logger;
pub mod server;
pub mod stream;
pub mod supervisor;
