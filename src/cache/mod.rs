//! In-memory conversation-state caches.
//!
//! Two bounded LRU tiers: agent configurations ([`agent::AgentCache`]) and
//! chat sessions ([`chat::ChatCache`]). Neither is intrinsically
//! thread-safe; the supervisor wraps each in a single mutex. Contention is
//! dominated by LLM-call latency, so fine-grained locking buys nothing.

pub mod agent;
pub mod chat;
