//! Bounded LRU map from chat id to conversation session.
//!
//! Beyond plain LRU bookkeeping this cache owns the reconciliation protocol
//! against the authoritative external history store ([`ChatCache::sync_messages`]),
//! a size-based secondary eviction for runaway sessions, and sliding-window
//! context assembly for the LLM call.
//!
//! Token counts are estimated as `total_content_chars / 4` — deliberately
//! cheap, not exact.

use std::num::NonZeroUsize;

use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entities::{Chat, Message, ParticipantKind};
use crate::llm::ChatTurn;

/// Default capacity when `MAX_CHAT_CACHE_SIZE` is not set.
pub const DEFAULT_CHAT_CACHE_SIZE: usize = 100;
/// Incoming snapshots growing by more than this beyond the last synced count
/// are treated as a desync and fully reloaded.
pub const DESYNC_TOLERANCE: usize = 10;

/// How an external history snapshot is reconciled into the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Decide between full reload and incremental append per the desync rules.
    #[default]
    Auto,
    /// Replace the session history with the snapshot.
    Full,
    /// Append the snapshot suffix beyond the current length.
    Incremental,
}

/// Per-session bounds and the context window width.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_messages: usize,
    pub max_tokens: usize,
    pub context_window: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self { max_messages: 200, max_tokens: 50_000, context_window: 20 }
    }
}

// ── ChatSession ───────────────────────────────────────────────────────────────

/// One cached conversation: a [`Chat`] plus its insertion-ordered messages.
///
/// `last_message_count` is the history length as of the most recent external
/// sync; the delta against an incoming snapshot drives the desync detection.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub chat: Chat,
    messages: Vec<Message>,
    last_message_count: usize,
}

impl ChatSession {
    fn new(chat_id: &str, agent_id: &str, auth_id: &str) -> Self {
        Self {
            chat: Chat::new(chat_id, agent_id, auth_id),
            messages: Vec::new(),
            last_message_count: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message_count(&self) -> usize {
        self.last_message_count
    }

    /// Estimated token footprint of the stored history.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        chars / 4
    }

    fn push_message(&mut self, message: Message) {
        self.chat.updated_at = message.created_at;
        self.messages.push(message);
    }

    /// Replace history with a snapshot, enforcing `created_at` order.
    fn replace_history(&mut self, mut incoming: Vec<Message>) {
        incoming.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.last_message_count = incoming.len();
        self.messages = incoming;
        self.chat.updated_at = Utc::now();
    }

    /// Append the snapshot suffix beyond the current length.
    fn append_suffix(&mut self, incoming: &[Message]) {
        if incoming.len() > self.messages.len() {
            self.messages
                .extend_from_slice(&incoming[self.messages.len()..]);
            self.chat.updated_at = Utc::now();
        }
        self.last_message_count = self.messages.len();
    }
}

// ── ChatCache ─────────────────────────────────────────────────────────────────

/// Snapshot of cache counters for the `stats` command.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCacheStats {
    pub size: usize,
    pub capacity: usize,
    pub utilization: f64,
    pub hits: u64,
    pub misses: u64,
    pub full_reloads: u64,
    pub incremental_updates: u64,
    pub lru_evictions: u64,
    pub size_evictions: u64,
    pub total_evictions: u64,
}

pub struct ChatCache {
    sessions: LruCache<String, ChatSession>,
    limits: SessionLimits,
    hits: u64,
    misses: u64,
    full_reloads: u64,
    incremental_updates: u64,
    lru_evictions: u64,
    size_evictions: u64,
    total_evictions: u64,
}

enum SyncApplied {
    Reload,
    Append,
}

impl ChatCache {
    /// `capacity` of zero falls back to the default.
    pub fn new(capacity: usize, limits: SessionLimits) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(const { NonZeroUsize::new(DEFAULT_CHAT_CACHE_SIZE).unwrap() });
        Self {
            sessions: LruCache::new(capacity),
            limits,
            hits: 0,
            misses: 0,
            full_reloads: 0,
            incremental_updates: 0,
            lru_evictions: 0,
            size_evictions: 0,
            total_evictions: 0,
        }
    }

    /// Fetch the session for `chat_id`, creating an empty one when absent.
    ///
    /// A hit touches `last_accessed` and promotes the entry; a miss inserts
    /// as most-recently-used, evicting the LRU session at capacity.
    pub fn get_or_create(
        &mut self,
        chat_id: &str,
        agent_id: &str,
        auth_id: &str,
    ) -> &mut ChatSession {
        if self.sessions.contains(chat_id) {
            self.hits += 1;
        } else {
            self.misses += 1;
            let fresh = ChatSession::new(chat_id, agent_id, auth_id);
            self.insert_session(chat_id, fresh);
        }
        let session = self
            .sessions
            .get_mut(chat_id)
            .expect("session present after get_or_create");
        session.chat.last_accessed = Utc::now();
        session
    }

    fn insert_session(&mut self, chat_id: &str, session: ChatSession) {
        if let Some((evicted_id, _)) = self.sessions.push(chat_id.to_string(), session) {
            if evicted_id != chat_id {
                self.lru_evictions += 1;
                self.total_evictions += 1;
                debug!(%evicted_id, "chat session evicted (lru)");
            }
        }
    }

    /// Reconcile an authoritative external snapshot into the cached session.
    ///
    /// `Auto` reloads when the session is empty or the snapshot length falls
    /// outside `[last_message_count, last_message_count + DESYNC_TOLERANCE]`;
    /// otherwise it appends the suffix. Reloads re-sort by `created_at` and
    /// reset `last_message_count`. The per-session size bounds are enforced
    /// afterwards.
    pub fn sync_messages(
        &mut self,
        chat_id: &str,
        agent_id: &str,
        auth_id: &str,
        incoming: &[Message],
        mode: SyncMode,
    ) -> &ChatSession {
        let applied = {
            let session = self.get_or_create(chat_id, agent_id, auth_id);
            let reload = match mode {
                SyncMode::Full => true,
                SyncMode::Incremental => false,
                SyncMode::Auto => {
                    if session.messages.is_empty() {
                        true
                    } else if incoming.len() < session.last_message_count
                        || incoming.len() > session.last_message_count + DESYNC_TOLERANCE
                    {
                        debug!(
                            %chat_id,
                            cached = session.messages.len(),
                            last_synced = session.last_message_count,
                            incoming = incoming.len(),
                            "history desync detected — full reload"
                        );
                        true
                    } else {
                        false
                    }
                }
            };
            if reload {
                session.replace_history(incoming.to_vec());
                SyncApplied::Reload
            } else {
                session.append_suffix(incoming);
                SyncApplied::Append
            }
        };
        match applied {
            SyncApplied::Reload => self.full_reloads += 1,
            SyncApplied::Append => self.incremental_updates += 1,
        }

        self.enforce_session_bounds(chat_id, incoming);

        self.sessions
            .peek(chat_id)
            .expect("session present after sync")
    }

    /// Append a freshly minted message, creating the session when absent.
    ///
    /// Deliberately skips the size bounds: appended turns are the model's own
    /// output and the next external sync reconciles them.
    pub fn add_new_message(&mut self, message: Message) {
        let (agent_id, auth_id) = match message.sender_kind {
            ParticipantKind::Auth => (message.receiver_id.clone(), message.sender_id.clone()),
            ParticipantKind::Agent => (message.sender_id.clone(), message.receiver_id.clone()),
        };
        let chat_id = message.chat_id.clone();
        let session = self.get_or_create(&chat_id, &agent_id, &auth_id);
        session.push_message(message);
    }

    /// Build the typed turn sequence for an LLM call: the system prompt,
    /// then the session tail (last `context_window` messages when `sliding`).
    pub fn assemble_context(
        &mut self,
        chat_id: &str,
        agent_id: &str,
        auth_id: &str,
        system_prompt: &str,
        sliding: bool,
    ) -> Vec<ChatTurn> {
        let window = self.limits.context_window;
        let session = self.get_or_create(chat_id, agent_id, auth_id);
        let messages = session.messages();
        let tail = if sliding {
            &messages[messages.len().saturating_sub(window)..]
        } else {
            messages
        };

        let mut turns = Vec::with_capacity(tail.len() + 1);
        turns.push(ChatTurn::system(system_prompt));
        for message in tail {
            turns.push(match message.sender_kind {
                ParticipantKind::Agent => ChatTurn::assistant(&message.content),
                ParticipantKind::Auth => ChatTurn::user(&message.content),
            });
        }
        turns
    }

    /// Evict and rebuild a session that outgrew its bounds.
    ///
    /// Lossy by design: the rebuilt session keeps only the last
    /// `context_window` messages of the incoming snapshot. Never fails.
    fn enforce_session_bounds(&mut self, chat_id: &str, snapshot: &[Message]) {
        let (over, agent_id, auth_id) = match self.sessions.peek(chat_id) {
            Some(s) => (
                s.messages.len() > self.limits.max_messages
                    || s.estimated_tokens() > self.limits.max_tokens,
                s.chat.agent_id.clone(),
                s.chat.auth_id.clone(),
            ),
            None => return,
        };
        if !over {
            return;
        }

        self.size_evictions += 1;
        self.total_evictions += 1;
        self.sessions.pop(chat_id);

        let mut tail: Vec<Message> = snapshot.to_vec();
        tail.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let keep_from = tail.len().saturating_sub(self.limits.context_window);
        let tail = tail.split_off(keep_from);

        warn!(
            %chat_id,
            kept = tail.len(),
            "session over bounds — rebuilt from snapshot tail"
        );

        let mut fresh = ChatSession::new(chat_id, &agent_id, &auth_id);
        fresh.last_message_count = tail.len();
        fresh.messages = tail;
        self.insert_session(chat_id, fresh);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Non-promoting read, for tests and stats.
    pub fn peek(&self, chat_id: &str) -> Option<&ChatSession> {
        self.sessions.peek(chat_id)
    }

    pub fn stats(&self) -> ChatCacheStats {
        let capacity = self.sessions.cap().get();
        ChatCacheStats {
            size: self.sessions.len(),
            capacity,
            utilization: self.sessions.len() as f64 / capacity as f64,
            hits: self.hits,
            misses: self.misses,
            full_reloads: self.full_reloads,
            incremental_updates: self.incremental_updates,
            lru_evictions: self.lru_evictions,
            size_evictions: self.size_evictions,
            total_evictions: self.total_evictions,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn cache(capacity: usize) -> ChatCache {
        ChatCache::new(capacity, SessionLimits::default())
    }

    /// A user message with `created_at` offset `i` seconds from a fixed base.
    fn msg(i: i64, content: &str) -> Message {
        let base = Utc::now() - ChronoDuration::hours(1);
        Message {
            message_id: format!("m{i}"),
            sender_id: "u1".into(),
            sender_kind: ParticipantKind::Auth,
            receiver_id: "a1".into(),
            receiver_kind: ParticipantKind::Agent,
            chat_id: "c1".into(),
            content_id: format!("mc{i}"),
            content: content.to_string(),
            created_at: base + ChronoDuration::seconds(i),
        }
    }

    fn msgs(range: std::ops::Range<i64>) -> Vec<Message> {
        range.map(|i| msg(i, &format!("msg {i}"))).collect()
    }

    fn is_sorted(session: &ChatSession) -> bool {
        session
            .messages()
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at)
    }

    #[test]
    fn get_or_create_counts_hits_and_misses() {
        let mut cache = cache(10);
        cache.get_or_create("c1", "a1", "u1");
        cache.get_or_create("c1", "a1", "u1");
        cache.get_or_create("c2", "a1", "u1");

        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 2);
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let mut cache = cache(2);
        cache.get_or_create("c1", "a1", "u1");
        cache.get_or_create("c2", "a1", "u1");
        cache.get_or_create("c3", "a1", "u1");

        assert!(cache.peek("c1").is_none());
        assert!(cache.peek("c2").is_some());
        let stats = cache.stats();
        assert_eq!(stats.lru_evictions, 1);
        assert_eq!(stats.total_evictions, 1);
    }

    #[test]
    fn full_sync_replaces_and_sorts() {
        let mut cache = cache(10);
        // Deliver the snapshot out of order.
        let mut incoming = msgs(0..5);
        incoming.reverse();

        let session = cache.sync_messages("c1", "a1", "u1", &incoming, SyncMode::Full);
        assert_eq!(session.messages().len(), 5);
        assert_eq!(session.last_message_count(), 5);
        assert!(is_sorted(session));
        assert_eq!(session.messages()[0].content, "msg 0");
    }

    #[test]
    fn full_sync_is_idempotent() {
        let mut cache = cache(10);
        let incoming = msgs(0..5);
        let first: Vec<String> = cache
            .sync_messages("c1", "a1", "u1", &incoming, SyncMode::Full)
            .messages()
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        let second: Vec<String> = cache
            .sync_messages("c1", "a1", "u1", &incoming, SyncMode::Full)
            .messages()
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn auto_sync_empty_session_reloads() {
        let mut cache = cache(10);
        cache.sync_messages("c1", "a1", "u1", &msgs(0..3), SyncMode::Auto);
        assert_eq!(cache.stats().full_reloads, 1);
        assert_eq!(cache.peek("c1").unwrap().messages().len(), 3);
    }

    #[test]
    fn auto_sync_appends_suffix_within_tolerance() {
        let mut cache = cache(10);
        cache.sync_messages("c1", "a1", "u1", &msgs(0..3), SyncMode::Auto);
        // Grown by 2 — within tolerance, incremental.
        let session = cache.sync_messages("c1", "a1", "u1", &msgs(0..5), SyncMode::Auto);
        assert_eq!(session.messages().len(), 5);
        assert_eq!(session.last_message_count(), 5);
        assert_eq!(cache.stats().incremental_updates, 1);
        assert_eq!(cache.stats().full_reloads, 1);
    }

    #[test]
    fn auto_sync_prior_messages_stay_a_prefix_after_incremental() {
        let mut cache = cache(10);
        cache.sync_messages("c1", "a1", "u1", &msgs(0..3), SyncMode::Auto);
        let before: Vec<String> = cache
            .peek("c1")
            .unwrap()
            .messages()
            .iter()
            .map(|m| m.message_id.clone())
            .collect();

        let session = cache.sync_messages("c1", "a1", "u1", &msgs(0..6), SyncMode::Auto);
        let after: Vec<String> = session.messages().iter().map(|m| m.message_id.clone()).collect();
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[test]
    fn auto_sync_shrunk_snapshot_forces_reload() {
        // Desync scenario: cache holds 5, authoritative store says 3.
        let mut cache = cache(10);
        cache.sync_messages("c1", "a1", "u1", &msgs(0..5), SyncMode::Full);

        let session = cache.sync_messages("c1", "a1", "u1", &msgs(0..3), SyncMode::Auto);
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.last_message_count(), 3);
        assert_eq!(cache.stats().full_reloads, 2);
    }

    #[test]
    fn auto_sync_overgrown_snapshot_forces_reload() {
        let mut cache = cache(10);
        cache.sync_messages("c1", "a1", "u1", &msgs(0..3), SyncMode::Full);
        // Grown by DESYNC_TOLERANCE + 1 — beyond incremental reach.
        let grown = msgs(0..(3 + DESYNC_TOLERANCE as i64 + 1));
        cache.sync_messages("c1", "a1", "u1", &grown, SyncMode::Auto);
        assert_eq!(cache.stats().full_reloads, 2);
        assert_eq!(cache.stats().incremental_updates, 0);
    }

    #[test]
    fn auto_sync_twice_with_same_snapshot_is_noop() {
        let mut cache = cache(10);
        let incoming = msgs(0..4);
        cache.sync_messages("c1", "a1", "u1", &incoming, SyncMode::Auto);
        let before: Vec<String> = cache
            .peek("c1")
            .unwrap()
            .messages()
            .iter()
            .map(|m| m.message_id.clone())
            .collect();

        let session = cache.sync_messages("c1", "a1", "u1", &incoming, SyncMode::Auto);
        let after: Vec<String> = session.messages().iter().map(|m| m.message_id.clone()).collect();
        assert_eq!(before, after);
        assert_eq!(session.last_message_count(), 4);
    }

    #[test]
    fn oversize_sync_rebuilds_from_snapshot_tail() {
        // M_msgs = 10, W = 3: a 15-message snapshot trips the size eviction
        // and the rebuilt session keeps the last 3.
        let limits = SessionLimits { max_messages: 10, max_tokens: 50_000, context_window: 3 };
        let mut cache = ChatCache::new(10, limits);

        let session = cache.sync_messages("c1", "a1", "u1", &msgs(0..15), SyncMode::Full);
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[0].content, "msg 12");
        assert_eq!(session.messages()[2].content, "msg 14");
        assert!(is_sorted(session));

        let stats = cache.stats();
        assert_eq!(stats.size_evictions, 1);
        assert_eq!(stats.total_evictions, 1);
    }

    #[test]
    fn oversize_boundary_is_exclusive() {
        // Exactly M_msgs messages is fine; M_msgs + 1 evicts.
        let limits = SessionLimits { max_messages: 5, max_tokens: 50_000, context_window: 2 };
        let mut cache = ChatCache::new(10, limits);

        cache.sync_messages("c1", "a1", "u1", &msgs(0..5), SyncMode::Full);
        assert_eq!(cache.stats().size_evictions, 0);

        cache.sync_messages("c1", "a1", "u1", &msgs(0..6), SyncMode::Full);
        assert_eq!(cache.stats().size_evictions, 1);
        assert_eq!(cache.peek("c1").unwrap().messages().len(), 2);
    }

    #[test]
    fn token_bound_triggers_size_eviction() {
        let limits = SessionLimits { max_messages: 200, max_tokens: 10, context_window: 2 };
        let mut cache = ChatCache::new(10, limits);

        let incoming = vec![msg(0, &"x".repeat(100))];
        cache.sync_messages("c1", "a1", "u1", &incoming, SyncMode::Full);
        assert_eq!(cache.stats().size_evictions, 1);
    }

    #[test]
    fn add_new_message_skips_size_bounds() {
        let limits = SessionLimits { max_messages: 2, max_tokens: 50_000, context_window: 2 };
        let mut cache = ChatCache::new(10, limits);

        for i in 0..5 {
            cache.add_new_message(msg(i, "hi"));
        }
        // No sync ran, so nothing was evicted.
        assert_eq!(cache.peek("c1").unwrap().messages().len(), 5);
        assert_eq!(cache.stats().size_evictions, 0);
    }

    #[test]
    fn assemble_context_sliding_window() {
        let limits = SessionLimits { max_messages: 200, max_tokens: 50_000, context_window: 4 };
        let mut cache = ChatCache::new(10, limits);
        cache.sync_messages("c1", "a1", "u1", &msgs(0..10), SyncMode::Full);

        let turns = cache.assemble_context("c1", "a1", "u1", "be brief", true);
        // System turn plus at most W history turns.
        assert_eq!(turns.len(), 5);
        assert_eq!(turns[0].role, crate::llm::Role::System);
        assert_eq!(turns[0].content, "be brief");
        assert_eq!(turns[1].content, "msg 6");
        assert_eq!(turns[4].content, "msg 9");
    }

    #[test]
    fn assemble_context_full_history() {
        let mut cache = cache(10);
        cache.sync_messages("c1", "a1", "u1", &msgs(0..10), SyncMode::Full);
        let turns = cache.assemble_context("c1", "a1", "u1", "sys", false);
        assert_eq!(turns.len(), 11);
    }

    #[test]
    fn assemble_context_maps_sender_kinds_to_roles() {
        let mut cache = cache(10);
        let mut reply = msg(1, "hello back");
        reply.sender_id = "a1".into();
        reply.sender_kind = ParticipantKind::Agent;
        reply.receiver_id = "u1".into();
        reply.receiver_kind = ParticipantKind::Auth;

        cache.add_new_message(msg(0, "hello"));
        cache.add_new_message(reply);

        let turns = cache.assemble_context("c1", "a1", "u1", "sys", true);
        assert_eq!(turns[1].role, crate::llm::Role::User);
        assert_eq!(turns[2].role, crate::llm::Role::Assistant);
    }

    #[test]
    fn messages_stay_sorted_across_operations() {
        let mut cache = cache(10);
        let mut incoming = msgs(0..6);
        incoming.swap(0, 5);
        cache.sync_messages("c1", "a1", "u1", &incoming, SyncMode::Full);
        cache.add_new_message(msg(100, "latest"));
        assert!(is_sorted(cache.peek("c1").unwrap()));
    }
}
