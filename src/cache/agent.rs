//! Bounded LRU map from agent id to agent configuration.
//!
//! Eviction is recency-ordered with no TTL: a `get` or re-`put` promotes the
//! entry to most-recently-used, and inserting at capacity drops the LRU tail.

use std::num::NonZeroUsize;

use chrono::Utc;
use lru::LruCache;
use serde::Serialize;
use tracing::debug;

use crate::entities::Agent;

/// Default capacity when `MAX_AGENT_CACHE_SIZE` is not set.
pub const DEFAULT_AGENT_CACHE_SIZE: usize = 50;

/// Snapshot of cache occupancy for the `stats` command.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCacheStats {
    pub size: usize,
    pub capacity: usize,
    pub utilization: f64,
    pub total_evictions: u64,
}

pub struct AgentCache {
    entries: LruCache<String, Agent>,
    evictions: u64,
}

impl AgentCache {
    /// `capacity` of zero falls back to the default.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(const { NonZeroUsize::new(DEFAULT_AGENT_CACHE_SIZE).unwrap() });
        Self { entries: LruCache::new(capacity), evictions: 0 }
    }

    /// Fetch by id, touching `last_used` and promoting to most-recently-used.
    pub fn get(&mut self, agent_id: &str) -> Option<Agent> {
        let agent = self.entries.get_mut(agent_id)?;
        agent.last_used = Utc::now();
        Some(agent.clone())
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.entries.contains(agent_id)
    }

    /// Insert or replace, promoting to most-recently-used. At capacity the
    /// least-recently-used entry is dropped and counted.
    pub fn put(&mut self, agent: Agent) {
        let agent_id = agent.agent_id.clone();
        if let Some((evicted_id, _)) = self.entries.push(agent_id.clone(), agent) {
            if evicted_id != agent_id {
                self.evictions += 1;
                debug!(%evicted_id, "agent evicted (lru)");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> AgentCacheStats {
        let capacity = self.entries.cap().get();
        AgentCacheStats {
            size: self.entries.len(),
            capacity,
            utilization: self.entries.len() as f64 / capacity as f64,
            total_evictions: self.evictions,
        }
    }
}
