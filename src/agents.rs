//! Create-or-fetch façade over the agent cache.
//!
//! The session handler never touches the cache directly: it hands the
//! manager whatever agent fields the frame carried and gets back a resolved
//! [`Agent`], freshly constructed when the id is unknown.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::cache::agent::{AgentCache, AgentCacheStats};
use crate::entities::{Agent, AgentConfig, AgentPreset, AgentSystem};

/// Agent fields supplied by a chat-turn frame. Everything except `auth_id`
/// is optional; absent values get fallbacks at construction time.
#[derive(Debug, Clone, Default)]
pub struct AgentSpec {
    pub agent_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub system_prompt: Option<String>,
}

/// Default model parameters stamped into every fresh agent preset.
#[derive(Debug, Clone, Copy)]
pub struct AgentDefaults {
    pub temperature: f32,
    pub max_tokens: u32,
}

pub struct AgentManager {
    cache: Mutex<AgentCache>,
    defaults: AgentDefaults,
}

impl AgentManager {
    pub fn new(capacity: usize, defaults: AgentDefaults) -> Self {
        Self { cache: Mutex::new(AgentCache::new(capacity)), defaults }
    }

    /// Resolve `spec.agent_id` against the cache, constructing and inserting
    /// a fresh agent when absent. Returns an owned copy either way.
    pub fn get_or_create(&self, auth_id: &str, spec: AgentSpec) -> Agent {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(id) = spec.agent_id.as_deref() {
            if let Some(agent) = cache.get(id) {
                return agent;
            }
        }

        let now = Utc::now();
        let agent = Agent {
            agent_id: spec
                .agent_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: spec.name.unwrap_or_else(|| "assistant".to_string()),
            description: spec.description.unwrap_or_default(),
            auth_id: auth_id.to_string(),
            category_id: spec.category_id,
            config: AgentConfig {
                config_id: Uuid::new_v4().to_string(),
                system: AgentSystem {
                    system_id: Uuid::new_v4().to_string(),
                    preset: AgentPreset {
                        system_prompt: spec.system_prompt,
                        temperature: Some(self.defaults.temperature),
                        max_tokens: Some(self.defaults.max_tokens),
                    },
                },
            },
            created_at: now,
            last_used: now,
        };

        info!(
            agent_id = %agent.agent_id,
            auth_id = %agent.auth_id,
            name = %agent.name,
            "agent created"
        );
        cache.put(agent.clone());
        agent
    }

    pub fn stats(&self) -> AgentCacheStats {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::DEFAULT_SYSTEM_PROMPT;

    fn manager(capacity: usize) -> AgentManager {
        AgentManager::new(capacity, AgentDefaults { temperature: 0.2, max_tokens: 500 })
    }

    #[test]
    fn creates_with_supplied_id_and_prompt() {
        let m = manager(10);
        let agent = m.get_or_create(
            "u1",
            AgentSpec {
                agent_id: Some("a1".into()),
                name: Some("translator".into()),
                system_prompt: Some("Translate to German.".into()),
                ..AgentSpec::default()
            },
        );
        assert_eq!(agent.agent_id, "a1");
        assert_eq!(agent.name, "translator");
        assert_eq!(agent.get_system_prompt(), "Translate to German.");
        assert_eq!(agent.config.system.preset.temperature, Some(0.2));
    }

    #[test]
    fn second_call_returns_cached_agent() {
        let m = manager(10);
        let first = m.get_or_create(
            "u1",
            AgentSpec { agent_id: Some("a1".into()), name: Some("one".into()), ..AgentSpec::default() },
        );
        // Different name in the second frame must not rebuild the agent.
        let second = m.get_or_create(
            "u1",
            AgentSpec { agent_id: Some("a1".into()), name: Some("two".into()), ..AgentSpec::default() },
        );
        assert_eq!(second.name, "one");
        assert_eq!(second.config.config_id, first.config.config_id);
    }

    #[test]
    fn absent_id_mints_one() {
        let m = manager(10);
        let a = m.get_or_create("u1", AgentSpec::default());
        let b = m.get_or_create("u1", AgentSpec::default());
        assert_ne!(a.agent_id, b.agent_id);
        assert_eq!(a.get_system_prompt(), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn eviction_counted_through_manager() {
        let m = manager(2);
        for id in ["a1", "a2", "a3"] {
            m.get_or_create(
                "u1",
                AgentSpec { agent_id: Some(id.into()), ..AgentSpec::default() },
            );
        }
        let stats = m.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.total_evictions, 1);
    }
}
