//! Result & Routing-Decision caches (spec §4.2, `[C2-CACHE]`) — thin typed
//! wrappers over [`super::TtlLruCache`] keyed by prompt fingerprint.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{register_cache, CacheStats, TtlLruCache};
use crate::fingerprint::{result_fingerprint, routing_fingerprint};
use crate::routing::RoutingDecision;

/// Caches final answers keyed by (prompt, persona). May be disabled by
/// config, in which case `get` always misses and `set` is a no-op so the
/// rest of the core needs no branching (spec §4.2).
pub struct ResultCache {
    inner: Option<Arc<TtlLruCache<String>>>,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(enabled: bool, max_entries: usize, default_ttl: Duration) -> Self {
        let inner = enabled.then(|| {
            let cache = Arc::new(TtlLruCache::new("result_cache", max_entries, default_ttl));
            register_cache(cache.clone());
            cache
        });
        Self { inner, default_ttl }
    }

    pub fn get(&self, prompt: &str, persona: &str) -> Option<String> {
        let cache = self.inner.as_ref()?;
        cache.get(&result_fingerprint(prompt, persona))
    }

    pub fn set(&self, prompt: &str, persona: &str, value: String, ttl: Option<Duration>) {
        if let Some(cache) = self.inner.as_ref() {
            cache.set(
                &result_fingerprint(prompt, persona),
                value,
                Some(ttl.unwrap_or(self.default_ttl)),
            );
        }
    }

    pub fn stats(&self) -> Option<CacheStats> {
        self.inner.as_ref().map(|c| c.stats())
    }
}

/// Caches the routing decision for (prompt, context_type, complexity_level)
/// so repeated similar requests skip the router entirely.
pub struct RoutingDecisionCache {
    inner: Option<Arc<TtlLruCache<RoutingDecision>>>,
    default_ttl: Duration,
}

impl RoutingDecisionCache {
    pub fn new(enabled: bool, max_entries: usize, default_ttl: Duration) -> Self {
        let inner = enabled.then(|| {
            let cache = Arc::new(TtlLruCache::new(
                "routing_decision_cache",
                max_entries,
                default_ttl,
            ));
            register_cache(cache.clone());
            cache
        });
        Self { inner, default_ttl }
    }

    pub fn get(
        &self,
        prompt: &str,
        context_type: &str,
        complexity_level: &str,
    ) -> Option<RoutingDecision> {
        let cache = self.inner.as_ref()?;
        cache.get(&routing_fingerprint(prompt, context_type, complexity_level))
    }

    pub fn set(
        &self,
        prompt: &str,
        context_type: &str,
        complexity_level: &str,
        decision: RoutingDecision,
        ttl: Option<Duration>,
    ) {
        if let Some(cache) = self.inner.as_ref() {
            cache.set(
                &routing_fingerprint(prompt, context_type, complexity_level),
                decision,
                Some(ttl.unwrap_or(self.default_ttl)),
            );
        }
    }

    pub fn stats(&self) -> Option<CacheStats> {
        self.inner.as_ref().map(|c| c.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{ComplexityLevel, ContextType};

    fn sample_decision() -> RoutingDecision {
        RoutingDecision {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            persona: "developer".to_string(),
            complexity_score: 0.4,
            complexity_level: ComplexityLevel::Moderate,
            context_type: ContextType::CodeGeneration,
            capability_score: 0.8,
            confidence: 0.9,
            reasoning: "test".to_string(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn disabled_cache_always_misses_and_set_is_noop() {
        let cache = ResultCache::new(false, 10, Duration::from_secs(60));
        cache.set("p", "dev", "answer".to_string(), None);
        assert_eq!(cache.get("p", "dev"), None);
        assert!(cache.stats().is_none());
    }

    #[test]
    fn enabled_result_cache_round_trips() {
        let cache = ResultCache::new(true, 10, Duration::from_secs(60));
        cache.set("prompt", "dev", "answer".to_string(), None);
        assert_eq!(cache.get("prompt", "dev"), Some("answer".to_string()));
    }

    #[test]
    fn routing_decision_cache_round_trips() {
        let cache = RoutingDecisionCache::new(true, 10, Duration::from_secs(60));
        let decision = sample_decision();
        cache.set("p", "code_generation", "moderate", decision.clone(), None);
        let got = cache.get("p", "code_generation", "moderate").unwrap();
        assert_eq!(got.model, decision.model);
    }
}
