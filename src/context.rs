//! `CoreContext` — the single object-graph root (spec §9 Design Notes:
//! "construct a single `CoreContext` value at startup and pass it
//! explicitly; the 'global' is only the root of this object graph").
//!
//! Grounded on the teacher's `orchestrator::context` module, which already
//! built one long-lived struct wiring cache, memory, and provider
//! collaborators together at startup.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::typed::{ResultCache, RoutingDecisionCache};
use crate::config::CoreConfig;
use crate::convo::ContextManager;
use crate::manifest::{default_manifest, Manifest, ProviderHistory, RoutingActionTable};
use crate::provider::ProviderRegistry;
use crate::quantum::{QuantumExecutor, QuantumExecutorConfig};
use crate::rl::{DqnAgent, DqnAgentConfig};
use crate::routing::AdvancedRouter;

/// Everything C1–C10 needs, constructed once and shared behind `Arc` by
/// [`crate::coordinator::OrchestrationCoordinator`] (C11).
pub struct CoreContext {
    pub config: CoreConfig,
    pub result_cache: ResultCache,
    pub routing_decision_cache: RoutingDecisionCache,
    pub context_manager: ContextManager,
    pub router: AdvancedRouter,
    pub dqn_agent: Mutex<DqnAgent>,
    pub quantum_executor: QuantumExecutor,
    pub provider_registry: Arc<dyn ProviderRegistry>,
    pub provider_history: Mutex<ProviderHistory>,
}

impl CoreContext {
    pub fn new(config: CoreConfig, manifest: Manifest, provider_registry: Arc<dyn ProviderRegistry>) -> Self {
        let result_cache = ResultCache::new(
            config.cache.enabled,
            config.cache.max_entries,
            Duration::from_secs(config.cache.result_ttl_s),
        );
        let routing_decision_cache = RoutingDecisionCache::new(
            config.cache.enabled,
            config.cache.max_entries,
            Duration::from_secs(config.cache.decision_ttl_s),
        );
        let context_manager = ContextManager::new(
            config.context.max_tokens,
            Duration::from_secs(config.context.session_timeout_s),
        );
        let router = AdvancedRouter::new(
            manifest.clone(),
            config.router.history_size,
            config.router.cost_weight,
            config.router.latency_weight,
        );

        let action_table = RoutingActionTable::from_manifest(&manifest);
        assert_eq!(
            action_table.len(),
            config.dqn.action_size,
            "configured dqn.action_size must match the manifest-derived action table length \
             (see SPEC_FULL.md §5 open-question resolution on action-table versioning)"
        );
        let dqn_config = DqnAgentConfig {
            state_size: config.dqn.state_size,
            action_size: config.dqn.action_size,
            gamma: config.dqn.gamma,
            eps_start: config.dqn.eps_start,
            eps_min: config.dqn.eps_min,
            eps_decay: config.dqn.eps_decay,
            batch_size: config.dqn.batch_size,
            target_sync_interval: config.dqn.target_sync,
            tau: None,
            seed: config.dqn.seed,
        };
        let dqn_agent = DqnAgent::new(
            dqn_config,
            action_table,
            &config.dqn.hidden_layers,
            config.dqn.lr,
            5.0,
            config.dqn.buffer_size,
            config.dqn.priority.enabled,
            config.dqn.priority.alpha,
        );

        let quantum_executor = QuantumExecutor::new(QuantumExecutorConfig {
            max_workers: config.quantum.max_workers,
            queue_capacity: config.quantum.queue_capacity,
            branch_timeout_ms: config.quantum.branch_timeout_ms,
            execute_timeout_ms: config.quantum.execute_timeout_ms,
            cancel_grace_ms: config.quantum.cancel_grace_ms,
            cost_lambda: config.router.cost_weight,
            latency_mu: config.router.latency_weight,
        });

        Self {
            config,
            result_cache,
            routing_decision_cache,
            context_manager,
            router,
            dqn_agent: Mutex::new(dqn_agent),
            quantum_executor,
            provider_registry,
            provider_history: Mutex::new(ProviderHistory::default()),
        }
    }

    /// Convenience constructor using the built-in manifest and a mock
    /// provider registry, for tests and local experimentation.
    pub fn with_defaults() -> Self {
        let manifest = default_manifest();
        let registry = Arc::new(crate::provider::MockProviderRegistry::new(manifest.clone()));
        let mut config = CoreConfig::default();
        config.dqn.action_size = RoutingActionTable::from_manifest(&manifest).len();
        Self::new(config, manifest, registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_defaults_builds_a_consistent_action_space() {
        let ctx = CoreContext::with_defaults();
        let agent = ctx.dqn_agent.lock().unwrap();
        assert_eq!(agent.action_table().len(), ctx.config.dqn.action_size);
    }
}
