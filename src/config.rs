//! Recognized configuration keys (spec §6) plus the reward/reference
//! constants spec §9 asks implementers to expose as first-class config
//! rather than burying them in code.

use serde::{Deserialize, Serialize};

use crate::quantum::CollapseStrategyKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub result_ttl_s: u64,
    pub decision_ttl_s: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            result_ttl_s: 300,
            decision_ttl_s: 120,
            max_entries: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_tokens: usize,
    pub session_timeout_s: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            session_timeout_s: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub enabled: bool,
    pub alpha: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DqnConfig {
    pub state_size: usize,
    pub action_size: usize,
    pub hidden_layers: Vec<usize>,
    pub lr: f64,
    pub gamma: f64,
    pub eps_start: f64,
    pub eps_min: f64,
    pub eps_decay: f64,
    pub batch_size: usize,
    pub target_sync: u64,
    pub buffer_size: usize,
    pub priority: PriorityConfig,
    pub seed: u64,
    /// DQN-suggested action only overrides the router's decision when the
    /// agent's normalized confidence exceeds this threshold (Open Question
    /// resolution in SPEC_FULL.md §5: "DQN suggests, router validates").
    pub dqn_override_threshold: f64,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            state_size: 21,
            action_size: 12,
            hidden_layers: vec![64, 32],
            lr: 1e-3,
            gamma: 0.99,
            eps_start: 1.0,
            eps_min: 0.05,
            eps_decay: 0.995,
            batch_size: 32,
            target_sync: 100,
            buffer_size: 10_000,
            priority: PriorityConfig::default(),
            seed: 42,
            dqn_override_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantumConfig {
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub branch_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    pub cancel_grace_ms: u64,
    pub default_collapse: CollapseStrategyKind,
}

impl Default for QuantumConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: 64,
            branch_timeout_ms: 20_000,
            execute_timeout_ms: 30_000,
            cancel_grace_ms: 250,
            default_collapse: CollapseStrategyKind::BestScore,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub history_size: usize,
    pub cost_weight: f64,
    pub latency_weight: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            history_size: 256,
            cost_weight: 0.3,
            latency_weight: 0.2,
        }
    }
}

/// Reward function weights and reference constants (spec §4.9, §6).
/// `latency_ref_ms`/`cost_ref` are `L_ref`/`C_ref` from spec §4.9.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub w_quality: f64,
    pub w_speed: f64,
    pub w_cost: f64,
    pub latency_ref_ms: f64,
    pub cost_ref: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            w_quality: 0.5,
            w_speed: 0.3,
            w_cost: 0.2,
            latency_ref_ms: 30_000.0,
            cost_ref: 0.05,
        }
    }
}

/// The single configuration object `CoreContext` is built from (Design
/// Notes §9: "construct a single `CoreContext` value at startup and pass it
/// explicitly").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub cache: CacheConfig,
    pub context: ContextConfig,
    pub dqn: DqnConfig,
    pub quantum: QuantumConfig,
    pub router: RouterConfig,
    pub reward: RewardConfig,
}

impl CoreConfig {
    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reward_weights_sum_to_one() {
        let r = RewardConfig::default();
        assert!((r.w_quality + r.w_speed + r.w_cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn yaml_round_trip_overrides_defaults() {
        let yaml = "dqn:\n  state_size: 21\n  action_size: 6\n";
        let cfg = CoreConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.dqn.action_size, 6);
        assert_eq!(cfg.cache.max_entries, CacheConfig::default().max_entries);
    }
}
