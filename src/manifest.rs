//! Canonical capability manifest (SPEC_FULL.md §4.1).
//!
//! Grounded on `original_source/packages/core/monkey_coder/manifest.py` and
//! `quantum/quantum_models.py`, which build a `QUANTUM_MODEL_REGISTRY` of
//! `ModelConfig`/`ProviderConfig` dynamically from a manifest file at import
//! time. This resolves spec.md §9's open question — "the precise
//! action-index → (provider, model, strategy) table is not defined
//! canonically" — by building and versioning that table explicitly here,
//! the way the teacher's `agency_models.json` registry resolves model
//! aliases for `CandleProvider::get_or_load_model`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::routing::QuantumStrategy;

/// Version tag for the derived action table (spec §9 Open Question).
/// Bump whenever `default_manifest()` changes in a way that would reorder
/// or resize the action space, since `DqnConfig::action_size` must match.
pub const ACTION_TABLE_VERSION: &str = "manifest-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Code,
    Reasoning,
    Analysis,
    Writing,
    Testing,
    Documentation,
    Architecture,
    Debugging,
    Optimization,
    Speed,
    Accuracy,
    Creativity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub provider: String,
    pub cost_per_1k_tokens: f64,
    pub max_tokens: u32,
    pub capabilities: Vec<Capability>,
    pub context_window: u32,
    pub supports_streaming: bool,
    pub supports_functions: bool,
    /// Rough p50 latency used by the router's latency penalty and the
    /// quantum executor's best-score collapse (spec §4.6, §4.10).
    pub typical_latency_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub rate_limit_rpm: u32,
    pub supports_batch: bool,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub models: Vec<ModelConfig>,
    pub providers: Vec<ProviderConfig>,
}

impl Manifest {
    pub fn models_for_provider<'a>(&'a self, provider: &str) -> impl Iterator<Item = &'a ModelConfig> {
        self.models.iter().filter(move |m| m.provider == provider)
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.model_id == model_id)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }
}

/// Built-in manifest used when no on-disk manifest is configured. Five
/// providers with distinct capability profiles, enough to exercise
/// every `ComplexityLevel`/`QuantumStrategy` combination in tests.
pub fn default_manifest() -> Manifest {
    use Capability::*;
    Manifest {
        version: ACTION_TABLE_VERSION.to_string(),
        providers: vec![
            ProviderConfig { name: "openai".into(), rate_limit_rpm: 500, supports_batch: true, priority: 10 },
            ProviderConfig { name: "anthropic".into(), rate_limit_rpm: 60, supports_batch: false, priority: 9 },
            ProviderConfig { name: "google".into(), rate_limit_rpm: 60, supports_batch: false, priority: 8 },
            ProviderConfig { name: "groq".into(), rate_limit_rpm: 30, supports_batch: false, priority: 7 },
            ProviderConfig { name: "local".into(), rate_limit_rpm: 1000, supports_batch: true, priority: 1 },
        ],
        models: vec![
            ModelConfig {
                model_id: "gpt-4-turbo".into(), provider: "openai".into(),
                cost_per_1k_tokens: 0.01, max_tokens: 4096,
                capabilities: vec![Code, Reasoning, Architecture, Debugging],
                context_window: 128_000, supports_streaming: true, supports_functions: true,
                typical_latency_ms: 2500,
            },
            ModelConfig {
                model_id: "gpt-4o-mini".into(), provider: "openai".into(),
                cost_per_1k_tokens: 0.0006, max_tokens: 4096,
                capabilities: vec![Code, Speed, Accuracy],
                context_window: 128_000, supports_streaming: true, supports_functions: true,
                typical_latency_ms: 800,
            },
            ModelConfig {
                model_id: "claude-opus".into(), provider: "anthropic".into(),
                cost_per_1k_tokens: 0.015, max_tokens: 8192,
                capabilities: vec![Reasoning, Architecture, Writing, Analysis],
                context_window: 200_000, supports_streaming: true, supports_functions: true,
                typical_latency_ms: 3000,
            },
            ModelConfig {
                model_id: "claude-sonnet".into(), provider: "anthropic".into(),
                cost_per_1k_tokens: 0.003, max_tokens: 8192,
                capabilities: vec![Code, Reasoning, Debugging, Testing],
                context_window: 200_000, supports_streaming: true, supports_functions: true,
                typical_latency_ms: 1500,
            },
            ModelConfig {
                model_id: "gemini-pro".into(), provider: "google".into(),
                cost_per_1k_tokens: 0.0025, max_tokens: 8192,
                capabilities: vec![Analysis, Documentation, Writing],
                context_window: 1_000_000, supports_streaming: true, supports_functions: true,
                typical_latency_ms: 1800,
            },
            ModelConfig {
                model_id: "gemini-flash".into(), provider: "google".into(),
                cost_per_1k_tokens: 0.0003, max_tokens: 8192,
                capabilities: vec![Speed, Code],
                context_window: 1_000_000, supports_streaming: true, supports_functions: true,
                typical_latency_ms: 500,
            },
            ModelConfig {
                model_id: "llama-3.1-70b".into(), provider: "groq".into(),
                cost_per_1k_tokens: 0.0008, max_tokens: 8192,
                capabilities: vec![Speed, Code, Reasoning],
                context_window: 128_000, supports_streaming: true, supports_functions: false,
                typical_latency_ms: 350,
            },
            ModelConfig {
                model_id: "mixtral-8x7b".into(), provider: "local".into(),
                cost_per_1k_tokens: 0.0001, max_tokens: 8192,
                capabilities: vec![Speed, Creativity],
                context_window: 32_000, supports_streaming: true, supports_functions: false,
                typical_latency_ms: 900,
            },
        ],
    }
}

/// The (provider, model, strategy) pairing exposed to a branch (spec §3
/// `RoutingAction`). `strategy` drives prompt/param shaping in the quantum
/// executor and is independent of which model was picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingActionEntry {
    pub provider: String,
    pub model: String,
    pub strategy: QuantumStrategy,
}

/// Versioned, finite action space (spec §3: "Action space is a finite
/// enumeration of length A"). Built once from the manifest so `act(state)`
/// can map an index straight into a `(provider, model, strategy)` tuple
/// without any per-request derivation.
#[derive(Debug, Clone)]
pub struct RoutingActionTable {
    pub version: String,
    entries: Vec<RoutingActionEntry>,
}

impl RoutingActionTable {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let strategies = [
            QuantumStrategy::TaskOptimized,
            QuantumStrategy::Performance,
            QuantumStrategy::Balanced,
            QuantumStrategy::CostEfficient,
        ];
        let mut entries = Vec::new();
        // One entry per (top model per provider, strategy) keeps the table
        // finite and stable across manifest edits that only tweak cost/caps.
        let mut seen_providers: Vec<&str> = Vec::new();
        for model in &manifest.models {
            if seen_providers.contains(&model.provider.as_str()) {
                continue;
            }
            seen_providers.push(&model.provider);
            for strategy in strategies {
                entries.push(RoutingActionEntry {
                    provider: model.provider.clone(),
                    model: model.model_id.clone(),
                    strategy,
                });
            }
        }
        Self {
            version: manifest.version.clone(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RoutingActionEntry> {
        self.entries.get(index)
    }

    pub fn index_of(&self, entry: &RoutingActionEntry) -> Option<usize> {
        self.entries.iter().position(|e| e == entry)
    }

    pub fn entries(&self) -> &[RoutingActionEntry] {
        &self.entries
    }
}

/// Per-provider historical success rate, used both by the router's
/// capability scoring (spec §4.6) and the `RoutingState` feature vector
/// (spec §3). Tracked as a simple exponential moving average.
#[derive(Debug, Default, Clone)]
pub struct ProviderHistory {
    success_ema: HashMap<String, f64>,
}

impl ProviderHistory {
    const ALPHA: f64 = 0.2;

    pub fn record(&mut self, provider: &str, success: bool) {
        let reward = if success { 1.0 } else { 0.0 };
        let entry = self.success_ema.entry(provider.to_string()).or_insert(0.5);
        *entry = Self::ALPHA * reward + (1.0 - Self::ALPHA) * *entry;
    }

    pub fn success_rate(&self, provider: &str) -> f64 {
        *self.success_ema.get(provider).unwrap_or(&0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_table_is_nonempty_and_stable_in_order() {
        let manifest = default_manifest();
        let table = RoutingActionTable::from_manifest(&manifest);
        assert!(!table.is_empty());
        assert_eq!(table.version, ACTION_TABLE_VERSION);
        // one model per provider * 4 strategies
        assert_eq!(table.len(), manifest.providers.len() * 4);
    }

    #[test]
    fn history_moves_toward_recorded_outcomes() {
        let mut history = ProviderHistory::default();
        for _ in 0..20 {
            history.record("openai", true);
        }
        assert!(history.success_rate("openai") > 0.9);
    }
}
