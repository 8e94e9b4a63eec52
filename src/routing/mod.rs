//! Advanced Router (spec §4.6, `[C6-ROUTING]`) and its data model (spec §3).
//!
//! Grounded on the teacher's `orchestrator::router::Router`, which already
//! combined a complexity heuristic with a capability table to pick a model;
//! this version plugs in the full C4/C5 pipeline and the canonical manifest
//! (`crate::manifest`) in place of the teacher's ad hoc scoring.

pub mod complexity;
pub mod persona;

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::manifest::{Manifest, ProviderHistory};

pub use complexity::{analyze_complexity, ComplexityInputs, ComplexityLevel, ComplexityResult};
pub use persona::{parse_persona, ParsedPersona, DEFAULT_PERSONA};

/// One-hot context classification (spec §3: "8 slots").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    CodeGeneration,
    CodeReview,
    Debugging,
    Documentation,
    Testing,
    Architecture,
    Security,
    Other,
}

impl ContextType {
    pub const ALL: [ContextType; 8] = [
        ContextType::CodeGeneration,
        ContextType::CodeReview,
        ContextType::Debugging,
        ContextType::Documentation,
        ContextType::Testing,
        ContextType::Architecture,
        ContextType::Security,
        ContextType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::CodeGeneration => "code_generation",
            ContextType::CodeReview => "code_review",
            ContextType::Debugging => "debugging",
            ContextType::Documentation => "documentation",
            ContextType::Testing => "testing",
            ContextType::Architecture => "architecture",
            ContextType::Security => "security",
            ContextType::Other => "other",
        }
    }

    /// Keyword-based classification (spec §4.6 step 3: "by keyword/signal
    /// matching (produces one-hot bits)"). First matching rule wins;
    /// `Other` is the fallback.
    pub fn classify(prompt: &str) -> ContextType {
        let p = prompt.to_lowercase();
        let any = |words: &[&str]| words.iter().any(|w| p.contains(w));
        if any(&["vulnerab", "exploit", "cve", "injection", "encrypt", "auth bypass"]) {
            ContextType::Security
        } else if any(&["error", "exception", "traceback", "bug", "crash", "debug", "stack trace"]) {
            ContextType::Debugging
        } else if any(&["unit test", "test case", "assert", "pytest", "test coverage", "write tests"]) {
            ContextType::Testing
        } else if any(&["review this", "code review", "pr feedback", "review the"]) {
            ContextType::CodeReview
        } else if any(&["architecture", "design a system", "distributed system", "scalability", "system design"]) {
            ContextType::Architecture
        } else if any(&["document", "readme", "docstring", "write docs", "api reference"]) {
            ContextType::Documentation
        } else if any(&["implement", "write a function", "write code", "create a", "build a", "fn ", "class "]) {
            ContextType::CodeGeneration
        } else {
            ContextType::Other
        }
    }
}

/// Provider slot count baked into [`RoutingState`] (spec §3: "5 slots").
pub const PROVIDER_SLOTS: usize = 5;
/// Total feature-vector length (spec §3: "length 21 in baseline").
pub const ROUTING_STATE_LEN: usize = 21;

/// Fixed-length numeric feature vector fed to the DQN (spec §3
/// `RoutingState`). Layout: [0] complexity, [1..9) one-hot context type (8),
/// [9..14) provider availability bits (5), [14..19) normalized historical
/// success per provider (5), [19..21) resource weights excluding quality
/// (quality is implied: cost+time+quality=1, cost and time stored, quality
/// derived) -- see [`RoutingState::new`] for the exact packing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingState {
    pub features: [f64; ROUTING_STATE_LEN],
}

impl RoutingState {
    /// Builds a state vector, normalizing the resource weights so they sum
    /// to 1 (spec §3 invariant) even if the caller passes raw preferences.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        complexity: f64,
        context_type: ContextType,
        provider_availability: [bool; PROVIDER_SLOTS],
        provider_success: [f64; PROVIDER_SLOTS],
        cost_weight: f64,
        time_weight: f64,
        quality_weight: f64,
        user_preference_strength: f64,
    ) -> Self {
        let mut features = [0.0; ROUTING_STATE_LEN];
        features[0] = complexity.max(0.0).min(1.0);

        for (i, ct) in ContextType::ALL.iter().enumerate() {
            features[1 + i] = if *ct == context_type { 1.0 } else { 0.0 };
        }

        for i in 0..PROVIDER_SLOTS {
            features[9 + i] = if provider_availability[i] { 1.0 } else { 0.0 };
        }

        for i in 0..PROVIDER_SLOTS {
            features[14 + i] = provider_success[i].max(0.0).min(1.0);
        }

        let total = (cost_weight + time_weight + quality_weight).max(1e-9);
        features[19] = (cost_weight / total).max(0.0);
        features[20] = (time_weight / total).max(0.0);
        // quality weight is implicitly 1 - cost - time and is not stored
        // separately; the invariant (sum to 1) holds by construction.
        let _ = user_preference_strength;

        Self { features }
    }

    pub fn context_type(&self) -> ContextType {
        ContextType::ALL
            .into_iter()
            .enumerate()
            .find(|(i, _)| self.features[1 + i] > 0.5)
            .map(|(_, ct)| ct)
            .unwrap_or(ContextType::Other)
    }

    pub fn is_valid(&self) -> bool {
        if self.features.iter().any(|f| !f.is_finite()) {
            return false;
        }
        let one_hot_sum: f64 = self.features[1..9].iter().sum();
        (one_hot_sum - 1.0).abs() < 1e-6
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantumStrategy {
    TaskOptimized,
    Performance,
    Balanced,
    CostEfficient,
}

impl QuantumStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantumStrategy::TaskOptimized => "task_optimized",
            QuantumStrategy::Performance => "performance",
            QuantumStrategy::Balanced => "balanced",
            QuantumStrategy::CostEfficient => "cost_efficient",
        }
    }
}

/// A concrete routing choice (spec §3 `RoutingAction`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingAction {
    pub provider: String,
    pub model: String,
    pub strategy: QuantumStrategy,
}

/// Output of [`AdvancedRouter::route_request`] (spec §3 `RoutingDecision`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub provider: String,
    pub model: String,
    pub persona: String,
    pub complexity_score: f64,
    pub complexity_level: ComplexityLevel,
    pub context_type: ContextType,
    pub capability_score: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Per-persona weighting of manifest [`crate::manifest::Capability`] tags,
/// used by the capability-score formula (spec §4.6 step 4). Grounded on
/// `original_source/packages/core/monkey_coder/manifest.py`'s persona
/// capability weighting table.
fn persona_capability_weight(persona: &str, capability: crate::manifest::Capability) -> f64 {
    use crate::manifest::Capability::*;
    match (persona, capability) {
        ("architect", Architecture) => 1.0,
        ("architect", Reasoning) => 0.6,
        ("security_analyst", _) if capability == Code => 0.5,
        ("tester", Testing) => 1.0,
        ("tester", Debugging) => 0.5,
        ("technical_writer", Documentation) => 1.0,
        ("technical_writer", Writing) => 0.8,
        ("reviewer", Analysis) => 0.8,
        ("reviewer", Debugging) => 0.6,
        ("performance_expert", Optimization) => 1.0,
        ("performance_expert", Speed) => 0.7,
        ("developer", Code) => 1.0,
        ("developer", Debugging) => 0.5,
        (_, Code) => 0.4,
        _ => 0.15,
    }
}

#[derive(Debug, Clone)]
struct RoutingInput {
    request_prompt: String,
    file_count: usize,
    history_depth: usize,
    caller_persona: Option<String>,
    cost_weight: f64,
    latency_weight: f64,
}

/// Request payload for [`AdvancedRouter::route_request`].
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub prompt: String,
    pub file_count: usize,
    pub history_depth: usize,
    pub persona: Option<String>,
}

struct ScoredCandidate {
    provider: String,
    model: String,
    capability_score: f64,
    cost: f64,
}

/// Combines C4 (complexity), C5 (persona), and the manifest's capability
/// table into a `RoutingDecision` (spec §4.6).
pub struct AdvancedRouter {
    manifest: Manifest,
    history: Mutex<VecDeque<RoutingDecision>>,
    history_capacity: usize,
    cost_weight: f64,
    latency_weight: f64,
}

impl AdvancedRouter {
    pub fn new(manifest: Manifest, history_capacity: usize, cost_weight: f64, latency_weight: f64) -> Self {
        Self {
            manifest,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            cost_weight,
            latency_weight,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn score_candidates(
        &self,
        persona: &str,
        context_type: ContextType,
        provider_history: &ProviderHistory,
        input: &RoutingInput,
    ) -> Vec<ScoredCandidate> {
        let _ = context_type;
        let _ = &input.request_prompt;
        self.manifest
            .models
            .iter()
            .map(|model| {
                let capability_match: f64 = model
                    .capabilities
                    .iter()
                    .map(|cap| persona_capability_weight(persona, *cap))
                    .sum();
                let historical_success = provider_history.success_rate(&model.provider);
                let cost_penalty = model.cost_per_1k_tokens * input.cost_weight;
                let latency_penalty =
                    (model.typical_latency_ms as f64 / 1000.0) * input.latency_weight;
                let capability_score =
                    (capability_match * 0.5 + historical_success * 0.5) - cost_penalty - latency_penalty;
                ScoredCandidate {
                    provider: model.provider.clone(),
                    model: model.model_id.clone(),
                    capability_score,
                    cost: model.cost_per_1k_tokens,
                }
            })
            .collect()
    }

    /// Runs the full C5→C4→(score)→(tie-break)→(confidence) pipeline
    /// described in spec §4.6.
    pub fn route_request(
        &self,
        request: RouteRequest,
        provider_history: &ProviderHistory,
    ) -> Result<RoutingDecision> {
        let parsed = parse_persona(&request.prompt, request.persona.as_deref());
        let complexity = analyze_complexity(
            &parsed.stripped_prompt,
            ComplexityInputs {
                file_count: request.file_count,
                history_depth: request.history_depth,
            },
        );
        let context_type = ContextType::classify(&parsed.stripped_prompt);

        let input = RoutingInput {
            request_prompt: parsed.stripped_prompt.clone(),
            file_count: request.file_count,
            history_depth: request.history_depth,
            caller_persona: Some(parsed.persona.clone()),
            cost_weight: self.cost_weight,
            latency_weight: self.latency_weight,
        };

        let mut candidates = self.score_candidates(&parsed.persona, context_type, provider_history, &input);
        if candidates.is_empty() {
            return Err(OrchestratorError::NoEligibleModel);
        }

        // Tie-break: higher capability > lower cost > alphabetical model id.
        candidates.sort_by(|a, b| {
            b.capability_score
                .partial_cmp(&a.capability_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cost.partial_cmp(&b.cost).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.model.cmp(&b.model))
        });

        let winner = &candidates[0];
        let confidence = if candidates.len() == 1 {
            1.0
        } else {
            let runner_up = &candidates[1];
            let spread = winner.capability_score - runner_up.capability_score;
            (spread / (winner.capability_score.abs().max(1e-6))).clamp(0.0, 1.0)
        };

        let decision = RoutingDecision {
            provider: winner.provider.clone(),
            model: winner.model.clone(),
            persona: parsed.persona.clone(),
            complexity_score: complexity.score,
            complexity_level: complexity.level,
            context_type,
            capability_score: winner.capability_score,
            confidence,
            reasoning: format!(
                "persona={} context={} complexity={:.2}({}) winner={}/{} score={:.3}",
                parsed.persona,
                context_type.as_str(),
                complexity.score,
                complexity.level.as_str(),
                winner.provider,
                winner.model,
                winner.capability_score,
            ),
            metadata: {
                let mut m = serde_json::Map::new();
                if let Some(cmd) = &parsed.slash_command {
                    m.insert("slash_command".into(), serde_json::Value::String(cmd.clone()));
                }
                m
            },
        };

        let _ = &input.caller_persona;

        let mut history = self.history.lock().expect("router history mutex poisoned");
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(decision.clone());

        Ok(decision)
    }

    pub fn recent_decisions(&self) -> Vec<RoutingDecision> {
        self.history.lock().expect("router history mutex poisoned").iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::default_manifest;

    fn router() -> AdvancedRouter {
        AdvancedRouter::new(default_manifest(), 8, 0.3, 0.2)
    }

    #[test]
    fn routes_debugging_prompt_to_a_decision_with_expected_persona() {
        let router = router();
        let history = ProviderHistory::default();
        let decision = router
            .route_request(
                RouteRequest {
                    prompt: "Fix this error: TypeError: 'int' object is not callable".to_string(),
                    file_count: 0,
                    history_depth: 0,
                    persona: Some("developer".to_string()),
                },
                &history,
            )
            .unwrap();
        assert_eq!(decision.persona, "developer");
        assert!(matches!(
            decision.complexity_level,
            ComplexityLevel::Simple | ComplexityLevel::Moderate | ComplexityLevel::Trivial
        ));
        assert!(decision.confidence >= 0.0 && decision.confidence <= 1.0);
    }

    #[test]
    fn slash_command_overrides_persona() {
        let router = router();
        let history = ProviderHistory::default();
        let decision = router
            .route_request(
                RouteRequest {
                    prompt: "/arch Design a distributed system for order processing".to_string(),
                    file_count: 0,
                    history_depth: 0,
                    persona: None,
                },
                &history,
            )
            .unwrap();
        assert_eq!(decision.persona, "architect");
        assert_eq!(decision.context_type, ContextType::Architecture);
    }

    #[test]
    fn single_candidate_manifest_yields_full_confidence() {
        let manifest = crate::manifest::Manifest {
            version: "test".to_string(),
            providers: vec![],
            models: vec![default_manifest().models.into_iter().next().unwrap()],
        };
        let router = AdvancedRouter::new(manifest, 8, 0.3, 0.2);
        let history = ProviderHistory::default();
        let decision = router
            .route_request(
                RouteRequest {
                    prompt: "hello".to_string(),
                    file_count: 0,
                    history_depth: 0,
                    persona: None,
                },
                &history,
            )
            .unwrap();
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn empty_manifest_fails_with_no_eligible_model() {
        let manifest = crate::manifest::Manifest {
            version: "empty".to_string(),
            providers: vec![],
            models: vec![],
        };
        let router = AdvancedRouter::new(manifest, 8, 0.3, 0.2);
        let history = ProviderHistory::default();
        let err = router
            .route_request(
                RouteRequest {
                    prompt: "hello".to_string(),
                    file_count: 0,
                    history_depth: 0,
                    persona: None,
                },
                &history,
            )
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoEligibleModel));
    }

    #[test]
    fn history_is_capped_at_configured_capacity() {
        let router = AdvancedRouter::new(default_manifest(), 2, 0.3, 0.2);
        let history = ProviderHistory::default();
        for i in 0..5 {
            router
                .route_request(
                    RouteRequest {
                        prompt: format!("prompt {i}"),
                        file_count: 0,
                        history_depth: 0,
                        persona: None,
                    },
                    &history,
                )
                .unwrap();
        }
        assert_eq!(router.recent_decisions().len(), 2);
    }

    #[test]
    fn routing_state_one_hot_and_weights_are_normalized() {
        let state = RoutingState::new(
            0.5,
            ContextType::Debugging,
            [true, false, true, false, false],
            [0.9, 0.1, 0.5, 0.2, 0.0],
            2.0,
            2.0,
            0.0,
            0.5,
        );
        assert!(state.is_valid());
        assert_eq!(state.context_type(), ContextType::Debugging);
        assert!((state.features[19] - 0.5).abs() < 1e-9);
        assert!((state.features[20] - 0.5).abs() < 1e-9);
    }
}
