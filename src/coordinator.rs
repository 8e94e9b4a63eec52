//! Orchestration Coordinator (spec §4.11, `[C11-COORD]`) — the public
//! entry point.
//!
//! Grounded on the teacher's `orchestrator::mod` request-handling loop
//! (which already sequenced context load → cache lookup → model call →
//! memory write for a single request), generalized into the full
//! RECEIVED→...→DONE/FAILED state machine and single-flight in-flight map
//! spec.md §4.11 describes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{info_span, Instrument};

use crate::context::CoreContext;
use crate::error::{OrchestratorError, Result};
use crate::fingerprint::result_fingerprint;
use crate::provider::{ChatMessage, CompletionParams};
use crate::quantum::{BranchTask, CollapseStrategyKind, QuantumVariation};
use crate::routing::{ContextType, RouteRequest, RoutingAction, RoutingDecision, RoutingState};
use async_trait::async_trait;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: String,
    pub session_id: String,
    pub workspace_id: Option<String>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub persona: Option<String>,
    pub custom_instructions: Option<String>,
}

/// Inbound request shape (spec §6.1 `ExecuteRequest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub task_id: String,
    pub prompt: String,
    pub file_count: usize,
    pub context: RequestContext,
    pub persona_config: PersonaConfig,
}

impl ExecuteRequest {
    fn validate(&self) -> Result<()> {
        if self.task_id.trim().is_empty() {
            return Err(OrchestratorError::Validation("task_id must not be empty".to_string()));
        }
        if self.prompt.trim().is_empty() {
            return Err(OrchestratorError::Validation("prompt must not be empty".to_string()));
        }
        if self.context.user_id.trim().is_empty() || self.context.session_id.trim().is_empty() {
            return Err(OrchestratorError::Validation("user_id and session_id are required".to_string()));
        }
        Ok(())
    }
}

/// Outbound stream events, in the order spec §6 names them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start { task_id: String, routing_decision: RoutingDecision },
    Progress { step: String, percentage: u8 },
    Branch { variation_id: String, provider: String, model: String, strategy: crate::routing::QuantumStrategy, status: String, elapsed_ms: u64 },
    Result {
        content: String,
        usage: crate::provider::Usage,
        winner_provider: String,
        winner_model: String,
        winner_strategy: crate::routing::QuantumStrategy,
        confidence: f64,
    },
    Complete { task_id: String },
    Error { code: String, message: String, retriable: bool },
}

/// Ordered, monotonically numbered event (spec §4.11 step 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberedEvent {
    pub sequence: u64,
    pub event: StreamEvent,
}

pub type ResponseStream = Vec<NumberedEvent>;

struct EventRecorder {
    events: Vec<NumberedEvent>,
    next_sequence: u64,
}

impl EventRecorder {
    fn new() -> Self {
        Self { events: Vec::new(), next_sequence: 0 }
    }

    fn push(&mut self, event: StreamEvent) {
        self.events.push(NumberedEvent { sequence: self.next_sequence, event });
        self.next_sequence += 1;
    }

    fn into_stream(self) -> ResponseStream {
        self.events
    }
}

/// Adapts [`crate::provider::ProviderRegistry`] into the quantum
/// executor's [`BranchTask`] trait, so C10 stays ignorant of the provider
/// abstraction's exact shape.
struct ProviderBranchTask {
    registry: Arc<dyn crate::provider::ProviderRegistry>,
}

#[async_trait]
impl BranchTask for ProviderBranchTask {
    async fn run(&self, action: &RoutingAction, prompt: &str) -> std::result::Result<crate::quantum::BranchPayload, String> {
        let started = Instant::now();
        let result = self
            .registry
            .generate_completion(
                &action.provider,
                &action.model,
                &[ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
                &CompletionParams::default(),
            )
            .await?;
        Ok(crate::quantum::BranchPayload {
            content: result.content,
            quality: if result.finish_reason == "stop" { 0.85 } else { 0.4 },
            cost: 0.01,
            latency_ms: started.elapsed().as_millis() as u64,
            usage: result.usage,
        })
    }
}

/// Tracks single-flight execution per fingerprint (spec §4.11 Idempotency):
/// the first request for a fingerprint drives the real work; concurrent
/// duplicates subscribe to its broadcast of the same [`ResponseStream`].
struct InFlightMap {
    entries: AsyncMutex<HashMap<String, broadcast::Sender<ResponseStream>>>,
}

impl InFlightMap {
    fn new() -> Self {
        Self { entries: AsyncMutex::new(HashMap::new()) }
    }
}

/// Public entry point (spec §4.11 `handle(request) -> ResponseStream`).
pub struct OrchestrationCoordinator {
    ctx: Arc<CoreContext>,
    in_flight: InFlightMap,
}

impl OrchestrationCoordinator {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx, in_flight: InFlightMap::new() }
    }

    pub async fn handle(&self, request: ExecuteRequest) -> Result<ResponseStream> {
        request.validate()?;

        let persona_hint = request.persona_config.persona.clone();
        let fingerprint = result_fingerprint(&request.prompt, persona_hint.as_deref().unwrap_or("developer"));

        // Single-flight: if another in-flight request shares this
        // fingerprint, subscribe to its result instead of duplicating work.
        let maybe_receiver = {
            let mut entries = self.in_flight.entries.lock().await;
            match entries.get(&fingerprint) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _receiver) = broadcast::channel(1);
                    entries.insert(fingerprint.clone(), sender);
                    None
                }
            }
        };

        if let Some(mut receiver) = maybe_receiver {
            return receiver
                .recv()
                .await
                .map_err(|e| OrchestratorError::Internal { code: "in_flight_recv", message: e.to_string() });
        }

        let span = info_span!("handle_request", task_id = %request.task_id, fingerprint = %fingerprint);
        let result = self.handle_inner(&request, &fingerprint).instrument(span).await;

        let mut entries = self.in_flight.entries.lock().await;
        if let Some(sender) = entries.remove(&fingerprint) {
            if let Ok(stream) = &result {
                let _ = sender.send(stream.clone());
            }
        }

        result
    }

    async fn handle_inner(&self, request: &ExecuteRequest, fingerprint: &str) -> Result<ResponseStream> {
        let mut recorder = EventRecorder::new();

        // CONTEXT_LOADED
        let history_snapshot = self
            .ctx
            .context_manager
            .get_conversation_context(&request.context.user_id, &request.context.session_id, true)
            .await;
        let history_depth = history_snapshot.messages.len();

        // CACHE_HIT
        let persona_for_cache = request.persona_config.persona.clone().unwrap_or_else(|| "developer".to_string());
        if let Some(cached) = self.ctx.result_cache.get(&request.prompt, &persona_for_cache) {
            self.ctx
                .context_manager
                .add_message(&request.context.user_id, &request.context.session_id, "assistant", &cached, Default::default())
                .await?;
            recorder.push(StreamEvent::Result {
                content: cached,
                usage: crate::provider::Usage { prompt_tokens: 0, completion_tokens: 0 },
                winner_provider: "cache".to_string(),
                winner_model: "cache".to_string(),
                winner_strategy: crate::routing::QuantumStrategy::Balanced,
                confidence: 1.0,
            });
            recorder.push(StreamEvent::Complete { task_id: request.task_id.clone() });
            return Ok(recorder.into_stream());
        }

        // ROUTED
        let context_type_hint = ContextType::classify(&request.prompt);
        let decision = match self.ctx.routing_decision_cache.get(
            &request.prompt,
            context_type_hint.as_str(),
            "unknown",
        ) {
            Some(cached_decision) => cached_decision,
            None => self.route(request, history_depth)?,
        };

        recorder.push(StreamEvent::Start { task_id: request.task_id.clone(), routing_decision: decision.clone() });
        recorder.push(StreamEvent::Progress { step: "routing".to_string(), percentage: 25 });

        // EXECUTING
        recorder.push(StreamEvent::Progress { step: "executing".to_string(), percentage: 50 });
        let variations = self.build_variations(&decision);
        let task: Arc<dyn BranchTask> = Arc::new(ProviderBranchTask { registry: self.ctx.provider_registry.clone() });
        let quantum_result = self
            .ctx
            .quantum_executor
            .execute(&request.prompt, variations, self.ctx.config.quantum.default_collapse, task)
            .await?;

        for branch in &quantum_result.branches {
            recorder.push(StreamEvent::Branch {
                variation_id: branch.variation_id.clone(),
                provider: branch.provider.clone(),
                model: branch.model.clone(),
                strategy: branch.strategy,
                status: format!("{:?}", branch.status).to_lowercase(),
                elapsed_ms: branch.elapsed_ms,
            });
        }

        if !quantum_result.success {
            let err = OrchestratorError::AllBranchesFailed { branch_count: quantum_result.branches.len() };
            recorder.push(StreamEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
                retriable: err.retriable(),
            });
            return Ok(recorder.into_stream());
        }
        let winner = quantum_result.winner.expect("success implies a winner");

        // COLLAPSED
        recorder.push(StreamEvent::Progress { step: "collapsing".to_string(), percentage: 75 });
        let winning_branch = quantum_result
            .branches
            .iter()
            .find(|b| b.provider == winner.provider && b.model == winner.model)
            .expect("winner corresponds to one of the executed branches");
        let payload = winning_branch.payload.as_ref().expect("winning branch has a payload");

        let reward = crate::rl::compute_reward(payload.quality, payload.latency_ms as f64, payload.cost, 0.0, &self.ctx.config.reward);
        {
            let state = self.state_for(&decision, history_depth);
            let mut agent = self.ctx.dqn_agent.lock().expect("dqn agent mutex poisoned");
            if let Some(action_index) = agent.action_table().index_of(&crate::manifest::RoutingActionEntry {
                provider: winner.provider.clone(),
                model: winner.model.clone(),
                strategy: winner.strategy,
            }) {
                agent.remember(state, action_index, reward, state, true, 0);
                let _ = agent.replay_step();
                agent.decay_epsilon();
            }
        }
        {
            let mut history = self.ctx.provider_history.lock().expect("provider history mutex poisoned");
            history.record(&winner.provider, true);
        }

        // PERSISTED
        recorder.push(StreamEvent::Progress { step: "persisting".to_string(), percentage: 90 });
        self.ctx.result_cache.set(&request.prompt, &persona_for_cache, winner.content.clone(), None);
        // Keyed on the pre-routing context-type classification only: the
        // complexity level is itself an output of routing, so using it as
        // part of the lookup key (rather than "unknown" for both get/set)
        // would make the cache permanently miss itself.
        self.ctx.routing_decision_cache.set(&request.prompt, context_type_hint.as_str(), "unknown", decision.clone(), None);
        self.ctx
            .context_manager
            .add_message(&request.context.user_id, &request.context.session_id, "assistant", &winner.content, Default::default())
            .await?;

        // STREAM
        recorder.push(StreamEvent::Result {
            content: winner.content.clone(),
            usage: winner.usage.clone(),
            winner_provider: winner.provider.clone(),
            winner_model: winner.model.clone(),
            winner_strategy: winner.strategy,
            confidence: winner.confidence,
        });
        recorder.push(StreamEvent::Complete { task_id: request.task_id.clone() });

        Ok(recorder.into_stream())
    }

    fn route(&self, request: &ExecuteRequest, history_depth: usize) -> Result<RoutingDecision> {
        let route_request = RouteRequest {
            prompt: request.prompt.clone(),
            file_count: request.file_count,
            history_depth,
            persona: request.persona_config.persona.clone(),
        };
        let provider_history = self.ctx.provider_history.lock().expect("provider history mutex poisoned");
        let mut decision = self.ctx.router.route_request(route_request, &provider_history)?;

        // DQN suggests, router validates (SPEC_FULL.md §5 open-question
        // resolution): only override the router's pick when the agent's
        // exploitation confidence clears the configured threshold.
        let state = self.state_for(&decision, history_depth);
        let mut agent = self.ctx.dqn_agent.lock().expect("dqn agent mutex poisoned");
        let (suggested_action, _) = agent.act(&state);
        let metrics = agent.get_performance_metrics();
        if (1.0 - metrics.exploration_rate) >= self.ctx.config.dqn.dqn_override_threshold {
            decision.provider = suggested_action.provider;
            decision.model = suggested_action.model;
        }
        Ok(decision)
    }

    fn state_for(&self, decision: &RoutingDecision, history_depth: usize) -> RoutingState {
        RoutingState::new(
            decision.complexity_score,
            decision.context_type,
            [true; crate::routing::PROVIDER_SLOTS],
            [0.5; crate::routing::PROVIDER_SLOTS],
            self.ctx.config.router.cost_weight,
            self.ctx.config.router.latency_weight,
            (1.0 - self.ctx.config.router.cost_weight - self.ctx.config.router.latency_weight).max(0.0),
            (history_depth as f64 / 20.0).min(1.0),
        )
    }

    /// Builds K variations around the chosen decision: same provider with
    /// alternative strategies, plus the next-best candidate provider (spec
    /// §4.11 step 4).
    fn build_variations(&self, decision: &RoutingDecision) -> Vec<QuantumVariation> {
        let strategies = [
            crate::routing::QuantumStrategy::TaskOptimized,
            crate::routing::QuantumStrategy::Balanced,
        ];
        let mut variations = Vec::new();
        for (i, strategy) in strategies.into_iter().enumerate() {
            variations.push(QuantumVariation {
                variation_id: format!("{}-{}", decision.model, i),
                action: RoutingAction {
                    provider: decision.provider.clone(),
                    model: decision.model.clone(),
                    strategy,
                },
            });
        }
        variations
    }

    pub fn default_collapse_strategy(&self) -> CollapseStrategyKind {
        self.ctx.config.quantum.default_collapse
    }
}
