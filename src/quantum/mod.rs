//! Quantum Executor (spec §4.10, `[C10-QUANTUM]`).
//!
//! Grounded on the teacher's `orchestrator::mod` task-spawning pattern
//! (bounded `tokio::task` fan-out awaited with `futures_util::future::join_all`)
//! and `original_source/packages/core/monkey_coder/quantum/quantum_models.py`'s
//! `CollapseStrategy` enum, generalized into the three pluggable collapse
//! strategies spec.md names.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::error::{OrchestratorError, Result};
use crate::provider::Usage;
use crate::routing::RoutingAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollapseStrategyKind {
    FirstSuccess,
    BestScore,
    WeightedConsensus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Timeout,
}

/// What a successful branch produces (spec §3 doesn't name this type
/// explicitly, but §4.6/§4.10 reference "quality", "cost", "latency" as the
/// scoring inputs for best-score collapse, so they are first-class here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchPayload {
    pub content: String,
    pub quality: f64,
    pub cost: f64,
    pub latency_ms: u64,
    pub usage: Usage,
}

/// Per-branch telemetry returned to the caller regardless of outcome
/// (spec §6 `branch` stream event).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantumBranch {
    pub variation_id: String,
    pub provider: String,
    pub model: String,
    pub strategy: crate::routing::QuantumStrategy,
    pub status: BranchStatus,
    pub elapsed_ms: u64,
    pub payload: Option<BranchPayload>,
}

/// Implemented by whatever actually talks to an LLM provider for a given
/// `RoutingAction`. Kept minimal and local to this module (rather than
/// depending on `crate::provider`) so the executor has no upward
/// dependency on the provider registry's shape.
#[async_trait]
pub trait BranchTask: Send + Sync {
    async fn run(&self, action: &RoutingAction, prompt: &str) -> std::result::Result<BranchPayload, String>;
}

#[derive(Debug, Clone)]
pub struct QuantumVariation {
    pub variation_id: String,
    pub action: RoutingAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantumWinner {
    pub provider: String,
    pub model: String,
    pub strategy: crate::routing::QuantumStrategy,
    pub content: String,
    pub confidence: f64,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantumResult {
    pub success: bool,
    pub winner: Option<QuantumWinner>,
    pub branches: Vec<QuantumBranch>,
    pub error: Option<String>,
}

/// Scoring function for best-score collapse (spec §4.10: "quality − λ·cost −
/// μ·latency").
fn branch_score(payload: &BranchPayload, cost_lambda: f64, latency_mu: f64) -> f64 {
    payload.quality - cost_lambda * payload.cost - latency_mu * (payload.latency_ms as f64 / 1000.0)
}

pub struct QuantumExecutorConfig {
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub branch_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    pub cancel_grace_ms: u64,
    pub cost_lambda: f64,
    pub latency_mu: f64,
}

/// Bounded worker pool that fans a base decision out into K variations,
/// runs them concurrently, and applies a collapse strategy (spec §4.10).
pub struct QuantumExecutor {
    semaphore: Arc<Semaphore>,
    queue_capacity: usize,
    queued: Arc<AtomicUsize>,
    config: QuantumExecutorConfig,
}

impl QuantumExecutor {
    pub fn new(config: QuantumExecutorConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_workers.max(1))),
            queue_capacity: config.queue_capacity,
            queued: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Runs `variations` through `task`, collapsing with `strategy` (spec
    /// §4.10 `execute`). `prompt` is shared context every branch receives.
    pub async fn execute(
        &self,
        prompt: &str,
        variations: Vec<QuantumVariation>,
        strategy: CollapseStrategyKind,
        task: Arc<dyn BranchTask>,
    ) -> Result<QuantumResult> {
        if self.queued.load(Ordering::SeqCst) + variations.len() > self.queue_capacity + self.config.max_workers {
            return Err(OrchestratorError::Overloaded {
                queue_capacity: self.queue_capacity,
            });
        }
        self.queued.fetch_add(variations.len(), Ordering::SeqCst);

        let result = timeout(
            Duration::from_millis(self.config.execute_timeout_ms),
            self.run_variations(prompt, variations, strategy, task),
        )
        .await;

        match result {
            Ok(r) => r,
            Err(_) => Err(OrchestratorError::Timeout(self.config.execute_timeout_ms)),
        }
    }

    async fn run_variations(
        &self,
        prompt: &str,
        variations: Vec<QuantumVariation>,
        strategy: CollapseStrategyKind,
        task: Arc<dyn BranchTask>,
    ) -> Result<QuantumResult> {
        let branch_timeout = Duration::from_millis(self.config.branch_timeout_ms);
        let mut handles = Vec::with_capacity(variations.len());

        for variation in &variations {
            let semaphore = self.semaphore.clone();
            let task = task.clone();
            let action = variation.action.clone();
            let prompt = prompt.to_string();
            let variation_id = variation.variation_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let started = Instant::now();
                let outcome = timeout(branch_timeout, task.run(&action, &prompt)).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                (variation_id, action, outcome, elapsed_ms)
            });
            handles.push(handle);
        }

        self.queued.fetch_sub(variations.len(), Ordering::SeqCst);

        match strategy {
            CollapseStrategyKind::FirstSuccess => self.collapse_first_success(handles).await,
            CollapseStrategyKind::BestScore => self.collapse_best_score(handles).await,
            CollapseStrategyKind::WeightedConsensus => self.collapse_weighted_consensus(handles).await,
        }
    }

    async fn collapse_first_success(
        &self,
        handles: Vec<tokio::task::JoinHandle<(String, RoutingAction, std::result::Result<std::result::Result<BranchPayload, String>, tokio::time::error::Elapsed>, u64)>>,
    ) -> Result<QuantumResult> {
        let mut branches = vec![None; handles.len()];
        let mut winner_idx: Option<usize> = None;

        // `abort_handle` lets us cancel a still-running task even after its
        // `JoinHandle` has been moved into the `FuturesUnordered` below.
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        // Race the branches so the first completion (in wall-clock order,
        // not spawn order) is observed as soon as it lands.
        let mut remaining: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(i, handle)| async move { (i, handle.await) })
            .collect();
        let mut outstanding: std::collections::HashSet<usize> = (0..branches.len()).collect();

        while let Some((i, joined)) = remaining.next().await {
            outstanding.remove(&i);
            // No abort has run yet at this point (aborts only happen after
            // we break below), so every completion here is a genuine
            // branch outcome, never a cancellation.
            let (variation_id, action, outcome, elapsed_ms) = joined.map_err(|e| OrchestratorError::Internal {
                code: "quantum_join_error",
                message: e.to_string(),
            })?;
            let (status, payload) = classify_outcome(outcome);
            if status == BranchStatus::Succeeded {
                winner_idx = Some(i);
            }
            branches[i] = Some(QuantumBranch {
                variation_id,
                provider: action.provider,
                model: action.model,
                strategy: action.strategy,
                status,
                elapsed_ms,
                payload,
            });
            if winner_idx.is_some() {
                break;
            }
        }

        // Cooperatively cancel whatever didn't finish before the winner.
        let grace = Duration::from_millis(self.config.cancel_grace_ms.max(1));
        for &i in &outstanding {
            abort_handles[i].abort();
            branches[i] = Some(QuantumBranch {
                variation_id: format!("branch-{i}"),
                provider: String::new(),
                model: String::new(),
                strategy: crate::routing::QuantumStrategy::Balanced,
                status: BranchStatus::Cancelled,
                elapsed_ms: 0,
                payload: None,
            });
        }
        drop(remaining);
        if !outstanding.is_empty() {
            tokio::time::sleep(grace.min(Duration::from_millis(50))).await;
        }

        let branches: Vec<QuantumBranch> = branches.into_iter().map(|b| b.expect("every slot filled")).collect();

        match winner_idx {
            Some(idx) => {
                let winning_branch = &branches[idx];
                let payload = winning_branch.payload.as_ref().expect("succeeded branch has a payload");
                Ok(QuantumResult {
                    success: true,
                    winner: Some(QuantumWinner {
                        provider: winning_branch.provider.clone(),
                        model: winning_branch.model.clone(),
                        strategy: winning_branch.strategy,
                        content: payload.content.clone(),
                        confidence: 1.0,
                        usage: payload.usage.clone(),
                    }),
                    branches,
                    error: None,
                })
            }
            None => Ok(all_failed(branches)),
        }
    }

    async fn collapse_best_score(
        &self,
        handles: Vec<tokio::task::JoinHandle<(String, RoutingAction, std::result::Result<std::result::Result<BranchPayload, String>, tokio::time::error::Elapsed>, u64)>>,
    ) -> Result<QuantumResult> {
        let branches = self.await_all(handles).await?;
        let mut best: Option<(f64, usize)> = None;
        for (i, branch) in branches.iter().enumerate() {
            if branch.status != BranchStatus::Succeeded {
                continue;
            }
            let payload = branch.payload.as_ref().unwrap();
            let score = branch_score(payload, self.config.cost_lambda, self.config.latency_mu);
            let better = match best {
                None => true,
                Some((best_score, best_idx)) => {
                    score > best_score
                        || (score == best_score && branch.elapsed_ms < branches[best_idx].elapsed_ms)
                        || (score == best_score
                            && branch.elapsed_ms == branches[best_idx].elapsed_ms
                            && branch.model < branches[best_idx].model)
                }
            };
            if better {
                best = Some((score, i));
            }
        }

        match best {
            Some((_, idx)) => {
                let winner = &branches[idx];
                let payload = winner.payload.as_ref().unwrap();
                Ok(QuantumResult {
                    success: true,
                    winner: Some(QuantumWinner {
                        provider: winner.provider.clone(),
                        model: winner.model.clone(),
                        strategy: winner.strategy,
                        content: payload.content.clone(),
                        confidence: 1.0,
                        usage: payload.usage.clone(),
                    }),
                    branches,
                    error: None,
                })
            }
            None => Ok(all_failed(branches)),
        }
    }

    async fn collapse_weighted_consensus(
        &self,
        handles: Vec<tokio::task::JoinHandle<(String, RoutingAction, std::result::Result<std::result::Result<BranchPayload, String>, tokio::time::error::Elapsed>, u64)>>,
    ) -> Result<QuantumResult> {
        let branches = self.await_all(handles).await?;
        let successful: Vec<usize> = branches
            .iter()
            .enumerate()
            .filter(|(_, b)| b.status == BranchStatus::Succeeded)
            .map(|(i, _)| i)
            .collect();

        if successful.is_empty() {
            return Ok(all_failed(branches));
        }

        // Weighted vote by exact-content match (the caller-provided
        // similarity function from spec §4.10 is approximated here by
        // grouping identical payload text; callers needing fuzzy
        // similarity can pre-normalize branch content before this stage).
        let mut votes: HashMap<String, f64> = HashMap::new();
        for &i in &successful {
            let payload = branches[i].payload.as_ref().unwrap();
            *votes.entry(payload.content.clone()).or_insert(0.0) += payload.quality.max(0.01);
        }
        let total_votes: f64 = votes.values().sum();
        let quorum = total_votes > 0.0 && votes.values().any(|v| *v / total_votes >= 0.5);

        if !quorum {
            return self.collapse_best_score_from(branches);
        }

        let (winning_content, _) = votes
            .into_iter()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .expect("successful is non-empty");

        let idx = successful
            .into_iter()
            .find(|&i| branches[i].payload.as_ref().unwrap().content == winning_content)
            .expect("winning content came from one of the successful branches");

        let winner = &branches[idx];
        let payload = winner.payload.as_ref().unwrap();
        Ok(QuantumResult {
            success: true,
            winner: Some(QuantumWinner {
                provider: winner.provider.clone(),
                model: winner.model.clone(),
                strategy: winner.strategy,
                content: payload.content.clone(),
                confidence: 1.0,
                usage: payload.usage.clone(),
            }),
            branches,
            error: None,
        })
    }

    fn collapse_best_score_from(&self, branches: Vec<QuantumBranch>) -> Result<QuantumResult> {
        let mut best: Option<(f64, usize)> = None;
        for (i, branch) in branches.iter().enumerate() {
            if branch.status != BranchStatus::Succeeded {
                continue;
            }
            let payload = branch.payload.as_ref().unwrap();
            let score = branch_score(payload, self.config.cost_lambda, self.config.latency_mu);
            if best.map(|(s, _)| score > s).unwrap_or(true) {
                best = Some((score, i));
            }
        }
        match best {
            Some((_, idx)) => {
                let winner = &branches[idx];
                let payload = winner.payload.as_ref().unwrap();
                Ok(QuantumResult {
                    success: true,
                    winner: Some(QuantumWinner {
                        provider: winner.provider.clone(),
                        model: winner.model.clone(),
                        strategy: winner.strategy,
                        content: payload.content.clone(),
                        confidence: 1.0,
                        usage: payload.usage.clone(),
                    }),
                    branches,
                    error: None,
                })
            }
            None => Ok(all_failed(branches)),
        }
    }

    async fn await_all(
        &self,
        handles: Vec<tokio::task::JoinHandle<(String, RoutingAction, std::result::Result<std::result::Result<BranchPayload, String>, tokio::time::error::Elapsed>, u64)>>,
    ) -> Result<Vec<QuantumBranch>> {
        let mut branches = Vec::with_capacity(handles.len());
        for handle in handles {
            let (variation_id, action, outcome, elapsed_ms) = handle.await.map_err(|e| OrchestratorError::Internal {
                code: "quantum_join_error",
                message: e.to_string(),
            })?;
            let (status, payload) = classify_outcome(outcome);
            branches.push(QuantumBranch {
                variation_id,
                provider: action.provider,
                model: action.model,
                strategy: action.strategy,
                status,
                elapsed_ms,
                payload,
            });
        }
        Ok(branches)
    }
}

fn classify_outcome(
    outcome: std::result::Result<std::result::Result<BranchPayload, String>, tokio::time::error::Elapsed>,
) -> (BranchStatus, Option<BranchPayload>) {
    match outcome {
        Ok(Ok(payload)) => (BranchStatus::Succeeded, Some(payload)),
        Ok(Err(_)) => (BranchStatus::Failed, None),
        Err(_) => (BranchStatus::Timeout, None),
    }
}

fn all_failed(branches: Vec<QuantumBranch>) -> QuantumResult {
    QuantumResult {
        success: false,
        winner: None,
        branches,
        error: Some("all_branches_failed".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::QuantumStrategy;
    use std::sync::atomic::AtomicU64;
    use tokio::time::Duration as TokioDuration;

    fn config() -> QuantumExecutorConfig {
        QuantumExecutorConfig {
            max_workers: 4,
            queue_capacity: 16,
            branch_timeout_ms: 2000,
            execute_timeout_ms: 5000,
            cancel_grace_ms: 50,
            cost_lambda: 0.1,
            latency_mu: 0.01,
        }
    }

    fn variation(id: &str, provider: &str) -> QuantumVariation {
        QuantumVariation {
            variation_id: id.to_string(),
            action: RoutingAction {
                provider: provider.to_string(),
                model: format!("{provider}-model"),
                strategy: QuantumStrategy::Balanced,
            },
        }
    }

    struct DelayedTask {
        delays_ms: HashMap<String, u64>,
        fail: std::collections::HashSet<String>,
    }

    #[async_trait]
    impl BranchTask for DelayedTask {
        async fn run(&self, action: &RoutingAction, _prompt: &str) -> std::result::Result<BranchPayload, String> {
            let delay = *self.delays_ms.get(&action.provider).unwrap_or(&10);
            tokio::time::sleep(TokioDuration::from_millis(delay)).await;
            if self.fail.contains(&action.provider) {
                return Err("boom".to_string());
            }
            Ok(BranchPayload {
                content: format!("answer-from-{}", action.provider),
                quality: 0.9,
                cost: 0.01,
                latency_ms: delay,
                usage: Usage { prompt_tokens: 10, completion_tokens: 20 },
            })
        }
    }

    #[tokio::test]
    async fn first_success_picks_the_fastest_successful_branch() {
        let executor = QuantumExecutor::new(config());
        let mut delays = HashMap::new();
        delays.insert("fast".to_string(), 10);
        delays.insert("slow".to_string(), 200);
        let task = Arc::new(DelayedTask { delays_ms: delays, fail: Default::default() });

        let variations = vec![variation("v1", "fast"), variation("v2", "slow")];
        let result = executor
            .execute("prompt", variations, CollapseStrategyKind::FirstSuccess, task)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.winner.unwrap().provider, "fast");
    }

    #[tokio::test]
    async fn best_score_picks_highest_quality_minus_penalties() {
        let executor = QuantumExecutor::new(config());
        let task = Arc::new(DelayedTask { delays_ms: HashMap::new(), fail: Default::default() });
        let variations = vec![variation("v1", "a"), variation("v2", "b")];
        let result = executor
            .execute("prompt", variations, CollapseStrategyKind::BestScore, task)
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn all_branches_failing_yields_unsuccessful_result() {
        let executor = QuantumExecutor::new(config());
        let mut fail = std::collections::HashSet::new();
        fail.insert("a".to_string());
        fail.insert("b".to_string());
        let task = Arc::new(DelayedTask { delays_ms: HashMap::new(), fail });
        let variations = vec![variation("v1", "a"), variation("v2", "b")];
        let result = executor
            .execute("prompt", variations, CollapseStrategyKind::BestScore, task)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("all_branches_failed"));
        assert!(result.branches.iter().all(|b| b.status == BranchStatus::Failed));
    }

    #[tokio::test]
    async fn overloaded_when_queue_capacity_exceeded() {
        let mut cfg = config();
        cfg.max_workers = 1;
        cfg.queue_capacity = 0;
        let executor = QuantumExecutor::new(cfg);
        let task = Arc::new(DelayedTask { delays_ms: HashMap::new(), fail: Default::default() });
        let variations: Vec<QuantumVariation> = (0..5).map(|i| variation(&format!("v{i}"), "a")).collect();
        let result = executor
            .execute("prompt", variations, CollapseStrategyKind::BestScore, task)
            .await;
        assert!(matches!(result, Err(OrchestratorError::Overloaded { .. })));
    }

    #[test]
    fn score_prefers_lower_cost_and_latency_at_equal_quality() {
        let usage = Usage { prompt_tokens: 0, completion_tokens: 0 };
        let cheap = BranchPayload { content: "x".into(), quality: 0.8, cost: 0.01, latency_ms: 100, usage: usage.clone() };
        let expensive = BranchPayload { content: "x".into(), quality: 0.8, cost: 0.5, latency_ms: 100, usage };
        assert!(branch_score(&cheap, 0.1, 0.01) > branch_score(&expensive, 0.1, 0.01));
        let _ = AtomicU64::new(0);
    }
}
