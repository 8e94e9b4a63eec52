//! DQN Routing Agent (spec §4.9, `[C9-RL]`).
//!
//! Grounded on the teacher's `agent::rl::GRPOTrainer` gradient-step
//! structure and `candle_nn` optimizer pattern, adapted from policy-gradient
//! training to epsilon-greedy DQN: online/target network pair, soft sync,
//! and epsilon decay, per spec §4.9.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::manifest::{RoutingActionEntry, RoutingActionTable};
use crate::routing::{QuantumStrategy, RoutingAction, RoutingState};
use crate::rl::network::QNetwork;
use crate::rl::replay::{Experience, ReplayBuffer};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DqnAgentConfig {
    pub state_size: usize,
    pub action_size: usize,
    pub gamma: f64,
    pub eps_start: f64,
    pub eps_min: f64,
    pub eps_decay: f64,
    pub batch_size: usize,
    pub target_sync_interval: u64,
    pub tau: Option<f64>,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub exploration_rate: f64,
    pub memory_utilization: f64,
    pub training_steps: u64,
    pub action_space_size: usize,
    pub state_space_size: usize,
}

/// ε-greedy agent over a fixed action table, with online/target Q-networks
/// and an attached replay buffer (spec §4.9).
pub struct DqnAgent {
    config: DqnAgentConfig,
    action_table: RoutingActionTable,
    online: QNetwork,
    target: QNetwork,
    replay: ReplayBuffer,
    epsilon: f64,
    rng: StdRng,
    training_steps: u64,
    calls_since_sync: u64,
}

impl DqnAgent {
    pub fn new(
        config: DqnAgentConfig,
        action_table: RoutingActionTable,
        hidden_layers: &[usize],
        lr: f64,
        grad_clip_norm: f64,
        buffer_capacity: usize,
        priority_enabled: bool,
        priority_alpha: f64,
    ) -> Self {
        let online = QNetwork::new(config.state_size, hidden_layers, config.action_size, lr, grad_clip_norm, config.seed);
        let target = QNetwork::new(config.state_size, hidden_layers, config.action_size, lr, grad_clip_norm, config.seed);
        let replay = ReplayBuffer::new(buffer_capacity, priority_enabled, priority_alpha, config.seed);
        Self {
            epsilon: config.eps_start,
            rng: StdRng::seed_from_u64(config.seed),
            online,
            target,
            replay,
            training_steps: 0,
            calls_since_sync: 0,
            action_table,
            config,
        }
    }

    fn action_from_index(&self, index: usize) -> RoutingAction {
        let entry: &RoutingActionEntry = self
            .action_table
            .get(index)
            .expect("action index must be within the configured action table");
        RoutingAction {
            provider: entry.provider.clone(),
            model: entry.model.clone(),
            strategy: entry.strategy,
        }
    }

    /// ε-greedy action selection over the online network (spec §4.9
    /// `act`). Returns both the chosen action and its index so the caller
    /// can later pass the index to [`Self::remember`].
    pub fn act(&mut self, state: &RoutingState) -> (RoutingAction, usize) {
        let index = if self.rng.gen::<f64>() < self.epsilon {
            self.rng.gen_range(0..self.action_table.len())
        } else {
            let q_values = self.online.predict(&[state.features.to_vec()]);
            argmax(&q_values[0])
        };
        (self.action_from_index(index), index)
    }

    pub fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon * self.config.eps_decay).max(self.config.eps_min);
    }

    pub fn remember(&mut self, state: RoutingState, action_index: usize, reward: f64, next_state: RoutingState, done: bool, created_at_millis: u64) {
        self.replay.add(Experience::new(state, action_index, reward, next_state, done, created_at_millis));
    }

    /// One training step against a sampled batch (spec §4.9 `replay`).
    /// Returns `None` if the buffer does not yet hold `batch_size` records.
    pub fn replay_step(&mut self) -> Option<f64> {
        let batch = self.replay.sample(self.config.batch_size)?;

        let states: Vec<Vec<f64>> = batch.experiences.iter().map(|e| e.state.features.to_vec()).collect();
        let next_states: Vec<Vec<f64>> = batch.experiences.iter().map(|e| e.next_state.features.to_vec()).collect();

        let current_q = self.online.predict(&states);
        let next_q_target = self.target.predict(&next_states);

        let mut targets = current_q;
        for (i, experience) in batch.experiences.iter().enumerate() {
            let max_next_q = next_q_target[i].iter().cloned().fold(f64::MIN, f64::max);
            let td_target = experience.reward + self.config.gamma * max_next_q * (if experience.done { 0.0 } else { 1.0 });
            let weight = batch.weights[i];
            let action = experience.action_index;
            // Importance-sampling weight scales how far the target moves
            // the Q-value estimate, so uniform mode (weight=1.0) reduces
            // to an ordinary DQN update.
            targets[i][action] = targets[i][action] + weight * (td_target - targets[i][action]);
        }

        let loss = self.online.fit(&states, &targets, 1, self.config.batch_size);

        self.training_steps += 1;
        self.calls_since_sync += 1;
        if self.calls_since_sync >= self.config.target_sync_interval {
            self.sync_target();
            self.calls_since_sync = 0;
        }

        Some(loss)
    }

    fn sync_target(&mut self) {
        match self.config.tau {
            Some(tau) => self.target.soft_sync_from(&self.online, tau),
            None => self.target.soft_sync_from(&self.online, 1.0),
        }
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        let stats = self.replay.statistics();
        PerformanceMetrics {
            exploration_rate: self.epsilon,
            memory_utilization: stats.size as f64 / stats.capacity.max(1) as f64,
            training_steps: self.training_steps,
            action_space_size: self.action_table.len(),
            state_space_size: self.config.state_size,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn action_table(&self) -> &RoutingActionTable {
        &self.action_table
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Computes the execution-outcome reward (spec §4.9 "Reward function"),
/// separated from [`DqnAgent`] so the coordinator (C11) can call it
/// directly after collapsing a quantum result, without needing an agent
/// instance in scope.
pub fn compute_reward(quality: f64, latency_ms: f64, cost: f64, error_penalty: f64, reward_config: &crate::config::RewardConfig) -> f64 {
    let speed_term = 1.0 - (latency_ms / reward_config.latency_ref_ms).min(1.0);
    let cost_term = 1.0 - (cost / reward_config.cost_ref).min(1.0);
    reward_config.w_quality * quality
        + reward_config.w_speed * speed_term
        + reward_config.w_cost * cost_term
        - error_penalty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::default_manifest;
    use crate::routing::ContextType;

    fn table() -> RoutingActionTable {
        RoutingActionTable::from_manifest(&default_manifest())
    }

    fn agent(seed: u64) -> DqnAgent {
        let action_table = table();
        let config = DqnAgentConfig {
            state_size: 21,
            action_size: action_table.len(),
            gamma: 0.99,
            eps_start: 1.0,
            eps_min: 0.05,
            eps_decay: 0.995,
            batch_size: 4,
            target_sync_interval: 5,
            tau: None,
            seed,
        };
        DqnAgent::new(config, action_table, &[16, 8], 0.01, 5.0, 100, false, 0.6)
    }

    fn state() -> RoutingState {
        RoutingState::new(0.5, ContextType::CodeGeneration, [true; 5], [0.5; 5], 0.3, 0.3, 0.4, 0.5)
    }

    #[test]
    fn act_returns_an_index_within_the_action_table() {
        let mut agent = agent(1);
        let (_, index) = agent.act(&state());
        assert!(index < agent.action_table().len());
    }

    #[test]
    fn epsilon_decays_toward_the_configured_floor() {
        let mut agent = agent(1);
        for _ in 0..2000 {
            agent.decay_epsilon();
        }
        assert!((agent.epsilon() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn replay_returns_none_below_batch_size() {
        let mut agent = agent(1);
        agent.remember(state(), 0, 1.0, state(), false, 0);
        assert!(agent.replay_step().is_none());
    }

    #[test]
    fn replay_trains_once_enough_experience_is_buffered() {
        let mut agent = agent(1);
        for i in 0..8 {
            agent.remember(state(), i % agent.action_table().len(), 0.5, state(), false, 0);
        }
        let loss = agent.replay_step();
        assert!(loss.is_some());
        assert_eq!(agent.get_performance_metrics().training_steps, 1);
    }

    #[test]
    fn same_seed_and_experiences_produce_identical_performance_metrics() {
        let mut a = agent(42);
        let mut b = agent(42);
        for i in 0..8 {
            a.remember(state(), i % a.action_table().len(), 0.5, state(), false, 0);
            b.remember(state(), i % b.action_table().len(), 0.5, state(), false, 0);
        }
        let loss_a = a.replay_step().unwrap();
        let loss_b = b.replay_step().unwrap();
        assert!((loss_a - loss_b).abs() < 1e-9);
    }

    #[test]
    fn reward_is_deterministic_and_in_range_for_reasonable_inputs() {
        let config = crate::config::RewardConfig::default();
        let r1 = compute_reward(0.8, 1500.0, 0.01, 0.0, &config);
        let r2 = compute_reward(0.8, 1500.0, 0.01, 0.0, &config);
        assert_eq!(r1, r2);
        assert!(r1 > 0.0);
    }

    #[test]
    fn strategy_round_trips_through_action_table() {
        let table = table();
        let entry = table.get(0).unwrap();
        assert!(matches!(
            entry.strategy,
            QuantumStrategy::TaskOptimized
                | QuantumStrategy::Performance
                | QuantumStrategy::Balanced
                | QuantumStrategy::CostEfficient
        ));
    }
}
