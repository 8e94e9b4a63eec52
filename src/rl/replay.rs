//! Experience Replay Buffer (spec §4.7, `[C7-RL]`).
//!
//! Grounded on the teacher's `agent::rl::ExperienceBuffer` (bounded FIFO
//! vector with `record`/`pop_batch`/`clear`), generalized to support
//! priority sampling with importance-sampling weights and concurrent
//! writers, as spec §4.7's performance contract requires.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::routing::RoutingState;

/// One (state, action, reward, next_state, done) transition (spec §3
/// `Experience`). `priority` defaults to `|reward| + eps` and is only
/// consulted when priority sampling is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub state: RoutingState,
    pub action_index: usize,
    pub reward: f64,
    pub next_state: RoutingState,
    pub done: bool,
    pub priority: f64,
    pub created_at_millis: u64,
}

const PRIORITY_EPS: f64 = 1e-3;

impl Experience {
    pub fn new(
        state: RoutingState,
        action_index: usize,
        reward: f64,
        next_state: RoutingState,
        done: bool,
        created_at_millis: u64,
    ) -> Self {
        Self {
            state,
            action_index,
            reward,
            next_state,
            done,
            priority: reward.abs() + PRIORITY_EPS,
            created_at_millis,
        }
    }
}

/// A sampled mini-batch. `weights` carries importance-sampling weights
/// (all 1.0 in uniform mode) so the caller's loss function is agnostic to
/// which sampling mode produced the batch.
#[derive(Debug, Clone)]
pub struct Batch {
    pub experiences: Vec<Experience>,
    pub weights: Vec<f64>,
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayStatistics {
    pub size: usize,
    pub capacity: usize,
    pub total_added: u64,
    pub total_sampled: u64,
}

struct Inner {
    records: Vec<Experience>,
    /// Insertion order of `records` indices, oldest-first. Only maintained
    /// (and only consulted) when priority sampling is disabled; priority
    /// mode evicts by lowest priority instead and never touches this.
    order: std::collections::VecDeque<usize>,
    total_added: u64,
    total_sampled: u64,
    rng: StdRng,
}

/// Bounded, thread-safe store of [`Experience`] records (spec §4.7).
pub struct ReplayBuffer {
    capacity: usize,
    priority_enabled: bool,
    alpha: f64,
    inner: Mutex<Inner>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, priority_enabled: bool, alpha: f64, seed: u64) -> Self {
        Self {
            capacity,
            priority_enabled,
            alpha,
            inner: Mutex::new(Inner {
                records: Vec::with_capacity(capacity),
                order: std::collections::VecDeque::with_capacity(capacity),
                total_added: 0,
                total_sampled: 0,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    /// Pushes `experience`, evicting the oldest record (FIFO) or, when
    /// priority sampling is enabled, the record with lowest priority.
    pub fn add(&self, experience: Experience) {
        let mut inner = self.inner.lock().expect("replay buffer mutex poisoned");
        inner.total_added += 1;

        if inner.records.len() < self.capacity {
            if !self.priority_enabled {
                inner.order.push_back(inner.records.len());
            }
            inner.records.push(experience);
            return;
        }

        if self.priority_enabled {
            // Lowest-priority eviction: `order` plays no role here, so it
            // is left untouched (and stays empty) to keep memory bounded.
            let victim = inner
                .records
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.priority.partial_cmp(&b.priority).unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i);
            if let Some(idx) = victim {
                inner.records[idx] = experience;
            }
        } else if let Some(idx) = inner.order.pop_front() {
            inner.records[idx] = experience;
            inner.order.push_back(idx);
        }
    }

    /// Returns `None` if fewer than `batch_size` records are present;
    /// otherwise samples without replacement (uniform mode) or with
    /// probability proportional to `priority^alpha` (priority mode),
    /// returning per-sample importance-sampling weights.
    pub fn sample(&self, batch_size: usize) -> Option<Batch> {
        let mut inner = self.inner.lock().expect("replay buffer mutex poisoned");
        if inner.records.len() < batch_size || batch_size == 0 {
            return None;
        }
        inner.total_sampled += 1;

        let n = inner.records.len();
        let indices: Vec<usize> = if self.priority_enabled {
            let priorities: Vec<f64> = inner.records.iter().map(|e| e.priority.powf(self.alpha)).collect();
            let total: f64 = priorities.iter().sum();
            let mut chosen = Vec::with_capacity(batch_size);
            let mut remaining: Vec<usize> = (0..n).collect();
            for _ in 0..batch_size {
                if remaining.is_empty() {
                    break;
                }
                let mut target = inner.rng.gen::<f64>() * total.max(1e-12);
                let mut pick_pos = remaining.len() - 1;
                for (pos, &idx) in remaining.iter().enumerate() {
                    target -= priorities[idx];
                    if target <= 0.0 {
                        pick_pos = pos;
                        break;
                    }
                }
                chosen.push(remaining.remove(pick_pos));
            }
            chosen
        } else {
            let mut all: Vec<usize> = (0..n).collect();
            all.shuffle(&mut inner.rng);
            all.truncate(batch_size);
            all
        };

        let weights = if self.priority_enabled {
            let priorities: Vec<f64> = inner.records.iter().map(|e| e.priority.powf(self.alpha)).collect();
            let total: f64 = priorities.iter().sum::<f64>().max(1e-12);
            let max_weight = indices
                .iter()
                .map(|&i| (n as f64 * priorities[i] / total).powf(-1.0))
                .fold(0.0_f64, f64::max)
                .max(1e-12);
            indices
                .iter()
                .map(|&i| (n as f64 * priorities[i] / total).powf(-1.0) / max_weight)
                .collect()
        } else {
            vec![1.0; indices.len()]
        };

        let experiences = indices.iter().map(|&i| inner.records[i].clone()).collect();

        Some(Batch { experiences, weights, indices })
    }

    pub fn size(&self) -> usize {
        self.inner.lock().expect("replay buffer mutex poisoned").records.len()
    }

    pub fn statistics(&self) -> ReplayStatistics {
        let inner = self.inner.lock().expect("replay buffer mutex poisoned");
        ReplayStatistics {
            size: inner.records.len(),
            capacity: self.capacity,
            total_added: inner.total_added,
            total_sampled: inner.total_sampled,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("replay buffer mutex poisoned");
        inner.records.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ContextType;

    fn sample_state() -> RoutingState {
        RoutingState::new(
            0.5,
            ContextType::Other,
            [true; 5],
            [0.5; 5],
            0.3,
            0.3,
            0.4,
            0.5,
        )
    }

    fn exp(reward: f64) -> Experience {
        Experience::new(sample_state(), 0, reward, sample_state(), false, 0)
    }

    #[test]
    fn sample_returns_none_below_batch_size() {
        let buf = ReplayBuffer::new(10, false, 0.6, 1);
        buf.add(exp(1.0));
        assert!(buf.sample(2).is_none());
    }

    #[test]
    fn fifo_eviction_drops_oldest_when_full() {
        let buf = ReplayBuffer::new(2, false, 0.6, 1);
        buf.add(exp(1.0));
        buf.add(exp(2.0));
        buf.add(exp(3.0));
        assert_eq!(buf.size(), 2);
        let batch = buf.sample(2).unwrap();
        let rewards: Vec<f64> = batch.experiences.iter().map(|e| e.reward).collect();
        assert!(!rewards.contains(&1.0), "oldest record should have been evicted");
    }

    #[test]
    fn priority_eviction_drops_lowest_priority_when_full() {
        let buf = ReplayBuffer::new(2, true, 0.6, 1);
        buf.add(exp(5.0));
        buf.add(exp(0.01));
        buf.add(exp(3.0));
        let batch = buf.sample(2).unwrap();
        let rewards: Vec<f64> = batch.experiences.iter().map(|e| e.reward).collect();
        assert!(!rewards.contains(&0.01), "lowest priority record should be evicted");
    }

    #[test]
    fn uniform_sampling_is_without_replacement() {
        let buf = ReplayBuffer::new(10, false, 0.6, 1);
        for i in 0..10 {
            buf.add(exp(i as f64));
        }
        let batch = buf.sample(10).unwrap();
        let mut indices = batch.indices.clone();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 10);
        assert!(batch.weights.iter().all(|&w| w == 1.0));
    }

    #[test]
    fn priority_sampling_returns_importance_weights_within_unit_bound() {
        let buf = ReplayBuffer::new(10, true, 0.6, 1);
        for i in 0..10 {
            buf.add(exp(i as f64));
        }
        let batch = buf.sample(5).unwrap();
        assert_eq!(batch.experiences.len(), 5);
        assert!(batch.weights.iter().all(|&w| w > 0.0 && w <= 1.0 + 1e-9));
    }

    #[test]
    fn statistics_reflect_size_and_counters() {
        let buf = ReplayBuffer::new(5, false, 0.6, 1);
        buf.add(exp(1.0));
        buf.add(exp(2.0));
        let _ = buf.sample(1);
        let stats = buf.statistics();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.capacity, 5);
        assert_eq!(stats.total_added, 2);
        assert_eq!(stats.total_sampled, 1);
    }

    #[test]
    fn clear_empties_the_buffer() {
        let buf = ReplayBuffer::new(5, false, 0.6, 1);
        buf.add(exp(1.0));
        buf.clear();
        assert_eq!(buf.size(), 0);
    }

    #[test]
    fn priority_mode_add_does_not_grow_order_unbounded() {
        // Regression: priority-mode eviction used to push the evicted slot
        // back onto `order` without ever popping, so `order` grew by one
        // entry per `add` once the buffer was full.
        let buf = ReplayBuffer::new(4, true, 0.6, 1);
        for i in 0..500 {
            buf.add(exp(i as f64));
        }
        assert_eq!(buf.size(), 4);
        let inner = buf.inner.lock().unwrap();
        assert!(inner.order.len() <= 4, "order grew unbounded: {}", inner.order.len());
    }

    #[test]
    fn concurrent_writers_do_not_lose_capacity_invariant() {
        use std::sync::Arc;
        use std::thread;
        let buf = Arc::new(ReplayBuffer::new(50, false, 0.6, 7));
        let mut handles = Vec::new();
        for t in 0..8 {
            let buf = buf.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    buf.add(exp((t * 1000 + i) as f64));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buf.size(), 50);
    }
}
