//! Reinforcement-learning subsystem: experience replay (C7), the Q-network
//! (C8), and the DQN routing agent (C9). See the module-level docs on
//! [`replay`], [`network`], and [`agent`] for grounding detail.

pub mod agent;
pub mod network;
pub mod replay;

pub use agent::{compute_reward, DqnAgent, DqnAgentConfig, PerformanceMetrics};
pub use network::QNetwork;
pub use replay::{Batch, Experience, ReplayBuffer, ReplayStatistics};
