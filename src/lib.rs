//! Multi-provider LLM request orchestrator with learned routing and
//! parallel speculative execution.
//!
//! This crate is the orchestration *core*: complexity-aware routing, a DQN
//! policy that learns from outcomes, a quantum executor that fans a request
//! out into several concurrent variations and collapses them into one
//! answer, and the conversation memory that ties turns together. Concrete
//! provider SDKs, HTTP surfaces, auth and billing live outside this crate —
//! see [`provider::ProviderRegistry`] for the seam.

pub mod cache;
pub mod config;
pub mod context;
pub mod convo;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod provider;
pub mod quantum;
pub mod rl;
pub mod routing;

pub use config::CoreConfig;
pub use context::CoreContext;
pub use coordinator::OrchestrationCoordinator;
pub use error::OrchestratorError;
