//! Error taxonomy for the orchestration core (spec §7).
//!
//! Per-branch provider failures are recovered locally by the quantum
//! executor (see [`crate::quantum`]) and never reach this type; everything
//! here is either surfaced to the caller immediately or terminates a
//! request's event stream.

use thiserror::Error;

/// Errors the core can return. Variant names mirror the error "kinds" in
/// spec §7 rather than any particular collaborator's exception hierarchy.
#[derive(Debug, Error, Clone)]
pub enum OrchestratorError {
    /// Malformed request, invalid conversation role, or bad configuration.
    /// Not retriable.
    #[error("validation error: {0}")]
    Validation(String),

    /// The router found no eligible (provider, model) candidate for the
    /// request. Not retriable.
    #[error("no eligible model for request")]
    NoEligibleModel,

    /// Every quantum-executor branch ended in error or timeout. Not
    /// retriable at this layer — a caller may retry a fresh request.
    #[error("all {branch_count} branches failed")]
    AllBranchesFailed { branch_count: usize },

    /// The quantum executor's worker pool and queue were both saturated.
    /// Retriable.
    #[error("executor overloaded: queue capacity {queue_capacity} exceeded")]
    Overloaded { queue_capacity: usize },

    /// A request-level timeout elapsed. Not retriable (branch-level timeouts
    /// are recorded on the branch and do not produce this variant unless
    /// every branch timed out, see `AllBranchesFailed`).
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// An invariant the core itself is responsible for was violated. Always
    /// carries a stable code so alerting can key off it.
    #[error("internal error [{code}]: {message}")]
    Internal { code: &'static str, message: String },
}

impl OrchestratorError {
    /// Whether a caller may usefully retry the *same* request.
    pub fn retriable(&self) -> bool {
        matches!(self, OrchestratorError::Overloaded { .. })
    }

    /// Stable machine-readable code for the `error` stream event (spec §6).
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation_error",
            OrchestratorError::NoEligibleModel => "no_eligible_model",
            OrchestratorError::AllBranchesFailed { .. } => "all_branches_failed",
            OrchestratorError::Overloaded { .. } => "overloaded",
            OrchestratorError::Timeout(_) => "timeout",
            OrchestratorError::Internal { code, .. } => code,
        }
    }
}

/// A single provider call failed. Recorded on one [`crate::quantum::QuantumBranch`]
/// only; other branches continue. Retriable by the executor within its own
/// retry budget — this type never escapes to [`OrchestratorError`].
#[derive(Debug, Error, Clone)]
#[error("provider error: {0}")]
pub struct ProviderError(pub String);

pub type Result<T> = std::result::Result<T, OrchestratorError>;
