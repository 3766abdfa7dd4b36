//! Error taxonomy for the agent runtime and the resource governor.
//!
//! Denials are values carried inside [`ApprovalDecision`](crate::types::ApprovalDecision);
//! they become errors only when an operation that required approval treats
//! the denial as terminal (e.g. spawning a child is all-or-nothing).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{AgentId, OperationKind};

/// One violated user-quota limit. The governor returns the full list of
/// violations, not just a boolean, so callers can report specifics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaViolationDetail {
    /// Name of the violated limit, e.g. `llm_calls_per_hour`.
    pub limit: String,
    pub used: u64,
    pub allowed: u64,
}

impl fmt::Display for QuotaViolationDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.limit, self.used, self.allowed)
    }
}

/// Typed reason for an admission denial.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum DenialReason {
    #[error("circuit breaker is open; retry after the cooldown window")]
    CircuitBreakerOpen,
    #[error("agent hierarchy rooted at {root} is paused")]
    HierarchyPaused { root: AgentId },
    #[error("system tempo is sleep; {operation} is not admitted")]
    TempoAsleep { operation: OperationKind },
    #[error("recursion depth {depth} is at or above the configured maximum {max}")]
    RecursionLimitExceeded { depth: u32, max: u32 },
    #[error("system agent count {active} has reached the cap {cap}")]
    SystemAgentCapExceeded { active: usize, cap: usize },
    #[error("insufficient budget: projected {projected} exceeds {limit} on dimension {dimension}")]
    BudgetInsufficient {
        dimension: String,
        projected: u64,
        limit: u64,
    },
    #[error("user quota violated: {}", format_violations(.0))]
    QuotaViolation(Vec<QuotaViolationDetail>),
}

fn format_violations(violations: &[QuotaViolationDetail]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by agents and the governor.
#[derive(Debug, Clone, Error)]
pub enum AgencyError {
    #[error("approval denied: {0}")]
    ApprovalDenied(#[from] DenialReason),
    #[error("emergence failure: {0}")]
    EmergenceFailure(String),
    #[error("strategic halt: {0}")]
    StrategicHalt(String),
    #[error("tactical plan invalid: {0}")]
    TacticalPlanInvalid(String),
    #[error("agent {0} is not active")]
    AgentInactive(AgentId),
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),
    #[error("provider error: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, AgencyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_reasons_name_the_specific_cause() {
        let denial = DenialReason::BudgetInsufficient {
            dimension: "calls".to_string(),
            projected: 12,
            limit: 9,
        };
        let msg = denial.to_string();
        assert!(msg.contains("calls"));
        assert!(msg.contains("12"));

        let quota = DenialReason::QuotaViolation(vec![QuotaViolationDetail {
            limit: "llm_calls_per_hour".to_string(),
            used: 51,
            allowed: 50,
        }]);
        assert!(quota.to_string().contains("llm_calls_per_hour"));
    }

    #[test]
    fn denial_converts_into_agency_error() {
        let err: AgencyError = DenialReason::CircuitBreakerOpen.into();
        assert!(matches!(err, AgencyError::ApprovalDenied(_)));
        assert!(err.to_string().contains("circuit breaker"));
    }
}
