//! Core data model shared by the agent runtime and the resource governor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a cognitive agent.
pub type AgentId = String;
/// Unique identifier of a context thread.
pub type ThreadId = String;
/// Identifier of the user owning an agent hierarchy.
pub type UserId = String;

/// Phase of the Roundabout execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentPhase {
    /// Attempting to complete the current tactical step.
    Emerge,
    /// Analyzing accumulated failure and deciding whether to proceed or halt.
    Adapt,
    /// Synthesizing a new tactical plan before returning to Emerge.
    Integrate,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentPhase::Emerge => write!(f, "EMERGE"),
            AgentPhase::Adapt => write!(f, "ADAPT"),
            AgentPhase::Integrate => write!(f, "INTEGRATE"),
        }
    }
}

/// Role of an agent, fixed at construction. The role selects the
/// phase-specific emergence strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    Coordinator,
    Conscious,
    Core,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Coordinator => write!(f, "coordinator"),
            AgentRole::Conscious => write!(f, "conscious"),
            AgentRole::Core => write!(f, "core"),
        }
    }
}

/// Resource ceilings for a context thread. A budget is a ceiling, not a
/// balance: consumption is tracked separately in [`ResourceUsage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    /// Maximum number of calls (model invocations, external calls).
    pub max_calls: u64,
    /// Maximum abstract compute units.
    pub max_compute_units: u64,
    /// Maximum bytes of storage the agent may write.
    pub max_storage_bytes: u64,
    /// Maximum wall-clock execution time in milliseconds.
    pub max_execution_time_ms: u64,
}

impl ResourceBudget {
    /// Remaining headroom given cumulative usage, floored at zero per
    /// dimension.
    pub fn remaining(&self, usage: &ResourceUsage) -> ResourceBudget {
        ResourceBudget {
            max_calls: self.max_calls.saturating_sub(usage.calls),
            max_compute_units: self.max_compute_units.saturating_sub(usage.compute_units),
            max_storage_bytes: self.max_storage_bytes.saturating_sub(usage.storage_bytes),
            max_execution_time_ms: self
                .max_execution_time_ms
                .saturating_sub(usage.execution_time_ms),
        }
    }

    /// Derive a child budget as `floor(fraction * remaining)` per dimension.
    pub fn child_share(&self, usage: &ResourceUsage, fraction: f64) -> ResourceBudget {
        let remaining = self.remaining(usage);
        let share = |v: u64| (fraction * v as f64).floor() as u64;
        ResourceBudget {
            max_calls: share(remaining.max_calls),
            max_compute_units: share(remaining.max_compute_units),
            max_storage_bytes: share(remaining.max_storage_bytes),
            max_execution_time_ms: share(remaining.max_execution_time_ms),
        }
    }

    /// Value of a dimension by its canonical name.
    pub fn dimension_value(&self, dimension: &str) -> u64 {
        match dimension {
            "calls" => self.max_calls,
            "compute_units" => self.max_compute_units,
            "storage_bytes" => self.max_storage_bytes,
            "execution_time_ms" => self.max_execution_time_ms,
            _ => 0,
        }
    }

    /// Scale every dimension by `factor`, rounding down.
    pub fn scaled(&self, factor: f64) -> ResourceBudget {
        let scale = |v: u64| (factor * v as f64).floor() as u64;
        ResourceBudget {
            max_calls: scale(self.max_calls),
            max_compute_units: scale(self.max_compute_units),
            max_storage_bytes: scale(self.max_storage_bytes),
            max_execution_time_ms: scale(self.max_execution_time_ms),
        }
    }
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_calls: 100,
            max_compute_units: 1_000,
            max_storage_bytes: 10 * 1024 * 1024,
            max_execution_time_ms: 300_000,
        }
    }
}

/// Cumulative resource consumption of one agent. Same shape as
/// [`ResourceBudget`]; monotonically non-decreasing for a live agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub calls: u64,
    pub compute_units: u64,
    pub storage_bytes: u64,
    pub execution_time_ms: u64,
}

impl ResourceUsage {
    /// Additive accumulation, saturating per dimension.
    pub fn accumulate(&mut self, delta: &ResourceUsage) {
        self.calls = self.calls.saturating_add(delta.calls);
        self.compute_units = self.compute_units.saturating_add(delta.compute_units);
        self.storage_bytes = self.storage_bytes.saturating_add(delta.storage_bytes);
        self.execution_time_ms = self.execution_time_ms.saturating_add(delta.execution_time_ms);
    }

    /// Sum of self and `delta`, without mutating either.
    pub fn plus(&self, delta: &ResourceUsage) -> ResourceUsage {
        let mut out = *self;
        out.accumulate(delta);
        out
    }

    /// Name of the first dimension whose usage exceeds `limit`, if any.
    pub fn dimension_over(&self, limit: &ResourceBudget) -> Option<&'static str> {
        if self.calls > limit.max_calls {
            Some("calls")
        } else if self.compute_units > limit.max_compute_units {
            Some("compute_units")
        } else if self.storage_bytes > limit.max_storage_bytes {
            Some("storage_bytes")
        } else if self.execution_time_ms > limit.max_execution_time_ms {
            Some("execution_time_ms")
        } else {
            None
        }
    }

    /// True when usage has reached or passed the budget in any dimension.
    pub fn exhausts(&self, budget: &ResourceBudget) -> bool {
        self.calls >= budget.max_calls
            || self.compute_units >= budget.max_compute_units
            || self.storage_bytes >= budget.max_storage_bytes
            || self.execution_time_ms >= budget.max_execution_time_ms
    }

    /// Value of a dimension by its canonical name.
    pub fn dimension_value(&self, dimension: &str) -> u64 {
        match dimension {
            "calls" => self.calls,
            "compute_units" => self.compute_units,
            "storage_bytes" => self.storage_bytes,
            "execution_time_ms" => self.execution_time_ms,
            _ => 0,
        }
    }

    /// Interpret a budget as an estimated consumption of the same magnitude.
    /// Used when the cost of an operation is the budget it hands over.
    pub fn from_budget(budget: &ResourceBudget) -> ResourceUsage {
        ResourceUsage {
            calls: budget.max_calls,
            compute_units: budget.max_compute_units,
            storage_bytes: budget.max_storage_bytes,
            execution_time_ms: budget.max_execution_time_ms,
        }
    }
}

/// Per-agent configuration injected at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationProfile {
    pub llm_model: String,
    pub toolkit: Vec<String>,
    pub memory_scope: String,
    pub entry_phase: AgentPhase,
    pub max_recursion_depth: Option<u32>,
    pub resource_budget: Option<ResourceBudget>,
}

impl Default for ConfigurationProfile {
    fn default() -> Self {
        Self {
            llm_model: "default".to_string(),
            toolkit: Vec::new(),
            memory_scope: "session".to_string(),
            entry_phase: AgentPhase::Emerge,
            max_recursion_depth: None,
            resource_budget: None,
        }
    }
}

/// The per-agent bundle of goal, task, configuration, scope and budget,
/// passed down a spawn hierarchy. Created once per agent and owned
/// exclusively by it; children receive their own newly derived thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextThread {
    pub id: ThreadId,
    pub top_level_goal: String,
    pub parent_agent_id: Option<AgentId>,
    pub task_definition: String,
    pub profile: ConfigurationProfile,
    pub memory_scope: String,
    pub budget: ResourceBudget,
    pub recursion_depth: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Mutable per-iteration state of a cognitive agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub phase: AgentPhase,
    /// Resonance with the current interaction, in [0, 1].
    pub resonance: f64,
    /// Confidence in the current tactical approach, in [0, 1].
    pub confidence: f64,
    pub timestamp_ms: u64,
}

/// Externally supplied emotional-state vector. All components are in [0, 1];
/// the timestamp is used only for decay weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub fight: f64,
    pub flight: f64,
    pub fixes: f64,
    pub confidence: f64,
    pub timestamp_ms: u64,
}

/// Engagement strategy selected from a relational delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngagementStrategy {
    Mirror,
    Harmonize,
    Listen,
}

impl fmt::Display for EngagementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngagementStrategy::Mirror => write!(f, "mirror"),
            EngagementStrategy::Harmonize => write!(f, "harmonize"),
            EngagementStrategy::Listen => write!(f, "listen"),
        }
    }
}

/// Computed (mis)alignment between an agent's internal state and an external
/// user state. Derived per input, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelationalDelta {
    pub async_delta: f64,
    pub sync_delta: f64,
    pub magnitude: f64,
    pub strategy: EngagementStrategy,
}

/// Subscription tier determining default resource quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotaTier {
    Free,
    Premium,
    Enterprise,
}

/// Per-user quota configuration. Defaulted to the tier baseline on first
/// access, overridable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResourceQuotas {
    pub tier: QuotaTier,
    pub llm_calls_per_hour: u64,
    pub llm_calls_per_day: u64,
    pub compute_units_per_hour: u64,
    pub compute_units_per_day: u64,
    pub storage_bytes_total: u64,
}

/// Circuit breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerStatus::Closed => write!(f, "closed"),
            BreakerStatus::Open => write!(f, "open"),
            BreakerStatus::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Snapshot of the process-wide circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerInfo {
    pub status: BreakerStatus,
    pub error_rate: f64,
    pub cost_spike: f64,
    pub last_triggered_ms: Option<u64>,
    pub next_retry_at_ms: Option<u64>,
}

/// Global throttling level derived from error and cost signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemTempo {
    HighPerformance,
    LowIntensity,
    Sleep,
}

impl fmt::Display for SystemTempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemTempo::HighPerformance => write!(f, "high-performance"),
            SystemTempo::LowIntensity => write!(f, "low-intensity"),
            SystemTempo::Sleep => write!(f, "sleep"),
        }
    }
}

/// Kind of resource-consuming operation gated by the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CloneAgent,
    LlmCall,
    MemoryAccess,
    ExternalApi,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::CloneAgent => write!(f, "clone_agent"),
            OperationKind::LlmCall => write!(f, "llm_call"),
            OperationKind::MemoryAccess => write!(f, "memory_access"),
            OperationKind::ExternalApi => write!(f, "external_api"),
        }
    }
}

/// Admission request submitted to the resource governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub agent_id: AgentId,
    pub operation: OperationKind,
    /// Estimated cost of the operation, in usage units.
    pub estimate: ResourceUsage,
}

/// Admission decision returned by the governor. Denials carry a typed
/// reason so callers can distinguish retry-later from not-entitled from
/// structurally impossible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub reason: Option<crate::errors::DenialReason>,
    /// Remaining thread budget after the projected operation, for
    /// budget-checked operations.
    pub updated_budget: Option<ResourceBudget>,
}

impl ApprovalDecision {
    pub fn approved(updated_budget: Option<ResourceBudget>) -> Self {
        Self {
            approved: true,
            reason: None,
            updated_budget,
        }
    }

    pub fn denied(reason: crate::errors::DenialReason) -> Self {
        Self {
            approved: false,
            reason: Some(reason),
            updated_budget: None,
        }
    }
}

/// Terminal status of a child agent as seen from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Completed,
    Failed,
    Running,
    Error,
}

/// Structured report produced at child termination or on-demand status
/// poll. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildAgentReport {
    pub child_id: AgentId,
    pub task_definition: String,
    pub status: ReportStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub resource_usage: ResourceUsage,
    pub execution_time_ms: u64,
    pub timestamp_ms: u64,
}

/// Read-only snapshot of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: AgentId,
    pub phase: AgentPhase,
    pub active: bool,
    pub child_count: usize,
    pub resource_usage: ResourceUsage,
    pub last_activity_ms: u64,
}

/// Result of one processed input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_id: AgentId,
    pub text: String,
    pub phase: AgentPhase,
    pub strategy: Option<EngagementStrategy>,
    pub delta: Option<RelationalDelta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_floors_at_zero() {
        let budget = ResourceBudget {
            max_calls: 10,
            max_compute_units: 100,
            max_storage_bytes: 1024,
            max_execution_time_ms: 30_000,
        };
        let usage = ResourceUsage {
            calls: 15,
            compute_units: 40,
            storage_bytes: 0,
            execution_time_ms: 0,
        };
        let remaining = budget.remaining(&usage);
        assert_eq!(remaining.max_calls, 0);
        assert_eq!(remaining.max_compute_units, 60);
    }

    #[test]
    fn child_share_is_floored_fraction_of_remaining() {
        let budget = ResourceBudget {
            max_calls: 10,
            max_compute_units: 100,
            max_storage_bytes: 1024,
            max_execution_time_ms: 30_000,
        };
        let usage = ResourceUsage {
            calls: 1,
            compute_units: 10,
            storage_bytes: 24,
            execution_time_ms: 0,
        };
        let child = budget.child_share(&usage, 0.3);
        assert_eq!(child.max_calls, 2); // floor(0.3 * 9)
        assert_eq!(child.max_compute_units, 27); // floor(0.3 * 90)
        assert_eq!(child.max_storage_bytes, 300); // floor(0.3 * 1000)
        assert_eq!(child.max_execution_time_ms, 9_000);
    }

    #[test]
    fn dimension_over_reports_first_violation() {
        let budget = ResourceBudget {
            max_calls: 5,
            max_compute_units: 50,
            max_storage_bytes: 100,
            max_execution_time_ms: 1_000,
        };
        let usage = ResourceUsage {
            calls: 5,
            compute_units: 51,
            storage_bytes: 0,
            execution_time_ms: 0,
        };
        assert_eq!(usage.dimension_over(&budget), Some("compute_units"));
        assert!(usage.exhausts(&budget));
    }
}
