// Roundabout Library
// Hierarchical cognitive agent orchestration with centralized resource governance

pub mod agent;
pub mod clock;
pub mod config;
pub mod errors;
pub mod event_log;
pub mod governor;
pub mod llm;
pub mod types;

// Re-export the primary entry points
pub use crate::agent::factory::AgentFactory;
pub use crate::agent::CognitiveAgent;
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::SystemConfig;
pub use crate::errors::{AgencyError, DenialReason, QuotaViolationDetail, Result};
pub use crate::event_log::{AgencyEvent, EventKind, EventSink, MemoryEventLog, TracingEventLog};
pub use crate::governor::ResourceGovernor;
pub use crate::llm::{
    ChatRequest, ChatResponse, LlmProvider, StubLlmProvider, UnreachableLlmProvider,
};
pub use crate::types::{
    AgentId, AgentPhase, AgentResponse, AgentRole, AgentState, AgentStatus, ApprovalDecision,
    ApprovalRequest, BreakerStatus, ChildAgentReport, CircuitBreakerInfo, ConfigurationProfile,
    ContextThread, EngagementStrategy, OperationKind, QuotaTier, RelationalDelta, ReportStatus,
    ResourceBudget, ResourceUsage, SystemTempo, UserResourceQuotas, UserState,
};
