//! Internals of the Roundabout loop: failure bookkeeping, the ADAPT
//! strategic decision and INTEGRATE plan synthesis.
//!
//! The loop has three states and no terminal state of its own; it is
//! designed to run indefinitely across cycles. A [`StrategicDecision::Halt`]
//! out of ADAPT is what ends an agent's work, and it surfaces as an error
//! to the loop driver, never as a silent stall.

use serde::{Deserialize, Serialize};

use crate::types::{ResourceBudget, ResourceUsage};

/// Classified kind of a recorded failure, inferred from the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Resource,
    Logic,
    External,
    Timeout,
}

impl FailureKind {
    /// Keyword scan over the failure message. Unrecognized messages are
    /// treated as logic failures.
    pub fn classify(message: &str) -> FailureKind {
        let lower = message.to_lowercase();
        if lower.contains("budget")
            || lower.contains("resource")
            || lower.contains("quota")
            || lower.contains("insufficient")
        {
            FailureKind::Resource
        } else if lower.contains("timeout") || lower.contains("timed out") {
            FailureKind::Timeout
        } else if lower.contains("provider")
            || lower.contains("external")
            || lower.contains("unreachable")
            || lower.contains("api")
        {
            FailureKind::External
        } else {
            FailureKind::Logic
        }
    }
}

/// Severity scaled by the recent failure count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureSeverity {
    Minor,
    Moderate,
    Critical,
}

impl FailureSeverity {
    pub fn from_count(recent_failures: usize) -> FailureSeverity {
        match recent_failures {
            0 | 1 => FailureSeverity::Minor,
            2 => FailureSeverity::Moderate,
            _ => FailureSeverity::Critical,
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub message: String,
    pub kind: FailureKind,
    pub at_ms: u64,
}

/// Context assembled by ADAPT before the strategic decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationContext {
    pub severity: FailureSeverity,
    pub dominant_kind: Option<FailureKind>,
    pub failure_count: usize,
    pub resources_remaining: bool,
    pub decided_at_ms: u64,
}

/// Binary outcome of the ADAPT phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategicDecision {
    Proceed,
    /// Terminal for this agent; the reason names the rule that fired.
    Halt(String),
}

/// Tactical approach synthesized by INTEGRATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanApproach {
    ResourceOptimized,
    AlternativeLogic,
    ConservativeRetry,
}

/// Plan carried back into EMERGE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticalPlan {
    pub approach: PlanApproach,
    pub summary: String,
    pub created_at_ms: u64,
}

/// Inputs to the ADAPT strategic decision.
#[derive(Debug, Clone)]
pub struct AdaptInputs<'a> {
    pub failures: &'a [FailureRecord],
    pub usage: ResourceUsage,
    pub budget: ResourceBudget,
    pub recursion_depth: u32,
    pub max_recursion_depth: u32,
    pub elapsed_ms: u64,
}

/// Fraction of the execution-time budget after which ADAPT halts.
const TIME_BUDGET_HALT_FRACTION: f64 = 0.8;
/// Recorded failures at or above which a critical severity forces a halt.
const CRITICAL_FAILURE_COUNT: usize = 3;

/// Analyze the failure history and decide whether to proceed or halt.
/// Rules are evaluated in order; any match forces the halt.
pub fn strategic_decision(inputs: &AdaptInputs<'_>, now_ms: u64) -> (AdaptationContext, StrategicDecision) {
    let severity = FailureSeverity::from_count(inputs.failures.len());
    let dominant_kind = dominant_failure_kind(inputs.failures);
    let resources_remaining = !inputs.usage.exhausts(&inputs.budget);
    let context = AdaptationContext {
        severity,
        dominant_kind,
        failure_count: inputs.failures.len(),
        resources_remaining,
        decided_at_ms: now_ms,
    };

    // (a) Resource budget exhausted.
    if !resources_remaining {
        return (context, StrategicDecision::Halt("resource budget exhausted".to_string()));
    }
    // (b) Repeated failure at critical severity.
    if inputs.failures.len() >= CRITICAL_FAILURE_COUNT && severity == FailureSeverity::Critical {
        return (
            context,
            StrategicDecision::Halt(format!(
                "{} recorded failures at critical severity",
                inputs.failures.len()
            )),
        );
    }
    // (c) Recursion depth within one of the configured maximum.
    if inputs.recursion_depth + 1 >= inputs.max_recursion_depth {
        return (
            context,
            StrategicDecision::Halt(format!(
                "recursion depth {} within one of maximum {}",
                inputs.recursion_depth, inputs.max_recursion_depth
            )),
        );
    }
    // (d) Elapsed wall-clock time beyond 80% of the execution-time budget.
    let time_ceiling = (inputs.budget.max_execution_time_ms as f64 * TIME_BUDGET_HALT_FRACTION) as u64;
    if inputs.elapsed_ms > time_ceiling {
        return (
            context,
            StrategicDecision::Halt(format!(
                "elapsed {}ms beyond {}ms of the execution-time budget",
                inputs.elapsed_ms, time_ceiling
            )),
        );
    }

    (context, StrategicDecision::Proceed)
}

/// Most frequent failure kind in the history, later entries breaking ties.
fn dominant_failure_kind(failures: &[FailureRecord]) -> Option<FailureKind> {
    let kinds = [
        FailureKind::Resource,
        FailureKind::Logic,
        FailureKind::External,
        FailureKind::Timeout,
    ];
    let mut best: Option<(FailureKind, usize)> = None;
    for kind in kinds {
        let count = failures.iter().filter(|f| f.kind == kind).count();
        if count > 0 && best.map(|(_, c)| count >= c).unwrap_or(true) {
            best = Some((kind, count));
        }
    }
    best.map(|(kind, _)| kind)
}

/// Synthesize a new tactical approach from the stored adaptation context.
/// Resource-constrained failure histories bias toward a resource-optimized
/// approach, logic failures toward an alternative-logic approach, anything
/// else toward a conservative retry.
pub fn synthesize_plan(context: &AdaptationContext, now_ms: u64) -> TacticalPlan {
    let approach = match context.dominant_kind {
        Some(FailureKind::Resource) => PlanApproach::ResourceOptimized,
        Some(FailureKind::Logic) => PlanApproach::AlternativeLogic,
        _ => PlanApproach::ConservativeRetry,
    };
    let summary = match approach {
        PlanApproach::ResourceOptimized => {
            "reduce per-step cost and prefer cached results".to_string()
        }
        PlanApproach::AlternativeLogic => {
            "retry the step along an alternative decomposition".to_string()
        }
        PlanApproach::ConservativeRetry => "retry the step with unchanged tactics".to_string(),
    };
    TacticalPlan {
        approach,
        summary,
        created_at_ms: now_ms,
    }
}
