//! Resource Governor - the centralized admission-control service.
//!
//! Every resource-consuming operation (agent spawning, model invocation,
//! memory access, external API calls) must pass through
//! [`ResourceGovernor::request_approval`]. The governor owns all quota,
//! ledger, breaker and tempo state; agents never mutate it directly.
//!
//! Evaluation order for an approval request is fixed, first failing check
//! wins:
//! 1. hierarchy-pause check on the request's root ancestor;
//! 2. circuit-breaker check (open denies unconditionally);
//! 3. tempo gate (sleep denies everything except memory access, surviving
//!    estimates are scaled by the tempo level);
//! 4. operation-specific validation.

pub(crate) mod breaker;
pub(crate) mod ledger;
pub(crate) mod quotas;
pub(crate) mod tempo;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::config::SystemConfig;
use crate::errors::{AgencyError, DenialReason, QuotaViolationDetail, Result};
use crate::event_log::{AgencyEvent, EventKind, EventSink};
use crate::types::{
    AgentId, ApprovalDecision, ApprovalRequest, CircuitBreakerInfo, OperationKind, QuotaTier,
    ResourceBudget, ResourceUsage, SystemTempo, UserId, UserResourceQuotas,
};

use breaker::BreakerState;
use ledger::{AgentMeta, ResourceLedger, RollingWindow};
use quotas::QuotaBook;
use tempo::TempoState;

/// Identifier used for events not attributable to a single agent.
const SYSTEM: &str = "system";

/// Centralized admission control, quota enforcement and failure protection.
///
/// Shared as `Arc<ResourceGovernor>` across all concurrently executing
/// agents. Per-key state lives in lock-striped maps; the breaker and tempo
/// singletons are each guarded by one mutex so their transitions are
/// linearizable with respect to concurrent error/cost evaluations.
#[derive(Debug)]
pub struct ResourceGovernor {
    config: SystemConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    ledger: ResourceLedger,
    quotas: QuotaBook,
    breaker: Mutex<BreakerState>,
    tempo: Mutex<TempoState>,
    cost_window: Mutex<RollingWindow>,
    error_window: Mutex<RollingWindow>,
    ops_window: Mutex<RollingWindow>,
    paused_roots: RwLock<HashSet<AgentId>>,
}

impl ResourceGovernor {
    pub fn new(config: SystemConfig, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        let breaker = BreakerState::new(config.breaker_cooldown_ms, config.breaker_success_threshold);
        let cost_window = RollingWindow::new(config.cost_window_ms);
        let error_window = RollingWindow::new(config.error_window_ms);
        let ops_window = RollingWindow::new(config.error_window_ms);
        let quotas = QuotaBook::new(config.tier_quotas);
        Self {
            config,
            clock,
            events,
            ledger: ResourceLedger::new(),
            quotas,
            breaker: Mutex::new(breaker),
            tempo: Mutex::new(TempoState::new()),
            cost_window: Mutex::new(cost_window),
            error_window: Mutex::new(error_window),
            ops_window: Mutex::new(ops_window),
            paused_roots: RwLock::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Agent lifecycle
    // ------------------------------------------------------------------

    /// Register a live agent and create its ledger entry.
    pub fn register_agent(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
        parent: Option<AgentId>,
        recursion_depth: u32,
        budget: ResourceBudget,
    ) {
        self.ledger.register(
            agent_id,
            AgentMeta {
                user_id: user_id.clone(),
                parent,
                recursion_depth,
                budget,
            },
        );
    }

    /// Remove a terminated agent's ledger entry and metadata.
    pub fn deregister_agent(&self, agent_id: &AgentId) -> Result<()> {
        if self.ledger.deregister(agent_id) {
            Ok(())
        } else {
            Err(AgencyError::UnknownAgent(agent_id.clone()))
        }
    }

    // ------------------------------------------------------------------
    // Admission control
    // ------------------------------------------------------------------

    /// Single admission-control entry point.
    pub async fn request_approval(&self, request: ApprovalRequest) -> Result<ApprovalDecision> {
        let now = self.clock.now_ms();
        let meta = self
            .ledger
            .meta(&request.agent_id)
            .ok_or_else(|| AgencyError::UnknownAgent(request.agent_id.clone()))?;

        // 1. Hierarchy pause on the root ancestor.
        let root = self.ledger.root_ancestor(&request.agent_id);
        if self.paused_roots.read().await.contains(&root) {
            return Ok(self.deny(&request, now, DenialReason::HierarchyPaused { root }));
        }

        // 2. Circuit breaker.
        {
            let mut breaker = self.breaker.lock().unwrap();
            if let Some((from, to)) = breaker.refresh(now) {
                self.emit_breaker_transition(now, from, to);
            }
            if breaker.is_open(now) {
                return Ok(self.deny(&request, now, DenialReason::CircuitBreakerOpen));
            }
        }

        // 3. Tempo gate and estimate scaling.
        let tempo = self.tempo.lock().unwrap().current();
        if tempo == SystemTempo::Sleep && request.operation != OperationKind::MemoryAccess {
            return Ok(self.deny(
                &request,
                now,
                DenialReason::TempoAsleep {
                    operation: request.operation,
                },
            ));
        }
        let estimate = tempo::scale_estimate(tempo, request.operation, request.estimate);

        // 4. Operation-specific validation.
        let decision = match request.operation {
            OperationKind::CloneAgent => self.validate_clone(&meta, &request.agent_id, &estimate),
            OperationKind::LlmCall => self.validate_llm_call(&meta, &request.agent_id, &estimate, now),
            // Explicit extension points: unconditional approval for now.
            OperationKind::MemoryAccess | OperationKind::ExternalApi => {
                ApprovalDecision::approved(None)
            }
        };

        match &decision.reason {
            Some(reason) => Ok(self.deny(&request, now, reason.clone())),
            None => {
                // A granted admission counts as a successful operation for
                // half-open breaker recovery.
                if let Some((from, to)) = self.breaker.lock().unwrap().record_success() {
                    self.emit_breaker_transition(now, from, to);
                }
                self.events.record(AgencyEvent::new(
                    request.agent_id.clone(),
                    EventKind::ApprovalGranted,
                    format!("{} approved", request.operation),
                    now,
                ));
                Ok(decision)
            }
        }
    }

    fn validate_clone(
        &self,
        meta: &AgentMeta,
        agent_id: &AgentId,
        estimate: &ResourceUsage,
    ) -> ApprovalDecision {
        if meta.recursion_depth >= self.config.max_recursion_depth {
            return ApprovalDecision::denied(DenialReason::RecursionLimitExceeded {
                depth: meta.recursion_depth,
                max: self.config.max_recursion_depth,
            });
        }
        let active = self.ledger.agent_count();
        if active >= self.config.max_system_agents {
            return ApprovalDecision::denied(DenialReason::SystemAgentCapExceeded {
                active,
                cap: self.config.max_system_agents,
            });
        }
        // The projection is checked against a fraction of the *parent's*
        // budget, not the child's derived share.
        let projected = self.ledger.usage_of(agent_id).plus(estimate);
        let ceiling = meta.budget.scaled(self.config.clone_approval_fraction);
        if let Some(dimension) = projected.dimension_over(&ceiling) {
            return ApprovalDecision::denied(DenialReason::BudgetInsufficient {
                dimension: dimension.to_string(),
                projected: projected.dimension_value(dimension),
                limit: ceiling.dimension_value(dimension),
            });
        }
        ApprovalDecision::approved(Some(meta.budget.remaining(&projected)))
    }

    fn validate_llm_call(
        &self,
        meta: &AgentMeta,
        agent_id: &AgentId,
        estimate: &ResourceUsage,
        now_ms: u64,
    ) -> ApprovalDecision {
        let projected = self.ledger.usage_of(agent_id).plus(estimate);
        if let Some(dimension) = projected.dimension_over(&meta.budget) {
            return ApprovalDecision::denied(DenialReason::BudgetInsufficient {
                dimension: dimension.to_string(),
                projected: projected.dimension_value(dimension),
                limit: meta.budget.dimension_value(dimension),
            });
        }
        let violations = self.quotas.check(&meta.user_id, &self.ledger, now_ms);
        if !violations.is_empty() {
            return ApprovalDecision::denied(DenialReason::QuotaViolation(violations));
        }
        ApprovalDecision::approved(Some(meta.budget.remaining(&projected)))
    }

    fn deny(&self, request: &ApprovalRequest, now_ms: u64, reason: DenialReason) -> ApprovalDecision {
        self.events.record(AgencyEvent::new(
            request.agent_id.clone(),
            EventKind::ApprovalDenied,
            format!("{} denied: {}", request.operation, reason),
            now_ms,
        ));
        ApprovalDecision::denied(reason)
    }

    // ------------------------------------------------------------------
    // Usage accounting and failure signals
    // ------------------------------------------------------------------

    /// Additive accumulation into the agent's ledger entry. The delta is
    /// also attributed to the owning user's windowed history and fed into
    /// the cost-spike detector.
    pub async fn update_resource_usage(
        &self,
        agent_id: &AgentId,
        delta: &ResourceUsage,
    ) -> Result<()> {
        if !self.ledger.is_registered(agent_id) {
            return Err(AgencyError::UnknownAgent(agent_id.clone()));
        }
        let now = self.clock.now_ms();
        self.ledger.record(agent_id, delta, now);
        self.ops_window.lock().unwrap().push(now, 1.0);

        // Weighted cost: compute units plus a 10x premium on calls.
        let cost = delta.compute_units as f64 + 10.0 * delta.calls as f64;
        let (samples, total, spike) = {
            let mut costs = self.cost_window.lock().unwrap();
            costs.push(now, cost);
            (costs.len(), costs.sum(), costs.average() / self.config.cost_baseline)
        };
        let error_rate = self.error_rate(now);

        self.events.record(AgencyEvent::new(
            agent_id.clone(),
            EventKind::UsageUpdated,
            format!("+{} calls, +{} compute units", delta.calls, delta.compute_units),
            now,
        ));

        let spiking = spike > self.config.cost_spike_threshold
            && samples >= self.config.min_cost_samples
            && total >= self.config.min_cost_total;
        if spiking {
            let tripped = {
                let mut breaker = self.breaker.lock().unwrap();
                breaker.trip(now, error_rate, spike)
            };
            if tripped {
                self.emit_breaker_transition_detail(
                    now,
                    format!("opened on cost spike {:.2}x baseline", spike),
                );
                let root = self.ledger.root_ancestor(agent_id);
                self.pause_agent_hierarchy(&root, "cost spike").await;
            }
        } else {
            self.breaker.lock().unwrap().observe_signals(error_rate, spike);
        }

        self.adjust_tempo(now, error_rate, spike);
        Ok(())
    }

    /// Append an error to the time-windowed history and evaluate the
    /// breaker and tempo signals.
    pub async fn record_error(&self, agent_id: &AgentId, message: &str) {
        let now = self.clock.now_ms();
        self.error_window.lock().unwrap().push(now, 1.0);
        let (error_count, error_rate) = self.error_signals(now);
        let spike = self.current_cost_spike(now);

        self.events.record(AgencyEvent::new(
            agent_id.clone(),
            EventKind::ErrorRecorded,
            message.to_string(),
            now,
        ));

        {
            let mut breaker = self.breaker.lock().unwrap();
            if let Some((from, to)) = breaker.refresh(now) {
                self.emit_breaker_transition(now, from, to);
            }
            if breaker.record_halfopen_failure(now) {
                self.emit_breaker_transition_detail(now, "reopened on half-open failure".to_string());
            } else if error_count >= self.config.min_error_samples
                && error_rate > self.config.error_rate_threshold
            {
                if breaker.trip(now, error_rate, spike) {
                    self.emit_breaker_transition_detail(
                        now,
                        format!("opened on error rate {:.2}", error_rate),
                    );
                }
            } else {
                breaker.observe_signals(error_rate, spike);
            }
        }

        self.adjust_tempo(now, error_rate, spike);
    }

    fn error_signals(&self, now_ms: u64) -> (usize, f64) {
        let mut errors = self.error_window.lock().unwrap();
        errors.prune(now_ms);
        let mut ops = self.ops_window.lock().unwrap();
        ops.prune(now_ms);
        let error_count = errors.len();
        let total = error_count + ops.len();
        let rate = if total == 0 {
            0.0
        } else {
            error_count as f64 / total as f64
        };
        (error_count, rate)
    }

    fn error_rate(&self, now_ms: u64) -> f64 {
        self.error_signals(now_ms).1
    }

    fn current_cost_spike(&self, now_ms: u64) -> f64 {
        let mut costs = self.cost_window.lock().unwrap();
        costs.prune(now_ms);
        costs.average() / self.config.cost_baseline
    }

    fn adjust_tempo(&self, now_ms: u64, error_rate: f64, cost_spike: f64) {
        let transition = self
            .tempo
            .lock()
            .unwrap()
            .observe(error_rate, cost_spike, &self.config.tempo);
        if let Some((from, to)) = transition {
            self.events.record(AgencyEvent::new(
                SYSTEM,
                EventKind::TempoShift,
                format!("{} -> {}", from, to),
                now_ms,
            ));
        }
    }

    fn emit_breaker_transition(&self, now_ms: u64, from: crate::types::BreakerStatus, to: crate::types::BreakerStatus) {
        self.events.record(AgencyEvent::new(
            SYSTEM,
            EventKind::BreakerTransition,
            format!("{} -> {}", from, to),
            now_ms,
        ));
    }

    fn emit_breaker_transition_detail(&self, now_ms: u64, detail: String) {
        self.events.record(AgencyEvent::new(
            SYSTEM,
            EventKind::BreakerTransition,
            detail,
            now_ms,
        ));
    }

    // ------------------------------------------------------------------
    // Quotas
    // ------------------------------------------------------------------

    /// Aggregate the user's usage over 1-hour and 24-hour trailing windows
    /// and return every violated limit.
    pub fn check_user_quotas(&self, user_id: &UserId) -> Vec<QuotaViolationDetail> {
        self.quotas.check(user_id, &self.ledger, self.clock.now_ms())
    }

    pub fn user_quotas(&self, user_id: &UserId) -> UserResourceQuotas {
        self.quotas.quotas_for(user_id)
    }

    pub fn set_user_quotas(&self, user_id: &UserId, quotas: UserResourceQuotas) {
        self.quotas.set_quotas(user_id, quotas);
    }

    pub fn set_user_tier(&self, user_id: &UserId, tier: QuotaTier) {
        self.quotas.set_tier(user_id, tier);
    }

    // ------------------------------------------------------------------
    // Hierarchy pause/resume
    // ------------------------------------------------------------------

    /// Pause an agent hierarchy: all approval requests whose ancestor chain
    /// includes `root` are denied until resumed.
    pub async fn pause_agent_hierarchy(&self, root: &AgentId, reason: &str) {
        let inserted = self.paused_roots.write().await.insert(root.clone());
        if inserted {
            self.events.record(AgencyEvent::new(
                root.clone(),
                EventKind::HierarchyPaused,
                reason.to_string(),
                self.clock.now_ms(),
            ));
        }
    }

    pub async fn resume_agent_hierarchy(&self, root: &AgentId) {
        let removed = self.paused_roots.write().await.remove(root);
        if removed {
            self.events.record(AgencyEvent::new(
                root.clone(),
                EventKind::HierarchyResumed,
                String::new(),
                self.clock.now_ms(),
            ));
        }
    }

    pub async fn is_hierarchy_paused(&self, root: &AgentId) -> bool {
        self.paused_roots.read().await.contains(root)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn breaker_info(&self) -> CircuitBreakerInfo {
        let mut breaker = self.breaker.lock().unwrap();
        if let Some((from, to)) = breaker.refresh(self.clock.now_ms()) {
            self.emit_breaker_transition(self.clock.now_ms(), from, to);
        }
        breaker.info()
    }

    pub fn tempo(&self) -> SystemTempo {
        self.tempo.lock().unwrap().current()
    }

    pub fn usage_of(&self, agent_id: &AgentId) -> ResourceUsage {
        self.ledger.usage_of(agent_id)
    }

    pub fn agent_count(&self) -> usize {
        self.ledger.agent_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event_log::MemoryEventLog;
    use pretty_assertions::assert_eq;

    fn governor() -> (Arc<ResourceGovernor>, Arc<ManualClock>, Arc<MemoryEventLog>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let events = Arc::new(MemoryEventLog::default());
        let governor = Arc::new(ResourceGovernor::new(
            SystemConfig::default(),
            clock.clone(),
            events.clone(),
        ));
        (governor, clock, events)
    }

    fn small_budget() -> ResourceBudget {
        ResourceBudget {
            max_calls: 10,
            max_compute_units: 100,
            max_storage_bytes: 1024,
            max_execution_time_ms: 30_000,
        }
    }

    fn request(agent: &str, operation: OperationKind, estimate: ResourceUsage) -> ApprovalRequest {
        ApprovalRequest {
            agent_id: agent.to_string(),
            operation,
            estimate,
        }
    }

    #[tokio::test]
    async fn memory_access_is_unconditionally_approved() {
        let (governor, _, _) = governor();
        governor.register_agent(&"a".to_string(), &"u".to_string(), None, 0, small_budget());
        let decision = governor
            .request_approval(request("a", OperationKind::MemoryAccess, ResourceUsage::default()))
            .await
            .unwrap();
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn unknown_agent_is_a_usage_error() {
        let (governor, _, _) = governor();
        let result = governor
            .request_approval(request("ghost", OperationKind::LlmCall, ResourceUsage::default()))
            .await;
        assert!(matches!(result, Err(AgencyError::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn clone_denied_at_recursion_ceiling() {
        let (governor, _, _) = governor();
        let max = governor.config().max_recursion_depth;
        governor.register_agent(&"deep".to_string(), &"u".to_string(), None, max, small_budget());
        governor.register_agent(
            &"near".to_string(),
            &"u".to_string(),
            None,
            max - 1,
            small_budget(),
        );

        let denied = governor
            .request_approval(request("deep", OperationKind::CloneAgent, ResourceUsage::default()))
            .await
            .unwrap();
        assert!(!denied.approved);
        assert!(matches!(
            denied.reason,
            Some(DenialReason::RecursionLimitExceeded { .. })
        ));

        let approved = governor
            .request_approval(request("near", OperationKind::CloneAgent, ResourceUsage::default()))
            .await
            .unwrap();
        assert!(approved.approved);
    }

    #[tokio::test]
    async fn clone_denied_at_system_agent_cap() {
        let clock = Arc::new(ManualClock::new(0));
        let events = Arc::new(MemoryEventLog::default());
        let config = SystemConfig {
            max_system_agents: 2,
            ..SystemConfig::default()
        };
        let governor = ResourceGovernor::new(config, clock, events);
        governor.register_agent(&"a".to_string(), &"u".to_string(), None, 0, small_budget());
        governor.register_agent(&"b".to_string(), &"u".to_string(), None, 0, small_budget());

        let denied = governor
            .request_approval(request("a", OperationKind::CloneAgent, ResourceUsage::default()))
            .await
            .unwrap();
        assert!(matches!(
            denied.reason,
            Some(DenialReason::SystemAgentCapExceeded { active: 2, cap: 2 })
        ));
    }

    #[tokio::test]
    async fn llm_call_denied_beyond_thread_budget() {
        let (governor, _, _) = governor();
        governor.register_agent(&"a".to_string(), &"u".to_string(), None, 0, small_budget());
        governor
            .update_resource_usage(
                &"a".to_string(),
                &ResourceUsage {
                    calls: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let denied = governor
            .request_approval(request(
                "a",
                OperationKind::LlmCall,
                ResourceUsage {
                    calls: 1,
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        assert!(!denied.approved);
        match denied.reason {
            Some(DenialReason::BudgetInsufficient { dimension, projected, limit }) => {
                assert_eq!(dimension, "calls");
                assert_eq!(projected, 11);
                assert_eq!(limit, 10);
            }
            other => panic!("expected budget denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn paused_hierarchy_denies_descendants() {
        let (governor, _, _) = governor();
        governor.register_agent(&"root".to_string(), &"u".to_string(), None, 0, small_budget());
        governor.register_agent(
            &"child".to_string(),
            &"u".to_string(),
            Some("root".to_string()),
            1,
            small_budget(),
        );
        governor
            .pause_agent_hierarchy(&"root".to_string(), "operator request")
            .await;

        let denied = governor
            .request_approval(request("child", OperationKind::MemoryAccess, ResourceUsage::default()))
            .await
            .unwrap();
        assert!(matches!(
            denied.reason,
            Some(DenialReason::HierarchyPaused { ref root }) if root == "root"
        ));

        governor.resume_agent_hierarchy(&"root".to_string()).await;
        let approved = governor
            .request_approval(request("child", OperationKind::MemoryAccess, ResourceUsage::default()))
            .await
            .unwrap();
        assert!(approved.approved);
    }

    #[tokio::test]
    async fn error_rate_opens_breaker_for_every_agent() {
        let (governor, clock, _) = governor();
        governor.register_agent(&"a".to_string(), &"u".to_string(), None, 0, small_budget());
        governor.register_agent(&"b".to_string(), &"u".to_string(), None, 0, small_budget());

        for _ in 0..5 {
            governor.record_error(&"a".to_string(), "closure failed").await;
        }

        let denied = governor
            .request_approval(request("b", OperationKind::ExternalApi, ResourceUsage::default()))
            .await
            .unwrap();
        assert!(matches!(denied.reason, Some(DenialReason::CircuitBreakerOpen)));

        // Cooldown elapses: breaker moves to half-open and admits again.
        // The sustained error rate has also driven the tempo to sleep, so
        // only a memory access can pass the tempo gate here.
        clock.advance(governor.config().breaker_cooldown_ms + 1);
        assert_eq!(governor.breaker_info().status, crate::types::BreakerStatus::HalfOpen);
        let approved = governor
            .request_approval(request("b", OperationKind::MemoryAccess, ResourceUsage::default()))
            .await
            .unwrap();
        assert!(approved.approved);
    }

    #[tokio::test]
    async fn cost_spike_opens_breaker_and_pauses_hierarchy() {
        let (governor, _, _) = governor();
        governor.register_agent(&"root".to_string(), &"u".to_string(), None, 0, ResourceBudget::default());
        governor.register_agent(
            &"leaf".to_string(),
            &"u".to_string(),
            Some("root".to_string()),
            1,
            ResourceBudget::default(),
        );

        // Each update costs 10 * 5 + 50 = 100 units, 10x the baseline of 10.
        for _ in 0..5 {
            governor
                .update_resource_usage(
                    &"leaf".to_string(),
                    &ResourceUsage {
                        calls: 5,
                        compute_units: 50,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(governor.breaker_info().status, crate::types::BreakerStatus::Open);
        assert!(governor.is_hierarchy_paused(&"root".to_string()).await);
    }

    #[tokio::test]
    async fn half_open_closes_after_consecutive_successes() {
        let (governor, clock, _) = governor();
        governor.register_agent(&"a".to_string(), &"u".to_string(), None, 0, small_budget());
        for _ in 0..5 {
            governor.record_error(&"a".to_string(), "boom").await;
        }
        clock.advance(governor.config().breaker_cooldown_ms + 1);

        for _ in 0..governor.config().breaker_success_threshold {
            let decision = governor
                .request_approval(request("a", OperationKind::MemoryAccess, ResourceUsage::default()))
                .await
                .unwrap();
            assert!(decision.approved);
        }
        assert_eq!(governor.breaker_info().status, crate::types::BreakerStatus::Closed);
    }
}
