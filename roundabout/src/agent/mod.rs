//! Cognitive agent: the execution unit of the Roundabout loop.
//!
//! Each agent owns exactly one [`ContextThread`], runs EMERGE/ADAPT/
//! INTEGRATE iterations, and may recursively spawn child agents. Every
//! resource-consuming step is gated by the shared [`ResourceGovernor`];
//! agents never touch governor state directly.

pub mod delta;
pub mod factory;
pub mod roundabout_loop;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_recursion::async_recursion;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SystemConfig;
use crate::errors::{AgencyError, Result};
use crate::event_log::{AgencyEvent, EventKind, EventSink};
use crate::governor::ResourceGovernor;
use crate::llm::{ChatRequest, ClosureOutcome, LlmProvider};
use crate::types::{
    AgentId, AgentPhase, AgentResponse, AgentRole, AgentState, AgentStatus, ApprovalRequest,
    ChildAgentReport, ConfigurationProfile, ContextThread, EngagementStrategy, OperationKind,
    RelationalDelta, ReportStatus, ResourceUsage, UserId, UserState,
};

use roundabout_loop::{
    strategic_decision, synthesize_plan, AdaptInputs, AdaptationContext, FailureKind,
    FailureRecord, StrategicDecision, TacticalPlan,
};

/// Estimated cost of one model-backed closure attempt.
const LLM_STEP_ESTIMATE: ResourceUsage = ResourceUsage {
    calls: 1,
    compute_units: 10,
    storage_bytes: 0,
    execution_time_ms: 0,
};

/// Cost of one local heuristic closure attempt.
const HEURISTIC_STEP_USAGE: ResourceUsage = ResourceUsage {
    calls: 0,
    compute_units: 2,
    storage_bytes: 0,
    execution_time_ms: 0,
};

/// Shared runtime dependencies handed to every agent in a hierarchy.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeHandles {
    pub governor: Arc<ResourceGovernor>,
    pub provider: Arc<dyn LlmProvider>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<SystemConfig>,
}

#[derive(Debug, Default)]
struct LoopState {
    failures: Vec<FailureRecord>,
    adaptation: Option<AdaptationContext>,
    plan: Option<TacticalPlan>,
    halt_reason: Option<String>,
}

/// Hierarchical execution unit running the Roundabout loop.
#[derive(Debug)]
pub struct CognitiveAgent {
    id: AgentId,
    role: AgentRole,
    user_id: UserId,
    thread: ContextThread,
    state: Mutex<AgentState>,
    active: AtomicBool,
    halted: AtomicBool,
    started_at_ms: u64,
    last_activity_ms: AtomicU64,
    children: Mutex<HashMap<AgentId, Arc<CognitiveAgent>>>,
    loop_state: Mutex<LoopState>,
    runtime: RuntimeHandles,
    rng: Mutex<StdRng>,
}

impl CognitiveAgent {
    pub(crate) fn new(
        role: AgentRole,
        user_id: UserId,
        thread: ContextThread,
        runtime: RuntimeHandles,
        rng_seed: u64,
    ) -> Arc<Self> {
        let now = runtime.clock.now_ms();
        let entry_phase = thread.profile.entry_phase;
        Arc::new(Self {
            id: format!("agent-{}", Uuid::new_v4()),
            role,
            user_id,
            thread,
            state: Mutex::new(AgentState {
                phase: entry_phase,
                resonance: 0.5,
                confidence: 0.5,
                timestamp_ms: now,
            }),
            active: AtomicBool::new(true),
            halted: AtomicBool::new(false),
            started_at_ms: now,
            last_activity_ms: AtomicU64::new(now),
            children: Mutex::new(HashMap::new()),
            loop_state: Mutex::new(LoopState::default()),
            runtime,
            rng: Mutex::new(StdRng::seed_from_u64(rng_seed)),
        })
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn thread(&self) -> &ContextThread {
        &self.thread
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> AgentPhase {
        self.state.lock().unwrap().phase
    }

    pub fn agent_state(&self) -> AgentState {
        *self.state.lock().unwrap()
    }

    /// Explicitly update resonance and confidence, clamped to [0, 1].
    pub fn update_state(&self, resonance: f64, confidence: f64) {
        let mut state = self.state.lock().unwrap();
        state.resonance = resonance.clamp(0.0, 1.0);
        state.confidence = confidence.clamp(0.0, 1.0);
        state.timestamp_ms = self.runtime.clock.now_ms();
    }

    pub fn failure_count(&self) -> usize {
        self.loop_state.lock().unwrap().failures.len()
    }

    /// Summary of the currently stored tactical plan, if any.
    pub fn current_plan_summary(&self) -> Option<String> {
        self.loop_state
            .lock()
            .unwrap()
            .plan
            .as_ref()
            .map(|p| p.summary.clone())
    }

    // ------------------------------------------------------------------
    // Roundabout loop
    // ------------------------------------------------------------------

    /// Run one Roundabout iteration against `input`, then compute the
    /// relational delta when a user-state vector accompanies the input, and
    /// produce the role/strategy-specific response.
    ///
    /// Any internal failure forces `phase = ADAPT` before propagating; the
    /// caller decides whether to retry, escalate or terminate.
    pub async fn process_input(
        &self,
        input: &str,
        user_state: Option<&UserState>,
    ) -> Result<AgentResponse> {
        if !self.is_active() {
            return Err(AgencyError::AgentInactive(self.id.clone()));
        }
        self.last_activity_ms
            .store(self.runtime.clock.now_ms(), Ordering::SeqCst);

        let step = match self.run_roundabout_iteration(input).await {
            Ok(step) => step,
            Err(err) => {
                self.handle_iteration_failure(&err).await;
                return Err(err);
            }
        };

        let delta = user_state.map(|user| {
            let state = self.agent_state();
            delta::relational_delta(&state, user, self.runtime.clock.now_ms())
        });
        let text = self.compose_response(input, &step, delta.as_ref());
        Ok(AgentResponse {
            agent_id: self.id.clone(),
            text,
            phase: self.phase(),
            strategy: delta.map(|d| d.strategy),
            delta,
        })
    }

    async fn run_roundabout_iteration(&self, input: &str) -> Result<String> {
        match self.phase() {
            AgentPhase::Emerge => self.emerge(input).await,
            AgentPhase::Adapt => self.adapt(),
            AgentPhase::Integrate => self.integrate(),
        }
    }

    /// EMERGE: attempt role-specific closure of the current tactical step.
    /// Success stays in EMERGE; failure surfaces to the driver, which
    /// transitions to ADAPT.
    async fn emerge(&self, input: &str) -> Result<String> {
        let step = match self.role {
            AgentRole::Coordinator => self.model_backed_closure(input).await?,
            AgentRole::Conscious | AgentRole::Core => self.heuristic_closure(input).await?,
        };
        let mut state = self.state.lock().unwrap();
        state.confidence = (state.confidence + 0.05).clamp(0.0, 1.0);
        state.timestamp_ms = self.runtime.clock.now_ms();
        Ok(step)
    }

    /// Model-backed closure for the coordinator role. The model call is
    /// gated by the governor; a provider transport failure fails over to
    /// the local heuristic.
    async fn model_backed_closure(&self, input: &str) -> Result<String> {
        let decision = self
            .runtime
            .governor
            .request_approval(ApprovalRequest {
                agent_id: self.id.clone(),
                operation: OperationKind::LlmCall,
                estimate: LLM_STEP_ESTIMATE,
            })
            .await?;
        if let Some(reason) = decision.reason {
            return Err(AgencyError::EmergenceFailure(format!(
                "model call not admitted: {}",
                reason
            )));
        }

        let tactic = self.current_plan_summary();
        let request = ChatRequest {
            system: format!(
                "You are the {} of a cognitive hierarchy working toward: {}. \
                 Answer with SUCCESS: or FAILURE: followed by a short summary.",
                self.role, self.thread.top_level_goal
            ),
            user: match tactic {
                Some(tactic) => format!("{} (tactic: {})", input, tactic),
                None => input.to_string(),
            },
            max_tokens: 512,
            temperature: 0.2,
            provider_hint: Some(self.thread.profile.llm_model.clone()),
        };

        match self.runtime.provider.complete(request).await {
            Ok(response) => {
                self.runtime
                    .governor
                    .update_resource_usage(&self.id, &LLM_STEP_ESTIMATE)
                    .await?;
                match response.closure_outcome() {
                    ClosureOutcome::Success(text) => Ok(text),
                    ClosureOutcome::Failure(reason) => Err(AgencyError::EmergenceFailure(reason)),
                    ClosureOutcome::Unparsed(_) => Err(AgencyError::EmergenceFailure(
                        "model response did not follow the closure contract".to_string(),
                    )),
                }
            }
            Err(_) => self.heuristic_closure(input).await,
        }
    }

    /// Probabilistic local closure driven by the injected randomness source.
    async fn heuristic_closure(&self, input: &str) -> Result<String> {
        let success_probability = match self.role {
            AgentRole::Coordinator => 0.70,
            AgentRole::Conscious => 0.85,
            AgentRole::Core => 0.95,
        };
        let roll = self.rng.lock().unwrap().gen::<f64>();
        self.runtime
            .governor
            .update_resource_usage(&self.id, &HEURISTIC_STEP_USAGE)
            .await?;
        if roll < success_probability {
            Ok(format!("closed tactical step for '{}'", input))
        } else {
            Err(AgencyError::EmergenceFailure(format!(
                "local closure failed for '{}'",
                input
            )))
        }
    }

    /// ADAPT: analyze the failure history and make the strategic decision.
    /// `Proceed` stores the decision context and moves to INTEGRATE; `Halt`
    /// is terminal for this agent.
    fn adapt(&self) -> Result<String> {
        let now = self.runtime.clock.now_ms();
        let failures = self.loop_state.lock().unwrap().failures.clone();
        let max_depth = self
            .thread
            .profile
            .max_recursion_depth
            .unwrap_or(self.runtime.config.max_recursion_depth);
        let inputs = AdaptInputs {
            failures: &failures,
            usage: self.runtime.governor.usage_of(&self.id),
            budget: self.thread.budget,
            recursion_depth: self.thread.recursion_depth,
            max_recursion_depth: max_depth,
            elapsed_ms: now.saturating_sub(self.started_at_ms),
        };

        let (context, decision) = strategic_decision(&inputs, now);
        match decision {
            StrategicDecision::Proceed => {
                self.loop_state.lock().unwrap().adaptation = Some(context);
                self.set_phase(AgentPhase::Integrate);
                Ok("strategic decision: proceed".to_string())
            }
            StrategicDecision::Halt(reason) => {
                self.loop_state.lock().unwrap().halt_reason = Some(reason.clone());
                self.halted.store(true, Ordering::SeqCst);
                self.active.store(false, Ordering::SeqCst);
                Err(AgencyError::StrategicHalt(reason))
            }
        }
    }

    /// INTEGRATE: synthesize a new tactical plan from the stored adaptation
    /// context and return to EMERGE.
    fn integrate(&self) -> Result<String> {
        let now = self.runtime.clock.now_ms();
        let context = self
            .loop_state
            .lock()
            .unwrap()
            .adaptation
            .clone()
            .ok_or_else(|| {
                AgencyError::TacticalPlanInvalid("no adaptation context to integrate".to_string())
            })?;
        let plan = synthesize_plan(&context, now);
        let summary = plan.summary.clone();
        self.loop_state.lock().unwrap().plan = Some(plan);
        self.set_phase(AgentPhase::Emerge);
        Ok(format!("tactical plan: {}", summary))
    }

    /// Record a loop failure and force the transition to ADAPT. A strategic
    /// halt is already terminal and changes nothing here.
    async fn handle_iteration_failure(&self, err: &AgencyError) {
        if matches!(err, AgencyError::StrategicHalt(_)) {
            return;
        }
        let now = self.runtime.clock.now_ms();
        let message = err.to_string();
        {
            let mut loop_state = self.loop_state.lock().unwrap();
            loop_state.failures.push(FailureRecord {
                kind: FailureKind::classify(&message),
                message: message.clone(),
                at_ms: now,
            });
        }
        {
            let mut state = self.state.lock().unwrap();
            state.confidence = (state.confidence - 0.1).clamp(0.0, 1.0);
            state.timestamp_ms = now;
        }
        self.runtime.governor.record_error(&self.id, &message).await;
        if self.phase() != AgentPhase::Adapt {
            self.set_phase(AgentPhase::Adapt);
        }
    }

    fn set_phase(&self, next: AgentPhase) {
        let now = self.runtime.clock.now_ms();
        let previous = {
            let mut state = self.state.lock().unwrap();
            let previous = state.phase;
            state.phase = next;
            state.timestamp_ms = now;
            previous
        };
        if previous != next {
            self.runtime.events.record(AgencyEvent::new(
                self.id.clone(),
                EventKind::PhaseTransition,
                format!("{} -> {}", previous, next),
                now,
            ));
        }
    }

    fn compose_response(
        &self,
        input: &str,
        step: &str,
        delta: Option<&RelationalDelta>,
    ) -> String {
        match delta.map(|d| d.strategy) {
            Some(EngagementStrategy::Listen) => {
                format!("[{}] holding space and listening: {}", self.role, step)
            }
            Some(EngagementStrategy::Mirror) => {
                format!("[{}] mirroring '{}': {}", self.role, input, step)
            }
            Some(EngagementStrategy::Harmonize) => {
                format!("[{}] harmonizing: {}", self.role, step)
            }
            None => format!("[{}] {}", self.role, step),
        }
    }

    // ------------------------------------------------------------------
    // Hierarchy
    // ------------------------------------------------------------------

    /// Spawn a child agent for `task_definition`. The child receives its
    /// own context thread with a budget equal to the explicit override or
    /// the configured share of this agent's remaining budget. Admission is
    /// all-or-nothing: a denial is recorded as an error against this agent
    /// and returned as such.
    pub async fn spawn_child(
        &self,
        child_profile: ConfigurationProfile,
        task_definition: &str,
    ) -> Result<Arc<CognitiveAgent>> {
        if !self.is_active() {
            return Err(AgencyError::AgentInactive(self.id.clone()));
        }
        let now = self.runtime.clock.now_ms();
        let usage = self.runtime.governor.usage_of(&self.id);
        let child_budget = child_profile.resource_budget.unwrap_or_else(|| {
            self.thread
                .budget
                .child_share(&usage, self.runtime.config.child_budget_fraction)
        });
        let estimate = ResourceUsage::from_budget(&child_budget);

        let decision = self
            .runtime
            .governor
            .request_approval(ApprovalRequest {
                agent_id: self.id.clone(),
                operation: OperationKind::CloneAgent,
                estimate,
            })
            .await?;
        if let Some(reason) = decision.reason {
            self.runtime
                .governor
                .record_error(&self.id, &format!("clone_agent denied: {}", reason))
                .await;
            return Err(AgencyError::ApprovalDenied(reason));
        }

        // Children never share their parent's thread.
        let thread = ContextThread {
            id: format!("thread-{}", Uuid::new_v4()),
            top_level_goal: self.thread.top_level_goal.clone(),
            parent_agent_id: Some(self.id.clone()),
            task_definition: task_definition.to_string(),
            memory_scope: child_profile.memory_scope.clone(),
            profile: child_profile,
            budget: child_budget,
            recursion_depth: self.thread.recursion_depth + 1,
            created_at_ms: now,
            updated_at_ms: now,
        };
        let seed = self.rng.lock().unwrap().gen::<u64>();
        let child = CognitiveAgent::new(
            self.role,
            self.user_id.clone(),
            thread,
            self.runtime.clone(),
            seed,
        );

        // Registration, child-map insertion and usage attribution all
        // complete before the child is returned.
        self.runtime.governor.register_agent(
            &child.id,
            &self.user_id,
            Some(self.id.clone()),
            child.thread.recursion_depth,
            child_budget,
        );
        self.children
            .lock()
            .unwrap()
            .insert(child.id.clone(), child.clone());
        self.runtime
            .governor
            .update_resource_usage(&self.id, &estimate)
            .await?;
        self.runtime.events.record(AgencyEvent::new(
            self.id.clone(),
            EventKind::AgentSpawned,
            format!("spawned {} for '{}'", child.id, task_definition),
            now,
        ));
        Ok(child)
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().unwrap().len()
    }

    /// On-demand status poll of the live children.
    pub fn child_reports(&self) -> Vec<ChildAgentReport> {
        let now = self.runtime.clock.now_ms();
        self.children
            .lock()
            .unwrap()
            .values()
            .map(|child| child.snapshot_report(now))
            .collect()
    }

    fn snapshot_report(&self, now_ms: u64) -> ChildAgentReport {
        let loop_state = self.loop_state.lock().unwrap();
        let status = if self.is_active() {
            ReportStatus::Running
        } else if self.halted.load(Ordering::SeqCst) {
            ReportStatus::Failed
        } else {
            ReportStatus::Completed
        };
        ChildAgentReport {
            child_id: self.id.clone(),
            task_definition: self.thread.task_definition.clone(),
            status,
            result: loop_state.plan.as_ref().map(|p| p.summary.clone()),
            error: loop_state.halt_reason.clone(),
            resource_usage: self.runtime.governor.usage_of(&self.id),
            execution_time_ms: now_ms.saturating_sub(self.started_at_ms),
            timestamp_ms: now_ms,
        }
    }

    /// Terminate this agent and its subtree.
    ///
    /// Children are terminated sequentially and best-effort: a failing
    /// child termination is logged and folded into that child's report,
    /// never blocking siblings or this agent's own deregistration. The
    /// ledger entry is removed only after every child had its opportunity
    /// to terminate and report.
    #[async_recursion]
    pub async fn terminate(&self) -> Result<Vec<ChildAgentReport>> {
        let now = self.runtime.clock.now_ms();
        let was_active = self.active.swap(false, Ordering::SeqCst);

        let children: Vec<Arc<CognitiveAgent>> = {
            let mut map = self.children.lock().unwrap();
            let drained = map.values().cloned().collect();
            map.clear();
            drained
        };

        let mut reports = Vec::with_capacity(children.len());
        for child in children {
            // Usage is captured before the child deregisters itself.
            let usage = self.runtime.governor.usage_of(&child.id);
            let outcome = child.terminate().await;
            let mut report = child.snapshot_report(now);
            report.resource_usage = usage;
            if let Err(err) = outcome {
                tracing::warn!(
                    parent = %self.id,
                    child = %child.id,
                    error = %err,
                    "child termination failed; continuing with siblings"
                );
                report.status = ReportStatus::Error;
                report.error = Some(err.to_string());
            }
            reports.push(report);
        }

        // Reporting hook toward the parent, not a blocking round-trip.
        if let Some(parent_id) = &self.thread.parent_agent_id {
            self.runtime.events.record(AgencyEvent::new(
                parent_id.clone(),
                EventKind::ChildReport,
                format!("{} forwarded {} child report(s)", self.id, reports.len()),
                now,
            ));
        }

        match self.runtime.governor.deregister_agent(&self.id) {
            Ok(()) => {}
            // A repeated terminate finds the ledger entry already gone.
            Err(AgencyError::UnknownAgent(_)) if !was_active => {}
            Err(err) => return Err(err),
        }
        self.runtime.events.record(AgencyEvent::new(
            self.id.clone(),
            EventKind::AgentTerminated,
            format!("terminated with {} child report(s)", reports.len()),
            now,
        ));
        Ok(reports)
    }

    /// Read-only snapshot.
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            id: self.id.clone(),
            phase: self.phase(),
            active: self.is_active(),
            child_count: self.child_count(),
            resource_usage: self.runtime.governor.usage_of(&self.id),
            last_activity_ms: self.last_activity_ms.load(Ordering::SeqCst),
        }
    }
}
