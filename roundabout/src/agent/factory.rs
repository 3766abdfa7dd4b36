//! Factory assembling and tracking top-level cognitive agents.
//!
//! All collaborators are injected at construction; the factory holds no
//! process-wide state and tests build fresh instances per case.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SystemConfig;
use crate::errors::Result;
use crate::event_log::{AgencyEvent, EventKind, EventSink};
use crate::governor::ResourceGovernor;
use crate::llm::LlmProvider;
use crate::types::{AgentId, AgentRole, ChildAgentReport, ConfigurationProfile, ContextThread};

use super::{CognitiveAgent, RuntimeHandles};

/// Creates and tracks root agents. Children are spawned by their parents,
/// not by the factory.
#[derive(Debug)]
pub struct AgentFactory {
    runtime: RuntimeHandles,
    agents: DashMap<AgentId, Arc<CognitiveAgent>>,
    seed_source: Mutex<StdRng>,
}

impl AgentFactory {
    pub fn new(
        governor: Arc<ResourceGovernor>,
        provider: Arc<dyn LlmProvider>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: Arc<SystemConfig>,
    ) -> Self {
        let seed = config.rng_seed.unwrap_or_else(|| clock.now_ms());
        Self {
            runtime: RuntimeHandles {
                governor,
                provider,
                events,
                clock,
                config,
            },
            agents: DashMap::new(),
            seed_source: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Create a root agent: fresh context thread at recursion depth zero,
    /// registered with the governor before it is handed out.
    pub fn create_agent(
        &self,
        user_id: &str,
        role: AgentRole,
        top_level_goal: &str,
        task_definition: &str,
        profile: ConfigurationProfile,
    ) -> Arc<CognitiveAgent> {
        let now = self.runtime.clock.now_ms();
        let budget = profile
            .resource_budget
            .unwrap_or(self.runtime.config.default_root_budget);
        let thread = ContextThread {
            id: format!("thread-{}", Uuid::new_v4()),
            top_level_goal: top_level_goal.to_string(),
            parent_agent_id: None,
            task_definition: task_definition.to_string(),
            memory_scope: profile.memory_scope.clone(),
            profile,
            budget,
            recursion_depth: 0,
            created_at_ms: now,
            updated_at_ms: now,
        };

        let seed = self.seed_source.lock().unwrap().gen::<u64>();
        let agent = CognitiveAgent::new(
            role,
            user_id.to_string(),
            thread,
            self.runtime.clone(),
            seed,
        );
        self.runtime
            .governor
            .register_agent(agent.id(), &user_id.to_string(), None, 0, budget);
        self.agents.insert(agent.id().clone(), agent.clone());
        self.runtime.events.record(AgencyEvent::new(
            agent.id().clone(),
            EventKind::AgentSpawned,
            format!("root agent created for '{}'", top_level_goal),
            now,
        ));
        agent
    }

    pub fn agent(&self, id: &AgentId) -> Option<Arc<CognitiveAgent>> {
        self.agents.get(id).map(|a| a.clone())
    }

    /// Number of tracked root agents.
    pub fn active_count(&self) -> usize {
        self.agents.len()
    }

    /// Terminate every tracked root agent, best-effort, and return the
    /// collected reports per root.
    pub async fn terminate_all(&self) -> Vec<(AgentId, Result<Vec<ChildAgentReport>>)> {
        let roots: Vec<Arc<CognitiveAgent>> = self
            .agents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.agents.clear();

        let mut outcomes = Vec::with_capacity(roots.len());
        for root in roots {
            let outcome = root.terminate().await;
            outcomes.push((root.id().clone(), outcome));
        }
        outcomes
    }

    /// Drop a terminated root from tracking.
    pub fn forget(&self, id: &AgentId) {
        self.agents.remove(id);
    }
}
