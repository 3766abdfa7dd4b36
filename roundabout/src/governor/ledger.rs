//! Resource ledger: per-agent accumulators and per-user windowed history.
//!
//! All per-key state lives in lock-striped maps; entries are created lazily
//! on registration or first usage update and removed on termination.

use dashmap::DashMap;

use crate::types::{AgentId, ResourceBudget, ResourceUsage, UserId};

/// Registration metadata for one live agent.
#[derive(Debug, Clone)]
pub(crate) struct AgentMeta {
    pub user_id: UserId,
    pub parent: Option<AgentId>,
    pub recursion_depth: u32,
    pub budget: ResourceBudget,
}

/// One time-stamped usage attribution in a user's history.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UsageSample {
    pub at_ms: u64,
    pub calls: u64,
    pub compute_units: u64,
}

/// Aggregated user consumption over a trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WindowTotals {
    pub calls: u64,
    pub compute_units: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ResourceLedger {
    usage: DashMap<AgentId, ResourceUsage>,
    meta: DashMap<AgentId, AgentMeta>,
    user_samples: DashMap<UserId, Vec<UsageSample>>,
    user_storage_total: DashMap<UserId, u64>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent_id: &AgentId, meta: AgentMeta) {
        self.meta.insert(agent_id.clone(), meta);
        self.usage.entry(agent_id.clone()).or_default();
    }

    /// Remove the agent's ledger entry and metadata. Returns false when the
    /// agent was never registered.
    pub fn deregister(&self, agent_id: &AgentId) -> bool {
        let known = self.meta.remove(agent_id).is_some();
        self.usage.remove(agent_id);
        known
    }

    pub fn is_registered(&self, agent_id: &AgentId) -> bool {
        self.meta.contains_key(agent_id)
    }

    pub fn meta(&self, agent_id: &AgentId) -> Option<AgentMeta> {
        self.meta.get(agent_id).map(|m| m.clone())
    }

    pub fn usage_of(&self, agent_id: &AgentId) -> ResourceUsage {
        self.usage
            .get(agent_id)
            .map(|u| *u)
            .unwrap_or_default()
    }

    pub fn agent_count(&self) -> usize {
        self.meta.len()
    }

    /// Walk the parent chain to the hierarchy root. Cycles cannot occur
    /// (parents are fixed at registration and always pre-date children),
    /// but the walk is depth-bounded anyway.
    pub fn root_ancestor(&self, agent_id: &AgentId) -> AgentId {
        let mut current = agent_id.clone();
        for _ in 0..64 {
            match self.meta.get(&current).and_then(|m| m.parent.clone()) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    /// Accumulate a usage delta for an agent and attribute it to the owning
    /// user's windowed history. Returns the owning user when known.
    pub fn record(&self, agent_id: &AgentId, delta: &ResourceUsage, now_ms: u64) -> Option<UserId> {
        self.usage
            .entry(agent_id.clone())
            .or_default()
            .accumulate(delta);

        let user_id = self.meta.get(agent_id).map(|m| m.user_id.clone())?;
        self.user_samples
            .entry(user_id.clone())
            .or_default()
            .push(UsageSample {
                at_ms: now_ms,
                calls: delta.calls,
                compute_units: delta.compute_units,
            });
        if delta.storage_bytes > 0 {
            *self
                .user_storage_total
                .entry(user_id.clone())
                .or_insert(0) += delta.storage_bytes;
        }
        Some(user_id)
    }

    /// Aggregate a user's samples over the trailing `window_ms` ending at
    /// `now_ms`. Also prunes samples older than the largest window callers
    /// care about (24 h) to keep histories bounded.
    pub fn user_window_totals(&self, user_id: &UserId, window_ms: u64, now_ms: u64) -> WindowTotals {
        const RETENTION_MS: u64 = 24 * 60 * 60 * 1000;
        let mut totals = WindowTotals::default();
        if let Some(mut samples) = self.user_samples.get_mut(user_id) {
            samples.retain(|s| now_ms.saturating_sub(s.at_ms) <= RETENTION_MS);
            let cutoff = now_ms.saturating_sub(window_ms);
            for sample in samples.iter().filter(|s| s.at_ms >= cutoff) {
                totals.calls += sample.calls;
                totals.compute_units += sample.compute_units;
            }
        }
        totals
    }

    pub fn user_storage_total(&self, user_id: &UserId) -> u64 {
        self.user_storage_total
            .get(user_id)
            .map(|v| *v)
            .unwrap_or(0)
    }
}

/// Rolling window of time-stamped scalar samples (cost, operations, errors).
#[derive(Debug)]
pub(crate) struct RollingWindow {
    samples: Vec<(u64, f64)>,
    window_ms: u64,
}

impl RollingWindow {
    pub fn new(window_ms: u64) -> Self {
        Self {
            samples: Vec::new(),
            window_ms,
        }
    }

    pub fn push(&mut self, now_ms: u64, value: f64) {
        self.prune(now_ms);
        self.samples.push((now_ms, value));
    }

    pub fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        self.samples.retain(|(at, _)| *at >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn sum(&self) -> f64 {
        self.samples.iter().map(|(_, v)| v).sum()
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum() / self.samples.len() as f64
        }
    }
}
