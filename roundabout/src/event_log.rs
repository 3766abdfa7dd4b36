//! Structured event sink for lifecycle, approval and governance events.
//!
//! Every phase transition, approval decision, breaker/tempo transition and
//! lifecycle event is emitted as one [`AgencyEvent`]. Sinks are an interface
//! boundary: the in-memory sink keeps a bounded buffer for tests and
//! introspection, the tracing sink forwards to the `tracing` subscriber.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

use crate::types::AgentId;

/// Kind of emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    PhaseTransition,
    ApprovalGranted,
    ApprovalDenied,
    UsageUpdated,
    ErrorRecorded,
    BreakerTransition,
    TempoShift,
    HierarchyPaused,
    HierarchyResumed,
    AgentSpawned,
    AgentTerminated,
    ChildReport,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::PhaseTransition => "phase_transition",
            EventKind::ApprovalGranted => "approval_granted",
            EventKind::ApprovalDenied => "approval_denied",
            EventKind::UsageUpdated => "usage_updated",
            EventKind::ErrorRecorded => "error_recorded",
            EventKind::BreakerTransition => "breaker_transition",
            EventKind::TempoShift => "tempo_shift",
            EventKind::HierarchyPaused => "hierarchy_paused",
            EventKind::HierarchyResumed => "hierarchy_resumed",
            EventKind::AgentSpawned => "agent_spawned",
            EventKind::AgentTerminated => "agent_terminated",
            EventKind::ChildReport => "child_report",
        };
        write!(f, "{}", name)
    }
}

/// One structured event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgencyEvent {
    pub agent_id: AgentId,
    pub kind: EventKind,
    pub detail: String,
    pub timestamp_ms: u64,
}

impl AgencyEvent {
    pub fn new(
        agent_id: impl Into<AgentId>,
        kind: EventKind,
        detail: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind,
            detail: detail.into(),
            timestamp_ms,
        }
    }

    /// JSON rendering of the record for downstream log pipelines.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Receives structured events. Implementations must be cheap; emitters call
/// them synchronously on hot paths.
pub trait EventSink: Send + Sync + fmt::Debug {
    fn record(&self, event: AgencyEvent);
}

/// Bounded in-memory buffer of recent events.
#[derive(Debug)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<AgencyEvent>>,
    capacity: usize,
}

impl MemoryEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Most recent `max` events, oldest first.
    pub fn recent(&self, max: usize) -> Vec<AgencyEvent> {
        let entries = self.entries.lock().unwrap();
        let start = entries.len().saturating_sub(max);
        entries[start..].to_vec()
    }

    /// Events of one kind, oldest first.
    pub fn of_kind(&self, kind: EventKind) -> Vec<AgencyEvent> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl EventSink for MemoryEventLog {
    fn record(&self, event: AgencyEvent) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.remove(0);
        }
        entries.push(event);
    }
}

/// Forwards events to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingEventLog;

impl EventSink for TracingEventLog {
    fn record(&self, event: AgencyEvent) {
        let when = DateTime::from_timestamp_millis(event.timestamp_ms as i64)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| event.timestamp_ms.to_string());
        tracing::info!(
            target: "roundabout::events",
            agent_id = %event.agent_id,
            kind = %event.kind,
            detail = %event.detail,
            at = %when,
            record = %event.to_json(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log_keeps_a_bounded_buffer() {
        let log = MemoryEventLog::new(3);
        for i in 0..5 {
            log.record(AgencyEvent::new(
                "agent-1",
                EventKind::UsageUpdated,
                format!("update {}", i),
                i,
            ));
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].detail, "update 2");
        assert_eq!(recent[2].detail, "update 4");
    }

    #[test]
    fn of_kind_filters_events() {
        let log = MemoryEventLog::default();
        log.record(AgencyEvent::new("a", EventKind::AgentSpawned, "", 1));
        log.record(AgencyEvent::new("a", EventKind::ErrorRecorded, "boom", 2));
        log.record(AgencyEvent::new("b", EventKind::AgentSpawned, "", 3));
        assert_eq!(log.of_kind(EventKind::AgentSpawned).len(), 2);
        assert_eq!(log.of_kind(EventKind::ErrorRecorded).len(), 1);
    }
}
