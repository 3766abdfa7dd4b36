//! System tempo: global throttling level with hysteresis.
//!
//! Rising error/cost signals push the tempo down the ladder one level at a
//! time (HighPerformance -> LowIntensity -> Sleep); falling signals relax it
//! back up using distinct, lower thresholds so the level does not oscillate
//! around a single boundary.

use crate::config::TempoThresholds;
use crate::types::{OperationKind, ResourceUsage, SystemTempo};

/// Minimal fixed cost non-memory operations are clamped to while asleep.
const SLEEP_CLAMP: ResourceUsage = ResourceUsage {
    calls: 1,
    compute_units: 1,
    storage_bytes: 0,
    execution_time_ms: 0,
};

#[derive(Debug)]
pub(crate) struct TempoState {
    current: SystemTempo,
}

impl TempoState {
    pub fn new() -> Self {
        Self {
            current: SystemTempo::HighPerformance,
        }
    }

    pub fn current(&self) -> SystemTempo {
        self.current
    }

    /// Feed the latest error/cost signals. Moves at most one ladder step per
    /// observation; returns the transition when one happened.
    pub fn observe(
        &mut self,
        error_rate: f64,
        cost_spike: f64,
        thresholds: &TempoThresholds,
    ) -> Option<(SystemTempo, SystemTempo)> {
        let degrade = error_rate > thresholds.degrade_error_rate
            || cost_spike > thresholds.degrade_cost_spike;
        let recover = error_rate < thresholds.recover_error_rate
            && cost_spike < thresholds.recover_cost_spike;

        let next = if degrade {
            match self.current {
                SystemTempo::HighPerformance => SystemTempo::LowIntensity,
                SystemTempo::LowIntensity => SystemTempo::Sleep,
                SystemTempo::Sleep => SystemTempo::Sleep,
            }
        } else if recover {
            match self.current {
                SystemTempo::Sleep => SystemTempo::LowIntensity,
                SystemTempo::LowIntensity => SystemTempo::HighPerformance,
                SystemTempo::HighPerformance => SystemTempo::HighPerformance,
            }
        } else {
            self.current
        };

        if next != self.current {
            let transition = (self.current, next);
            self.current = next;
            Some(transition)
        } else {
            None
        }
    }
}

/// Scale a request's estimated cost by the current tempo. LowIntensity
/// halves model-call and compute estimates; Sleep clamps non-memory
/// operations to a minimal fixed cost. Only `MemoryAccess` reaches this
/// scaler while asleep, since the sleep gate denies everything else first.
pub(crate) fn scale_estimate(
    tempo: SystemTempo,
    operation: OperationKind,
    estimate: ResourceUsage,
) -> ResourceUsage {
    match tempo {
        SystemTempo::HighPerformance => estimate,
        SystemTempo::LowIntensity => ResourceUsage {
            calls: estimate.calls / 2,
            compute_units: estimate.compute_units / 2,
            ..estimate
        },
        SystemTempo::Sleep => {
            if operation == OperationKind::MemoryAccess {
                estimate
            } else {
                SLEEP_CLAMP
            }
        }
    }
}
