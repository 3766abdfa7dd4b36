//! System-level configuration injected at governor and factory construction.
//!
//! Every threshold that gates admission decisions lives here so tests can
//! instantiate fresh, fully specified instances instead of relying on
//! process-wide state.

use serde::{Deserialize, Serialize};

use crate::types::{QuotaTier, ResourceBudget, UserResourceQuotas};

/// Hysteresis thresholds for tempo adjustment. Degrade thresholds are
/// deliberately higher than recovery thresholds to avoid oscillation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoThresholds {
    pub degrade_error_rate: f64,
    pub recover_error_rate: f64,
    pub degrade_cost_spike: f64,
    pub recover_cost_spike: f64,
}

impl Default for TempoThresholds {
    fn default() -> Self {
        Self {
            degrade_error_rate: 0.25,
            recover_error_rate: 0.10,
            degrade_cost_spike: 2.0,
            recover_cost_spike: 1.25,
        }
    }
}

/// Default quota baselines per subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierQuotaDefaults {
    pub free: UserResourceQuotas,
    pub premium: UserResourceQuotas,
    pub enterprise: UserResourceQuotas,
}

impl TierQuotaDefaults {
    pub fn for_tier(&self, tier: QuotaTier) -> UserResourceQuotas {
        match tier {
            QuotaTier::Free => self.free,
            QuotaTier::Premium => self.premium,
            QuotaTier::Enterprise => self.enterprise,
        }
    }
}

impl Default for TierQuotaDefaults {
    fn default() -> Self {
        Self {
            free: UserResourceQuotas {
                tier: QuotaTier::Free,
                llm_calls_per_hour: 50,
                llm_calls_per_day: 500,
                compute_units_per_hour: 1_000,
                compute_units_per_day: 10_000,
                storage_bytes_total: 100 * 1024 * 1024,
            },
            premium: UserResourceQuotas {
                tier: QuotaTier::Premium,
                llm_calls_per_hour: 500,
                llm_calls_per_day: 5_000,
                compute_units_per_hour: 10_000,
                compute_units_per_day: 100_000,
                storage_bytes_total: 1024 * 1024 * 1024,
            },
            enterprise: UserResourceQuotas {
                tier: QuotaTier::Enterprise,
                llm_calls_per_hour: 5_000,
                llm_calls_per_day: 50_000,
                compute_units_per_hour: 100_000,
                compute_units_per_day: 1_000_000,
                storage_bytes_total: 10u64 * 1024 * 1024 * 1024,
            },
        }
    }
}

/// Complete governor and runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Maximum recursion depth of a spawn hierarchy.
    pub max_recursion_depth: u32,
    /// Cap on the total number of live agents in the system.
    pub max_system_agents: usize,
    /// Fraction of the parent budget a projected clone may not exceed.
    pub clone_approval_fraction: f64,
    /// Fraction of the remaining parent budget handed to a child by default.
    pub child_budget_fraction: f64,
    /// Default budget for root agents whose profile carries none.
    pub default_root_budget: ResourceBudget,

    /// Error rate above which the circuit breaker opens.
    pub error_rate_threshold: f64,
    /// Minimum error samples in the window before the rate is acted on.
    pub min_error_samples: usize,
    /// Duration of the error-rate window, in milliseconds.
    pub error_window_ms: u64,

    /// Baseline cost per usage update for spike normalization.
    pub cost_baseline: f64,
    /// Spike ratio (rolling average / baseline) above which the breaker opens.
    pub cost_spike_threshold: f64,
    /// Minimum cost samples in the window before the spike is acted on.
    pub min_cost_samples: usize,
    /// Minimum absolute cost accumulated in the window before the spike
    /// is acted on.
    pub min_cost_total: f64,
    /// Duration of the cost window, in milliseconds.
    pub cost_window_ms: u64,

    /// Cooldown before an open breaker transitions to half-open.
    pub breaker_cooldown_ms: u64,
    /// Consecutive successful operations required to close a half-open
    /// breaker.
    pub breaker_success_threshold: u32,

    pub tempo: TempoThresholds,
    pub tier_quotas: TierQuotaDefaults,

    /// Seed for the runtime's randomness source. `None` seeds from the
    /// injected clock at factory construction.
    pub rng_seed: Option<u64>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 5,
            max_system_agents: 50,
            clone_approval_fraction: 0.9,
            child_budget_fraction: 0.3,
            default_root_budget: ResourceBudget::default(),
            error_rate_threshold: 0.5,
            min_error_samples: 5,
            error_window_ms: 60_000,
            cost_baseline: 10.0,
            cost_spike_threshold: 3.0,
            min_cost_samples: 5,
            min_cost_total: 50.0,
            cost_window_ms: 60_000,
            breaker_cooldown_ms: 30_000,
            breaker_success_threshold: 2,
            tempo: TempoThresholds::default(),
            tier_quotas: TierQuotaDefaults::default(),
            rng_seed: None,
        }
    }
}
