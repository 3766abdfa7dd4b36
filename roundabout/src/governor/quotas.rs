//! Per-user quota configuration and windowed quota checks.

use dashmap::DashMap;

use crate::config::TierQuotaDefaults;
use crate::errors::QuotaViolationDetail;
use crate::types::{QuotaTier, UserId, UserResourceQuotas};

use super::ledger::ResourceLedger;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Quota configuration per user, defaulted to the tier baseline on first
/// access.
#[derive(Debug)]
pub(crate) struct QuotaBook {
    quotas: DashMap<UserId, UserResourceQuotas>,
    defaults: TierQuotaDefaults,
}

impl QuotaBook {
    pub fn new(defaults: TierQuotaDefaults) -> Self {
        Self {
            quotas: DashMap::new(),
            defaults,
        }
    }

    /// Current quotas for a user, creating the free-tier baseline on first
    /// access.
    pub fn quotas_for(&self, user_id: &UserId) -> UserResourceQuotas {
        *self
            .quotas
            .entry(user_id.clone())
            .or_insert_with(|| self.defaults.for_tier(QuotaTier::Free))
    }

    /// Override a user's quota configuration (tier upgrade or custom limits).
    pub fn set_quotas(&self, user_id: &UserId, quotas: UserResourceQuotas) {
        self.quotas.insert(user_id.clone(), quotas);
    }

    pub fn set_tier(&self, user_id: &UserId, tier: QuotaTier) {
        self.quotas
            .insert(user_id.clone(), self.defaults.for_tier(tier));
    }

    /// Aggregate the user's usage history over 1-hour and 24-hour trailing
    /// windows and compare against the configured limits. Returns every
    /// violated limit, not just the first.
    pub fn check(
        &self,
        user_id: &UserId,
        ledger: &ResourceLedger,
        now_ms: u64,
    ) -> Vec<QuotaViolationDetail> {
        let quotas = self.quotas_for(user_id);
        let hour = ledger.user_window_totals(user_id, HOUR_MS, now_ms);
        let day = ledger.user_window_totals(user_id, DAY_MS, now_ms);
        let storage = ledger.user_storage_total(user_id);

        let mut violations = Vec::new();
        let mut check = |limit: &str, used: u64, allowed: u64| {
            if used > allowed {
                violations.push(QuotaViolationDetail {
                    limit: limit.to_string(),
                    used,
                    allowed,
                });
            }
        };

        check("llm_calls_per_hour", hour.calls, quotas.llm_calls_per_hour);
        check("llm_calls_per_day", day.calls, quotas.llm_calls_per_day);
        check(
            "compute_units_per_hour",
            hour.compute_units,
            quotas.compute_units_per_hour,
        );
        check(
            "compute_units_per_day",
            day.compute_units,
            quotas.compute_units_per_day,
        );
        check("storage_bytes_total", storage, quotas.storage_bytes_total);
        violations
    }
}
