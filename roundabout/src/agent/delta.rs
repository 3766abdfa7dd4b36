//! Relational delta: the computed (mis)alignment between an agent's
//! internal state and an external user state.
//!
//! Pure and side-effect-free; recomputed per input, never stored.

use crate::types::{AgentState, EngagementStrategy, RelationalDelta, UserState};

/// Half-life of the temporal decay applied to the user-state contribution.
const DECAY_HALF_LIFE_MS: f64 = 5.0 * 60.0 * 1000.0;

/// Fight/flight level above which the agent backs off and listens.
const LISTEN_THRESHOLD: f64 = 0.7;
/// Asynchronous-delta level above which the agent mirrors.
const MIRROR_THRESHOLD: f64 = 0.6;

/// Compute the relational delta at `now_ms`.
///
/// The user-state contribution decays exponentially with a five-minute
/// half-life. Cognitive alignment is `1 - |fixes - confidence|`, so the
/// asynchronous delta reduces to the decayed misalignment, while the
/// synchronous delta is the decayed resonance.
pub fn relational_delta(state: &AgentState, user: &UserState, now_ms: u64) -> RelationalDelta {
    let age_ms = now_ms.saturating_sub(user.timestamp_ms) as f64;
    let decay = 0.5_f64.powf(age_ms / DECAY_HALF_LIFE_MS);

    let alignment = 1.0 - (user.fixes - state.confidence).abs();
    let async_delta = (1.0 - alignment) * decay;
    let sync_delta = state.resonance * decay;
    let magnitude = (async_delta * async_delta + sync_delta * sync_delta).sqrt();

    let strategy = if user.fight > LISTEN_THRESHOLD || user.flight > LISTEN_THRESHOLD {
        EngagementStrategy::Listen
    } else if async_delta > MIRROR_THRESHOLD {
        EngagementStrategy::Mirror
    } else {
        EngagementStrategy::Harmonize
    };

    RelationalDelta {
        async_delta,
        sync_delta,
        magnitude,
        strategy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentPhase;

    fn agent_state(resonance: f64, confidence: f64) -> AgentState {
        AgentState {
            phase: AgentPhase::Emerge,
            resonance,
            confidence,
            timestamp_ms: 0,
        }
    }

    fn user_state(fight: f64, flight: f64, fixes: f64, timestamp_ms: u64) -> UserState {
        UserState {
            fight,
            flight,
            fixes,
            confidence: 0.5,
            timestamp_ms,
        }
    }

    #[test]
    fn fresh_state_has_unit_decay() {
        let delta = relational_delta(
            &agent_state(0.4, 0.9),
            &user_state(0.0, 0.0, 0.2, 1_000),
            1_000,
        );
        // alignment = 1 - |0.2 - 0.9| = 0.3; async = 0.7, sync = 0.4
        assert!((delta.async_delta - 0.7).abs() < 1e-9);
        assert!((delta.sync_delta - 0.4).abs() < 1e-9);
        let expected = (0.7_f64 * 0.7 + 0.4 * 0.4).sqrt();
        assert!((delta.magnitude - expected).abs() < 1e-9);
    }

    #[test]
    fn five_minutes_halves_the_contribution() {
        let now = 5 * 60 * 1000;
        let delta = relational_delta(&agent_state(0.8, 0.5), &user_state(0.0, 0.0, 0.5, 0), now);
        assert!((delta.sync_delta - 0.4).abs() < 1e-9); // 0.8 * 0.5
        assert!(delta.async_delta.abs() < 1e-9); // perfectly aligned
    }

    #[test]
    fn elevated_fight_or_flight_forces_listen() {
        let delta = relational_delta(
            &agent_state(0.1, 0.1),
            &user_state(0.8, 0.0, 0.9, 0),
            0,
        );
        assert_eq!(delta.strategy, EngagementStrategy::Listen);

        let delta = relational_delta(
            &agent_state(0.1, 0.1),
            &user_state(0.0, 0.71, 0.9, 0),
            0,
        );
        assert_eq!(delta.strategy, EngagementStrategy::Listen);
    }

    #[test]
    fn high_misalignment_mirrors_otherwise_harmonizes() {
        // |fixes - confidence| = 0.8 and no decay: mirror.
        let mirror = relational_delta(&agent_state(0.2, 0.1), &user_state(0.1, 0.1, 0.9, 0), 0);
        assert_eq!(mirror.strategy, EngagementStrategy::Mirror);

        // Aligned and calm: harmonize.
        let harmonize = relational_delta(&agent_state(0.2, 0.5), &user_state(0.1, 0.1, 0.5, 0), 0);
        assert_eq!(harmonize.strategy, EngagementStrategy::Harmonize);
    }

    #[test]
    fn stale_state_decays_below_mirror_threshold() {
        // Same misalignment as the mirror case, but 15 minutes old:
        // decay 0.125 drops async_delta to 0.1.
        let now = 15 * 60 * 1000;
        let delta = relational_delta(&agent_state(0.2, 0.1), &user_state(0.1, 0.1, 0.9, 0), now);
        assert_eq!(delta.strategy, EngagementStrategy::Harmonize);
    }
}
