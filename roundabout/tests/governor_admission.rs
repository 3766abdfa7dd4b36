//! End-to-end admission-control scenarios against a fresh governor.

use std::sync::Arc;

use roundabout::{
    AgencyError, AgentFactory, AgentRole, ApprovalRequest, BreakerStatus, ConfigurationProfile,
    DenialReason, ManualClock, MemoryEventLog, OperationKind, QuotaTier, ResourceBudget,
    ResourceGovernor, ResourceUsage, StubLlmProvider, SystemConfig, SystemTempo,
};

struct Harness {
    governor: Arc<ResourceGovernor>,
    factory: AgentFactory,
    clock: Arc<ManualClock>,
    events: Arc<MemoryEventLog>,
}

fn harness(config: SystemConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let events = Arc::new(MemoryEventLog::default());
    let governor = Arc::new(ResourceGovernor::new(
        config.clone(),
        clock.clone(),
        events.clone(),
    ));
    let factory = AgentFactory::new(
        governor.clone(),
        Arc::new(StubLlmProvider::new()),
        events.clone(),
        clock.clone(),
        Arc::new(config),
    );
    Harness {
        governor,
        factory,
        clock,
        events,
    }
}

fn seeded_config() -> SystemConfig {
    SystemConfig {
        rng_seed: Some(7),
        ..SystemConfig::default()
    }
}

#[tokio::test]
async fn third_clone_crosses_the_parent_budget_threshold() {
    // Spawn attributions are large one-off costs; a generous baseline keeps
    // the cost-spike and tempo machinery quiet so the budget threshold is
    // the only gate in play.
    let h = harness(SystemConfig {
        cost_baseline: 1_000.0,
        rng_seed: Some(7),
        ..SystemConfig::default()
    });
    let parent_budget = ResourceBudget {
        max_calls: 10,
        max_compute_units: 100,
        max_storage_bytes: 1024,
        max_execution_time_ms: 30_000,
    };
    let root = h.factory.create_agent(
        "user-1",
        AgentRole::Coordinator,
        "stress the admission gate",
        "spawn workers",
        ConfigurationProfile {
            resource_budget: Some(parent_budget),
            ..ConfigurationProfile::default()
        },
    );

    // Fixed per-clone budget: three of these cross 90% of the parent's
    // call budget, two stay under it.
    let child_profile = || ConfigurationProfile {
        resource_budget: Some(ResourceBudget {
            max_calls: 4,
            max_compute_units: 35,
            max_storage_bytes: 300,
            max_execution_time_ms: 9_000,
        }),
        ..ConfigurationProfile::default()
    };

    let first = root.spawn_child(child_profile(), "worker one").await;
    assert!(first.is_ok());
    let second = root.spawn_child(child_profile(), "worker two").await;
    assert!(second.is_ok());

    let third = root.spawn_child(child_profile(), "worker three").await;
    match third {
        Err(AgencyError::ApprovalDenied(DenialReason::BudgetInsufficient {
            dimension,
            projected,
            limit,
        })) => {
            assert_eq!(dimension, "calls");
            assert_eq!(projected, 12);
            assert_eq!(limit, 9);
        }
        other => panic!("expected a budget denial, got {:?}", other.map(|a| a.id().clone())),
    }

    // The denial is terminal for the operation only; the agent stays alive.
    assert!(root.is_active());
    assert_eq!(root.child_count(), 2);
}

#[tokio::test]
async fn five_errors_trip_the_breaker_for_every_agent() {
    let h = harness(seeded_config());
    let a = h.factory.create_agent(
        "user-1",
        AgentRole::Core,
        "goal",
        "task a",
        ConfigurationProfile::default(),
    );
    let b = h.factory.create_agent(
        "user-2",
        AgentRole::Core,
        "goal",
        "task b",
        ConfigurationProfile::default(),
    );

    for _ in 0..5 {
        h.governor.record_error(a.id(), "step exploded").await;
    }
    assert_eq!(h.governor.breaker_info().status, BreakerStatus::Open);

    // The breaker is global: agent B is denied too, with a reason that
    // names the breaker.
    let denied = h
        .governor
        .request_approval(ApprovalRequest {
            agent_id: b.id().clone(),
            operation: OperationKind::LlmCall,
            estimate: ResourceUsage::default(),
        })
        .await
        .unwrap();
    assert!(!denied.approved);
    let reason = denied.reason.expect("denial carries a reason");
    assert!(matches!(reason, DenialReason::CircuitBreakerOpen));
    assert!(reason.to_string().contains("circuit breaker"));

    // After the cooldown the breaker sits half-open, and the configured
    // number of successful admissions closes it again.
    h.clock.advance(h.governor.config().breaker_cooldown_ms + 1);
    assert_eq!(h.governor.breaker_info().status, BreakerStatus::HalfOpen);

    for _ in 0..h.governor.config().breaker_success_threshold {
        let decision = h
            .governor
            .request_approval(ApprovalRequest {
                agent_id: b.id().clone(),
                operation: OperationKind::MemoryAccess,
                estimate: ResourceUsage::default(),
            })
            .await
            .unwrap();
        assert!(decision.approved);
    }
    assert_eq!(h.governor.breaker_info().status, BreakerStatus::Closed);
}

#[tokio::test]
async fn tempo_degrades_stepwise_and_gates_by_operation() {
    // Keep the breaker out of the way so the tempo ladder is observable
    // on its own.
    let config = SystemConfig {
        error_rate_threshold: 0.99,
        min_error_samples: 1_000,
        rng_seed: Some(7),
        ..SystemConfig::default()
    };
    let h = harness(config);
    let agent = h.factory.create_agent(
        "user-1",
        AgentRole::Core,
        "goal",
        "task",
        ConfigurationProfile::default(),
    );

    assert_eq!(h.governor.tempo(), SystemTempo::HighPerformance);
    h.governor.record_error(agent.id(), "first").await;
    assert_eq!(h.governor.tempo(), SystemTempo::LowIntensity);
    h.governor.record_error(agent.id(), "second").await;
    assert_eq!(h.governor.tempo(), SystemTempo::Sleep);

    // Sleep denies everything except memory access.
    let denied = h
        .governor
        .request_approval(ApprovalRequest {
            agent_id: agent.id().clone(),
            operation: OperationKind::ExternalApi,
            estimate: ResourceUsage::default(),
        })
        .await
        .unwrap();
    assert!(matches!(
        denied.reason,
        Some(DenialReason::TempoAsleep { operation: OperationKind::ExternalApi })
    ));

    let memory = h
        .governor
        .request_approval(ApprovalRequest {
            agent_id: agent.id().clone(),
            operation: OperationKind::MemoryAccess,
            estimate: ResourceUsage::default(),
        })
        .await
        .unwrap();
    assert!(memory.approved);

    // Quiet operation drives the error rate under the recovery threshold;
    // the tempo relaxes one step at a time.
    for _ in 0..30 {
        h.governor
            .update_resource_usage(agent.id(), &ResourceUsage::default())
            .await
            .unwrap();
    }
    assert_eq!(h.governor.tempo(), SystemTempo::HighPerformance);

    let tempo_shifts = h.events.of_kind(roundabout::EventKind::TempoShift);
    let details: Vec<&str> = tempo_shifts.iter().map(|e| e.detail.as_str()).collect();
    assert_eq!(
        details,
        vec![
            "high-performance -> low-intensity",
            "low-intensity -> sleep",
            "sleep -> low-intensity",
            "low-intensity -> high-performance",
        ]
    );
}

#[tokio::test]
async fn quota_violations_name_every_exceeded_limit() {
    let h = harness(seeded_config());
    let agent = h.factory.create_agent(
        "user-q",
        AgentRole::Core,
        "goal",
        "task",
        ConfigurationProfile {
            resource_budget: Some(ResourceBudget {
                max_calls: 10_000,
                max_compute_units: 100_000,
                max_storage_bytes: 1 << 30,
                max_execution_time_ms: 1 << 30,
            }),
            ..ConfigurationProfile::default()
        },
    );

    // Burn past the free-tier hourly call and compute limits in one update.
    h.governor
        .update_resource_usage(
            agent.id(),
            &ResourceUsage {
                calls: 60,
                compute_units: 1_500,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let violations = h.governor.check_user_quotas(&"user-q".to_string());
    let limits: Vec<&str> = violations.iter().map(|v| v.limit.as_str()).collect();
    assert!(limits.contains(&"llm_calls_per_hour"));
    assert!(limits.contains(&"compute_units_per_hour"));

    let denied = h
        .governor
        .request_approval(ApprovalRequest {
            agent_id: agent.id().clone(),
            operation: OperationKind::LlmCall,
            estimate: ResourceUsage {
                calls: 1,
                ..Default::default()
            },
        })
        .await
        .unwrap();
    match denied.reason {
        Some(DenialReason::QuotaViolation(details)) => {
            assert!(details.iter().any(|d| d.limit == "llm_calls_per_hour"));
        }
        other => panic!("expected quota denial, got {:?}", other),
    }

    // A tier upgrade is enough to get admitted again.
    h.governor
        .set_user_tier(&"user-q".to_string(), QuotaTier::Premium);
    let approved = h
        .governor
        .request_approval(ApprovalRequest {
            agent_id: agent.id().clone(),
            operation: OperationKind::LlmCall,
            estimate: ResourceUsage {
                calls: 1,
                ..Default::default()
            },
        })
        .await
        .unwrap();
    assert!(approved.approved);
}
