//! Every scenario, end to end, through the public runner.

use proptest::prelude::*;
use tripwatch_core::{DeliveryPolicy, EngineConfig};
use tripwatch_sim::{ScenarioId, ScenarioRunner};

#[test]
fn test_all_scenarios_pass() {
    let runner = ScenarioRunner::new(42);

    for scenario in ScenarioId::all() {
        let result = runner.run(scenario);
        assert!(
            result.passed,
            "{} failed: {:?}",
            scenario,
            result.failure_reason
        );
        assert_eq!(result.seed, 42);
    }
}

#[test]
fn test_same_seed_same_metrics() {
    for scenario in [ScenarioId::HappyDelivery, ScenarioId::OverdueTrip] {
        let a = ScenarioRunner::new(1234).run(scenario);
        let b = ScenarioRunner::new(1234).run(scenario);

        assert_eq!(a.metrics, b.metrics, "{scenario} diverged between runs");
        assert_eq!(a.virtual_secs, b.virtual_secs);
    }
}

#[test]
fn test_base_policy_does_not_leak_into_scenarios() {
    // Scenarios pin the delivery policy they exercise
    let config = EngineConfig::default().with_delivery_policy(DeliveryPolicy::RequireInspections);
    let result = ScenarioRunner::new(42)
        .with_config(config)
        .run(ScenarioId::HappyDelivery);

    assert!(result.passed, "{:?}", result.failure_reason);
}

#[test]
fn test_wider_geofence_still_delivers() {
    let config = EngineConfig::default().with_region_radius(120.0);
    let result = ScenarioRunner::new(42)
        .with_config(config)
        .run(ScenarioId::HappyDelivery);

    assert!(result.passed, "{:?}", result.failure_reason);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_happy_delivery_passes_for_any_seed(seed in any::<u64>()) {
        let result = ScenarioRunner::new(seed).run(ScenarioId::HappyDelivery);
        prop_assert!(result.passed, "seed {}: {:?}", seed, result.failure_reason);
    }
}
