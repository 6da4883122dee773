//! Every scenario across a handful of seeds, plus randomized chaos seeds.

use anchorview_core::{AxisConvention, SessionConfig};
use anchorview_sim::scenarios::ScenarioId;
use anchorview_sim::ScenarioRunner;
use proptest::prelude::*;

#[test]
fn all_scenarios_pass_for_fixed_seeds() {
    for seed in [1, 42, 1337] {
        let runner = ScenarioRunner::new(seed);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} seed={} failed: {:?}",
                scenario,
                seed,
                result.failure_reason
            );
        }
    }
}

#[test]
fn identity_convention_still_places() {
    let config = SessionConfig {
        convention: AxisConvention::Identity,
        ..Default::default()
    };
    let runner = ScenarioRunner::new(5).with_config(config);
    for scenario in [ScenarioId::DetectAndPlace, ScenarioId::GestureSession] {
        let result = runner.run(scenario);
        assert!(result.passed, "{}: {:?}", scenario, result.failure_reason);
    }
}

#[test]
fn detect_and_place_with_instant_loads() {
    let result = ScenarioRunner::new(8)
        .with_load_latency(0)
        .run(ScenarioId::DetectAndPlace);
    assert!(result.passed, "{:?}", result.failure_reason);
    assert_eq!(result.metrics.placements, 1);
    assert_eq!(result.metrics.max_live_anchors, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn tracking_chaos_holds_for_any_seed(seed in any::<u64>()) {
        let result = ScenarioRunner::new(seed).run(ScenarioId::TrackingChaos);
        prop_assert!(result.passed, "seed={} {:?}", seed, result.failure_reason);
        prop_assert!(result.metrics.max_live_anchors <= 1);
    }
}
