// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for winner selection: dominance and determinism.

use press_core::{ErrorCategory, ExperimentWeights, LayerId, LayerResult, Scorecard, ScoreScale};
use press_router::winner::{select_winner, VariantMetrics};
use press_router::VariantOutcome;
use proptest::prelude::*;

fn outcome(index: usize, total: f64, brand: f64, visual: f64, passed: bool, duration_ms: u64) -> VariantOutcome {
    let mut card = Scorecard::from_error("variant", ErrorCategory::Validation, "seed");
    if passed {
        card.exit_code = 0;
        card.overall_passed = true;
        card.error = None;
    }
    card.overall = total;
    card.overall_scale = ScoreScale::Rubric;
    card.per_layer = vec![
        LayerResult {
            score: brand,
            max_score: 150.0,
            ..LayerResult::skipped_passing(LayerId::Content)
        },
        LayerResult {
            score: visual,
            max_score: 1.0,
            ..LayerResult::skipped_passing(LayerId::VisualRegression)
        },
    ];
    VariantOutcome {
        index,
        job_id: format!("parent-variant-{index}"),
        scorecard: card,
        duration_ms,
        overrides: serde_json::Value::Null,
    }
}

fn variant_strategy() -> impl Strategy<Value = (f64, f64, f64, bool, u64)> {
    (
        0.0f64..=150.0,
        0.0f64..=150.0,
        0.0f64..=1.0,
        any::<bool>(),
        1u64..60_000,
    )
}

proptest! {
    #[test]
    fn winner_composite_dominates_all_non_failed_variants(
        raw in proptest::collection::vec(variant_strategy(), 1..8),
    ) {
        let outcomes: Vec<VariantOutcome> = raw
            .iter()
            .enumerate()
            .map(|(i, (total, brand, visual, passed, duration))| {
                outcome(i, *total, *brand, *visual, *passed, *duration)
            })
            .collect();
        let weights = ExperimentWeights::default();
        let winner = select_winner(&outcomes, &weights).expect("non-empty input");
        let winner_composite =
            VariantMetrics::from_scorecard(&outcomes[winner].scorecard).composite(&weights);

        let any_passed = outcomes.iter().any(|o| o.scorecard.exit_code == 0);
        for other in &outcomes {
            // Failed variants are not in contention unless all failed.
            if any_passed && other.scorecard.exit_code != 0 {
                continue;
            }
            let composite =
                VariantMetrics::from_scorecard(&other.scorecard).composite(&weights);
            prop_assert!(winner_composite >= composite - 1e-9);
        }
    }

    #[test]
    fn selection_is_deterministic(
        raw in proptest::collection::vec(variant_strategy(), 1..8),
    ) {
        let outcomes: Vec<VariantOutcome> = raw
            .iter()
            .enumerate()
            .map(|(i, (total, brand, visual, passed, duration))| {
                outcome(i, *total, *brand, *visual, *passed, *duration)
            })
            .collect();
        let weights = ExperimentWeights::default();
        let first = select_winner(&outcomes, &weights);
        let second = select_winner(&outcomes, &weights);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn identical_variants_resolve_to_the_earliest_index(
        spec in variant_strategy(),
        count in 2usize..6,
    ) {
        let (total, brand, visual, passed, duration) = spec;
        let outcomes: Vec<VariantOutcome> = (0..count)
            .map(|i| outcome(i, total, brand, visual, passed, duration))
            .collect();
        let winner = select_winner(&outcomes, &ExperimentWeights::default());
        prop_assert_eq!(winner, Some(0));
    }
}
