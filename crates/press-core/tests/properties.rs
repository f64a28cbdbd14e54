// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests over the contract types.

use press_core::{
    ErrorCategory, Finding, LayerId, LayerResult, ScoreScale, Threshold, Verdict, VerdictBands,
    EXIT_INFRA, EXIT_PASS, EXIT_QUALITY,
};
use proptest::prelude::*;

fn any_scale() -> impl Strategy<Value = ScoreScale> {
    prop_oneof![
        Just(ScoreScale::Unit),
        Just(ScoreScale::Grade),
        Just(ScoreScale::Rubric),
    ]
}

fn any_layer() -> impl Strategy<Value = LayerId> {
    prop_oneof![
        Just(LayerId::Structural),
        Just(LayerId::Content),
        Just(LayerId::PdfQuality),
        Just(LayerId::VisualRegression),
        Just(LayerId::AiVision),
        Just(LayerId::Accessibility),
    ]
}

proptest! {
    #[test]
    fn scale_conversion_round_trips(
        scale_a in any_scale(),
        scale_b in any_scale(),
        fraction in 0.0f64..=1.0,
    ) {
        let value = fraction * scale_a.max();
        let there = scale_a.convert(value, scale_b);
        let back = scale_b.convert(there, scale_a);
        prop_assert!((back - value).abs() < 1e-9);
        prop_assert!(there >= 0.0 && there <= scale_b.max() + 1e-9);
    }

    #[test]
    fn thresholds_in_range_exactly_when_within_their_scale(
        scale in any_scale(),
        value in -10.0f64..200.0,
    ) {
        let threshold = Threshold { value, scale };
        prop_assert_eq!(
            threshold.in_range(),
            value >= 0.0 && value <= scale.max()
        );
    }

    #[test]
    fn verdicts_are_monotone_in_the_score(
        lower_frac in 0.0f64..=1.0,
        delta_frac in 0.0f64..=1.0,
        scale in any_scale(),
    ) {
        let bands = VerdictBands::default();
        let lower = lower_frac * scale.max();
        let higher = (lower_frac + (1.0 - lower_frac) * delta_frac) * scale.max();
        let rank = |v: Verdict| match v {
            Verdict::F => 0,
            Verdict::C => 1,
            Verdict::B => 2,
            Verdict::A => 3,
            Verdict::APlus => 4,
        };
        prop_assert!(rank(bands.verdict(higher, scale)) >= rank(bands.verdict(lower, scale)));
    }

    #[test]
    fn normalized_scores_stay_in_unit_range(
        layer in any_layer(),
        score in -50.0f64..500.0,
    ) {
        let result = LayerResult {
            score,
            ..LayerResult::skipped_passing(layer)
        };
        let normalized = result.normalized();
        prop_assert!((0.0..=1.0).contains(&normalized));
    }

    #[test]
    fn critical_findings_are_always_detected(messages in proptest::collection::vec(".*", 0..5)) {
        let mut result = LayerResult::skipped_passing(LayerId::Content);
        result.findings = messages
            .iter()
            .map(|m| Finding::warning("misc", m.clone()))
            .collect();
        prop_assert!(!result.has_critical());
        result.findings.push(Finding::critical("misc", "boom"));
        prop_assert!(result.has_critical());
    }
}

#[test]
fn every_error_category_maps_to_a_ci_meaningful_code() {
    for category in [
        ErrorCategory::Configuration,
        ErrorCategory::Transport,
        ErrorCategory::Script,
        ErrorCategory::Export,
        ErrorCategory::Validation,
        ErrorCategory::Remediation,
        ErrorCategory::Provider,
        ErrorCategory::Io,
    ] {
        let code = category.exit_code();
        assert!(code == EXIT_QUALITY || code == EXIT_INFRA);
        assert_ne!(code, EXIT_PASS);
    }
}
