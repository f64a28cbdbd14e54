// SPDX-License-Identifier: MIT OR Apache-2.0
//! Winner selection: composite scoring and the deterministic tie cascade.
//!
//! Composite score per variant:
//!
//! ```text
//! w_total · overall/150 + w_brand · content/max
//!   + w_visual · (1 − diff/100) + w_passed · {0,1}
//! ```
//!
//! Ties break, in order: highest total score, highest brand sub-score,
//! lowest visual diff, fastest duration, earliest variant index.

use crate::harness::VariantOutcome;
use press_core::{ExperimentWeights, LayerId, Scorecard};
use std::cmp::Ordering;

/// Equality tolerance when comparing floating scores in the cascade.
const EPSILON: f64 = 1e-9;

/// The four normalized metrics feeding the composite.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VariantMetrics {
    /// Overall score normalized to `[0, 1]`.
    pub total: f64,
    /// Brand-compliance (content layer) sub-score normalized to `[0, 1]`.
    pub brand: f64,
    /// Inverted visual diff: `1 − diff/100`.
    pub visual: f64,
    /// `1.0` when the variant passed, else `0.0`.
    pub passed: f64,
}

impl VariantMetrics {
    /// Extract the metrics from a scorecard. A missing layer counts as a
    /// perfect sub-score (nothing measured, nothing lost).
    #[must_use]
    pub fn from_scorecard(card: &Scorecard) -> Self {
        let total = (card.overall / card.overall_scale.max()).clamp(0.0, 1.0);
        let brand = card
            .layer(LayerId::Content)
            .map_or(1.0, press_core::LayerResult::normalized);
        let visual = card
            .layer(LayerId::VisualRegression)
            .map_or(1.0, press_core::LayerResult::normalized);
        let passed = if card.overall_passed { 1.0 } else { 0.0 };
        Self {
            total,
            brand,
            visual,
            passed,
        }
    }

    /// Weighted composite of the four metrics.
    #[must_use]
    pub fn composite(&self, weights: &ExperimentWeights) -> f64 {
        weights.total * self.total
            + weights.brand * self.brand
            + weights.visual * self.visual
            + weights.passed * self.passed
    }
}

/// Pick the winning index among `outcomes`.
///
/// Failed variants are excluded unless every variant failed, in which case
/// the least-failed (highest composite) is selected. Returns `None` only
/// for an empty slice.
#[must_use]
pub fn select_winner(outcomes: &[VariantOutcome], weights: &ExperimentWeights) -> Option<usize> {
    if outcomes.is_empty() {
        return None;
    }
    let all_failed = outcomes.iter().all(|o| o.scorecard.exit_code != 0);
    let eligible: Vec<&VariantOutcome> = outcomes
        .iter()
        .filter(|o| all_failed || o.scorecard.exit_code == 0)
        .collect();

    let best = eligible
        .into_iter()
        .max_by(|a, b| compare(a, b, weights))?;
    Some(best.index)
}

/// Total order over variants: composite first, then the tie cascade.
/// `Ordering::Greater` means "wins against".
pub fn compare(a: &VariantOutcome, b: &VariantOutcome, weights: &ExperimentWeights) -> Ordering {
    let (ma, mb) = (
        VariantMetrics::from_scorecard(&a.scorecard),
        VariantMetrics::from_scorecard(&b.scorecard),
    );
    descending(ma.composite(weights), mb.composite(weights))
        .then_with(|| descending(ma.total, mb.total))
        .then_with(|| descending(ma.brand, mb.brand))
        .then_with(|| descending(ma.visual, mb.visual)) // lower diff = higher inverted
        .then_with(|| ascending(a.duration_ms as f64, b.duration_ms as f64))
        .then_with(|| ascending(a.index as f64, b.index as f64))
}

fn descending(a: f64, b: f64) -> Ordering {
    if (a - b).abs() < EPSILON {
        Ordering::Equal
    } else if a > b {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

fn ascending(a: f64, b: f64) -> Ordering {
    descending(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use press_core::{ErrorCategory, LayerResult, ScoreScale};

    fn outcome(index: usize, total: f64, brand: f64, diff: f64, passed: bool) -> VariantOutcome {
        outcome_with_duration(index, total, brand, diff, passed, 1000)
    }

    fn outcome_with_duration(
        index: usize,
        total: f64,
        brand: f64,
        diff: f64,
        passed: bool,
        duration_ms: u64,
    ) -> VariantOutcome {
        let mut card = if passed {
            let mut c = Scorecard::from_error("v", ErrorCategory::Validation, "");
            c.exit_code = 0;
            c.overall_passed = true;
            c.error = None;
            c
        } else {
            Scorecard::from_error("v", ErrorCategory::Validation, "failed")
        };
        card.overall = total;
        card.overall_scale = ScoreScale::Rubric;
        card.per_layer = vec![
            LayerResult {
                score: brand,
                max_score: 150.0,
                ..LayerResult::skipped_passing(LayerId::Content)
            },
            LayerResult {
                score: 1.0 - diff / 100.0,
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

    #[test]
    fn best_composite_wins() {
        // The classic three-variant shape: V2 leads on every metric.
        let outcomes = vec![
            outcome(0, 128.0, 115.0, 3.2, true),
            outcome(1, 135.0, 120.0, 2.1, true),
            outcome(2, 130.0, 110.0, 4.0, true),
        ];
        let weights = ExperimentWeights::default();
        assert_eq!(select_winner(&outcomes, &weights), Some(1));

        let winner_metrics = VariantMetrics::from_scorecard(&outcomes[1].scorecard);
        let runner_up = VariantMetrics::from_scorecard(&outcomes[2].scorecard);
        assert!(winner_metrics.composite(&weights) > runner_up.composite(&weights));
    }

    #[test]
    fn failed_variants_are_excluded_when_any_passed() {
        let outcomes = vec![
            outcome(0, 149.0, 149.0, 0.0, false), // high score but failed
            outcome(1, 110.0, 100.0, 5.0, true),
        ];
        assert_eq!(
            select_winner(&outcomes, &ExperimentWeights::default()),
            Some(1)
        );
    }

    #[test]
    fn all_failed_selects_least_failed() {
        let outcomes = vec![
            outcome(0, 90.0, 80.0, 10.0, false),
            outcome(1, 120.0, 110.0, 4.0, false),
        ];
        assert_eq!(
            select_winner(&outcomes, &ExperimentWeights::default()),
            Some(1)
        );
    }

    #[test]
    fn tie_cascade_resolves_deterministically() {
        let weights = ExperimentWeights::default();

        // Identical metrics, different durations: faster wins.
        let a = outcome_with_duration(0, 130.0, 120.0, 2.0, true, 5000);
        let b = outcome_with_duration(1, 130.0, 120.0, 2.0, true, 3000);
        assert_eq!(compare(&b, &a, &weights), Ordering::Greater);

        // Identical everything: earlier index wins.
        let a = outcome_with_duration(0, 130.0, 120.0, 2.0, true, 3000);
        let b = outcome_with_duration(1, 130.0, 120.0, 2.0, true, 3000);
        assert_eq!(compare(&a, &b, &weights), Ordering::Greater);
    }

    #[test]
    fn winner_dominates_every_non_failed_variant() {
        let weights = ExperimentWeights::default();
        let outcomes: Vec<VariantOutcome> = (0..5)
            .map(|i| outcome(i, 100.0 + i as f64 * 7.0, 90.0 + i as f64 * 5.0, 5.0 - i as f64, true))
            .collect();
        let winner = select_winner(&outcomes, &weights).unwrap();
        let winner_composite =
            VariantMetrics::from_scorecard(&outcomes[winner].scorecard).composite(&weights);
        for outcome in &outcomes {
            let composite =
                VariantMetrics::from_scorecard(&outcome.scorecard).composite(&weights);
            assert!(winner_composite >= composite);
        }
    }

    #[test]
    fn empty_input_has_no_winner() {
        assert_eq!(select_winner(&[], &ExperimentWeights::default()), None);
    }
}
