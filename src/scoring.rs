/// Scoring algorithms shared by the analyzer and all providers
///
/// Confidence math lives here so every provider blends factors the same
/// way and every score stays inside [0, 1].

use std::collections::HashMap;

/// Scorer for calculating confidence scores
pub struct Scorer;

impl Scorer {
    /// Weighted average of named factor values.
    ///
    /// Missing weights default to 1.0 (equal weighting). An empty factor
    /// map scores 0.0 regardless of weights. The result is clamped to
    /// [0.0, 1.0].
    pub fn weighted_confidence(
        factors: &HashMap<String, f64>,
        weights: Option<&HashMap<String, f64>>,
    ) -> f64 {
        if factors.is_empty() {
            return 0.0;
        }

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for (name, value) in factors {
            let weight = weights
                .and_then(|w| w.get(name))
                .copied()
                .unwrap_or(1.0)
                .max(0.0);
            weighted_sum += value.clamp(0.0, 1.0) * weight;
            weight_total += weight;
        }

        if weight_total == 0.0 {
            return 0.0;
        }

        (weighted_sum / weight_total).clamp(0.0, 1.0)
    }

    /// Normalized text similarity in [0, 1].
    ///
    /// Symmetric, and 1.0 for identical strings. Case and surrounding
    /// whitespace are ignored so "Find Docs" matches "find docs".
    pub fn text_similarity(a: &str, b: &str) -> f64 {
        let a = Self::normalize(a);
        let b = Self::normalize(b);

        if a.is_empty() && b.is_empty() {
            return 1.0;
        }

        strsim::normalized_levenshtein(&a, &b).clamp(0.0, 1.0)
    }

    fn normalize(text: &str) -> String {
        text.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Recency weight using exponential decay with a 7-day half-life.
    ///
    /// Today scores 1.0; a week ago scores 0.5.
    pub fn recency_weight(days_ago: f64) -> f64 {
        let half_life = 7.0;
        (-days_ago.max(0.0) / half_life * 2.0_f64.ln()).exp()
    }

    /// Success ratio from success/failure counters.
    ///
    /// With no history at all the ratio is a neutral 0.5 rather than 0,
    /// so untried patterns and templates are not buried.
    pub fn success_ratio(successes: u32, failures: u32) -> f64 {
        let total = successes + failures;
        if total == 0 {
            0.5
        } else {
            successes as f64 / total as f64
        }
    }

    /// Small boost for patterns used successfully in the recent past:
    /// `0.1 * e^(-hours_since/24)`, so a success an hour ago is worth
    /// nearly the full 0.1 and one from three days ago almost nothing.
    pub fn recency_boost(hours_since_success: f64) -> f64 {
        0.1 * (-hours_since_success.max(0.0) / 24.0).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn factors(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_weighted_confidence_empty_is_zero() {
        let empty = HashMap::new();
        assert_eq!(Scorer::weighted_confidence(&empty, None), 0.0);

        let weights = factors(&[("anything", 3.0)]);
        assert_eq!(Scorer::weighted_confidence(&empty, Some(&weights)), 0.0);
    }

    #[test]
    fn test_weighted_confidence_equal_weights() {
        let f = factors(&[("a", 0.4), ("b", 0.8)]);
        assert_relative_eq!(Scorer::weighted_confidence(&f, None), 0.6);
    }

    #[test]
    fn test_weighted_confidence_explicit_weights() {
        let f = factors(&[("a", 1.0), ("b", 0.0)]);
        let w = factors(&[("a", 3.0), ("b", 1.0)]);
        assert_relative_eq!(Scorer::weighted_confidence(&f, Some(&w)), 0.75);
    }

    #[test]
    fn test_weighted_confidence_clamps_factor_values() {
        let f = factors(&[("a", 5.0)]);
        assert_eq!(Scorer::weighted_confidence(&f, None), 1.0);
    }

    #[test]
    fn test_similarity_identity_and_symmetry() {
        assert_eq!(Scorer::text_similarity("show documents", "show documents"), 1.0);

        let ab = Scorer::text_similarity("show documents", "show pdf documents");
        let ba = Scorer::text_similarity("show pdf documents", "show documents");
        assert_relative_eq!(ab, ba);
        assert!(ab > 0.7);
    }

    #[test]
    fn test_similarity_ignores_case_and_spacing() {
        assert_eq!(
            Scorer::text_similarity("Find  Python Docs", "find python docs"),
            1.0
        );
    }

    #[test]
    fn test_recency_weight() {
        assert_eq!(Scorer::recency_weight(0.0), 1.0);
        assert_relative_eq!(Scorer::recency_weight(7.0), 0.5, epsilon = 1e-9);
        assert!(Scorer::recency_weight(30.0) < 0.1);
    }

    #[test]
    fn test_success_ratio() {
        assert_eq!(Scorer::success_ratio(0, 0), 0.5);
        assert_eq!(Scorer::success_ratio(8, 2), 0.8);
        assert_eq!(Scorer::success_ratio(0, 5), 0.0);
    }

    #[test]
    fn test_recency_boost_decays() {
        assert!(Scorer::recency_boost(0.0) <= 0.1);
        assert!(Scorer::recency_boost(1.0) > Scorer::recency_boost(24.0));
        assert!(Scorer::recency_boost(72.0) < 0.01);
    }
}
