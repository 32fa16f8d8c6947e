//! Pure scoring: weighted category reduction, score → recommendation
//! thresholds, and weight-configuration validation. No I/O, no side
//! effects; callers own logging and persistence.

use std::collections::HashMap;

use signal_core::{Recommendation, SignalCategory};

/// Weight applied to a scored category that is missing from the weight
/// table (e.g. a partial custom configuration).
const FALLBACK_WEIGHT: f64 = 0.1;

/// Default category weights, overridable via settings.
pub fn default_weights() -> HashMap<String, f64> {
    weights_map(&[
        (SignalCategory::Fundamentals, 0.20),
        (SignalCategory::AnalystConsensus, 0.15),
        (SignalCategory::InsiderActivity, 0.10),
        (SignalCategory::Technicals, 0.20),
        (SignalCategory::Sentiment, 0.10),
        (SignalCategory::SectorContext, 0.10),
        (SignalCategory::RiskAssessment, 0.15),
    ])
}

fn weights_map(entries: &[(SignalCategory, f64)]) -> HashMap<String, f64> {
    entries
        .iter()
        .map(|(cat, w)| (cat.as_str().to_string(), *w))
        .collect()
}

/// A named weight configuration for a particular investment strategy.
#[derive(Debug, Clone, Copy)]
pub struct ScoringPreset {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    entries: &'static [(SignalCategory, f64)],
}

impl ScoringPreset {
    pub fn weights(&self) -> HashMap<String, f64> {
        weights_map(self.entries)
    }
}

/// Preset configurations for different investment strategies. Every preset
/// satisfies the same sum-to-1.0 and category-completeness invariants as
/// custom weights.
pub const SCORING_PRESETS: [ScoringPreset; 5] = [
    ScoringPreset {
        key: "balanced",
        name: "Balanced",
        description: "Default balanced approach for general investing",
        entries: &[
            (SignalCategory::Fundamentals, 0.20),
            (SignalCategory::AnalystConsensus, 0.15),
            (SignalCategory::InsiderActivity, 0.10),
            (SignalCategory::Technicals, 0.20),
            (SignalCategory::Sentiment, 0.10),
            (SignalCategory::SectorContext, 0.10),
            (SignalCategory::RiskAssessment, 0.15),
        ],
    },
    ScoringPreset {
        key: "growth",
        name: "Growth",
        description: "Prioritizes fundamentals, analyst consensus, and technical momentum",
        entries: &[
            (SignalCategory::Fundamentals, 0.25),
            (SignalCategory::AnalystConsensus, 0.20),
            (SignalCategory::InsiderActivity, 0.05),
            (SignalCategory::Technicals, 0.25),
            (SignalCategory::Sentiment, 0.10),
            (SignalCategory::SectorContext, 0.05),
            (SignalCategory::RiskAssessment, 0.10),
        ],
    },
    ScoringPreset {
        key: "value",
        name: "Value",
        description: "Focuses on fundamentals, risk assessment, and insider confidence",
        entries: &[
            (SignalCategory::Fundamentals, 0.30),
            (SignalCategory::AnalystConsensus, 0.10),
            (SignalCategory::InsiderActivity, 0.15),
            (SignalCategory::Technicals, 0.10),
            (SignalCategory::Sentiment, 0.05),
            (SignalCategory::SectorContext, 0.10),
            (SignalCategory::RiskAssessment, 0.20),
        ],
    },
    ScoringPreset {
        key: "income",
        name: "Income/Dividend",
        description: "Emphasizes fundamentals stability and risk assessment for dividend stocks",
        entries: &[
            (SignalCategory::Fundamentals, 0.30),
            (SignalCategory::AnalystConsensus, 0.10),
            (SignalCategory::InsiderActivity, 0.10),
            (SignalCategory::Technicals, 0.05),
            (SignalCategory::Sentiment, 0.10),
            (SignalCategory::SectorContext, 0.15),
            (SignalCategory::RiskAssessment, 0.20),
        ],
    },
    ScoringPreset {
        key: "momentum",
        name: "Momentum",
        description: "Weights technicals and sentiment heavily for trend-following",
        entries: &[
            (SignalCategory::Fundamentals, 0.10),
            (SignalCategory::AnalystConsensus, 0.20),
            (SignalCategory::InsiderActivity, 0.05),
            (SignalCategory::Technicals, 0.35),
            (SignalCategory::Sentiment, 0.15),
            (SignalCategory::SectorContext, 0.05),
            (SignalCategory::RiskAssessment, 0.10),
        ],
    },
];

/// Look up a preset by key.
pub fn preset(key: &str) -> Option<&'static ScoringPreset> {
    SCORING_PRESETS.iter().find(|p| p.key == key)
}

/// Weighted average of the category scores, restricted to the categories
/// present in `scores`. Categories missing from the weight table fall back
/// to [`FALLBACK_WEIGHT`]. Returns 0.0 for an empty score map. Rounded to
/// 2 decimal places.
pub fn weighted_score(scores: &HashMap<String, f64>, weights: Option<&HashMap<String, f64>>) -> f64 {
    let defaults;
    let table = match weights {
        Some(w) => w,
        None => {
            defaults = default_weights();
            &defaults
        }
    };

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for (category, score) in scores {
        let weight = table.get(category).copied().unwrap_or(FALLBACK_WEIGHT);
        weighted_sum += score * weight;
        total_weight += weight;
    }
    if total_weight == 0.0 {
        return 0.0;
    }
    round_to(weighted_sum / total_weight, 2)
}

/// Threshold mapping from overall score to recommendation. Boundaries are
/// inclusive toward buy/sell: 3.0 is a buy, -3.0 is a sell.
pub fn score_to_recommendation(score: f64) -> Recommendation {
    if score >= 3.0 {
        Recommendation::Buy
    } else if score <= -3.0 {
        Recommendation::Sell
    } else {
        Recommendation::Hold
    }
}

/// Validate a user-edited weight configuration. Returns `(is_valid,
/// error_message)`; the message is empty on success. The [0.99, 1.01] sum
/// band absorbs floating-point rounding without accepting materially wrong
/// totals.
pub fn validate_weights(weights: &HashMap<String, f64>) -> (bool, String) {
    let mut missing: Vec<&str> = SignalCategory::ALL
        .iter()
        .map(|c| c.as_str())
        .filter(|c| !weights.contains_key(*c))
        .collect();
    missing.sort_unstable();
    if !missing.is_empty() {
        return (false, format!("Missing categories: {}", missing.join(", ")));
    }

    let mut extra: Vec<&str> = weights
        .keys()
        .filter(|k| SignalCategory::parse(k).is_none())
        .map(String::as_str)
        .collect();
    extra.sort_unstable();
    if !extra.is_empty() {
        return (false, format!("Unknown categories: {}", extra.join(", ")));
    }

    for (category, weight) in weights {
        if !weight.is_finite() {
            return (false, format!("Weight for {category} must be a number"));
        }
        if *weight < 0.0 {
            return (false, format!("Weight for {category} cannot be negative"));
        }
    }

    let total: f64 = weights.values().sum();
    if !(0.99..=1.01).contains(&total) {
        return (
            false,
            format!("Weights must sum to 100% (currently {:.1}%)", total * 100.0),
        );
    }

    (true, String::new())
}

/// Rescale an arbitrary positive-weight map so values sum to 1.0 (4-decimal
/// rounding). A zero-total map yields the default table instead of a
/// division by zero.
pub fn normalize_weights(weights: &HashMap<String, f64>) -> HashMap<String, f64> {
    let total: f64 = weights.values().sum();
    if total == 0.0 {
        return default_weights();
    }
    weights
        .iter()
        .map(|(k, v)| (k.clone(), round_to(v / total, 4)))
        .collect()
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_scores(value: f64) -> HashMap<String, f64> {
        SignalCategory::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), value))
            .collect()
    }

    #[test]
    fn weighted_average_of_constant_is_constant() {
        // Holds for any weight table.
        assert_eq!(weighted_score(&constant_scores(5.0), None), 5.0);
        for preset in &SCORING_PRESETS {
            assert_eq!(
                weighted_score(&constant_scores(5.0), Some(&preset.weights())),
                5.0
            );
        }
    }

    #[test]
    fn weighted_score_empty_input() {
        assert_eq!(weighted_score(&HashMap::new(), None), 0.0);
    }

    #[test]
    fn weighted_score_partial_categories() {
        let mut scores = HashMap::new();
        scores.insert("fundamentals".to_string(), 8.0);
        scores.insert("technicals".to_string(), 4.0);
        // Equal default weights (0.20 each) → plain average.
        assert_eq!(weighted_score(&scores, None), 6.0);
    }

    #[test]
    fn weighted_score_unknown_category_uses_fallback_weight() {
        let mut scores = HashMap::new();
        scores.insert("something_else".to_string(), 4.0);
        assert_eq!(weighted_score(&scores, None), 4.0);
    }

    #[test]
    fn recommendation_thresholds() {
        assert_eq!(score_to_recommendation(3.0), Recommendation::Buy);
        assert_eq!(score_to_recommendation(2.99), Recommendation::Hold);
        assert_eq!(score_to_recommendation(-3.0), Recommendation::Sell);
        assert_eq!(score_to_recommendation(-2.99), Recommendation::Hold);
        assert_eq!(score_to_recommendation(0.0), Recommendation::Hold);
        assert_eq!(score_to_recommendation(10.0), Recommendation::Buy);
        assert_eq!(score_to_recommendation(-10.0), Recommendation::Sell);
    }

    #[test]
    fn default_weights_are_valid() {
        let (ok, msg) = validate_weights(&default_weights());
        assert!(ok, "{msg}");
        assert!(msg.is_empty());
    }

    #[test]
    fn all_presets_are_valid() {
        for preset in &SCORING_PRESETS {
            let (ok, msg) = validate_weights(&preset.weights());
            assert!(ok, "preset {}: {msg}", preset.key);
        }
    }

    #[test]
    fn validate_rejects_missing_category() {
        let mut weights = default_weights();
        weights.remove("fundamentals");
        let (ok, msg) = validate_weights(&weights);
        assert!(!ok);
        assert!(msg.contains("Missing categories"));
        assert!(msg.contains("fundamentals"));
    }

    #[test]
    fn validate_rejects_unknown_category() {
        let mut weights = default_weights();
        weights.insert("unknown_category".to_string(), 0.1);
        let (ok, msg) = validate_weights(&weights);
        assert!(!ok);
        assert!(msg.contains("Unknown categories"));
    }

    #[test]
    fn validate_rejects_negative_weight() {
        let mut weights = default_weights();
        weights.insert("fundamentals".to_string(), -0.1);
        let (ok, msg) = validate_weights(&weights);
        assert!(!ok);
        assert!(msg.contains("cannot be negative"));
    }

    #[test]
    fn validate_rejects_bad_sum() {
        let mut weights = default_weights();
        weights.insert("fundamentals".to_string(), 0.5);
        let (ok, msg) = validate_weights(&weights);
        assert!(!ok);
        assert!(msg.contains("sum to 100%"));
    }

    #[test]
    fn validate_accepts_rounding_tolerance() {
        let mut weights = default_weights();
        // Nudge the total to 1.005 — inside the band.
        weights.insert("fundamentals".to_string(), 0.205);
        let (ok, _) = validate_weights(&weights);
        assert!(ok);
    }

    #[test]
    fn normalize_rescales_to_one() {
        let mut weights = HashMap::new();
        for cat in SignalCategory::ALL {
            weights.insert(cat.as_str().to_string(), 2.0);
        }
        let normalized = normalize_weights(&weights);
        let total: f64 = normalized.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        for v in normalized.values() {
            assert!((v - 1.0 / 7.0).abs() < 1e-3);
        }
    }

    #[test]
    fn normalize_zero_total_returns_defaults() {
        let mut weights = HashMap::new();
        weights.insert("fundamentals".to_string(), 0.0);
        assert_eq!(normalize_weights(&weights), default_weights());
    }

    #[test]
    fn preset_lookup() {
        assert!(preset("momentum").is_some());
        assert!(preset("nonexistent").is_none());
    }
}
