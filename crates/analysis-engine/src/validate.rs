//! Signal result validation.

use serde_json::{json, Value};
use signal_core::Confidence;

pub const MIN_SCORE: f64 = -10.0;
pub const MAX_SCORE: f64 = 10.0;

/// Produce a validated copy of a raw reasoning-provider result: the score
/// is clamped to `[-10, 10]` (missing or non-numeric defaults to 0), the
/// confidence is normalized into {low, medium, high} (anything else maps
/// to "low"), and every other key passes through unchanged. Violations are
/// logged, never raised — the pipeline prefers degraded answers over
/// failures.
pub fn validate_signal_result(result: &Value) -> Value {
    let mut validated = match result {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };

    let raw_score = validated
        .get("score")
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0);
    let clamped = raw_score.clamp(MIN_SCORE, MAX_SCORE);
    if clamped != raw_score {
        tracing::warn!(
            "Score {} out of range [-10, +10], clamped to {}",
            raw_score,
            clamped
        );
    }
    validated.insert("score".to_string(), json!(clamped));

    let confidence = match validated.get("confidence").and_then(Value::as_str) {
        Some(raw) => Confidence::parse(raw).unwrap_or_else(|| {
            tracing::warn!("Invalid confidence {:?}, defaulting to 'low'", raw);
            Confidence::Low
        }),
        None => Confidence::Low,
    };
    validated.insert("confidence".to_string(), json!(confidence.as_str()));

    Value::Object(validated)
}
