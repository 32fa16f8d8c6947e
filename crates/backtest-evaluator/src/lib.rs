//! Backtest evaluator: replays historical recommendations against
//! subsequently observed prices and aggregates hit-rate statistics per
//! time horizon.
//!
//! A stateless batch reduction — no retries, no persistence of its own.
//! A horizon is evaluated only once enough time has elapsed and the data
//! source can supply a historical price; anything else is silently
//! skipped rather than treated as an error.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use data_store::Store;
use serde::Serialize;
use signal_core::{MarketDataSource, SignalError};


/// Days after a recommendation at which its outcome is evaluated.
pub const HORIZON_DAYS: [i64; 3] = [30, 90, 180];

/// A hold is judged correct while the price stays within this band.
const HOLD_TOLERANCE_PCT: f64 = 5.0;

/// Outcome of one recommendation at one horizon.
#[derive(Debug, Clone, Serialize)]
pub struct HorizonOutcome {
    pub price_then: f64,
    pub pct_change: f64,
    pub correct: bool,
}

/// Result of evaluating a single recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub recommendation: String,
    pub overall_score: f64,
    pub price_at_rec: f64,
    pub created_at: DateTime<Utc>,
    pub outcomes: BTreeMap<i64, HorizonOutcome>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HitRate {
    pub total: u32,
    pub correct: u32,
    pub rate: f64,
}

/// Aggregate hit-rate statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestSummary {
    pub total: usize,
    /// Counts a recommendation correct when *any* of its evaluated
    /// horizons was correct — a lenient OR, intentionally independent of
    /// the per-horizon stats.
    pub correct: usize,
    pub results: Vec<BacktestResult>,
    pub hit_rates: BTreeMap<i64, HitRate>,
}

/// Directional correctness of a recommendation given the observed move.
///
/// buy: correct if the price went up. sell: correct if it went down.
/// hold (and any unrecognized label): correct within ±5%.
pub fn is_correct(recommendation: &str, pct_change: f64) -> bool {
    match recommendation {
        "buy" => pct_change > 0.0,
        "sell" => pct_change < 0.0,
        _ => pct_change.abs() <= HOLD_TOLERANCE_PCT,
    }
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Run the backtest over all (or one ticker's) historical recommendations.
///
/// Recommendations without a recorded price are excluded entirely; price
/// lookups use the ticker's resolved exchange symbol when one exists.
pub async fn run_backtest(
    store: &Store,
    source: &dyn MarketDataSource,
    symbol: Option<&str>,
) -> Result<BacktestSummary, SignalError> {
    let recommendations = store.get_recommendations(symbol).await?;

    let mut summary = BacktestSummary::default();
    for horizon in HORIZON_DAYS {
        summary.hit_rates.insert(horizon, HitRate::default());
    }

    let now = Utc::now();

    for rec in recommendations {
        let Some(price_at_rec) = rec.price_at_rec else {
            // No basis price, no percentage change.
            continue;
        };

        let ticker = store.get_ticker(&rec.symbol).await?;
        let (name, resolved) = match ticker {
            Some(t) => (
                t.name,
                t.resolved_symbol.unwrap_or_else(|| rec.symbol.clone()),
            ),
            None => (rec.symbol.clone(), rec.symbol.clone()),
        };

        let mut outcomes = BTreeMap::new();
        for horizon in HORIZON_DAYS {
            let target_date = rec.created_at + Duration::days(horizon);
            if target_date > now {
                // Not enough time has passed for this horizon.
                continue;
            }

            let Some(price_then) = source
                .get_historical_price(&resolved, target_date.date_naive())
                .await?
            else {
                continue;
            };

            let pct_change = (price_then - price_at_rec) / price_at_rec * 100.0;
            let correct = is_correct(&rec.recommendation, pct_change);

            outcomes.insert(
                horizon,
                HorizonOutcome {
                    price_then: round_to(price_then, 2),
                    pct_change: round_to(pct_change, 2),
                    correct,
                },
            );

            let bucket = summary
                .hit_rates
                .get_mut(&horizon)
                .expect("horizon buckets preinitialized");
            bucket.total += 1;
            if correct {
                bucket.correct += 1;
            }
        }

        summary.results.push(BacktestResult {
            id: rec.id,
            symbol: rec.symbol,
            name,
            recommendation: rec.recommendation,
            overall_score: rec.overall_score,
            price_at_rec,
            created_at: rec.created_at,
            outcomes,
        });
    }

    for bucket in summary.hit_rates.values_mut() {
        if bucket.total > 0 {
            bucket.rate = round_to(bucket.correct as f64 / bucket.total as f64 * 100.0, 1);
        }
    }

    summary.total = summary.results.len();
    summary.correct = summary
        .results
        .iter()
        .filter(|r| r.outcomes.values().any(|o| o.correct))
        .count();

    tracing::debug!(
        "Backtest evaluated {} recommendations ({} correct on at least one horizon)",
        summary.total,
        summary.correct
    );
    Ok(summary)
}
