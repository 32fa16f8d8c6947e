//! Technical indicator calculations from daily price history.
//!
//! Each function returns the latest indicator value; the analysis prompts
//! only ever consume the most recent reading.

/// Simple Moving Average over the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Relative Strength Index with Wilder's smoothing.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for i in period + 1..values.len() {
        let change = values[i] - values[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Average True Range with Wilder's smoothing. Slices must be equal length.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Option<f64> {
    let n = close.len();
    if period == 0 || n < period + 1 || high.len() != n || low.len() != n {
        return None;
    }

    let true_range = |i: usize| -> f64 {
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        hl.max(hc).max(lc)
    };

    let mut value = (1..=period).map(true_range).sum::<f64>() / period as f64;
    for i in period + 1..n {
        value = (value * (period - 1) as f64 + true_range(i)) / period as f64;
    }
    Some(value)
}

/// Bollinger Bands. Returns `(upper, middle, lower)` for the latest window.
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> Option<(f64, f64, f64)> {
    let middle = sma(values, period)?;
    let window = &values[values.len() - period..];
    let variance =
        window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    Some((middle + num_std * std, middle, middle - num_std * std))
}

/// Percentage change over the trailing `days` closes.
pub fn perf(values: &[f64], days: usize) -> Option<f64> {
    if values.len() < days + 1 {
        return None;
    }
    let old = values[values.len() - 1 - days];
    if old == 0.0 {
        return None;
    }
    Some((values[values.len() - 1] - old) / old * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rising_prices(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn sma_of_constant_series() {
        let values = vec![5.0; 30];
        assert_eq!(sma(&values, 20), Some(5.0));
    }

    #[test]
    fn sma_insufficient_data() {
        assert_eq!(sma(&[1.0, 2.0], 20), None);
        assert_eq!(sma(&[1.0, 2.0], 0), None);
    }

    #[test]
    fn sma_uses_trailing_window() {
        let mut values = vec![0.0; 10];
        values.extend([10.0, 20.0, 30.0]);
        assert_eq!(sma(&values, 3), Some(20.0));
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let values = rising_prices(30);
        let value = rsi(&values, 14).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_all_losses_near_zero() {
        let values: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        let value = rsi(&values, 14).unwrap();
        assert!(value < 1e-9);
    }

    #[test]
    fn rsi_mixed_series_in_bounds() {
        let values = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ];
        let value = rsi(&values, 14).unwrap();
        assert!(value > 0.0 && value < 100.0);
    }

    #[test]
    fn atr_constant_range() {
        let n = 20;
        let high = vec![102.0; n];
        let low = vec![100.0; n];
        let close = vec![101.0; n];
        let value = atr(&high, &low, &close, 14).unwrap();
        assert!((value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn atr_rejects_mismatched_lengths() {
        assert_eq!(atr(&[1.0; 20], &[1.0; 19], &[1.0; 20], 14), None);
    }

    #[test]
    fn bollinger_constant_series_collapses() {
        let values = vec![50.0; 25];
        let (upper, middle, lower) = bollinger_bands(&values, 20, 2.0).unwrap();
        assert_eq!(middle, 50.0);
        assert_eq!(upper, 50.0);
        assert_eq!(lower, 50.0);
    }

    #[test]
    fn bollinger_bands_are_symmetric() {
        let values = rising_prices(30);
        let (upper, middle, lower) = bollinger_bands(&values, 20, 2.0).unwrap();
        assert!(upper > middle && middle > lower);
        assert!((upper - middle - (middle - lower)).abs() < 1e-9);
    }

    #[test]
    fn perf_week_on_rising_series() {
        let values = rising_prices(10);
        // 5 days ago: 104, latest: 109.
        let value = perf(&values, 5).unwrap();
        assert!((value - (109.0 - 104.0) / 104.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn perf_insufficient_data() {
        assert_eq!(perf(&[100.0, 101.0], 5), None);
    }
}
