// dca_core/src/indicators.rs

//! Technical indicator library.
//!
//! Indicators consumed by the DCA entry logic. Every function evaluates the
//! indicator at the LAST element of the supplied window and returns `None`
//! when the window is too short for the requested lookback.
//!
//! Classic family: RSI, MACD, Bollinger Bands, EMA.
//! Advanced family: Hull MA, SuperTrend, MFI, Keltner Channels.

use crate::data_handler::MarketBar;

/// Computes the **Simple Moving Average (SMA)** over the last `n` values.
///
/// # Arguments
/// * `values` — Historical values, oldest first.
/// * `n` — The lookback period. Must be ≥ 1.
///
/// # Returns
/// * `Some(f64)` — The computed SMA value.
/// * `None` — If `n == 0` or fewer than `n` values are available.
pub fn sma(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n { return None; }

    let sum: f64 = values[values.len() - n..].iter().sum();
    Some(sum / n as f64)
}

/// Linearly weighted moving average; the newest value has weight `n`.
pub fn wma(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n { return None; }

    let window = &values[values.len() - n..];
    let weighted: f64 = window
        .iter()
        .enumerate()
        .map(|(i, v)| v * (i + 1) as f64)
        .sum();
    let weights = (n * (n + 1)) as f64 / 2.0;

    Some(weighted / weights)
}

/// Full EMA series seeded with the SMA of the first `n` values.
/// Element `j` of the result corresponds to `values[n - 1 + j]`.
pub fn ema_series(values: &[f64], n: usize) -> Vec<f64> {
    if n == 0 || values.len() < n { return Vec::new(); }

    let k = 2.0 / (n as f64 + 1.0);
    let seed = values[..n].iter().sum::<f64>() / n as f64;

    let mut out = Vec::with_capacity(values.len() - n + 1);
    out.push(seed);
    for v in &values[n..] {
        let prev = out[out.len() - 1];
        out.push(v * k + prev * (1.0 - k));
    }
    out
}

/// Exponential Moving Average at the last value.
pub fn ema(values: &[f64], n: usize) -> Option<f64> {
    ema_series(values, n).last().copied()
}

/// Relative Strength Index with Wilder smoothing. Needs `n + 1` values.
///
/// # Returns
/// * `Some(f64)` in `[0, 100]`; 50 for a perfectly flat window.
pub fn rsi(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n + 1 { return None; }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = changes[..n].iter().filter(|c| **c > 0.0).sum::<f64>() / n as f64;
    let mut avg_loss = changes[..n].iter().filter(|c| **c < 0.0).map(|c| -c).sum::<f64>() / n as f64;

    for change in &changes[n..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (n as f64 - 1.0) + gain) / n as f64;
        avg_loss = (avg_loss * (n as f64 - 1.0) + loss) / n as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line and its signal line at the last value.
///
/// # Arguments
/// * `fast` / `slow` — EMA periods, `fast < slow`.
/// * `signal` — EMA period applied to the MACD line.
///
/// # Returns
/// * `Some((macd, signal))`, or `None` with fewer than `slow + signal - 1` values.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Option<(f64, f64)> {
    if fast == 0 || fast >= slow { return None; }

    let fast_series = ema_series(values, fast);
    let slow_series = ema_series(values, slow);
    if slow_series.is_empty() { return None; }

    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_value)| fast_series[i + offset] - slow_value)
        .collect();

    let signal_line = ema(&macd_line, signal)?;
    let last = *macd_line.last()?;

    Some((last, signal_line))
}

/// Bollinger Bands `(lower, middle, upper)` using population standard deviation.
pub fn bollinger(values: &[f64], n: usize, std_dev: f64) -> Option<(f64, f64, f64)> {
    let middle = sma(values, n)?;
    let window = &values[values.len() - n..];
    let variance = window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / n as f64;
    let width = std_dev * variance.sqrt();

    Some((middle - width, middle, middle + width))
}

/// Hull Moving Average: WMA(2·WMA(n/2) − WMA(n), √n).
/// Needs `n + √n − 1` values.
pub fn hull_ma(values: &[f64], n: usize) -> Option<f64> {
    if n < 2 { return None; }

    let half = n / 2;
    let root = (n as f64).sqrt().round().max(1.0) as usize;
    if values.len() < n + root - 1 { return None; }

    let mut raw = Vec::with_capacity(root);
    for end in (values.len() - root + 1)..=values.len() {
        let window = &values[..end];
        raw.push(2.0 * wma(window, half)? - wma(window, n)?);
    }

    wma(&raw, root)
}

/// Average True Range series with Wilder smoothing.
/// Element `j` of the result corresponds to `bars[n + j]`.
pub fn atr_series(bars: &[MarketBar], n: usize) -> Vec<f64> {
    if n == 0 || bars.len() < n + 1 { return Vec::new(); }

    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let bar = &w[1];
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect();

    let mut out = Vec::with_capacity(true_ranges.len() - n + 1);
    out.push(true_ranges[..n].iter().sum::<f64>() / n as f64);
    for tr in &true_ranges[n..] {
        let prev = out[out.len() - 1];
        out.push((prev * (n as f64 - 1.0) + tr) / n as f64);
    }
    out
}

/// Average True Range at the last bar.
pub fn atr(bars: &[MarketBar], n: usize) -> Option<f64> {
    atr_series(bars, n).last().copied()
}

/// SuperTrend direction at the last bar: `Some(true)` while the trend is up.
pub fn supertrend(bars: &[MarketBar], n: usize, multiplier: f64) -> Option<bool> {
    let atrs = atr_series(bars, n);
    if atrs.is_empty() { return None; }

    let mut final_upper = 0.0;
    let mut final_lower = 0.0;
    let mut bullish = true;

    for (j, atr_value) in atrs.iter().enumerate() {
        let i = n + j;
        let bar = &bars[i];
        let hl2 = (bar.high + bar.low) / 2.0;
        let basic_upper = hl2 + multiplier * atr_value;
        let basic_lower = hl2 - multiplier * atr_value;

        if j == 0 {
            final_upper = basic_upper;
            final_lower = basic_lower;
            bullish = bar.close >= hl2;
            continue;
        }

        let prev_close = bars[i - 1].close;
        if basic_upper < final_upper || prev_close > final_upper {
            final_upper = basic_upper;
        }
        if basic_lower > final_lower || prev_close < final_lower {
            final_lower = basic_lower;
        }

        if bullish && bar.close < final_lower {
            bullish = false;
        } else if !bullish && bar.close > final_upper {
            bullish = true;
        }
    }

    Some(bullish)
}

/// Money Flow Index over the last `n` bars. Needs `n + 1` bars.
pub fn mfi(bars: &[MarketBar], n: usize) -> Option<f64> {
    if n == 0 || bars.len() < n + 1 { return None; }

    let window = &bars[bars.len() - n - 1..];
    let (positive, negative) = window.windows(2).fold((0.0, 0.0), |(pos, neg), w| {
        let prev = w[0].typical_price();
        let curr = w[1].typical_price();
        let flow = curr * w[1].volume;
        if curr > prev {
            (pos + flow, neg)
        } else if curr < prev {
            (pos, neg + flow)
        } else {
            (pos, neg)
        }
    });

    if negative == 0.0 {
        return Some(if positive == 0.0 { 50.0 } else { 100.0 });
    }

    Some(100.0 - 100.0 / (1.0 + positive / negative))
}

/// Keltner Channels `(lower, middle, upper)`: EMA(close) ± multiplier · ATR.
pub fn keltner(bars: &[MarketBar], n: usize, multiplier: f64) -> Option<(f64, f64, f64)> {
    let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
    let middle = ema(&closes, n)?;
    let range = atr(bars, n)?;

    Some((middle - multiplier * range, middle, middle + multiplier * range))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(closes: &[f64]) -> Vec<MarketBar> {
        let start = chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| MarketBar {
                datetime: start + chrono::Duration::hours(i as i64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 100.0,
            })
            .collect()
    }

    #[test]
    fn moving_averages_need_enough_data() {
        assert_eq!(sma(&[1.0, 2.0, 3.0], 3), Some(2.0));
        assert_eq!(sma(&[1.0, 2.0], 3), None);
        assert_eq!(sma(&[1.0], 0), None);
        assert!((wma(&[1.0, 2.0, 3.0], 3).unwrap() - 14.0 / 6.0).abs() < 1e-12);
        assert!((ema(&[5.0; 10], 4).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn rsi_extremes() {
        let rising: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));
        assert_eq!(rsi(&falling, 14), Some(0.0));
        assert_eq!(rsi(&[1.0; 20], 14), Some(50.0));
        assert_eq!(rsi(&rising[..14], 14), None);
    }

    #[test]
    fn macd_of_flat_series_is_zero() {
        let (line, signal) = macd(&[10.0; 60], 12, 26, 9).unwrap();
        assert!(line.abs() < 1e-12);
        assert!(signal.abs() < 1e-12);
        assert!(macd(&[10.0; 30], 12, 26, 9).is_none());
        assert!(macd(&[10.0; 60], 26, 12, 9).is_none());
    }

    #[test]
    fn macd_is_positive_in_uptrend() {
        let rising: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let (line, _) = macd(&rising, 12, 26, 9).unwrap();
        assert!(line > 0.0);
    }

    #[test]
    fn bollinger_collapses_on_flat_series() {
        let (lower, middle, upper) = bollinger(&[3.0; 20], 20, 2.0).unwrap();
        assert_eq!((lower, middle, upper), (3.0, 3.0, 3.0));
    }

    #[test]
    fn hull_tracks_linear_trend() {
        let rising: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let now = hull_ma(&rising, 16).unwrap();
        let before = hull_ma(&rising[..39], 16).unwrap();
        assert!(now > before);
        assert!(hull_ma(&rising[..10], 16).is_none());
    }

    #[test]
    fn bar_indicators_follow_direction() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + 2.0 * i as f64).collect();
        let falling: Vec<f64> = rising.iter().rev().copied().collect();

        assert_eq!(supertrend(&bars_from_closes(&rising), 10, 3.0), Some(true));
        assert_eq!(supertrend(&bars_from_closes(&falling), 10, 3.0), Some(false));
        assert_eq!(mfi(&bars_from_closes(&rising), 14), Some(100.0));
        assert_eq!(mfi(&bars_from_closes(&falling), 14), Some(0.0));
    }

    #[test]
    fn keltner_band_width_uses_atr() {
        let bars = bars_from_closes(&[50.0; 30]);
        let (lower, middle, upper) = keltner(&bars, 20, 2.0).unwrap();
        assert!((middle - 50.0).abs() < 1e-9);
        assert!((upper - middle - 4.0).abs() < 1e-9);
        assert!((middle - lower - 4.0).abs() < 1e-9);
    }
}
