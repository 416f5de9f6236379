use crate::domain::regime::Ohlc;

fn true_range(bar: &Ohlc, prev_close: f64) -> f64 {
    let a = bar.high - bar.low;
    let b = (bar.high - prev_close).abs();
    let c = (bar.low - prev_close).abs();
    a.max(b).max(c)
}

/// Wilder-smoothed ATR series, seeded from the mean of the first `period`
/// true ranges. Needs at least `period + 1` bars (one for the seed
/// previous-close); shorter input yields an empty series.
pub fn atr_series_wilder(bars: &[Ohlc], period: usize) -> Vec<f64> {
    if bars.len() < period + 1 || period == 0 {
        return Vec::new();
    }
    let trs: Vec<f64> = (1..bars.len())
        .map(|i| true_range(&bars[i], bars[i - 1].close))
        .collect();
    if trs.len() < period {
        return Vec::new();
    }
    let seed: f64 = trs[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(trs.len() - period + 1);
    out.push(seed);
    let n = period as f64;
    for &tr in &trs[period..] {
        let prev = *out.last().unwrap();
        out.push(((n - 1.0) * prev + tr) / n);
    }
    out
}

/// Wilder-smoothed ADX series: directional movement -> smoothed DI+/DI- ->
/// DX -> Wilder-smoothed ADX. Mirrors [`atr_series_wilder`]'s seeding
/// convention (mean of the first `period` values).
pub fn adx_series_wilder(bars: &[Ohlc], period: usize) -> Vec<f64> {
    if bars.len() < 2 * period + 1 || period == 0 {
        return Vec::new();
    }
    let n = bars.len();
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    let mut tr = Vec::with_capacity(n - 1);
    for i in 1..n {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
        tr.push(true_range(&bars[i], bars[i - 1].close));
    }

    let wilder_smooth = |series: &[f64]| -> Vec<f64> {
        if series.len() < period {
            return Vec::new();
        }
        let seed: f64 = series[..period].iter().sum::<f64>() / period as f64;
        let mut out = Vec::with_capacity(series.len() - period + 1);
        out.push(seed);
        let n = period as f64;
        for &v in &series[period..] {
            let prev = *out.last().unwrap();
            out.push(((n - 1.0) * prev + v) / n);
        }
        out
    };

    let atr = wilder_smooth(&tr);
    let plus_dm_s = wilder_smooth(&plus_dm);
    let minus_dm_s = wilder_smooth(&minus_dm);

    let len = atr.len().min(plus_dm_s.len()).min(minus_dm_s.len());
    let mut dx = Vec::with_capacity(len);
    for i in 0..len {
        let atr_i = atr[i].max(1e-9);
        let di_plus = 100.0 * plus_dm_s[i] / atr_i;
        let di_minus = 100.0 * minus_dm_s[i] / atr_i;
        let denom = (di_plus + di_minus).max(1e-9);
        dx.push(100.0 * (di_plus - di_minus).abs() / denom);
    }

    wilder_smooth(&dx)
}

/// Wilder-smoothed RSI(period) evaluated at the end of `closes`.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() <= period {
        return 50.0;
    }
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = changes.iter().map(|c| c.max(0.0)).collect();
    let losses: Vec<f64> = changes.iter().map(|c| (-c).max(0.0)).collect();

    let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / period as f64;
    let n = period as f64;
    for i in period..changes.len() {
        avg_gain = ((n - 1.0) * avg_gain + gains[i]) / n;
        avg_loss = ((n - 1.0) * avg_loss + losses[i]) / n;
    }

    if avg_loss.abs() < 1e-12 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Builds the full RSI series, recomputing from the prefix at each step
/// (matches the reference's bar-by-bar evaluation so `rsi_slope_10` sees
/// the same trajectory a replay would).
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    (period..closes.len())
        .map(|k| rsi(&closes[..=k], period))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(h: f64, l: f64, c: f64) -> Ohlc {
        Ohlc::new(c, h, l, c, 1.0)
    }

    #[test]
    fn atr_seeds_from_mean_true_range() {
        let bars: Vec<Ohlc> = (0..20)
            .map(|i| bar(10.0 + i as f64 * 0.1, 9.0 + i as f64 * 0.1, 9.5 + i as f64 * 0.1))
            .collect();
        let atr = atr_series_wilder(&bars, 14);
        assert!(!atr.is_empty());
        assert!(atr.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn rsi_is_bounded_0_100() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.37).sin() * 5.0).collect();
        for k in 14..closes.len() {
            let v = rsi(&closes[..=k], 14);
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn rsi_all_gains_saturates_at_100() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), 100.0);
    }
}
