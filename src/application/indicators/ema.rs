/// Builds a full EMA series from a close-price series, seeded from the
/// first close rather than an initial SMA window. Thresholds elsewhere in
/// the engine are calibrated against this exact seeding, so substituting
/// an SMA-seeded EMA (as most off-the-shelf indicator crates do) would
/// silently shift every downstream score.
pub fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    if closes.is_empty() || period == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(closes.len());
    out.push(closes[0]);
    for &close in &closes[1..] {
        let prev = *out.last().unwrap();
        out.push(alpha * close + (1.0 - alpha) * prev);
    }
    out
}

/// Last value of an EMA series, falling back to the last close (or 0.0 if
/// there is no data at all) when the series is empty.
pub fn ema_last(closes: &[f64], period: usize) -> f64 {
    let series = ema_series(closes, period);
    series
        .last()
        .copied()
        .or_else(|| closes.last().copied())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_from_first_close_not_sma() {
        let closes = vec![10.0, 10.0, 10.0];
        let series = ema_series(&closes, 5);
        assert_eq!(series[0], 10.0);
    }

    #[test]
    fn recompute_from_scratch_matches_streaming_reference() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + i as f64 * 0.3).collect();
        let full = ema_series(&closes, 20);
        let partial = ema_series(&closes[..30], 20);
        for i in 0..30 {
            assert!((full[i] - partial[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn empty_input_yields_empty_series() {
        assert!(ema_series(&[], 20).is_empty());
    }
}
