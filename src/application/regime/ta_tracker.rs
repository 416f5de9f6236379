//! Computes the full technical-indicator feature block for a driver or
//! tradable position from its bar history.

use chrono::Utc;
use tracing::warn;

use crate::application::indicators::{
    adx_series_wilder, atr_series_wilder, ema_series, ema_slope_delta, ema_slope_normalized,
    lin_slope, rsi_series, volume_z_last, VOLUME_Z_SPAN,
};
use crate::domain::errors::TaError;
use crate::domain::regime::{
    AtrBlock, BarSource, EmaLadder, EmaSlopes, Momentum, Ohlc, Separations, TaFeatureBlock,
    TaMeta, Timeframe, VolumeBlock,
};

const ATR_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const RSI_PERIOD: usize = 14;
const SLOPE_WINDOW: usize = 10;
const SLOPE_SHORT_WINDOW: usize = 5;

/// Computes `features.ta` for one position/timeframe pair. Bars must be
/// ascending by timestamp. Returns [`TaError::InsufficientBars`] below the
/// timeframe's minimum, matching the tracker's "write nothing, log the
/// deficit" contract — callers decide whether that's fatal.
pub fn compute_ta_feature_block(
    key: &str,
    timeframe: Timeframe,
    bars: &[Ohlc],
    source: BarSource,
) -> Result<TaFeatureBlock, TaError> {
    let min_bars = timeframe.min_bars();
    if bars.len() < min_bars {
        warn!(
            key,
            have = bars.len(),
            need = min_bars,
            "insufficient bars for TA computation"
        );
        return Err(TaError::InsufficientBars {
            key: key.to_string(),
            have: bars.len(),
            need: min_bars,
        });
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let latest_price = *closes.last().unwrap();

    let ema20 = ema_series(&closes, 20);
    let ema30 = ema_series(&closes, 30);
    let ema50 = ema_series(&closes, 50);
    let ema60 = ema_series(&closes, 60);
    let ema144 = ema_series(&closes, 144);
    let ema250 = ema_series(&closes, 250);
    let ema333 = ema_series(&closes, 333);

    let last = |series: &[f64]| series.last().copied().unwrap_or(latest_price);
    let ema = EmaLadder {
        ema20: last(&ema20),
        ema30: last(&ema30),
        ema50: last(&ema50),
        ema60: last(&ema60),
        ema144: last(&ema144),
        ema250: last(&ema250),
        ema333: last(&ema333),
    };

    if !ema.ema20.is_finite() || !ema.ema333.is_finite() {
        return Err(TaError::NonFinite {
            key: key.to_string(),
            what: "ema".to_string(),
        });
    }

    let ema_slopes = EmaSlopes {
        ema20_slope: ema_slope_normalized(&ema20, SLOPE_WINDOW),
        ema30_slope: ema_slope_normalized(&ema30, SLOPE_WINDOW),
        ema60_slope: ema_slope_normalized(&ema60, SLOPE_WINDOW),
        ema144_slope: ema_slope_normalized(&ema144, SLOPE_WINDOW),
        ema250_slope: ema_slope_normalized(&ema250, SLOPE_WINDOW),
        ema333_slope: ema_slope_normalized(&ema333, SLOPE_WINDOW),
        d_ema20_slope: ema_slope_delta(&ema20, SLOPE_SHORT_WINDOW, SLOPE_WINDOW),
        d_ema30_slope: ema_slope_delta(&ema30, SLOPE_SHORT_WINDOW, SLOPE_WINDOW),
        d_ema60_slope: ema_slope_delta(&ema60, SLOPE_SHORT_WINDOW, SLOPE_WINDOW),
        d_ema144_slope: ema_slope_delta(&ema144, SLOPE_SHORT_WINDOW, SLOPE_WINDOW),
        d_ema250_slope: ema_slope_delta(&ema250, SLOPE_SHORT_WINDOW, SLOPE_WINDOW),
        d_ema333_slope: ema_slope_delta(&ema333, SLOPE_SHORT_WINDOW, SLOPE_WINDOW),
    };

    let sep_fast = (ema.ema20 - ema.ema60) / ema.ema60.abs().max(1e-9);
    let sep_mid = (ema.ema60 - ema.ema144) / ema.ema144.abs().max(1e-9);
    let separations = if ema20.len() >= 6 && ema60.len() >= 6 && ema144.len() >= 6 {
        let prev_fast = (ema20[ema20.len() - 6] - ema60[ema60.len() - 6])
            / ema60[ema60.len() - 6].abs().max(1e-9);
        let prev_mid = (ema60[ema60.len() - 6] - ema144[ema144.len() - 6])
            / ema144[ema144.len() - 6].abs().max(1e-9);
        Separations {
            sep_fast,
            sep_mid,
            dsep_fast_5: sep_fast - prev_fast,
            dsep_mid_5: sep_mid - prev_mid,
        }
    } else {
        Separations {
            sep_fast,
            sep_mid,
            dsep_fast_5: 0.0,
            dsep_mid_5: 0.0,
        }
    };

    let atr_series = atr_series_wilder(bars, ATR_PERIOD);
    let atr_val = atr_series.last().copied().unwrap_or(0.0);
    let atr_mean_20 = if atr_series.len() >= 20 {
        atr_series[atr_series.len() - 20..].iter().sum::<f64>() / 20.0
    } else {
        atr_val
    };
    let atr_peak_10 = if atr_series.len() >= 10 {
        atr_series[atr_series.len() - 10..]
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max)
    } else {
        atr_val
    };
    let atr = AtrBlock {
        atr: atr_val,
        atr_mean_20,
        atr_peak_10,
        atr_norm: atr_val / ema.ema50.abs().max(1e-9),
    };

    let rsi_series_vals = rsi_series(&closes, RSI_PERIOD);
    let rsi_val = rsi_series_vals.last().copied().unwrap_or(50.0);
    let rsi_slope_10 = lin_slope(&rsi_series_vals, SLOPE_WINDOW);

    let adx_series = adx_series_wilder(bars, ADX_PERIOD);
    let adx_val = adx_series.last().copied().unwrap_or(0.0);
    let adx_slope_10 = lin_slope(&adx_series, SLOPE_WINDOW);

    let momentum = Momentum {
        rsi: rsi_val,
        rsi_slope_10,
        adx: adx_val,
        adx_slope_10,
    };

    let (vo_z, cluster) = volume_z_last(&volumes, VOLUME_Z_SPAN);
    let volume = VolumeBlock { vo_z, cluster };

    Ok(TaFeatureBlock {
        ema,
        ema_slopes,
        separations,
        atr,
        momentum,
        volume,
        meta: TaMeta {
            source: source.as_str().to_string(),
            updated_at: Utc::now(),
            bar_count: bars.len(),
        },
        latest_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_uptrend_bars(n: usize) -> Vec<Ohlc> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.25;
                Ohlc::new(base, base + 1.0, base - 1.0, base + 0.4, 1_000.0 + i as f64)
            })
            .collect()
    }

    #[test]
    fn insufficient_bars_is_rejected() {
        let bars = synthetic_uptrend_bars(10);
        let result = compute_ta_feature_block("btc:1m", Timeframe::M1, &bars, BarSource::Composite);
        assert!(matches!(result, Err(TaError::InsufficientBars { .. })));
    }

    #[test]
    fn uptrending_series_yields_positive_ema_slopes() {
        let bars = synthetic_uptrend_bars(400);
        let block =
            compute_ta_feature_block("btc:1m", Timeframe::M1, &bars, BarSource::Composite)
                .unwrap();
        assert!(block.ema_slopes.ema20_slope > 0.0);
        assert!(block.ema.ema20 > block.ema.ema333);
        assert_eq!(block.meta.bar_count, 400);
    }

    #[test]
    fn atr_and_rsi_are_finite_and_in_range() {
        let bars = synthetic_uptrend_bars(400);
        let block =
            compute_ta_feature_block("btc:1m", Timeframe::M1, &bars, BarSource::Composite)
                .unwrap();
        assert!(block.atr.atr >= 0.0);
        assert!((0.0..=100.0).contains(&block.momentum.rsi));
    }
}
