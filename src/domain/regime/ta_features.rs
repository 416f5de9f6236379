use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The full EMA ladder a position carries. `ema50` is not part of the
/// headline 20/30/60/144/250/333 ladder but is computed alongside it purely
/// to normalize ATR (`atr_norm = atr/ema50`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmaLadder {
    pub ema20: f64,
    pub ema30: f64,
    pub ema50: f64,
    pub ema60: f64,
    pub ema144: f64,
    pub ema250: f64,
    pub ema333: f64,
}

/// Normalized %-per-bar slope for each rung of the ladder, over a 10-bar
/// linear regression window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmaSlopes {
    pub ema20_slope: f64,
    pub ema30_slope: f64,
    pub ema60_slope: f64,
    pub ema144_slope: f64,
    pub ema250_slope: f64,
    pub ema333_slope: f64,
    /// `d_emaN_slope = slope_over_5(emaN) - slope_over_10(emaN)`.
    pub d_ema20_slope: f64,
    pub d_ema30_slope: f64,
    pub d_ema60_slope: f64,
    pub d_ema144_slope: f64,
    pub d_ema250_slope: f64,
    pub d_ema333_slope: f64,
}

/// `sep_fast = (ema20-ema60)/ema60`, `sep_mid = (ema60-ema144)/ema144`, and
/// their 5-bar deltas.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Separations {
    pub sep_fast: f64,
    pub sep_mid: f64,
    pub dsep_fast_5: f64,
    pub dsep_mid_5: f64,
}

/// Wilder ATR(14) block.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AtrBlock {
    pub atr: f64,
    pub atr_mean_20: f64,
    pub atr_peak_10: f64,
    pub atr_norm: f64,
}

/// RSI(14)/ADX(14) and their 10-bar slopes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Momentum {
    pub rsi: f64,
    pub rsi_slope_10: f64,
    pub adx: f64,
    pub adx_slope_10: f64,
}

/// EWMA-based log-volume z-score, span 64 bars, clamped to [-4, +6].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VolumeBlock {
    pub vo_z: f64,
    pub cluster: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaMeta {
    pub source: String,
    pub updated_at: DateTime<Utc>,
    pub bar_count: usize,
}

/// The complete per-position, per-timeframe indicator block written whole
/// to `features.ta`. Never partially written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaFeatureBlock {
    pub ema: EmaLadder,
    pub ema_slopes: EmaSlopes,
    pub separations: Separations,
    pub atr: AtrBlock,
    pub momentum: Momentum,
    pub volume: VolumeBlock,
    pub meta: TaMeta,
    pub latest_price: f64,
}
