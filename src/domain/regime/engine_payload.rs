use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timeframe::Timeframe;

/// Uptrend Engine v4 lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    /// Bearish order / watch-only.
    S0,
    /// Primer.
    S1,
    /// Defensive.
    S2,
    /// Trending.
    S3,
    /// Neutral bootstrap (fresh regime driver, pre-EMA-stabilization).
    S4,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::S0 => "S0",
            EngineState::S1 => "S1",
            EngineState::S2 => "S2",
            EngineState::S3 => "S3",
            EngineState::S4 => "S4",
        }
    }
}

/// Latched emergency-exit state inside S3.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmergencyExit {
    pub active: bool,
    pub break_time: Option<DateTime<Utc>>,
    pub break_low: Option<f64>,
    pub ema333_at_break: Option<f64>,
    pub halo: Option<f64>,
    pub bounce_zone_low: Option<f64>,
    pub bounce_zone_high: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineFlags {
    pub watch_only: bool,
    pub s1_valid: bool,
    pub buy_signal: bool,
    pub defensive: bool,
    pub trending: bool,
    pub dx_flag: bool,
    pub trim_flag: bool,
    pub entry_zone: bool,
    pub entry_zone_333: bool,
    pub emergency_exit: EmergencyExit,
    pub fakeout_recovery: bool,
    pub reset_pending: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineScores {
    /// Trend integrity, structure-led, [0,1].
    pub ti: f64,
    /// Trend strength, momentum-led, [0,1].
    pub ts: f64,
    /// TS with the optional S/R-proximity boost (+0.15 max) applied once.
    pub ts_with_boost: Option<f64>,
    /// Overextension, [0,1] (S3).
    pub ox: f64,
    /// Dip-quality / deceleration-entry, [0,1] (S3).
    pub dx: f64,
    /// Deceleration score, [0,1] (S3).
    pub edx: f64,
}

/// A snapshot of the EMA ladder plus the defensive-entry anchor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineLevels {
    pub ema20: f64,
    pub ema30: f64,
    pub ema60: f64,
    pub ema144: f64,
    pub ema250: f64,
    pub ema333: f64,
    pub base_sr_level: Option<f64>,
}

/// A single stored support/resistance level, read from `features.geometry`
/// if present and consumed by the S3 `sr_context` calculation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SrLevel {
    pub price: f64,
    pub strength: f64,
    pub flipped: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SrContext {
    pub halo: f64,
    pub base_sr_level: f64,
    pub flipped_sr_levels: Vec<f64>,
}

/// Subcomponent scores retained for UI/replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub transition_reason: Option<String>,
    pub support_persistence: Option<f64>,
    pub ema_alignment: Option<f64>,
    pub volatility_coherence: Option<f64>,
    pub notes: Vec<String>,
}

/// The full payload the engine writes to `features.uptrend_engine_v4` each
/// tick, replacing the previous value atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginePayload {
    pub state: EngineState,
    pub timeframe: Timeframe,
    pub updated_at: DateTime<Utc>,
    pub flags: EngineFlags,
    pub scores: EngineScores,
    pub levels: EngineLevels,
    pub diagnostics: Diagnostics,
    /// S3-only context; `None` outside S3.
    pub sr_context: Option<SrContext>,
}

impl EnginePayload {
    pub fn new(state: EngineState, timeframe: Timeframe, now: DateTime<Utc>) -> Self {
        Self {
            state,
            timeframe,
            updated_at: now,
            flags: EngineFlags::default(),
            scores: EngineScores::default(),
            levels: EngineLevels::default(),
            diagnostics: Diagnostics::default(),
            sr_context: None,
        }
    }
}
