//! Uptrend Engine v4 calibrated defaults. Tuning overrides from the learning
//! loop scale these multiplicatively within the clamp ranges given in their
//! doc comments; they never replace them outright.

#[derive(Debug, Clone, Copy)]
pub struct EngineConstants {
    pub adx_floor: f64,
    pub ti_entry: f64,
    pub ts_entry: f64,
    pub dx_buy: f64,
    pub ox_sell: f64,
    pub s2_reset_persistence_bars: u32,
    /// Entry halo multiplier on ATR(1h), used for S1 buy and S2 retest zones.
    pub entry_halo_atr_mult: f64,
    pub ema_slope_window: usize,
    pub ema_slope_accel_short: usize,
    pub volume_z_span: usize,
    pub epsilon: f64,
}

impl Default for EngineConstants {
    fn default() -> Self {
        Self {
            adx_floor: 18.0,
            ti_entry: 0.45,
            ts_entry: 0.58,
            dx_buy: 0.65,
            ox_sell: 0.65,
            s2_reset_persistence_bars: 3,
            entry_halo_atr_mult: 1.0,
            ema_slope_window: 10,
            ema_slope_accel_short: 5,
            volume_z_span: 64,
            epsilon: 1e-9,
        }
    }
}

pub const VAR_PRIOR: f64 = 0.25;
pub const N_MIN: usize = 33;
pub const SIZING_MULTIPLIER_CLAMP: (f64, f64) = (0.3, 3.0);
pub const TUNING_MULTIPLIER_CLAMP: (f64, f64) = (0.5, 2.0);
pub const SIZING_EDGE_THRESHOLD: f64 = 0.05;
pub const TUNING_ETA: f64 = 0.005;
pub const TUNING_LADDER_ETA: f64 = 0.02;
pub const TUNING_LADDER_CLAMP: (f64, f64) = (0.7, 1.5);
pub const TUNING_LADDER_MIN_RECOVERIES: u32 = 10;
