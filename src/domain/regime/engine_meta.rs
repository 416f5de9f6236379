use serde::{Deserialize, Serialize};

use super::engine_payload::EmergencyExit;

/// Hidden, per-position scratch state for the engine. Not part of the
/// external contract — persisted in `features.uptrend_engine_v4_meta` purely
/// so the engine stays stateless in-process: per-position scratch lives in
/// the features map, never in a long-lived in-memory map. Cleared in full
/// whenever the state machine returns to S0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineMeta {
    /// Anchor EMA60 latched on first S1 entry, held while in S1.
    pub s1_ema60_entry: Option<f64>,
    /// Anchor EMA333 used by S2 retest checks.
    pub s2_ema60_entry: Option<f64>,
    /// Consecutive-bar counter for the S2->S0 reset rule.
    pub s2_reset_persistence: u32,
    /// Latched emergency-exit break snapshot, held while `active`.
    pub emergency_exit: Option<EmergencyExit>,
    /// EDX is EMA(20)-smoothed across calls per asset key; this is the
    /// running smoothed value carried tick to tick.
    pub edx_smoothed: Option<f64>,
}

impl EngineMeta {
    /// Invariant: cleared when the state machine returns to S0.
    pub fn clear(&mut self) {
        *self = EngineMeta::default();
    }

    pub fn is_empty(&self) -> bool {
        self.s1_ema60_entry.is_none()
            && self.s2_ema60_entry.is_none()
            && self.s2_reset_persistence == 0
            && self.emergency_exit.is_none()
    }
}
