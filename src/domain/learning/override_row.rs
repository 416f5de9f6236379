use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scope::ScopeSubset;

/// Which family of override a row belongs to; determines the clamp range
/// and the downstream consumer (sizing vs threshold tuning vs the DX ladder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideCategory {
    /// Sizing multiplier, clamped to [0.3, 3.0].
    Entry,
    Add,
    Trim,
    Exit,
    /// Threshold multipliers (`tuning_ts_min`, `tuning_halo`, `tuning_s2_ts_min`,
    /// `tuning_s2_halo`, `tuning_dx_min`), clamped to [0.5, 2.0].
    TuningTsMin,
    TuningHalo,
    TuningS2TsMin,
    TuningS2Halo,
    TuningDxMin,
    /// DX ladder step multiplier, clamped to [0.7, 1.5].
    TuningDxLadder,
}

/// A single materialized override row: the actionable multiplier the
/// engine or sizing logic applies for a given (pattern_key,
/// action_category, scope_subset) triple. Replaces ad hoc config blobs —
/// every number the learning loop produces lands here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRow {
    pub pattern_key: String,
    pub action_category: OverrideCategory,
    pub scope_subset: ScopeSubset,
    pub multiplier: f64,
    /// `support_score * reliability_score`; telemetry only, never used to
    /// gate whether the override applies.
    pub confidence_score: f64,
    pub decay_state: Option<String>,
    pub last_updated_at: DateTime<Utc>,
}

impl OverrideRow {
    pub fn conflict_key(&self) -> String {
        format!(
            "{}|{:?}|{}",
            self.pattern_key,
            self.action_category,
            self.scope_subset.canonical_key()
        )
    }
}
