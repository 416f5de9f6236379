use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scope::ScopeSubset;
use super::trade_event::ActionCategory;

/// Drift classification from fitting a simple linear trend to RR-over-time
/// within a lesson's event slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayState {
    /// Fewer than 5 events; no trend can be fit yet.
    Insufficient,
    Decaying,
    Stable,
    Improving,
}

/// Decay-curve fit over a lesson's event slice, ordered by timestamp.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayMeta {
    pub state: DecayState,
    pub slope: f64,
    /// Multiplier folded into `edge_raw`; decaying slices shrink toward
    /// 0.5, improving slices grow toward 1.5.
    pub multiplier: f64,
    pub half_life_hours: Option<f64>,
}

impl Default for DecayMeta {
    fn default() -> Self {
        Self {
            state: DecayState::Insufficient,
            slope: 0.0,
            multiplier: 1.0,
            half_life_hours: None,
        }
    }
}

/// The six-dimensional edge-scoring stats computed for a mined slice.
///
/// `n_misses`/`n_fps` are only populated for `tuning_rates` lessons, mined
/// from signal-evaluation episodes rather than realized-RR trade closures;
/// `pm_strength` lessons leave them `None`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LessonStats {
    pub avg_rr: f64,
    pub global_baseline_rr: f64,
    pub delta_rr: f64,
    pub variance: f64,
    pub n: usize,
    pub edge_raw: f64,
    pub ev_score: f64,
    pub reliability_score: f64,
    pub support_score: f64,
    pub magnitude_score: f64,
    pub time_score: f64,
    pub stability_score: f64,
    pub decay_meta: DecayMeta,
    pub n_acted: Option<usize>,
    pub n_skipped: Option<usize>,
    pub n_misses: Option<usize>,
    pub n_fps: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Active,
    Retired,
}

/// One mined lesson: a (pattern_key, action_category, scope_subset) triple
/// with its edge statistics. The miner upserts on this triple as a
/// conflict key, so re-mining the same slice replaces rather than
/// duplicates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub module: String,
    pub pattern_key: String,
    pub action_category: ActionCategory,
    pub scope_subset: ScopeSubset,
    pub lesson_type: String,
    pub n: usize,
    pub stats: LessonStats,
    pub decay_halflife_hours: Option<f64>,
    pub status: LessonStatus,
    pub updated_at: DateTime<Utc>,
}
