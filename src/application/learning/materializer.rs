//! Materializer: reads active lessons and emits clamped multiplier
//! overrides the engine consumes on its next tick. Three independent
//! pathways, one per `lesson_type`.

use tracing::info;

use crate::domain::learning::lesson::DecayState;
use crate::domain::learning::{ActionCategory, Lesson, OverrideCategory, OverrideRow};

const SIZING_CLAMP: (f64, f64) = (0.3, 3.0);
const SIZING_EDGE_THRESHOLD: f64 = 0.05;

const TUNING_CLAMP: (f64, f64) = (0.5, 2.0);
const TUNING_ETA: f64 = 0.005;
const TUNING_SKIP_THRESHOLD: f64 = 0.01;

const LADDER_CLAMP: (f64, f64) = (0.7, 1.5);
const LADDER_ETA: f64 = 0.02;
const LADDER_MIN_RECOVERIES: i64 = 10;

fn clamp(value: f64, range: (f64, f64)) -> f64 {
    value.clamp(range.0, range.1)
}

fn decay_state_as_str(state: DecayState) -> &'static str {
    match state {
        DecayState::Insufficient => "insufficient",
        DecayState::Decaying => "decaying",
        DecayState::Stable => "stable",
        DecayState::Improving => "improving",
    }
}

fn action_category_to_override_category(category: ActionCategory) -> OverrideCategory {
    match category {
        ActionCategory::Entry => OverrideCategory::Entry,
        ActionCategory::Add => OverrideCategory::Add,
        ActionCategory::Trim => OverrideCategory::Trim,
        ActionCategory::Exit | ActionCategory::EmergencyExit => OverrideCategory::Exit,
    }
}

/// Coarse state-tier a tuning-rate pattern belongs to, read off its
/// `pattern_key` naming convention (`s1_*`, `s2_*`, `*retest*` for S3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternTier {
    S1,
    S2,
    S3Retest,
    Other,
}

fn pattern_tier(pattern_key: &str) -> PatternTier {
    let key = pattern_key.to_lowercase();
    if key.contains("retest") {
        PatternTier::S3Retest
    } else if key.starts_with("s1") || key.contains("_s1_") {
        PatternTier::S1
    } else if key.starts_with("s2") || key.contains("_s2_") {
        PatternTier::S2
    } else {
        PatternTier::Other
    }
}

/// `pm_strength` pathway: sizing multipliers, gated on `|edge_raw| >= 0.05`.
fn materialize_sizing_override(lesson: &Lesson, now: chrono::DateTime<chrono::Utc>) -> Option<OverrideRow> {
    if lesson.lesson_type != "pm_strength" {
        return None;
    }
    let edge_raw = lesson.stats.edge_raw;
    if edge_raw.abs() < SIZING_EDGE_THRESHOLD {
        return None;
    }
    let multiplier = clamp(1.0 + edge_raw, SIZING_CLAMP);
    Some(OverrideRow {
        pattern_key: lesson.pattern_key.clone(),
        action_category: action_category_to_override_category(lesson.action_category),
        scope_subset: lesson.scope_subset.clone(),
        multiplier,
        confidence_score: lesson.stats.reliability_score * lesson.stats.support_score,
        decay_state: Some(decay_state_as_str(lesson.stats.decay_meta.state).to_string()),
        last_updated_at: now,
    })
}

/// `tuning_rates` pathway: threshold-dial multipliers (`*_ts_min`, `*_halo`,
/// and `dx_min` for S3-retest patterns), gated on non-zero drift pressure.
fn materialize_tuning_rate_overrides(
    lesson: &Lesson,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<OverrideRow> {
    if lesson.lesson_type != "tuning_rates" {
        return Vec::new();
    }
    let n_misses = lesson.stats.n_misses.unwrap_or(0) as i64;
    let n_fps = lesson.stats.n_fps.unwrap_or(0) as i64;
    let pressure = n_misses - n_fps;
    if pressure == 0 {
        return Vec::new();
    }

    let mult_threshold = clamp((-TUNING_ETA * pressure as f64).exp(), TUNING_CLAMP);
    let mult_halo = clamp((TUNING_ETA * pressure as f64).exp(), TUNING_CLAMP);

    let decay_state = Some(decay_state_as_str(lesson.stats.decay_meta.state).to_string());
    let confidence_score = lesson.stats.reliability_score * lesson.stats.support_score;

    let mut rows = Vec::new();
    let mut push = |category: OverrideCategory, multiplier: f64| {
        if (multiplier - 1.0).abs() < TUNING_SKIP_THRESHOLD {
            return;
        }
        rows.push(OverrideRow {
            pattern_key: lesson.pattern_key.clone(),
            action_category: category,
            scope_subset: lesson.scope_subset.clone(),
            multiplier,
            confidence_score,
            decay_state: decay_state.clone(),
            last_updated_at: now,
        });
    };

    match pattern_tier(&lesson.pattern_key) {
        PatternTier::S1 => {
            push(OverrideCategory::TuningTsMin, mult_threshold);
            push(OverrideCategory::TuningHalo, mult_halo);
        }
        PatternTier::S2 => {
            push(OverrideCategory::TuningS2TsMin, mult_threshold);
            push(OverrideCategory::TuningS2Halo, mult_halo);
        }
        PatternTier::S3Retest => {
            push(OverrideCategory::TuningDxMin, mult_threshold);
        }
        PatternTier::Other => {}
    }

    rows
}

/// `tuning_dx_ladder` pathway: reuses the same `tuning_rates` lesson rows
/// restricted to `EmergencyExit` episodes — the recovery-after-break
/// pattern the DX ladder steps adjust for. Gated on `>= 10` successful
/// recoveries, approximated as acted episodes that did not turn into a
/// false positive (`n_acted - n_fps`).
fn materialize_dx_ladder_override(
    lesson: &Lesson,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<OverrideRow> {
    if lesson.lesson_type != "tuning_rates" || lesson.action_category != ActionCategory::EmergencyExit {
        return None;
    }
    let n_acted = lesson.stats.n_acted.unwrap_or(0) as i64;
    let n_fps = lesson.stats.n_fps.unwrap_or(0) as i64;
    let n_misses = lesson.stats.n_misses.unwrap_or(0) as i64;
    let recoveries = n_acted - n_fps;
    if recoveries < LADDER_MIN_RECOVERIES {
        return None;
    }
    let pressure = n_misses - n_fps;
    let multiplier = clamp((LADDER_ETA * pressure as f64 * 10.0).exp(), LADDER_CLAMP);

    Some(OverrideRow {
        pattern_key: lesson.pattern_key.clone(),
        action_category: OverrideCategory::TuningDxLadder,
        scope_subset: lesson.scope_subset.clone(),
        multiplier,
        confidence_score: lesson.stats.reliability_score * lesson.stats.support_score,
        decay_state: Some(decay_state_as_str(lesson.stats.decay_meta.state).to_string()),
        last_updated_at: now,
    })
}

/// Materializes every override derivable from `lessons`, run across all
/// three lesson types in one pass. Returns the rows to upsert; the caller
/// is responsible for persisting them and recording metrics.
pub fn materialize_overrides(lessons: &[Lesson], now: chrono::DateTime<chrono::Utc>) -> Vec<OverrideRow> {
    let mut rows = Vec::new();
    for lesson in lessons {
        if let Some(row) = materialize_sizing_override(lesson, now) {
            rows.push(row);
        }
        rows.extend(materialize_tuning_rate_overrides(lesson, now));
        if let Some(row) = materialize_dx_ladder_override(lesson, now) {
            rows.push(row);
        }
    }
    info!(overrides = rows.len(), "materialized overrides from lessons");
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::learning::lesson::{DecayMeta, LessonStats, LessonStatus};
    use crate::domain::learning::ScopeSubset;

    fn base_stats() -> LessonStats {
        LessonStats {
            avg_rr: 0.0,
            global_baseline_rr: 0.0,
            delta_rr: 0.0,
            variance: 0.0,
            n: 40,
            edge_raw: 0.0,
            ev_score: 0.0,
            reliability_score: 0.8,
            support_score: 0.9,
            magnitude_score: 0.0,
            time_score: 1.0,
            stability_score: 0.0,
            decay_meta: DecayMeta::default(),
            n_acted: None,
            n_skipped: None,
            n_misses: None,
            n_fps: None,
        }
    }

    fn base_lesson(lesson_type: &str, action_category: ActionCategory) -> Lesson {
        Lesson {
            module: "pm".to_string(),
            pattern_key: "s1_entry".to_string(),
            action_category,
            scope_subset: ScopeSubset::empty(),
            lesson_type: lesson_type.to_string(),
            n: 40,
            stats: base_stats(),
            decay_halflife_hours: None,
            status: LessonStatus::Active,
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn sizing_override_skipped_below_edge_threshold() {
        let mut lesson = base_lesson("pm_strength", ActionCategory::Entry);
        lesson.stats.edge_raw = 0.01;
        assert!(materialize_sizing_override(&lesson, chrono::Utc::now()).is_none());
    }

    #[test]
    fn sizing_override_clamped_to_range() {
        let mut lesson = base_lesson("pm_strength", ActionCategory::Entry);
        lesson.stats.edge_raw = 10.0;
        let row = materialize_sizing_override(&lesson, chrono::Utc::now()).unwrap();
        assert_eq!(row.multiplier, SIZING_CLAMP.1);
    }

    #[test]
    fn tuning_rate_overrides_emit_ts_min_and_halo_for_s1() {
        let mut lesson = base_lesson("tuning_rates", ActionCategory::Entry);
        lesson.pattern_key = "s1_entry".to_string();
        lesson.stats.n_misses = Some(30);
        lesson.stats.n_fps = Some(5);
        let rows = materialize_tuning_rate_overrides(&lesson, chrono::Utc::now());
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.action_category == OverrideCategory::TuningTsMin));
        assert!(rows.iter().any(|r| r.action_category == OverrideCategory::TuningHalo));
    }

    #[test]
    fn tuning_rate_overrides_skip_zero_pressure() {
        let mut lesson = base_lesson("tuning_rates", ActionCategory::Entry);
        lesson.stats.n_misses = Some(10);
        lesson.stats.n_fps = Some(10);
        assert!(materialize_tuning_rate_overrides(&lesson, chrono::Utc::now()).is_empty());
    }

    #[test]
    fn s3_retest_pattern_emits_dx_min_only() {
        let mut lesson = base_lesson("tuning_rates", ActionCategory::Entry);
        lesson.pattern_key = "s3_retest".to_string();
        lesson.stats.n_misses = Some(30);
        lesson.stats.n_fps = Some(5);
        let rows = materialize_tuning_rate_overrides(&lesson, chrono::Utc::now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action_category, OverrideCategory::TuningDxMin);
    }

    #[test]
    fn dx_ladder_requires_minimum_recoveries() {
        let mut lesson = base_lesson("tuning_rates", ActionCategory::EmergencyExit);
        lesson.stats.n_acted = Some(8);
        lesson.stats.n_fps = Some(0);
        lesson.stats.n_misses = Some(2);
        assert!(materialize_dx_ladder_override(&lesson, chrono::Utc::now()).is_none());

        lesson.stats.n_acted = Some(15);
        assert!(materialize_dx_ladder_override(&lesson, chrono::Utc::now()).is_some());
    }

    #[test]
    fn materialize_overrides_aggregates_all_pathways() {
        let mut sizing = base_lesson("pm_strength", ActionCategory::Entry);
        sizing.stats.edge_raw = 0.2;

        let mut tuning = base_lesson("tuning_rates", ActionCategory::Entry);
        tuning.pattern_key = "s2_defensive".to_string();
        tuning.stats.n_misses = Some(40);
        tuning.stats.n_fps = Some(2);

        let rows = materialize_overrides(&[sizing, tuning], chrono::Utc::now());
        assert_eq!(rows.len(), 3);
    }
}
