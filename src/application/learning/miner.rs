//! Lesson miner: recursively mines scope subsets from the trade-event log
//! (Apriori-style — only branch into a scope value once its slice meets
//! the minimum sample size) and computes edge statistics per slice.

use std::collections::BTreeMap;

use tracing::info;

use crate::application::indicators::linreg_slope;
use crate::domain::learning::{
    DecayMeta, DecayState, Lesson, LessonStats, LessonStatus, ScopeSubset, TradeEvent, SCOPE_DIMS,
};

/// Minimum distinct trades a scope slice must carry before it's mined.
pub const N_MIN: usize = 33;
/// Variance shrinkage prior: `variance <- max(variance, VAR_PRIOR / n)`.
pub const VAR_PRIOR: f64 = 0.25;
/// Bounded lookback the miner reads from storage before grouping.
pub const EVENT_LOOKBACK: usize = 5000;

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_variance(xs: &[f64], avg: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let ss: f64 = xs.iter().map(|x| (x - avg).powi(2)).sum();
    ss / (xs.len() - 1) as f64
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Fits a linear trend of `rr` against hours-from-first-event. Fewer than
/// 5 events yields [`DecayState::Insufficient`] with a neutral multiplier.
fn fit_decay_curve(events: &[&TradeEvent]) -> DecayMeta {
    if events.len() < 5 {
        return DecayMeta::default();
    }
    let mut sorted: Vec<&TradeEvent> = events.to_vec();
    sorted.sort_by_key(|e| e.timestamp);
    let t0 = sorted[0].timestamp;
    let hours: Vec<f64> = sorted
        .iter()
        .map(|e| (e.timestamp - t0).num_seconds() as f64 / 3600.0)
        .collect();
    let rrs: Vec<f64> = sorted.iter().map(|e| e.rr).collect();
    let slope = linreg_slope(&hours, &rrs);

    let state = if slope < -0.001 {
        DecayState::Decaying
    } else if slope > 0.001 {
        DecayState::Improving
    } else {
        DecayState::Stable
    };

    let multiplier = match state {
        DecayState::Decaying => {
            let severity = (slope.abs() * 100.0).min(0.5);
            (1.0 - severity).max(0.5)
        }
        DecayState::Improving => {
            let severity = (slope.abs() * 100.0).min(0.5);
            (1.0 + severity).min(1.5)
        }
        DecayState::Stable | DecayState::Insufficient => 1.0,
    };

    DecayMeta {
        state,
        slope,
        multiplier,
        half_life_hours: None,
    }
}

/// Computes the six-dimensional edge statistics for one mined slice.
pub fn compute_lesson_stats(events: &[&TradeEvent], global_baseline_rr: f64) -> LessonStats {
    let rrs: Vec<f64> = events.iter().map(|e| e.rr).collect();
    let n = rrs.len();
    let avg_rr = mean(&rrs);
    let raw_variance = sample_variance(&rrs, avg_rr);
    let variance = raw_variance.max(VAR_PRIOR / n as f64);

    let decay_meta = fit_decay_curve(events);

    let delta_rr = avg_rr - global_baseline_rr;
    let ev_score = sigmoid(delta_rr / 0.5);
    let reliability_score = 1.0 / (1.0 + variance);
    let support_score = 1.0 - (-(n as f64) / 50.0).exp();
    let magnitude_score = sigmoid(avg_rr / 1.0);
    let time_score = 1.0;
    let stability_score = 1.0 / (1.0 + variance);

    let integral = support_score + magnitude_score + time_score + stability_score;
    let edge_raw = delta_rr * reliability_score * integral * decay_meta.multiplier;

    LessonStats {
        avg_rr,
        global_baseline_rr,
        delta_rr,
        variance,
        n,
        edge_raw,
        ev_score,
        reliability_score,
        support_score,
        magnitude_score,
        time_score,
        stability_score,
        decay_meta,
        n_acted: None,
        n_skipped: None,
        n_misses: None,
        n_fps: None,
    }
}

/// Counts of acted/skipped episodes and their outcomes within a slice,
/// used by the materializer's `tuning_rates` pathway. Only meaningful for
/// events carrying `decision`/`outcome` (signal-evaluation episodes).
#[derive(Debug, Clone, Copy, Default)]
pub struct TuningRateCounts {
    pub n_acted: usize,
    pub n_skipped: usize,
    pub n_misses: usize,
    pub n_fps: usize,
}

impl TuningRateCounts {
    /// `n_misses - n_fps`, the pressure term the materializer's tuning-rate
    /// override formulas consume.
    pub fn pressure(&self) -> i64 {
        self.n_misses as i64 - self.n_fps as i64
    }
}

fn tuning_rate_counts(slice: &[&TradeEvent]) -> TuningRateCounts {
    use crate::domain::learning::{Decision, EpisodeOutcome};

    let mut counts = TuningRateCounts::default();
    for event in slice {
        match (event.decision, event.outcome) {
            (Some(Decision::Acted), Some(outcome)) => {
                counts.n_acted += 1;
                if outcome == EpisodeOutcome::Failure {
                    counts.n_fps += 1;
                }
            }
            (Some(Decision::Skipped), Some(outcome)) => {
                counts.n_skipped += 1;
                if outcome == EpisodeOutcome::Success {
                    counts.n_misses += 1;
                }
            }
            _ => {}
        }
    }
    counts
}

/// Mines `tuning_rates` lessons from signal-evaluation episodes: events
/// carrying `decision`/`outcome` rather than realized `rr`. Shares the same
/// `(pattern_key, action_category)` grouping and N_MIN gate as
/// [`mine_lessons`], but without scope-lattice recursion — tuning rates are
/// materialized at the pattern level only.
pub fn mine_tuning_rate_lessons(module: &str, events: &[TradeEvent]) -> Vec<Lesson> {
    let mut groups: BTreeMap<(String, crate::domain::learning::ActionCategory), Vec<&TradeEvent>> =
        BTreeMap::new();
    for event in events {
        if event.decision.is_some() {
            groups.entry(event.group_key()).or_default().push(event);
        }
    }

    let mut lessons = Vec::new();
    for ((pattern_key, action_category), slice) in groups {
        if slice.len() < N_MIN {
            continue;
        }
        let counts = tuning_rate_counts(&slice);
        let stats = LessonStats {
            avg_rr: 0.0,
            global_baseline_rr: 0.0,
            delta_rr: 0.0,
            variance: 0.0,
            n: slice.len(),
            edge_raw: 0.0,
            ev_score: 0.0,
            reliability_score: 0.0,
            support_score: 1.0 - (-(slice.len() as f64) / 50.0).exp(),
            magnitude_score: 0.0,
            time_score: 1.0,
            stability_score: 0.0,
            decay_meta: DecayMeta::default(),
            n_acted: Some(counts.n_acted),
            n_skipped: Some(counts.n_skipped),
            n_misses: Some(counts.n_misses),
            n_fps: Some(counts.n_fps),
        };
        lessons.push(Lesson {
            module: module.to_string(),
            pattern_key,
            action_category,
            scope_subset: ScopeSubset::empty(),
            lesson_type: "tuning_rates".to_string(),
            n: slice.len(),
            stats,
            decay_halflife_hours: None,
            status: LessonStatus::Active,
            updated_at: chrono::Utc::now(),
        });
    }
    info!(lessons = lessons.len(), "mined tuning-rate lessons");
    lessons
}

fn slice_value_counts<'a>(slice: &[&'a TradeEvent], dim: &str) -> BTreeMap<&'a str, Vec<&'a TradeEvent>> {
    let mut grouped: BTreeMap<&str, Vec<&TradeEvent>> = BTreeMap::new();
    for event in slice {
        if let Some(value) = event.scope.get(dim) {
            grouped.entry(value.as_str()).or_default().push(event);
        }
    }
    grouped
}

#[allow(clippy::too_many_arguments)]
fn mine_recursive(
    module: &str,
    pattern_key: &str,
    action_category: crate::domain::learning::ActionCategory,
    slice: &[&TradeEvent],
    scope: ScopeSubset,
    used_dims: &[&str],
    global_baseline_rr: f64,
    out: &mut Vec<Lesson>,
) {
    if slice.len() < N_MIN {
        return;
    }

    let stats = compute_lesson_stats(slice, global_baseline_rr);
    out.push(Lesson {
        module: module.to_string(),
        pattern_key: pattern_key.to_string(),
        action_category,
        scope_subset: scope.clone(),
        lesson_type: "pm_strength".to_string(),
        n: stats.n,
        stats,
        decay_halflife_hours: None,
        status: LessonStatus::Active,
        updated_at: chrono::Utc::now(),
    });

    for (idx, dim) in SCOPE_DIMS.iter().enumerate() {
        if used_dims.contains(dim) {
            continue;
        }
        let grouped = slice_value_counts(slice, dim);
        for (value, sub_slice) in grouped {
            if sub_slice.len() < N_MIN {
                continue;
            }
            let mut next_used = used_dims.to_vec();
            next_used.push(dim);
            let _ = idx;
            mine_recursive(
                module,
                pattern_key,
                action_category,
                &sub_slice,
                scope.with(dim, value),
                &next_used,
                global_baseline_rr,
                out,
            );
        }
    }
}

/// Mines all `(pattern_key, action_category)` groups with at least
/// [`N_MIN`] distinct trades, recursing the scope lattice Apriori-style.
/// `events` should already be the bounded-lookback slice the caller read
/// from storage (typically the last [`EVENT_LOOKBACK`] rows).
pub fn mine_lessons(module: &str, events: &[TradeEvent]) -> Vec<Lesson> {
    if events.is_empty() {
        return Vec::new();
    }
    let global_baseline_rr = mean(&events.iter().map(|e| e.rr).collect::<Vec<_>>());

    let mut groups: BTreeMap<(String, crate::domain::learning::ActionCategory), Vec<&TradeEvent>> =
        BTreeMap::new();
    for event in events {
        groups.entry(event.group_key()).or_default().push(event);
    }

    let mut lessons = Vec::new();
    for ((pattern_key, action_category), slice) in groups {
        if slice.len() < N_MIN {
            continue;
        }
        mine_recursive(
            module,
            &pattern_key,
            action_category,
            &slice,
            ScopeSubset::empty(),
            &[],
            global_baseline_rr,
            &mut lessons,
        );
    }
    info!(lessons = lessons.len(), "mined lessons from trade events");
    lessons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::learning::ActionCategory;
    use chrono::{Duration, Utc};

    fn event(rr: f64, hours_offset: i64, scope: &[(&str, &str)]) -> TradeEvent {
        TradeEvent {
            id: uuid::Uuid::new_v4(),
            trade_id: format!("t-{hours_offset}"),
            module: "pm".to_string(),
            pattern_key: "s1_entry".to_string(),
            action_category: ActionCategory::Entry,
            scope: scope
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            rr,
            pnl_usd: rr * 100.0,
            decision: None,
            outcome: None,
            timestamp: Utc::now() + Duration::hours(hours_offset),
        }
    }

    #[test]
    fn groups_below_n_min_are_skipped() {
        let events: Vec<TradeEvent> = (0..10).map(|i| event(0.2, i, &[])).collect();
        let lessons = mine_lessons("pm", &events);
        assert!(lessons.is_empty());
    }

    #[test]
    fn top_level_lesson_emitted_once_n_min_met() {
        let events: Vec<TradeEvent> = (0..40).map(|i| event(0.3, i, &[])).collect();
        let lessons = mine_lessons("pm", &events);
        assert!(lessons.iter().any(|l| l.scope_subset.depth() == 0));
    }

    #[test]
    fn scope_subset_lesson_requires_its_own_n_min() {
        let mut events: Vec<TradeEvent> = (0..40)
            .map(|i| event(0.3, i, &[("chain", "solana")]))
            .collect();
        events.extend((0..5).map(|i| event(0.1, i, &[("chain", "base")])));
        let lessons = mine_lessons("pm", &events);
        assert!(lessons
            .iter()
            .any(|l| l.scope_subset.0.get("chain").map(|v| v.as_str()) == Some("solana")));
        assert!(!lessons
            .iter()
            .any(|l| l.scope_subset.0.get("chain").map(|v| v.as_str()) == Some("base")));
    }

    #[test]
    fn decaying_series_multiplier_shrinks_edge() {
        let mut declining = Vec::new();
        for i in 0..20 {
            declining.push(event(1.0 - i as f64 * 0.1, i, &[]));
        }
        let refs: Vec<&TradeEvent> = declining.iter().collect();
        let meta = fit_decay_curve(&refs);
        assert_eq!(meta.state, DecayState::Decaying);
        assert!(meta.multiplier < 1.0);
    }

    #[test]
    fn tuning_rate_lessons_require_decision_and_outcome() {
        use crate::domain::learning::{Decision, EpisodeOutcome};

        let mut events = Vec::new();
        for i in 0..20 {
            let mut e = event(0.0, i, &[]);
            e.decision = Some(Decision::Skipped);
            e.outcome = Some(EpisodeOutcome::Success); // missed opportunity
            events.push(e);
        }
        for i in 0..20 {
            let mut e = event(0.0, i, &[]);
            e.decision = Some(Decision::Acted);
            e.outcome = Some(EpisodeOutcome::Failure); // false positive
            events.push(e);
        }
        let lessons = mine_tuning_rate_lessons("pm", &events);
        assert_eq!(lessons.len(), 1);
        let stats = lessons[0].stats;
        assert_eq!(stats.n_misses, Some(20));
        assert_eq!(stats.n_fps, Some(20));
    }

    #[test]
    fn variance_shrinkage_prior_applies_for_small_n() {
        let three: Vec<TradeEvent> = vec![event(0.5, 0, &[]), event(0.5, 1, &[]), event(0.5, 2, &[])];
        let refs: Vec<&TradeEvent> = three.iter().collect();
        let stats = compute_lesson_stats(&refs, 0.0);
        assert!((stats.variance - VAR_PRIOR / 3.0).abs() < 1e-9);
    }
}
