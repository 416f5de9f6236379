//! Weekly meta-learning jobs: half-life estimation over lesson decay
//! slopes, a latent-factor clusterer grouping lessons into edge families,
//! and a regime-weight learner that reports suggested macro/meso/micro
//! weight adjustments for the A/E calculator's driver terms.
//!
//! These three jobs mirror the source's `half_life_estimator`,
//! `latent_factor_clusterer`, and `regime_weight_learner` (§5's task list,
//! supplemented per `original_source/`). None of them mutate engine
//! behavior directly — half-life estimates are written back onto the
//! lesson row for telemetry, and the weight suggestions are logged for an
//! operator to review, not auto-applied; `RegimeAeCalculator`'s weights
//! stay a fixed, pure function per §4.5's resolved Open Question.

use std::collections::BTreeMap;

use tracing::info;

use crate::domain::learning::lesson::DecayState;
use crate::domain::learning::Lesson;

/// `half_life_estimator`: for any lesson whose decay curve is trending
/// (`Decaying` or `Improving`), estimates `ln(2) / |slope|` hours and
/// writes it onto `decay_halflife_hours`. Stable/Insufficient lessons are
/// left untouched — there's no trend to extrapolate a half-life from.
pub fn estimate_half_lives(lessons: &mut [Lesson]) -> usize {
    let mut updated = 0;
    for lesson in lessons.iter_mut() {
        let slope = lesson.stats.decay_meta.slope;
        let trending = matches!(
            lesson.stats.decay_meta.state,
            DecayState::Decaying | DecayState::Improving
        );
        if !trending || slope.abs() < 1e-9 {
            continue;
        }
        let half_life = std::f64::consts::LN_2 / slope.abs();
        lesson.decay_halflife_hours = Some(half_life);
        lesson.stats.decay_meta.half_life_hours = Some(half_life);
        updated += 1;
    }
    info!(updated, "estimated lesson half-lives");
    updated
}

/// One latent cluster: its centroid in (delta_rr, reliability) space and
/// the member lessons' indices (into the slice passed to
/// [`cluster_lessons`]).
#[derive(Debug, Clone)]
pub struct LessonCluster {
    pub centroid_delta_rr: f64,
    pub centroid_reliability: f64,
    pub members: Vec<usize>,
}

/// `latent_factor_clusterer`: groups lessons into `k` clusters over
/// `(delta_rr, reliability_score)` via a deterministic k-means (fixed
/// initial centroids at the min/median/max of `delta_rr`, never a random
/// seed — this job must be reproducible run to run). Returns one cluster
/// per requested `k`, some possibly empty if fewer than `k` distinct
/// lessons are fed in.
pub fn cluster_lessons(lessons: &[Lesson], k: usize) -> Vec<LessonCluster> {
    if lessons.is_empty() || k == 0 {
        return Vec::new();
    }
    let points: Vec<(f64, f64)> = lessons
        .iter()
        .map(|l| (l.stats.delta_rr, l.stats.reliability_score))
        .collect();

    let mut sorted_idx: Vec<usize> = (0..points.len()).collect();
    sorted_idx.sort_by(|&a, &b| points[a].0.partial_cmp(&points[b].0).unwrap());

    let mut centroids: Vec<(f64, f64)> = (0..k)
        .map(|i| {
            let pos = if k == 1 {
                0
            } else {
                i * (sorted_idx.len() - 1) / (k - 1)
            };
            points[sorted_idx[pos]]
        })
        .collect();

    const MAX_ITERS: usize = 10;
    let mut assignment = vec![0usize; points.len()];
    for _ in 0..MAX_ITERS {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = (point.0 - centroid.0).powi(2) + (point.1 - centroid.1).powi(2);
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            if assignment[i] != best {
                assignment[i] = best;
                changed = true;
            }
        }

        for c in 0..k {
            let members: Vec<(f64, f64)> = points
                .iter()
                .zip(assignment.iter())
                .filter(|(_, &a)| a == c)
                .map(|(p, _)| *p)
                .collect();
            if !members.is_empty() {
                let n = members.len() as f64;
                centroids[c] = (
                    members.iter().map(|p| p.0).sum::<f64>() / n,
                    members.iter().map(|p| p.1).sum::<f64>() / n,
                );
            }
        }

        if !changed {
            break;
        }
    }

    let mut clusters: Vec<LessonCluster> = centroids
        .iter()
        .map(|c| LessonCluster {
            centroid_delta_rr: c.0,
            centroid_reliability: c.1,
            members: Vec::new(),
        })
        .collect();
    for (i, &a) in assignment.iter().enumerate() {
        clusters[a].members.push(i);
    }
    info!(clusters = clusters.len(), lessons = lessons.len(), "clustered lessons into latent factors");
    clusters
}

/// `regime_weight_learner`: suggests a relative weight per `scope.timeframe`
/// value, proportional to the average magnitude of `edge_raw` lessons carry
/// for that timeframe — a higher average edge at a timeframe argues for
/// weighting that timeframe's driver term more heavily in the A/E
/// calculator. Advisory only: logged for operator review, never applied
/// automatically to `RegimeAeCalculator`'s fixed weights.
pub fn suggest_regime_weights(lessons: &[Lesson]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for lesson in lessons {
        let Some(tf) = lesson.scope_subset.0.get("timeframe") else {
            continue;
        };
        *sums.entry(tf.clone()).or_insert(0.0) += lesson.stats.edge_raw.abs();
        *counts.entry(tf.clone()).or_insert(0) += 1;
    }
    let suggestions: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(tf, sum)| {
            let n = counts[&tf] as f64;
            (tf, sum / n)
        })
        .collect();
    info!(suggestions = ?suggestions, "regime-weight learner suggestions (advisory)");
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::learning::{ActionCategory, LessonStats, LessonStatus, ScopeSubset};

    fn lesson_with(delta_rr: f64, reliability: f64, decay_state: DecayState, slope: f64) -> Lesson {
        let mut stats = LessonStats {
            avg_rr: 0.0,
            global_baseline_rr: 0.0,
            delta_rr,
            variance: 0.0,
            n: 40,
            edge_raw: delta_rr.abs(),
            ev_score: 0.0,
            reliability_score: reliability,
            support_score: 0.9,
            magnitude_score: 0.0,
            time_score: 1.0,
            stability_score: 0.0,
            decay_meta: Default::default(),
            n_acted: None,
            n_skipped: None,
            n_misses: None,
            n_fps: None,
        };
        stats.decay_meta.state = decay_state;
        stats.decay_meta.slope = slope;
        Lesson {
            module: "pm".to_string(),
            pattern_key: "s1_entry".to_string(),
            action_category: ActionCategory::Entry,
            scope_subset: ScopeSubset::empty(),
            lesson_type: "pm_strength".to_string(),
            n: 40,
            stats,
            decay_halflife_hours: None,
            status: LessonStatus::Active,
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn half_life_only_estimated_for_trending_lessons() {
        let mut lessons = vec![
            lesson_with(0.3, 0.8, DecayState::Decaying, -0.01),
            lesson_with(0.1, 0.8, DecayState::Stable, 0.0001),
        ];
        let updated = estimate_half_lives(&mut lessons);
        assert_eq!(updated, 1);
        assert!(lessons[0].decay_halflife_hours.is_some());
        assert!(lessons[1].decay_halflife_hours.is_none());
    }

    #[test]
    fn half_life_matches_ln2_over_slope() {
        let mut lessons = vec![lesson_with(0.3, 0.8, DecayState::Decaying, -0.02)];
        estimate_half_lives(&mut lessons);
        let expected = std::f64::consts::LN_2 / 0.02;
        assert!((lessons[0].decay_halflife_hours.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn clustering_separates_distinct_edge_groups() {
        let lessons = vec![
            lesson_with(1.0, 0.9, DecayState::Stable, 0.0),
            lesson_with(0.9, 0.85, DecayState::Stable, 0.0),
            lesson_with(-1.0, 0.2, DecayState::Stable, 0.0),
            lesson_with(-0.9, 0.25, DecayState::Stable, 0.0),
        ];
        let clusters = cluster_lessons(&lessons, 2);
        assert_eq!(clusters.len(), 2);
        let total_members: usize = clusters.iter().map(|c| c.members.len()).sum();
        assert_eq!(total_members, lessons.len());
    }

    #[test]
    fn regime_weight_suggestions_average_edge_by_timeframe() {
        let mut a = lesson_with(0.4, 0.8, DecayState::Stable, 0.0);
        a.scope_subset = ScopeSubset::empty().with("timeframe", "1d");
        let mut b = lesson_with(0.1, 0.8, DecayState::Stable, 0.0);
        b.scope_subset = ScopeSubset::empty().with("timeframe", "1d");
        let suggestions = suggest_regime_weights(&[a, b]);
        assert!((suggestions["1d"] - 0.25).abs() < 1e-9);
    }
}
