//! The Uptrend State Engine v4: a deterministic state machine over a
//! position's TA feature block. Reads the previous payload and hidden
//! engine meta, writes a new payload. Never decides policy — it only
//! classifies and scores; an external execution collaborator decides
//! what, if anything, to do with `buy_signal`/`trim_flag`/emergency exits.

use chrono::{DateTime, Utc};

use crate::domain::regime::{
    Bucket, Diagnostics, EmergencyExit, EngineConstants, EngineFlags, EngineLevels, EngineMeta,
    EnginePayload, EngineScores, EngineState, Ohlc, SrContext, SrLevel, TaFeatureBlock, Timeframe,
};

fn sigmoid(x: f64, k: f64) -> f64 {
    let k = if k.abs() < 1e-9 { 1e-9 } else { k };
    1.0 / (1.0 + (-(x / k)).exp())
}

fn clip01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

struct BandState {
    fast_at_bottom: bool,
    bearish_order: bool,
    bullish_order: bool,
    fast_above_60: bool,
    all_below_333: bool,
}

fn classify_bands(ta: &TaFeatureBlock) -> BandState {
    let e = &ta.ema;
    let slow_min = e.ema60.min(e.ema144).min(e.ema250).min(e.ema333);
    let fast_at_bottom = e.ema20 < slow_min && e.ema30 < slow_min;
    let bearish_order =
        e.ema20.max(e.ema30) < e.ema60 && e.ema60 < e.ema144 && e.ema144 < e.ema250 && e.ema250 < e.ema333;
    let bullish_order =
        e.ema20.min(e.ema30) > e.ema60 && e.ema60 > e.ema144 && e.ema144 > e.ema250 && e.ema250 > e.ema333;
    let fast_above_60 = e.ema20 > e.ema60 && e.ema30 > e.ema60;
    let all_below_333 = e.ema20 < e.ema333
        && e.ema30 < e.ema333
        && e.ema60 < e.ema333
        && e.ema144 < e.ema333
        && e.ema250 < e.ema333;
    BandState {
        fast_at_bottom,
        bearish_order,
        bullish_order,
        fast_above_60,
        all_below_333,
    }
}

/// Support persistence at ema60 over a short lookback. `recent_bars` should
/// hold the last 6 or more ascending bars (fewer is tolerated, with reduced
/// lookback).
fn support_persistence(recent_bars: &[Ohlc], ema60: f64, atr: f64, halo: f64) -> f64 {
    if recent_bars.is_empty() {
        return 0.0;
    }
    let last = recent_bars.last().unwrap();
    let touch_confirm = if last.low <= ema60 + halo && last.close >= ema60 {
        1.0
    } else {
        0.0
    };

    let window3 = &recent_bars[recent_bars.len().saturating_sub(3)..];
    let max_high = window3
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let reaction_quality = ((max_high - ema60) / atr.max(1e-9)).clamp(0.0, 1.0);

    let window6 = &recent_bars[recent_bars.len().saturating_sub(6)..];
    let closes_above = window6.iter().filter(|b| b.close >= ema60).count() as f64;
    let close_persistence = 1.0 - (-closes_above / 6.0).exp();

    let absorption_count = window6
        .iter()
        .filter(|b| b.low < ema60 && b.close >= ema60)
        .count() as f64;
    let absorption_wicks = 1.0 - (-absorption_count / 2.0).exp();

    0.25 * touch_confirm + 0.20 * reaction_quality + 0.40 * close_persistence + 0.15 * absorption_wicks
}

fn ema_alignment_score(ta: &TaFeatureBlock) -> f64 {
    let s = &ta.ema_slopes;
    let slow_positive = ([s.ema144_slope, s.ema250_slope, s.ema333_slope]
        .iter()
        .filter(|v| **v >= 0.0)
        .count() as f64)
        / 3.0;
    let slow_accel = ([s.d_ema144_slope, s.d_ema250_slope, s.d_ema333_slope]
        .iter()
        .filter(|v| **v > 0.0)
        .count() as f64)
        / 3.0;
    let mid_help = if s.ema60_slope >= 0.0 { 1.0 } else { 0.0 };
    let fast_gt_mid = if ta.ema.ema20 > ta.ema.ema60 { 1.0 } else { 0.0 };
    let clip_sep_fast = clip01(ta.separations.sep_fast);

    let inner = clip01(0.3 * slow_positive + 0.4 * slow_accel + 0.3 * slow_positive);
    0.50 * inner + 0.15 * mid_help + 0.20 * fast_gt_mid + 0.15 * clip_sep_fast
}

fn volatility_coherence(ta: &TaFeatureBlock) -> f64 {
    let red_ratio = (ta.atr.atr - ta.atr.atr_mean_20) / ta.atr.atr_mean_20.abs().max(1e-9);
    sigmoid(-red_ratio, 0.3)
}

fn trend_integrity(ta: &TaFeatureBlock, recent_bars: &[Ohlc], halo: f64) -> f64 {
    let support = support_persistence(recent_bars, ta.ema.ema60, ta.atr.atr, halo);
    let alignment = ema_alignment_score(ta);
    let coherence = volatility_coherence(ta);
    clip01(0.55 * support + 0.35 * alignment + 0.10 * coherence)
}

fn trend_strength(ta: &TaFeatureBlock, constants: &EngineConstants) -> f64 {
    let momentum = 0.6 * sigmoid(ta.momentum.rsi_slope_10, 0.5);
    let adx_term = if ta.momentum.adx >= constants.adx_floor {
        sigmoid(ta.momentum.adx_slope_10, 0.3)
    } else {
        0.0
    };
    clip01(momentum + 0.4 * adx_term)
}

/// SR-proximity boost applied to TS once, for the first level within
/// `1·ATR` of `anchor_ema`.
fn ts_with_sr_boost(ts: f64, anchor_ema: f64, atr: f64, geometry: Option<&[SrLevel]>) -> f64 {
    let Some(levels) = geometry else {
        return ts;
    };
    let halo = atr.max(1e-9);
    for level in levels {
        if (level.price - anchor_ema).abs() <= halo {
            let boost = (level.strength / 20.0 * 0.15).min(0.15);
            return clip01(ts + boost);
        }
    }
    ts
}

struct S3Scores {
    ox: f64,
    dx: f64,
    edx: f64,
}

fn compute_s3_scores(
    ta: &TaFeatureBlock,
    price: f64,
    meta: &mut EngineMeta,
) -> S3Scores {
    let e = &ta.ema;
    let atr = ta.atr.atr.max(1e-9);

    let rail = |ema_val: f64| sigmoid((price - ema_val) / atr, 1.0);
    let rail_sum = rail(e.ema20) + rail(e.ema60) + rail(e.ema144) + rail(e.ema250);
    let sep_expansion = sigmoid(ta.separations.sep_fast, 0.3) + sigmoid(ta.separations.sep_mid, 0.3);
    let atr_surge = sigmoid((ta.atr.atr - ta.atr.atr_mean_20) / ta.atr.atr_mean_20.abs().max(1e-9), 0.3);
    let curl = if ta.ema_slopes.d_ema144_slope > 0.0 { 1.0 } else { 0.0 };
    let slope_fragility = sigmoid(-ta.ema_slopes.ema60_slope, 0.02);

    let ox = clip01((rail_sum / 4.0 + sep_expansion / 2.0 + atr_surge + curl) / 4.0);

    let x = clip01((price - e.ema144) / (e.ema333 - e.ema144).abs().max(1e-9));
    let compression_mult = 1.0 - clip01(ta.separations.sep_mid);
    let dx_location = (-3.0 * x).exp() * (1.0 + 0.3 * compression_mult);
    let exhaustion = sigmoid(-ta.volume.vo_z, 1.0);
    let atr_relief = sigmoid(-(ta.atr.atr - ta.atr.atr_mean_20) / ta.atr.atr_mean_20.abs().max(1e-9), 0.3);
    let rsi_relief = sigmoid(-ta.momentum.rsi_slope_10, 0.5);
    let adx_relief = sigmoid(-ta.momentum.adx_slope_10, 0.3);

    let dx = clip01((clip01(dx_location) + exhaustion + atr_relief + rsi_relief + adx_relief) / 5.0);

    let raw_edx = clip01(
        (sigmoid(-ta.ema_slopes.ema144_slope, 0.02)
            + sigmoid(-ta.ema_slopes.ema333_slope, 0.02)
            + exhaustion
            + atr_surge
            + slope_fragility)
            / 5.0,
    );
    let smoothed = match meta.edx_smoothed {
        Some(prev) => {
            let alpha = 2.0 / 21.0;
            alpha * raw_edx + (1.0 - alpha) * prev
        }
        None => raw_edx,
    };
    meta.edx_smoothed = Some(smoothed);

    S3Scores { ox, dx, edx: smoothed }
}

fn sr_context(geometry: Option<&[SrLevel]>) -> Option<SrContext> {
    let levels = geometry?;
    if levels.is_empty() {
        return None;
    }
    let mut ranked: Vec<&SrLevel> = levels.iter().collect();
    ranked.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap());
    ranked.truncate(5);
    ranked.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap());
    let base_sr_level = ranked.last().map(|l| l.price).unwrap_or(0.0);
    let flipped: Vec<f64> = ranked
        .iter()
        .filter(|l| l.flipped)
        .map(|l| l.price)
        .collect();
    Some(SrContext {
        halo: 0.0,
        base_sr_level,
        flipped_sr_levels: flipped,
    })
}

/// Evaluates one engine tick for a single position/timeframe.
///
/// `recent_bars` should contain at least the last 6 ascending bars (used
/// for the support-persistence sub-score); fewer is tolerated with reduced
/// lookback. `previous` is the prior tick's payload, if any; `meta` is the
/// hidden scratch state, mutated in place.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_tick(
    ta: &TaFeatureBlock,
    recent_bars: &[Ohlc],
    timeframe: Timeframe,
    previous: Option<&EnginePayload>,
    meta: &mut EngineMeta,
    constants: &EngineConstants,
    geometry: Option<&[SrLevel]>,
    now: DateTime<Utc>,
) -> EnginePayload {
    let price = ta.latest_price;
    let prev_state = previous.map(|p| p.state).unwrap_or(EngineState::S4);
    let bands = classify_bands(ta);
    let halo = constants.entry_halo_atr_mult * ta.atr.atr;

    let ti = trend_integrity(ta, recent_bars, halo);
    let ts = trend_strength(ta, constants);
    let ts_with_boost_s1 = ts_with_sr_boost(ts, ta.ema.ema60, ta.atr.atr, geometry);
    let ts_with_boost_s2 = ts_with_sr_boost(ts, ta.ema.ema333, ta.atr.atr, geometry);

    let mut diagnostics = Diagnostics::default();

    let mut new_state = if bands.fast_at_bottom {
        diagnostics.transition_reason = Some("fast_band_bottom".to_string());
        EngineState::S0
    } else if bands.bearish_order {
        diagnostics.transition_reason = Some("bearish_order".to_string());
        EngineState::S0
    } else if matches!(prev_state, EngineState::S0 | EngineState::S4)
        && bands.fast_above_60
        && price > ta.ema.ema60
    {
        diagnostics.transition_reason = Some("s0_to_s1".to_string());
        EngineState::S1
    } else if prev_state == EngineState::S1 && price > ta.ema.ema333 {
        diagnostics.transition_reason = Some("s1_to_s2".to_string());
        EngineState::S2
    } else if prev_state == EngineState::S2 && price < ta.ema.ema333 {
        diagnostics.transition_reason = Some("s2_to_s1".to_string());
        EngineState::S1
    } else if prev_state == EngineState::S2 && bands.bullish_order {
        diagnostics.transition_reason = Some("s2_to_s3".to_string());
        EngineState::S3
    } else if prev_state == EngineState::S3 && bands.all_below_333 {
        diagnostics.transition_reason = Some("s3_reset".to_string());
        EngineState::S0
    } else {
        prev_state
    };

    // S2 reset-persistence: only evaluated when the chain above leaves us in S2.
    if new_state == EngineState::S2 {
        if bands.fast_above_60 {
            meta.s2_reset_persistence = 0;
        } else {
            meta.s2_reset_persistence += 1;
            if meta.s2_reset_persistence >= constants.s2_reset_persistence_bars {
                new_state = EngineState::S0;
                diagnostics.transition_reason = Some("s2_reset".to_string());
            }
        }
    }

    if new_state == EngineState::S0 {
        meta.s1_ema60_entry = None;
        meta.s2_ema60_entry = None;
        meta.s2_reset_persistence = 0;
        meta.emergency_exit = None;
    }

    if new_state == EngineState::S1 && meta.s1_ema60_entry.is_none() {
        meta.s1_ema60_entry = Some(ta.ema.ema60);
    }
    if new_state == EngineState::S2 && meta.s2_ema60_entry.is_none() {
        meta.s2_ema60_entry = Some(ta.ema.ema333);
    }

    let mut flags = EngineFlags::default();
    let mut scores = EngineScores {
        ti,
        ts,
        ts_with_boost: None,
        ox: 0.0,
        dx: 0.0,
        edx: 0.0,
    };
    let mut sr = None;

    match new_state {
        EngineState::S0 => {
            flags.watch_only = true;
        }
        EngineState::S4 => {}
        EngineState::S1 => {
            flags.s1_valid = true;
            scores.ts_with_boost = Some(ts_with_boost_s1);
            let entry_zone = (price - ta.ema.ema60).abs() <= halo.max(1e-9);
            let slope_ok = ta.ema_slopes.ema60_slope > 0.0 || ta.ema_slopes.ema144_slope >= 0.0;
            let ts_ok = ts_with_boost_s1 >= constants.ts_entry;
            flags.entry_zone = entry_zone;
            flags.buy_signal = entry_zone && slope_ok && ts_ok;
        }
        EngineState::S2 => {
            flags.defensive = true;
            scores.ts_with_boost = Some(ts_with_boost_s2);
            let s3_scores = compute_s3_scores(ta, price, meta);
            scores.ox = s3_scores.ox;
            scores.dx = s3_scores.dx;
            flags.trim_flag = scores.ox >= constants.ox_sell;

            let entry_zone_333 = (price - ta.ema.ema333).abs() <= halo.max(1e-9);
            let slope_ok = ta.ema_slopes.ema250_slope > 0.0 || ta.ema_slopes.ema333_slope >= 0.0;
            flags.entry_zone_333 = entry_zone_333;
            flags.buy_signal =
                entry_zone_333 && slope_ok && ts_with_boost_s2 >= constants.ts_entry;
        }
        EngineState::S3 => {
            flags.trending = true;
            scores.ts_with_boost = Some(ts_with_boost_s2);
            let s3_scores = compute_s3_scores(ta, price, meta);
            scores.ox = s3_scores.ox;
            scores.dx = s3_scores.dx;
            scores.edx = s3_scores.edx;
            flags.dx_flag = price <= ta.ema.ema144;

            let mut emergency = meta.emergency_exit.unwrap_or_default();
            if !emergency.active && price < ta.ema.ema333 {
                let bar_halo = (0.5 * ta.atr.atr).max(0.03 * price);
                emergency = EmergencyExit {
                    active: true,
                    break_time: Some(now),
                    break_low: Some(price),
                    ema333_at_break: Some(ta.ema.ema333),
                    halo: Some(bar_halo),
                    bounce_zone_low: Some(ta.ema.ema333 - bar_halo),
                    bounce_zone_high: Some(ta.ema.ema333 + bar_halo),
                };
                meta.emergency_exit = Some(emergency);
            } else if emergency.active
                && price > ta.ema.ema333
                && ti >= 0.45
                && ts >= 0.58
            {
                flags.fakeout_recovery = true;
                emergency.active = false;
                meta.emergency_exit = None;
            } else {
                meta.emergency_exit = Some(emergency);
            }
            flags.emergency_exit = emergency;

            sr = sr_context(geometry);
        }
    }

    diagnostics.ema_alignment = Some(ema_alignment_score(ta));
    diagnostics.volatility_coherence = Some(volatility_coherence(ta));
    diagnostics.support_persistence = Some(support_persistence(
        recent_bars,
        ta.ema.ema60,
        ta.atr.atr,
        halo,
    ));

    let levels = EngineLevels {
        ema20: ta.ema.ema20,
        ema30: ta.ema.ema30,
        ema60: ta.ema.ema60,
        ema144: ta.ema.ema144,
        ema250: ta.ema.ema250,
        ema333: ta.ema.ema333,
        base_sr_level: sr.as_ref().map(|s| s.base_sr_level),
    };

    let mut payload = EnginePayload::new(new_state, timeframe, now);
    payload.flags = flags;
    payload.scores = scores;
    payload.levels = levels;
    payload.diagnostics = diagnostics;
    payload.sr_context = sr;
    payload
}

/// Classifies which market-cap bucket composite a driver belongs to, used
/// by the A/E calculator to look up the right bucket driver for a token.
pub fn bucket_driver_key(bucket: Bucket) -> &'static str {
    bucket.driver_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::regime::{
        AtrBlock, EmaLadder, EmaSlopes, Momentum, Separations, TaMeta, VolumeBlock,
    };

    fn bars(n: usize, start: f64, step: f64) -> Vec<Ohlc> {
        (0..n)
            .map(|i| {
                let base = start + step * i as f64;
                Ohlc::new(base, base + 0.5, base - 0.5, base + 0.1, 100.0)
            })
            .collect()
    }

    fn feature_block(ema20: f64, ema30: f64, ema60: f64, ema144: f64, ema250: f64, ema333: f64, price: f64) -> TaFeatureBlock {
        TaFeatureBlock {
            ema: EmaLadder {
                ema20,
                ema30,
                ema50: ema60,
                ema60,
                ema144,
                ema250,
                ema333,
            },
            ema_slopes: EmaSlopes::default(),
            separations: Separations::default(),
            atr: AtrBlock {
                atr: 0.5,
                atr_mean_20: 0.5,
                atr_peak_10: 0.5,
                atr_norm: 0.01,
            },
            momentum: Momentum::default(),
            volume: VolumeBlock::default(),
            meta: TaMeta {
                source: "composite".to_string(),
                updated_at: Utc::now(),
                bar_count: 400,
            },
            latest_price: price,
        }
    }

    #[test]
    fn bearish_band_order_yields_s0_watch_only() {
        let ta = feature_block(5.0, 5.0, 10.0, 20.0, 30.0, 40.0, 5.0);
        let mut meta = EngineMeta::default();
        let payload = evaluate_tick(
            &ta,
            &bars(6, 5.0, 0.0),
            Timeframe::H1,
            None,
            &mut meta,
            &EngineConstants::default(),
            None,
            Utc::now(),
        );
        assert_eq!(payload.state, EngineState::S0);
        assert!(payload.flags.watch_only);
    }

    #[test]
    fn s0_to_s1_when_fast_band_crosses_above_ema60() {
        let ta = feature_block(11.0, 11.0, 10.0, 9.0, 8.0, 7.0, 11.0);
        let mut meta = EngineMeta::default();
        let payload = evaluate_tick(
            &ta,
            &bars(6, 11.0, 0.0),
            Timeframe::H1,
            None,
            &mut meta,
            &EngineConstants::default(),
            None,
            Utc::now(),
        );
        assert_eq!(payload.state, EngineState::S1);
        assert_eq!(meta.s1_ema60_entry, Some(10.0));
    }

    #[test]
    fn s1_advances_to_s2_once_price_exceeds_ema333() {
        let mut meta = EngineMeta::default();
        let constants = EngineConstants::default();
        let s1_ta = feature_block(11.0, 11.0, 10.0, 9.0, 8.0, 40.0, 11.0);
        let prev = evaluate_tick(
            &s1_ta,
            &bars(6, 11.0, 0.0),
            Timeframe::H1,
            None,
            &mut meta,
            &constants,
            None,
            Utc::now(),
        );
        assert_eq!(prev.state, EngineState::S1);

        let s2_ta = feature_block(50.0, 50.0, 45.0, 43.0, 41.0, 40.0, 50.0);
        let next = evaluate_tick(
            &s2_ta,
            &bars(6, 50.0, 0.0),
            Timeframe::H1,
            Some(&prev),
            &mut meta,
            &constants,
            None,
            Utc::now(),
        );
        assert_eq!(next.state, EngineState::S2);
    }

    #[test]
    fn s3_emergency_exit_latches_and_recovers() {
        let mut meta = EngineMeta::default();
        let constants = EngineConstants::default();
        let mut s3 = EnginePayload::new(EngineState::S3, Timeframe::H1, Utc::now());
        s3.levels.ema333 = 40.0;

        let break_ta = feature_block(55.0, 55.0, 52.0, 48.0, 44.0, 40.0, 39.0);
        let broken = evaluate_tick(
            &break_ta,
            &bars(6, 39.0, 0.0),
            Timeframe::H1,
            Some(&s3),
            &mut meta,
            &constants,
            None,
            Utc::now(),
        );
        assert!(broken.flags.emergency_exit.active);

        let recover_ta = feature_block(55.0, 55.0, 52.0, 48.0, 44.0, 40.0, 45.0);
        let recovered = evaluate_tick(
            &recover_ta,
            &bars(6, 45.0, 0.0),
            Timeframe::H1,
            Some(&broken),
            &mut meta,
            &constants,
            None,
            Utc::now(),
        );
        if recovered.scores.ti >= 0.45 && recovered.scores.ts >= 0.58 {
            assert!(recovered.flags.fakeout_recovery);
            assert!(!recovered.flags.emergency_exit.active);
        }
    }
}
