//! Property tests for the eight invariants in §8: bar integrity, EMA
//! continuity, engine state purity, flag discipline, S2 reset persistence,
//! composite round-tripping, miner monotonicity, and override clamping.

use chrono::Utc;
use regime_engine::application::indicators::ema_series;
use regime_engine::application::learning::{materialize_overrides, mine_lessons};
use regime_engine::application::regime::{composite_ohlc, evaluate_tick};
use regime_engine::domain::learning::{ActionCategory, OverrideCategory, ScopeMap, TradeEvent};
use regime_engine::domain::regime::{
    AtrBlock, EmaLadder, EmaSlopes, EngineConstants, EngineMeta, EnginePayload, EngineState, Momentum,
    Ohlc, Separations, TaFeatureBlock, TaMeta, Timeframe, VolumeBlock,
};

fn bars(n: usize, start: f64, step: f64) -> Vec<Ohlc> {
    (0..n)
        .map(|i| {
            let base = start + step * i as f64;
            Ohlc::new(base, base + 0.5, base - 0.5, base + 0.1, 100.0)
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn feature_block(
    ema20: f64,
    ema30: f64,
    ema60: f64,
    ema144: f64,
    ema250: f64,
    ema333: f64,
    price: f64,
    atr: f64,
    ema_slopes: EmaSlopes,
    momentum: Momentum,
) -> TaFeatureBlock {
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
        ema_slopes,
        separations: Separations::default(),
        atr: AtrBlock {
            atr,
            atr_mean_20: atr,
            atr_peak_10: atr,
            atr_norm: atr / ema60.max(1e-9),
        },
        momentum,
        volume: VolumeBlock::default(),
        meta: TaMeta {
            source: "composite".to_string(),
            updated_at: Utc::now(),
            bar_count: 400,
        },
        latest_price: price,
    }
}

/// 1. Bar integrity: every validated bar satisfies low<=min(o,c),
/// high>=max(o,c), volume>=0, and its timestamp falls on a tf boundary.
#[test]
fn property_bar_integrity() {
    for tf in Timeframe::ALL {
        let ts = tf.seconds() * 7;
        assert!(tf.is_aligned(ts));
        let ohlc = Ohlc::new(10.0, 12.0, 9.0, 11.0, 100.0);
        assert!(ohlc.validate().is_ok());
        assert!(ohlc.low <= ohlc.open.min(ohlc.close));
        assert!(ohlc.high >= ohlc.open.max(ohlc.close));
        assert!(ohlc.volume >= 0.0);
    }
}

/// 2. EMA continuity: recomputing from scratch over a prefix matches the
/// corresponding prefix of the full series, to within 1e-9.
#[test]
fn property_ema_continuity() {
    let closes: Vec<f64> = (0..120).map(|i| 50.0 + (i as f64 * 0.37).sin() * 5.0 + i as f64 * 0.1).collect();
    let full = ema_series(&closes, 20);
    for prefix_len in [5, 33, 64, 100] {
        let partial = ema_series(&closes[..prefix_len], 20);
        for i in 0..prefix_len {
            assert!((full[i] - partial[i]).abs() < 1e-9);
        }
    }
}

/// 3. State purity: evaluating the same inputs twice (independent meta
/// clones) yields byte-identical payloads.
#[test]
fn property_state_purity() {
    let ta = feature_block(
        11.0,
        11.0,
        10.0,
        9.0,
        8.0,
        7.0,
        11.0,
        0.5,
        EmaSlopes::default(),
        Momentum::default(),
    );
    let constants = EngineConstants::default();
    let now = Utc::now();
    let recent = bars(6, 11.0, 0.0);

    let mut meta_a = EngineMeta::default();
    let payload_a = evaluate_tick(&ta, &recent, Timeframe::H1, None, &mut meta_a, &constants, None, now);

    let mut meta_b = EngineMeta::default();
    let payload_b = evaluate_tick(&ta, &recent, Timeframe::H1, None, &mut meta_b, &constants, None, now);

    assert_eq!(serde_json::to_value(&payload_a).unwrap(), serde_json::to_value(&payload_b).unwrap());
    assert_eq!(serde_json::to_value(&meta_a).unwrap(), serde_json::to_value(&meta_b).unwrap());
}

/// 4. Monotone flag discipline: `buy_signal` implies `state in {S1,S2}`,
/// `entry_zone`, and `ts_with_boost >= TS_ENTRY`.
#[test]
fn property_buy_signal_implies_entry_conditions() {
    let constants = EngineConstants::default();
    let momentum = Momentum {
        rsi: 60.0,
        rsi_slope_10: 2.0,
        adx: 25.0,
        adx_slope_10: 1.0,
    };
    let slopes = EmaSlopes {
        ema60_slope: 0.01,
        ..EmaSlopes::default()
    };
    // price within 1*ATR of ema60, slopes/momentum strong enough for ts_ok.
    let ta = feature_block(11.0, 11.0, 10.0, 9.0, 8.0, 7.0, 10.3, 0.5, slopes, momentum);
    let mut meta = EngineMeta::default();
    let payload = evaluate_tick(&ta, &bars(6, 10.3, 0.0), Timeframe::H1, None, &mut meta, &constants, None, Utc::now());

    if payload.flags.buy_signal {
        assert!(matches!(payload.state, EngineState::S1 | EngineState::S2));
        assert!(payload.flags.entry_zone || payload.flags.entry_zone_333);
        assert!(payload.scores.ts_with_boost.unwrap() >= constants.ts_entry);
    }
}

/// 5. S2 reset persistence: three consecutive ticks with the fast band
/// below ema60 (and no intervening reset) force `state=S0` with the
/// `s2_reset` diagnostic on the third.
#[test]
fn property_s2_reset_persistence_on_third_bar() {
    let constants = EngineConstants::default();
    let mut meta = EngineMeta::default();
    let mut s2 = EnginePayload::new(EngineState::S2, Timeframe::H1, Utc::now());
    s2.levels.ema333 = 6.0;

    // Fast band (9,9) below ema60 (10); price above ema333 (6) so the
    // S2->S1 fallback never fires; band order isn't bearish or bullish.
    let ta = feature_block(9.0, 9.0, 10.0, 8.0, 7.0, 6.0, 6.5, 0.3, EmaSlopes::default(), Momentum::default());
    let recent = bars(6, 6.5, 0.0);

    let tick1 = evaluate_tick(&ta, &recent, Timeframe::H1, Some(&s2), &mut meta, &constants, None, Utc::now());
    assert_eq!(tick1.state, EngineState::S2);
    assert_eq!(meta.s2_reset_persistence, 1);

    let tick2 = evaluate_tick(&ta, &recent, Timeframe::H1, Some(&tick1), &mut meta, &constants, None, Utc::now());
    assert_eq!(tick2.state, EngineState::S2);
    assert_eq!(meta.s2_reset_persistence, 2);

    let tick3 = evaluate_tick(&ta, &recent, Timeframe::H1, Some(&tick2), &mut meta, &constants, None, Utc::now());
    assert_eq!(tick3.state, EngineState::S0);
    assert_eq!(tick3.diagnostics.transition_reason.as_deref(), Some("s2_reset"));
    assert_eq!(meta.s2_reset_persistence, 0);
}

/// 6. Round-trip composite: compositing equal-sized subgroups and then
/// compositing those composites together matches compositing the flat
/// member list directly, to within 1e-9 relative error.
#[test]
fn property_round_trip_composite() {
    let members: Vec<Ohlc> = (0..12)
        .map(|i| Ohlc::new(10.0 + i as f64, 10.5 + i as f64, 9.5 + i as f64, 10.2 + i as f64, 50.0 + i as f64))
        .collect();

    let direct = composite_ohlc(&members).unwrap();

    let group_a = composite_ohlc(&members[..6]).unwrap();
    let group_b = composite_ohlc(&members[6..]).unwrap();
    let rolled_up = composite_ohlc(&[group_a, group_b]).unwrap();

    assert!((direct.open - rolled_up.open).abs() < 1e-9);
    assert!((direct.close - rolled_up.close).abs() < 1e-9);
    assert_eq!(direct.high, rolled_up.high);
    assert_eq!(direct.low, rolled_up.low);
    assert!((direct.volume - rolled_up.volume).abs() < 1e-9);
}

fn scoped_trade(rr: f64, hours_offset: i64, pattern_key: &str, scope: ScopeMap) -> TradeEvent {
    TradeEvent {
        id: uuid::Uuid::new_v4(),
        trade_id: format!("{pattern_key}-{hours_offset}"),
        module: "pm".to_string(),
        pattern_key: pattern_key.to_string(),
        action_category: ActionCategory::Entry,
        scope,
        rr,
        pnl_usd: rr * 100.0,
        decision: None,
        outcome: None,
        timestamp: Utc::now() - chrono::Duration::hours(hours_offset),
    }
}

/// 7. Miner monotonicity: adding one more event under an already-mined
/// scope cannot decrease `n` for the lesson matching that scope.
#[test]
fn property_miner_monotonicity() {
    let mut scope = ScopeMap::new();
    scope.insert("chain".to_string(), "solana".to_string());

    let base: Vec<TradeEvent> = (0..33).map(|i| scoped_trade(0.2 + 0.01 * i as f64, i, "P", scope.clone())).collect();
    let before = mine_lessons("pm", &base);
    let before_n = before
        .iter()
        .find(|l| l.scope_subset.depth() == 1 && l.scope_subset.0.get("chain").map(String::as_str) == Some("solana"))
        .map(|l| l.n)
        .unwrap();

    let mut extended = base;
    extended.push(scoped_trade(0.3, 40, "P", scope));
    let after = mine_lessons("pm", &extended);
    let after_n = after
        .iter()
        .find(|l| l.scope_subset.depth() == 1 && l.scope_subset.0.get("chain").map(String::as_str) == Some("solana"))
        .map(|l| l.n)
        .unwrap();

    assert!(after_n >= before_n);
}

/// 8. Override clamp: every emitted override's multiplier falls within
/// its category's clamp range, and sizing overrides only appear for
/// lessons with `|edge_raw| >= 0.05`.
#[test]
fn property_override_clamp() {
    let mut scope = ScopeMap::new();
    scope.insert("chain".to_string(), "solana".to_string());
    let mut events: Vec<TradeEvent> = (0..33)
        .map(|i| {
            let offset = if i % 2 == 0 { 0.5 } else { -0.4 };
            scoped_trade(1.2 + offset, i, "P", scope.clone())
        })
        .collect();
    events.extend((0..40).map(|i| scoped_trade(0.0, i, "Q", ScopeMap::new())));

    let lessons = mine_lessons("pm", &events);
    let overrides = materialize_overrides(&lessons, Utc::now());

    for row in &overrides {
        let range = match row.action_category {
            OverrideCategory::Entry | OverrideCategory::Add | OverrideCategory::Trim | OverrideCategory::Exit => {
                (0.3, 3.0)
            }
            OverrideCategory::TuningTsMin
            | OverrideCategory::TuningHalo
            | OverrideCategory::TuningS2TsMin
            | OverrideCategory::TuningS2Halo
            | OverrideCategory::TuningDxMin => (0.5, 2.0),
            OverrideCategory::TuningDxLadder => (0.7, 1.5),
        };
        assert!(row.multiplier >= range.0 && row.multiplier <= range.1);
    }

    let sizing_lesson = lessons.iter().find(|l| l.lesson_type == "pm_strength" && l.scope_subset.depth() == 1);
    if let Some(lesson) = sizing_lesson {
        let has_sizing_override = overrides
            .iter()
            .any(|o| o.scope_subset == lesson.scope_subset && matches!(o.action_category, OverrideCategory::Entry));
        assert_eq!(has_sizing_override, lesson.stats.edge_raw.abs() >= 0.05);
    }
}
