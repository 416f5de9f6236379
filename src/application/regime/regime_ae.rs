//! Regime Aggressiveness/Exitness calculator: projects driver engine
//! state into two per-token scalars, `A` (aggressiveness) and `E`
//! (exitness), consumed by the (external) execution collaborator when
//! sizing and exiting positions. Pure function — no I/O, no mutation.

use crate::domain::regime::{EnginePayload, EngineState, Timeframe};

/// One driver's payload at one timeframe, tagged with the driver's name
/// for diagnostics.
#[derive(Debug, Clone)]
pub struct DriverSnapshot {
    pub driver: String,
    pub timeframe: Timeframe,
    pub payload: EnginePayload,
}

/// Full set of driver context a token's A/E computation draws on: its
/// macro anchor (BTC), its peer composite (ALT), the market-cap bucket
/// it belongs to, and the two dominance series.
#[derive(Debug, Clone, Default)]
pub struct AeInputs {
    pub btc: Vec<DriverSnapshot>,
    pub alt: Vec<DriverSnapshot>,
    pub bucket: Vec<DriverSnapshot>,
    pub btc_dominance: Vec<DriverSnapshot>,
    pub usdt_dominance: Vec<DriverSnapshot>,
}

/// Macro (1d) carries the most weight, meso (1h) next, micro (1m) least —
/// higher timeframes represent the more durable regime signal.
fn timeframe_weight(tf: Timeframe) -> f64 {
    match tf {
        Timeframe::D1 => 1.0,
        Timeframe::H1 => 0.6,
        Timeframe::M1 => 0.3,
    }
}

/// Per-driver additive terms into (A, E), before timeframe weighting.
/// Trending states with strength/boost push A up; defensive/bearish
/// states and emergency exits push E up.
fn driver_terms(payload: &EnginePayload) -> (f64, f64) {
    let ts = payload.scores.ts_with_boost.unwrap_or(payload.scores.ts);
    match payload.state {
        EngineState::S3 => {
            let mut a = 0.5 * ts + 0.3 * (1.0 - payload.scores.ox);
            let mut e = 0.4 * payload.scores.ox;
            if payload.flags.emergency_exit.active {
                e += 0.5;
                a *= 0.5;
            }
            if payload.flags.fakeout_recovery {
                a += 0.1;
            }
            (a.clamp(0.0, 1.0), e.clamp(0.0, 1.0))
        }
        EngineState::S2 => {
            let mut a = 0.25 * ts;
            let mut e = 0.25;
            if payload.flags.trim_flag {
                e += 0.2;
            }
            if payload.flags.buy_signal {
                a += 0.15;
            }
            (a.clamp(0.0, 1.0), e.clamp(0.0, 1.0))
        }
        EngineState::S1 => {
            let a = if payload.flags.buy_signal { 0.4 } else { 0.15 };
            (a, 0.1)
        }
        EngineState::S0 => (0.0, 0.35),
        EngineState::S4 => (0.1, 0.1),
    }
}

fn accumulate(snapshots: &[DriverSnapshot], weight_mult: f64) -> (f64, f64, f64) {
    let mut a_sum = 0.0;
    let mut e_sum = 0.0;
    let mut weight_total = 0.0;
    for snap in snapshots {
        let w = timeframe_weight(snap.timeframe) * weight_mult;
        let (a, e) = driver_terms(&snap.payload);
        a_sum += w * a;
        e_sum += w * e;
        weight_total += w;
    }
    (a_sum, e_sum, weight_total)
}

/// Computes `(A, E)` clamped to `[0, 1]`. USDT dominance is inverted and
/// weighted 3x relative to the other drivers: a strengthening USDT
/// dominance regime (capital fleeing into stables) is a pure exit signal.
pub fn compute_a_e(inputs: &AeInputs) -> (f64, f64) {
    let mut a_total = 0.0;
    let mut e_total = 0.0;
    let mut weight_total = 0.0;

    for (snapshots, mult) in [
        (&inputs.btc, 1.0),
        (&inputs.alt, 1.0),
        (&inputs.bucket, 1.0),
        (&inputs.btc_dominance, 1.0),
    ] {
        let (a, e, w) = accumulate(snapshots, mult);
        a_total += a;
        e_total += e;
        weight_total += w;
    }

    // USDT dominance strengthening is purely bearish for risk assets:
    // its A contribution is dropped and its E contribution triples.
    for snap in &inputs.usdt_dominance {
        let w = timeframe_weight(snap.timeframe) * 3.0;
        let (_a, e) = driver_terms(&snap.payload);
        e_total += w * e;
        weight_total += w;
    }

    if weight_total <= 0.0 {
        return (0.0, 0.0);
    }
    (
        (a_total / weight_total).clamp(0.0, 1.0),
        (e_total / weight_total).clamp(0.0, 1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::regime::EnginePayload;
    use chrono::Utc;

    fn payload(state: EngineState) -> EnginePayload {
        EnginePayload::new(state, Timeframe::D1, Utc::now())
    }

    fn snapshot(driver: &str, tf: Timeframe, state: EngineState) -> DriverSnapshot {
        DriverSnapshot {
            driver: driver.to_string(),
            timeframe: tf,
            payload: payload(state),
        }
    }

    #[test]
    fn empty_inputs_yield_zero() {
        let (a, e) = compute_a_e(&AeInputs::default());
        assert_eq!(a, 0.0);
        assert_eq!(e, 0.0);
    }

    #[test]
    fn trending_btc_and_alt_raise_aggressiveness() {
        let inputs = AeInputs {
            btc: vec![snapshot("btc", Timeframe::D1, EngineState::S3)],
            alt: vec![snapshot("alt", Timeframe::D1, EngineState::S3)],
            ..Default::default()
        };
        let (a, e) = compute_a_e(&inputs);
        assert!(a > 0.0);
        assert!(a > e);
    }

    #[test]
    fn usdt_dominance_uptrend_dominates_exitness() {
        let mut usdt_snap = snapshot("usdt_d", Timeframe::D1, EngineState::S3);
        usdt_snap.payload.scores.ox = 0.9;
        let inputs = AeInputs {
            btc: vec![snapshot("btc", Timeframe::D1, EngineState::S3)],
            usdt_dominance: vec![usdt_snap],
            ..Default::default()
        };
        let (_a, e) = compute_a_e(&inputs);
        assert!(e > 0.0);
    }

    #[test]
    fn outputs_stay_within_unit_range() {
        let inputs = AeInputs {
            btc: vec![snapshot("btc", Timeframe::D1, EngineState::S3)],
            alt: vec![snapshot("alt", Timeframe::H1, EngineState::S2)],
            bucket: vec![snapshot("mid", Timeframe::M1, EngineState::S0)],
            btc_dominance: vec![snapshot("btc_d", Timeframe::D1, EngineState::S1)],
            usdt_dominance: vec![snapshot("usdt_d", Timeframe::D1, EngineState::S3)],
        };
        let (a, e) = compute_a_e(&inputs);
        assert!((0.0..=1.0).contains(&a));
        assert!((0.0..=1.0).contains(&e));
    }
}
