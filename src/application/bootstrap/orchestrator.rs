//! Bootstrap: idempotent startup verification. Runs once; downstream
//! recurring tasks must not start until it reports a non-`Failed` status.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::application::regime::{compute_a_e, compute_ta_feature_block, evaluate_tick, PriceCollector};
use crate::domain::errors::BootstrapError;
use crate::domain::regime::{
    EngineConstants, EngineMeta, Ohlc, Position, PositionStatus, StorageGateway, Timeframe,
};

/// Required drivers: their failure to reach minimum bars is a degraded
/// state rather than a mere warning.
pub const REQUIRED_DRIVERS: &[&str] = &["BTC", "ALT"];

/// All drivers a fresh book must carry a regime-driver position for, one
/// per timeframe.
pub const ALL_DRIVERS: &[&str] = &["BTC", "ALT", "nano", "small", "mid", "big", "BTC.d", "USDT.d"];

const WALLET_FRESHNESS_MAX_MINUTES: i64 = 10;
const PULSE_FRESHNESS_MAX_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStatus {
    Ok,
    Partial,
    Degraded,
    Failed,
}

impl BootstrapStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            BootstrapStatus::Failed => 1,
            _ => 0,
        }
    }
}

/// Final report: per-step outcomes plus the overall classification.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub warnings: Vec<String>,
    pub required_driver_failures: Vec<String>,
    pub step_failures: usize,
    pub total_steps: usize,
    pub driver_positions_created: usize,
    pub bars_backfilled: usize,
    pub drivers_ta_computed: usize,
    pub drivers_state_computed: usize,
}

impl BootstrapReport {
    pub fn status(&self) -> BootstrapStatus {
        if self.total_steps > 0 && self.step_failures * 2 > self.total_steps {
            return BootstrapStatus::Failed;
        }
        if !self.required_driver_failures.is_empty() {
            return BootstrapStatus::Degraded;
        }
        if !self.warnings.is_empty() {
            return BootstrapStatus::Partial;
        }
        BootstrapStatus::Ok
    }

    /// `working / degraded / failed` summary line for the bootstrap
    /// contract surfaced to operators and the scheduler.
    pub fn summary_line(&self) -> String {
        let working = self.total_steps.saturating_sub(self.step_failures);
        format!(
            "bootstrap: {} working / {} degraded / {} failed (status={:?})",
            working,
            self.required_driver_failures.len(),
            self.step_failures,
            self.status()
        )
    }
}

/// External wallet-freshness check, injected so the core never depends on
/// a concrete wallet/RPC adapter. `None` downgrades step 2 to a warning
/// rather than a check.
pub trait WalletFreshnessCheck: Send + Sync {
    fn last_balance_refresh_age_minutes(&self) -> Option<i64>;
}

/// Placeholder for the live-stream ingester. Bootstrap only constructs and
/// validates this handle — starting it is the runtime scheduler's job.
#[derive(Debug, Clone, Copy)]
pub struct LiveStreamIngesterHandle {
    pub ready: bool,
}

/// Candle sources available to bootstrap for the majors and dominance
/// drivers that have a direct external feed. Composite drivers (`ALT` and
/// the market-cap buckets) have no direct feed — they're rolled up from
/// already-stored component bars, so their backfill step only recomputes
/// whatever composite is derivable from what's already in storage.
pub struct BootstrapSources {
    pub btc: Vec<Arc<dyn crate::domain::regime::CandleSource>>,
    pub btc_dominance: Vec<Arc<dyn crate::domain::regime::CandleSource>>,
    pub usdt_dominance: Vec<Arc<dyn crate::domain::regime::CandleSource>>,
}

pub struct BootstrapOrchestrator {
    storage: Arc<dyn StorageGateway>,
    sources: BootstrapSources,
    book_id: String,
    engine_constants: EngineConstants,
    wallet_check: Option<Arc<dyn WalletFreshnessCheck>>,
}

impl BootstrapOrchestrator {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        sources: BootstrapSources,
        book_id: impl Into<String>,
        engine_constants: EngineConstants,
        wallet_check: Option<Arc<dyn WalletFreshnessCheck>>,
    ) -> Self {
        Self {
            storage,
            sources,
            book_id: book_id.into(),
            engine_constants,
            wallet_check,
        }
    }

    fn collector_for(&self, driver: &str) -> Option<PriceCollector> {
        let sources = match driver {
            "BTC" => &self.sources.btc,
            "BTC.d" => &self.sources.btc_dominance,
            "USDT.d" => &self.sources.usdt_dominance,
            _ => return None,
        };
        if sources.is_empty() {
            return None;
        }
        Some(PriceCollector::new(self.storage.clone(), sources.clone(), self.book_id.clone()))
    }

    /// Runs the full 9-step sequence. Never returns `Err` for degraded
    /// conditions — those are folded into the report; only an
    /// unrecoverable setup error (e.g. the storage gateway itself being
    /// unreachable) returns `Err`.
    pub async fn run(&self) -> Result<BootstrapReport, BootstrapError> {
        let mut report = BootstrapReport {
            total_steps: 9,
            ..Default::default()
        };

        self.step1_verify_tables(&mut report).await;
        self.step2_wallet_freshness(&mut report);
        self.step3_verify_pulses(&mut report).await;
        let ingester = self.step4_prepare_live_ingester(&mut report);
        self.step5_ensure_driver_positions(&mut report).await;
        self.step6_backfill(&mut report).await;
        self.step7_update_bars_count(&mut report).await;
        self.step8_compute_ta(&mut report).await;
        self.step9_compute_states(&mut report).await;

        info!(ready = ingester.ready, "{}", report.summary_line());
        Ok(report)
    }

    async fn step1_verify_tables(&self, report: &mut BootstrapReport) {
        let mut failed = false;
        if let Err(err) = self.storage.get_active_positions(None).await {
            failed = true;
            error!(target = "errors", %err, "positions table check failed");
        }
        if let Err(err) = self.storage.get_trade_events(None, 1, None).await {
            failed = true;
            error!(target = "errors", %err, "pattern_trade_events table check failed");
        }
        if let Err(err) = self.storage.get_active_lessons("pm", "pm_strength").await {
            failed = true;
            error!(target = "errors", %err, "learning_lessons table check failed");
        }
        if failed {
            report.step_failures += 1;
            report.warnings.push("required-table check failed".to_string());
        }
    }

    fn step2_wallet_freshness(&self, report: &mut BootstrapReport) {
        match &self.wallet_check {
            Some(check) => match check.last_balance_refresh_age_minutes() {
                Some(age) if age <= WALLET_FRESHNESS_MAX_MINUTES => {}
                Some(age) => {
                    warn!(age_minutes = age, "wallet balances stale");
                    report.warnings.push(format!("wallet balances stale ({age}m)"));
                }
                None => {
                    warn!("wallet balances unavailable");
                    report.warnings.push("wallet balances unavailable".to_string());
                }
            },
            None => {
                warn!("no wallet freshness check configured");
                report.warnings.push("wallet freshness check not configured".to_string());
            }
        }
    }

    async fn step3_verify_pulses(&self, report: &mut BootstrapReport) {
        let now = Utc::now().timestamp();
        for driver in ["BTC", "ALT"] {
            match self
                .storage
                .get_driver_bars(driver, &self.book_id, Timeframe::M1, None, None, Some(1))
                .await
            {
                Ok(bars) => {
                    if let Some(bar) = bars.last() {
                        let age_minutes = (now - bar.timestamp) / 60;
                        if age_minutes > PULSE_FRESHNESS_MAX_MINUTES {
                            warn!(driver, age_minutes, "1m price pulse stale");
                            report.warnings.push(format!("{driver} 1m pulse stale ({age_minutes}m)"));
                        }
                    } else {
                        report.warnings.push(format!("{driver} has no 1m bars yet"));
                    }
                }
                Err(err) => {
                    warn!(driver, %err, "failed to read pulse freshness");
                    report.warnings.push(format!("{driver} pulse check failed: {err}"));
                }
            }
        }
    }

    fn step4_prepare_live_ingester(&self, _report: &mut BootstrapReport) -> LiveStreamIngesterHandle {
        info!("live stream ingester prepared (not started)");
        LiveStreamIngesterHandle { ready: true }
    }

    async fn step5_ensure_driver_positions(&self, report: &mut BootstrapReport) {
        let now = Utc::now();
        for &driver in ALL_DRIVERS {
            for &tf in &Timeframe::ALL {
                match self
                    .storage
                    .get_position_by_ticker(&driver.to_uppercase(), tf, PositionStatus::RegimeDriver)
                    .await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        let position = Position::new_regime_driver(driver, tf, &self.book_id, now);
                        if let Err(err) = self.storage.upsert_position(&position).await {
                            self.record_driver_failure(report, driver, &err.to_string());
                        } else {
                            report.driver_positions_created += 1;
                        }
                    }
                    Err(err) => {
                        self.record_driver_failure(report, driver, &err.to_string());
                    }
                }
            }
        }
    }

    fn record_driver_failure(&self, report: &mut BootstrapReport, driver: &str, reason: &str) {
        error!(driver, reason, "driver position setup failed");
        if REQUIRED_DRIVERS.contains(&driver) {
            report.required_driver_failures.push(driver.to_string());
        } else {
            report.warnings.push(format!("{driver}: {reason}"));
        }
    }

    async fn step6_backfill(&self, report: &mut BootstrapReport) {
        let now = Utc::now().timestamp();
        for &driver in ALL_DRIVERS {
            for &tf in &Timeframe::ALL {
                let since = now - tf.backfill_cap_bars() as i64 * tf.seconds();
                if let Some(collector) = self.collector_for(driver) {
                    match collector.backfill(driver, driver, tf, since).await {
                        Ok(n) => report.bars_backfilled += n,
                        Err(err) => self.record_driver_failure(report, driver, &err.to_string()),
                    }
                } else if driver == "ALT" {
                    match self.alt_collector().compute_and_store_alt_composite(tf, since).await {
                        Ok(n) => report.bars_backfilled += n,
                        Err(err) => self.record_driver_failure(report, driver, &err.to_string()),
                    }
                } else {
                    // Market-cap bucket composites depend on lowcap membership
                    // ranking that lives outside this core (external market-data
                    // collaborator); bootstrap only warns that the bucket is
                    // starved until that collaborator populates component bars.
                    report.warnings.push(format!("{driver}: no backfill source configured"));
                }
            }
        }
    }

    fn alt_collector(&self) -> PriceCollector {
        PriceCollector::new(self.storage.clone(), Vec::new(), self.book_id.clone())
    }

    async fn step7_update_bars_count(&self, report: &mut BootstrapReport) {
        for &driver in ALL_DRIVERS {
            for &tf in &Timeframe::ALL {
                let bars = match self
                    .storage
                    .get_driver_bars(driver, &self.book_id, tf, None, None, None)
                    .await
                {
                    Ok(bars) => bars,
                    Err(err) => {
                        self.record_driver_failure(report, driver, &err.to_string());
                        continue;
                    }
                };
                let ticker = driver.to_uppercase();
                match self.storage.get_position_by_ticker(&ticker, tf, PositionStatus::RegimeDriver).await {
                    Ok(Some(mut position)) => {
                        position.bars_count = bars.len() as u32;
                        position.updated_at = Utc::now();
                        if let Err(err) = self.storage.upsert_position(&position).await {
                            self.record_driver_failure(report, driver, &err.to_string());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => self.record_driver_failure(report, driver, &err.to_string()),
                }
            }
        }
    }

    async fn step8_compute_ta(&self, report: &mut BootstrapReport) {
        for &driver in ALL_DRIVERS {
            for &tf in &Timeframe::ALL {
                let ticker = driver.to_uppercase();
                let position = match self
                    .storage
                    .get_position_by_ticker(&ticker, tf, PositionStatus::RegimeDriver)
                    .await
                {
                    Ok(Some(p)) => p,
                    Ok(None) => continue,
                    Err(err) => {
                        self.record_driver_failure(report, driver, &err.to_string());
                        continue;
                    }
                };
                if (position.bars_count as usize) < tf.min_bars() {
                    continue;
                }
                let bars = match self
                    .storage
                    .get_driver_bars(driver, &self.book_id, tf, None, None, None)
                    .await
                {
                    Ok(bars) => bars,
                    Err(err) => {
                        self.record_driver_failure(report, driver, &err.to_string());
                        continue;
                    }
                };
                let ohlc: Vec<Ohlc> = bars.iter().map(|b| b.ohlc_usd).collect();
                let key = format!("{driver}:{}", tf.as_str());
                match compute_ta_feature_block(&key, tf, &ohlc, bars.last().map(|b| b.source).unwrap_or(crate::domain::regime::BarSource::Composite)) {
                    Ok(ta) => {
                        let mut features = match self.storage.read_features(position.id).await {
                            Ok(f) => f,
                            Err(_) => Default::default(),
                        };
                        features.ta = Some(ta);
                        if let Err(err) = self.storage.write_features(position.id, &features).await {
                            self.record_driver_failure(report, driver, &err.to_string());
                        } else {
                            report.drivers_ta_computed += 1;
                        }
                    }
                    Err(err) => {
                        warn!(driver, tf = tf.as_str(), %err, "TA skipped: insufficient bars");
                    }
                }
            }
        }
    }

    async fn step9_compute_states(&self, report: &mut BootstrapReport) {
        for &driver in ALL_DRIVERS {
            for &tf in &Timeframe::ALL {
                let ticker = driver.to_uppercase();
                let mut position = match self
                    .storage
                    .get_position_by_ticker(&ticker, tf, PositionStatus::RegimeDriver)
                    .await
                {
                    Ok(Some(p)) => p,
                    Ok(None) => continue,
                    Err(err) => {
                        self.record_driver_failure(report, driver, &err.to_string());
                        continue;
                    }
                };
                let mut features = match self.storage.read_features(position.id).await {
                    Ok(f) => f,
                    Err(_) => continue,
                };
                let Some(ta) = features.ta.clone() else { continue };

                let recent_bars: Vec<Ohlc> = match self
                    .storage
                    .get_driver_bars(driver, &self.book_id, tf, None, None, Some(6))
                    .await
                {
                    Ok(bars) => bars.iter().map(|b| b.ohlc_usd).collect(),
                    Err(_) => Vec::new(),
                };

                let mut meta = features.uptrend_engine_v4_meta.clone().unwrap_or_default();
                let previous = features.uptrend_engine_v4.clone();
                let geometry = features.geometry.clone();
                let payload = evaluate_tick(
                    &ta,
                    &recent_bars,
                    tf,
                    previous.as_ref(),
                    &mut meta,
                    &self.engine_constants,
                    geometry.as_deref(),
                    Utc::now(),
                );

                position.state = payload.state;
                position.updated_at = Utc::now();
                features.uptrend_engine_v4 = Some(payload);
                features.uptrend_engine_v4_meta = Some(meta);

                if let Err(err) = self.storage.write_features(position.id, &features).await {
                    self.record_driver_failure(report, driver, &err.to_string());
                    continue;
                }
                if let Err(err) = self.storage.upsert_position(&position).await {
                    self.record_driver_failure(report, driver, &err.to_string());
                    continue;
                }
                report.drivers_state_computed += 1;
            }
        }
    }
}

/// Full A/E aggregation across drivers happens in the recurring scheduler,
/// not bootstrap, but bootstrap verifies the calculator's input shape is
/// reachable by calling it with empty inputs (a pure, side-effect-free
/// smoke check).
pub fn smoke_check_regime_ae() -> (f64, f64) {
    compute_a_e(&Default::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ok_when_no_warnings_or_failures() {
        let report = BootstrapReport {
            total_steps: 9,
            ..Default::default()
        };
        assert_eq!(report.status(), BootstrapStatus::Ok);
    }

    #[test]
    fn status_partial_when_only_warnings() {
        let report = BootstrapReport {
            total_steps: 9,
            warnings: vec!["wallet freshness check not configured".to_string()],
            ..Default::default()
        };
        assert_eq!(report.status(), BootstrapStatus::Partial);
    }

    #[test]
    fn status_degraded_when_required_driver_fails() {
        let report = BootstrapReport {
            total_steps: 9,
            required_driver_failures: vec!["BTC".to_string()],
            ..Default::default()
        };
        assert_eq!(report.status(), BootstrapStatus::Degraded);
    }

    #[test]
    fn status_failed_when_majority_of_steps_fail() {
        let report = BootstrapReport {
            total_steps: 9,
            step_failures: 5,
            ..Default::default()
        };
        assert_eq!(report.status(), BootstrapStatus::Failed);
    }

    #[test]
    fn smoke_check_returns_zero_for_empty_inputs() {
        assert_eq!(smoke_check_regime_ae(), (0.0, 0.0));
    }
}
