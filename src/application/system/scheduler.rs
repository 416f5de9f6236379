//! The recurring-task scheduler: a small set of cooperating tasks on the
//! tokio runtime. Collector ticks per timeframe, a TA+Engine task offset
//! shortly after each collector tick, a composite/dominance rollup task,
//! and the three learning-loop jobs. Bootstrap runs first and gates
//! everything else — downstream tasks only start once it reports a
//! non-`Failed` status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::application::bootstrap::{BootstrapOrchestrator, BootstrapStatus};
use crate::application::learning::{
    cluster_lessons, estimate_half_lives, log_closed_trade, materialize_overrides, mine_lessons,
    mine_tuning_rate_lessons, suggest_regime_weights, PmActionStrand,
};
use crate::application::regime::{compute_ta_feature_block, evaluate_tick, PriceCollector};
use crate::config::{Config, TaskCadence};
use crate::domain::regime::{Ohlc, Position, PositionStatus, StorageGateway, Timeframe};

/// Driver-group collectors the 1m/1h/1d collector tasks drive directly.
/// Composite drivers like `ALT` and the buckets are rolled up, not
/// fetched directly — see the rollup task.
pub struct DirectCollectors {
    pub by_driver: BTreeMap<String, PriceCollector>,
}

/// Everything the scheduler needs to run the recurring tasks. Built once
/// at startup, after bootstrap has reported a usable status.
pub struct RegimeScheduler {
    storage: Arc<dyn StorageGateway>,
    collectors: Arc<DirectCollectors>,
    book_id: String,
    cadence: TaskCadence,
    engine_constants: crate::domain::regime::EngineConstants,
    shutdown_rx: watch::Receiver<bool>,
}

impl RegimeScheduler {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        collectors: DirectCollectors,
        config: &Config,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            storage,
            collectors: Arc::new(collectors),
            book_id: config.book_id.0.clone(),
            cadence: config.cadence,
            engine_constants: config.engine_constants,
            shutdown_rx,
        }
    }

    /// Runs bootstrap, then spawns every recurring task and blocks until
    /// shutdown. Returns immediately with an error if bootstrap reports
    /// `Failed` — callers should exit with code 1.
    pub async fn run(self, bootstrap: &BootstrapOrchestrator, strand_rx: mpsc::Receiver<PmActionStrand>) -> anyhow::Result<()> {
        let report = bootstrap.run().await?;
        info!("{}", report.summary_line());
        if report.status() == BootstrapStatus::Failed {
            anyhow::bail!("bootstrap failed: {}", report.summary_line());
        }

        let mut handles = Vec::new();
        for &tf in &Timeframe::ALL {
            handles.push(tokio::spawn(collector_task(
                self.collectors.clone(),
                tf,
                self.shutdown_rx.clone(),
            )));
            handles.push(tokio::spawn(ta_engine_task(
                self.storage.clone(),
                self.book_id.clone(),
                tf,
                self.cadence.ta_task_offset_seconds,
                self.engine_constants,
                self.shutdown_rx.clone(),
            )));
        }
        handles.push(tokio::spawn(rollup_task(
            self.storage.clone(),
            self.book_id.clone(),
            self.cadence.composite_rollup_interval_seconds,
            self.shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(event_logger_task(
            self.storage.clone(),
            strand_rx,
            self.shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(miner_task(
            self.storage.clone(),
            self.cadence.miner_interval_hours,
            self.shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(materializer_task(
            self.storage.clone(),
            self.cadence.materializer_interval_hours,
            self.shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(meta_learning_task(
            self.storage.clone(),
            self.cadence.meta_learning_interval_hours,
            self.shutdown_rx.clone(),
        )));

        for handle in handles {
            if let Err(err) = handle.await {
                error!(%err, "recurring task panicked");
            }
        }
        Ok(())
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.changed().await;
}

/// One task per timeframe: ticks every driver this process collects
/// directly, with a fixed 100ms gap between drivers to avoid source-side
/// throttling.
async fn collector_task(collectors: Arc<DirectCollectors>, tf: Timeframe, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(tf.seconds().max(1) as u64));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (driver, collector) in &collectors.by_driver {
                    let written = collector.tick(driver, driver, tf).await;
                    info!(driver, timeframe = tf.as_str(), written, "collector tick");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!(timeframe = tf.as_str(), "collector task shutting down");
                return;
            }
        }
    }
}

/// Per-timeframe TA + Engine task. Wakes `offset_seconds` after the
/// timeframe boundary and walks every active position (tradables and
/// regime drivers alike), recomputing TA and the engine state.
async fn ta_engine_task(
    storage: Arc<dyn StorageGateway>,
    book_id: String,
    tf: Timeframe,
    offset_seconds: u64,
    engine_constants: crate::domain::regime::EngineConstants,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::time::sleep(Duration::from_secs(offset_seconds)).await;
    let mut ticker = interval(Duration::from_secs(tf.seconds().max(1) as u64));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = run_ta_engine_pass(&storage, &book_id, tf, &engine_constants).await {
                    warn!(timeframe = tf.as_str(), %err, "TA+Engine pass failed");
                }
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!(timeframe = tf.as_str(), "TA+Engine task shutting down");
                return;
            }
        }
    }
}

/// Runs one TA+Engine pass over every active position at `tf`. Exposed
/// (not just used by the recurring task) so the `regime-runner` CLI can
/// drive a single on-demand pass per §6's CLI surface.
pub async fn run_ta_engine_pass(
    storage: &Arc<dyn StorageGateway>,
    book_id: &str,
    tf: Timeframe,
    engine_constants: &crate::domain::regime::EngineConstants,
) -> anyhow::Result<()> {
    let positions = storage.get_active_positions(Some(tf)).await?;
    for position in positions {
        if let Err(err) = process_position_tick(storage, book_id, &position, tf, engine_constants).await {
            warn!(ticker = position.ticker, timeframe = tf.as_str(), %err, "position TA+Engine skipped");
        }
    }
    Ok(())
}

async fn process_position_tick(
    storage: &Arc<dyn StorageGateway>,
    book_id: &str,
    position: &Position,
    tf: Timeframe,
    engine_constants: &crate::domain::regime::EngineConstants,
) -> anyhow::Result<()> {
    let bars: Vec<Ohlc> = if position.is_regime_driver() {
        storage
            .get_driver_bars(&position.ticker, book_id, tf, None, None, None)
            .await?
            .into_iter()
            .map(|b| b.ohlc_usd)
            .collect()
    } else {
        storage
            .get_tradable_bars(&position.token_contract, &position.chain, tf, None, None, None)
            .await?
            .into_iter()
            .map(|b| b.ohlc_usd)
            .collect()
    };

    if bars.len() < tf.min_bars() {
        return Ok(());
    }

    let key = format!("{}:{}", position.ticker, tf.as_str());
    let source = crate::domain::regime::BarSource::Composite;
    let ta = compute_ta_feature_block(&key, tf, &bars, source)?;

    let mut features = storage.read_features(position.id).await.unwrap_or_default();
    features.ta = Some(ta.clone());

    let recent_bars = &bars[bars.len().saturating_sub(6)..];
    let mut meta = features.uptrend_engine_v4_meta.clone().unwrap_or_default();
    let previous = features.uptrend_engine_v4.clone();
    let geometry = features.geometry.clone();
    let payload = evaluate_tick(
        &ta,
        recent_bars,
        tf,
        previous.as_ref(),
        &mut meta,
        engine_constants,
        geometry.as_deref(),
        Utc::now(),
    );

    let mut position = position.clone();
    position.state = payload.state;
    position.bars_count = bars.len() as u32;
    position.updated_at = Utc::now();
    features.uptrend_engine_v4 = Some(payload);
    features.uptrend_engine_v4_meta = Some(meta);

    storage.write_features(position.id, &features).await?;
    storage.upsert_position(&position).await?;
    Ok(())
}

/// Rolls 1m dominance bars up to 1h/1d, at a fixed 1 minute cadence.
async fn rollup_task(storage: Arc<dyn StorageGateway>, book_id: String, interval_seconds: u64, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let collector = PriceCollector::new(storage.clone(), Vec::new(), book_id.clone());
                let since = Utc::now().timestamp() - 3 * Timeframe::D1.seconds();
                for driver in ["BTC.d", "USDT.d"] {
                    if let Err(err) = collector.rollup_dominance(driver, Timeframe::M1, Timeframe::H1, since).await {
                        warn!(driver, %err, "dominance rollup to 1h failed");
                    }
                    if let Err(err) = collector.rollup_dominance(driver, Timeframe::H1, Timeframe::D1, since).await {
                        warn!(driver, %err, "dominance rollup to 1d failed");
                    }
                }
                if let Err(err) = collector.compute_and_store_alt_composite(Timeframe::M1, since).await {
                    warn!(%err, "ALT composite rollup failed");
                }
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("rollup task shutting down");
                return;
            }
        }
    }
}

/// Drains closed-trade strands fed by the (external) execution
/// collaborator and logs them to the append-only trade-event table.
/// Cadence here is event-driven rather than timer-driven: the task simply
/// waits on the channel and flushes every two hours, matching the event
/// logger's intended cadence at the aggregate level once the collaborator
/// batches its sends accordingly.
async fn event_logger_task(
    storage: Arc<dyn StorageGateway>,
    mut strand_rx: mpsc::Receiver<PmActionStrand>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut pending: Vec<PmActionStrand> = Vec::new();
    let mut ticker = interval(Duration::from_secs(2 * 3600));
    loop {
        tokio::select! {
            maybe_strand = strand_rx.recv() => {
                match maybe_strand {
                    Some(strand) => pending.push(strand),
                    None => {
                        info!("event logger channel closed");
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if pending.is_empty() {
                    continue;
                }
                let batch = std::mem::take(&mut pending);
                match log_closed_trade(&storage, &batch).await {
                    Ok(n) => info!(logged = n, "trade events logged"),
                    Err(err) => warn!(%err, "trade event logging failed"),
                }
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("event logger task shutting down");
                return;
            }
        }
    }
}

/// Mines lessons from the trade-event log on a fixed cadence. Materializer
/// is a separate task so a slow mining pass never blocks override refresh.
async fn miner_task(storage: Arc<dyn StorageGateway>, interval_hours: u64, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(interval_hours.max(1) * 3600));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = run_miner_pass(&storage).await {
                    warn!(%err, "lesson mining pass failed");
                }
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("miner task shutting down");
                return;
            }
        }
    }
}

/// One lesson-mining pass: reads recent trade events, mines strength and
/// tuning-rate lessons, upserts them. Exposed for the `tuning-miner` CLI.
pub async fn run_miner_pass(storage: &Arc<dyn StorageGateway>) -> anyhow::Result<()> {
    let events = storage
        .get_trade_events(None, crate::application::learning::miner::EVENT_LOOKBACK, None)
        .await?;
    let strength_lessons = mine_lessons("pm", &events);
    let tuning_lessons = mine_tuning_rate_lessons("pm", &events);
    info!(
        strength = strength_lessons.len(),
        tuning = tuning_lessons.len(),
        "lesson mining pass complete"
    );
    if !strength_lessons.is_empty() {
        storage.upsert_lessons(&strength_lessons).await?;
    }
    if !tuning_lessons.is_empty() {
        storage.upsert_lessons(&tuning_lessons).await?;
    }
    Ok(())
}

/// Materializes overrides from active lessons on a fixed cadence.
async fn materializer_task(storage: Arc<dyn StorageGateway>, interval_hours: u64, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(interval_hours.max(1) * 3600));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = run_materializer_pass(&storage).await {
                    warn!(%err, "materializer pass failed");
                }
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("materializer task shutting down");
                return;
            }
        }
    }
}

/// One materializer pass: reads active lessons, emits clamped overrides.
/// Exposed for the `learning-scheduler` CLI's `--once` mode.
pub async fn run_materializer_pass(storage: &Arc<dyn StorageGateway>) -> anyhow::Result<()> {
    let mut lessons = storage.get_active_lessons("pm", "pm_strength").await?;
    lessons.extend(storage.get_active_lessons("pm", "tuning_rates").await?);

    let overrides = materialize_overrides(&lessons, Utc::now());
    for row in &overrides {
        storage.upsert_override(row).await?;
    }
    info!(materialized = overrides.len(), "materializer pass complete");
    Ok(())
}

/// Weekly meta-learning jobs: half-life estimation, latent-factor
/// clustering, and regime-weight suggestion, all over the same active
/// lesson set. Half-lives are written back; clustering and weight
/// suggestions are advisory and only logged.
async fn meta_learning_task(storage: Arc<dyn StorageGateway>, interval_hours: u64, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(interval_hours.max(1) * 3600));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = run_meta_learning_pass(&storage).await {
                    warn!(%err, "meta-learning pass failed");
                }
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("meta-learning task shutting down");
                return;
            }
        }
    }
}

/// One meta-learning pass over active lessons. Exposed for the
/// `learning-scheduler` CLI's `--once` mode.
pub async fn run_meta_learning_pass(storage: &Arc<dyn StorageGateway>) -> anyhow::Result<()> {
    let mut lessons = storage.get_active_lessons("pm", "pm_strength").await?;
    lessons.extend(storage.get_active_lessons("pm", "tuning_rates").await?);

    let updated = estimate_half_lives(&mut lessons);
    if updated > 0 {
        storage.upsert_lessons(&lessons).await?;
    }

    let clusters = cluster_lessons(&lessons, 3);
    let _weights = suggest_regime_weights(&lessons);
    info!(
        lessons = lessons.len(),
        half_lives_updated = updated,
        clusters = clusters.len(),
        "meta-learning pass complete"
    );
    Ok(())
}

/// Spawns a task that flips the shutdown watch on SIGINT, mirroring the
/// teacher's ctrl_c handler.
pub fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received shutdown signal");
                let _ = tx.send(true);
            }
            Err(err) => {
                error!(%err, "unable to listen for shutdown signal");
            }
        }
    });
    rx
}
