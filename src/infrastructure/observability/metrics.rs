//! Prometheus metrics definitions for the regime engine.
//!
//! All metrics use the `regime_` prefix and are read-only from the rest of
//! the process's perspective; only this module's setters mutate them.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

/// Prometheus metrics for the regime/learning pipeline.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Bars ingested, by driver/symbol and timeframe.
    pub bars_ingested_total: CounterVec,
    /// Gaps detected in a bar series, by driver/symbol and timeframe.
    pub bar_gaps_detected_total: CounterVec,
    /// Positions currently tracked, by status.
    pub positions_count: GenericGaugeVec<AtomicF64>,
    /// Current Uptrend Engine v4 state distribution, by timeframe and state.
    pub engine_state_gauge: GenericGaugeVec<AtomicF64>,
    /// Regime A (alignment) value per bucket driver.
    pub regime_a_value: GenericGaugeVec<AtomicF64>,
    /// Regime E (exitness) value per bucket driver.
    pub regime_e_value: GenericGaugeVec<AtomicF64>,
    /// Trade events appended to the learning log.
    pub trade_events_logged_total: CounterVec,
    /// Lessons mined per run, by lesson_type.
    pub lessons_mined_total: CounterVec,
    /// Overrides materialized per run, by category.
    pub overrides_materialized_total: CounterVec,
    /// Candle-source fetch latency.
    pub candle_fetch_latency_seconds: HistogramVec,
    /// Circuit breaker status per source (0=closed, 1=open, 0.5=half-open).
    pub circuit_breaker_status: GenericGaugeVec<AtomicF64>,
    /// Storage errors, by operation and error kind.
    pub storage_errors_total: CounterVec,
    /// Uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let bars_ingested_total = CounterVec::new(
            Opts::new("regime_bars_ingested_total", "Total bars ingested"),
            &["driver", "timeframe", "source"],
        )?;
        registry.register(Box::new(bars_ingested_total.clone()))?;

        let bar_gaps_detected_total = CounterVec::new(
            Opts::new("regime_bar_gaps_detected_total", "Total bar-series gaps detected"),
            &["driver", "timeframe"],
        )?;
        registry.register(Box::new(bar_gaps_detected_total.clone()))?;

        let positions_count = GaugeVec::new(
            Opts::new("regime_positions_count", "Tracked positions by status"),
            &["status"],
        )?;
        registry.register(Box::new(positions_count.clone()))?;

        let engine_state_gauge = GaugeVec::new(
            Opts::new(
                "regime_engine_state",
                "Uptrend Engine v4 state distribution (1 if current, else 0)",
            ),
            &["timeframe", "state"],
        )?;
        registry.register(Box::new(engine_state_gauge.clone()))?;

        let regime_a_value = GaugeVec::new(
            Opts::new("regime_a_value", "Regime alignment (A) value per bucket"),
            &["bucket"],
        )?;
        registry.register(Box::new(regime_a_value.clone()))?;

        let regime_e_value = GaugeVec::new(
            Opts::new("regime_e_value", "Regime exitness (E) value per bucket"),
            &["bucket"],
        )?;
        registry.register(Box::new(regime_e_value.clone()))?;

        let trade_events_logged_total = CounterVec::new(
            Opts::new(
                "regime_trade_events_logged_total",
                "Total trade events appended to the learning log",
            ),
            &["module", "action_category"],
        )?;
        registry.register(Box::new(trade_events_logged_total.clone()))?;

        let lessons_mined_total = CounterVec::new(
            Opts::new("regime_lessons_mined_total", "Total lessons mined per run"),
            &["lesson_type"],
        )?;
        registry.register(Box::new(lessons_mined_total.clone()))?;

        let overrides_materialized_total = CounterVec::new(
            Opts::new(
                "regime_overrides_materialized_total",
                "Total overrides written per run",
            ),
            &["category"],
        )?;
        registry.register(Box::new(overrides_materialized_total.clone()))?;

        let candle_fetch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "regime_candle_fetch_latency_seconds",
                "Candle source fetch latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["source", "timeframe"],
        )?;
        registry.register(Box::new(candle_fetch_latency_seconds.clone()))?;

        let circuit_breaker_status = GaugeVec::new(
            Opts::new(
                "regime_circuit_breaker_status",
                "Circuit breaker status (0=closed, 0.5=half-open, 1=open)",
            ),
            &["source"],
        )?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let storage_errors_total = CounterVec::new(
            Opts::new("regime_storage_errors_total", "Storage gateway errors"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(storage_errors_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "regime_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            bars_ingested_total,
            bar_gaps_detected_total,
            positions_count,
            engine_state_gauge,
            regime_a_value,
            regime_e_value,
            trade_events_logged_total,
            lessons_mined_total,
            overrides_materialized_total,
            candle_fetch_latency_seconds,
            circuit_breaker_status,
            storage_errors_total,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn record_bar_ingested(&self, driver: &str, timeframe: &str, source: &str) {
        self.bars_ingested_total
            .with_label_values(&[driver, timeframe, source])
            .inc();
    }

    pub fn record_gap(&self, driver: &str, timeframe: &str) {
        self.bar_gaps_detected_total
            .with_label_values(&[driver, timeframe])
            .inc();
    }

    pub fn set_positions_count(&self, status: &str, value: f64) {
        self.positions_count.with_label_values(&[status]).set(value);
    }

    pub fn set_engine_state(&self, timeframe: &str, state: &str) {
        for s in ["S0", "S1", "S2", "S3", "S4"] {
            self.engine_state_gauge
                .with_label_values(&[timeframe, s])
                .set(if s == state { 1.0 } else { 0.0 });
        }
    }

    pub fn set_regime_ae(&self, bucket: &str, a: f64, e: f64) {
        self.regime_a_value.with_label_values(&[bucket]).set(a);
        self.regime_e_value.with_label_values(&[bucket]).set(e);
    }

    pub fn record_trade_event(&self, module: &str, action_category: &str) {
        self.trade_events_logged_total
            .with_label_values(&[module, action_category])
            .inc();
    }

    pub fn record_lessons_mined(&self, lesson_type: &str, count: u64) {
        self.lessons_mined_total
            .with_label_values(&[lesson_type])
            .inc_by(count as f64);
    }

    pub fn record_override_materialized(&self, category: &str) {
        self.overrides_materialized_total
            .with_label_values(&[category])
            .inc();
    }

    pub fn observe_candle_fetch_latency(&self, source: &str, timeframe: &str, seconds: f64) {
        self.candle_fetch_latency_seconds
            .with_label_values(&[source, timeframe])
            .observe(seconds);
    }

    pub fn set_circuit_breaker_status(&self, source: &str, value: f64) {
        self.circuit_breaker_status
            .with_label_values(&[source])
            .set(value);
    }

    pub fn record_storage_error(&self, operation: &str, kind: &str) {
        self.storage_errors_total
            .with_label_values(&[operation, kind])
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation_registers_all_families() {
        let metrics = Metrics::new().expect("failed to create metrics");
        assert!(metrics.render().contains("regime_"));
    }

    #[test]
    fn engine_state_gauge_sets_exactly_one_hot() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.set_engine_state("1h", "S3");
        let output = metrics.render();
        assert!(output.contains("regime_engine_state{state=\"S3\",timeframe=\"1h\"} 1"));
        assert!(output.contains("regime_engine_state{state=\"S0\",timeframe=\"1h\"} 0"));
    }

    #[test]
    fn bar_ingestion_counter_increments() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.record_bar_ingested("BTC", "1m", "binance");
        metrics.record_bar_ingested("BTC", "1m", "binance");
        let output = metrics.render();
        assert!(output.contains("regime_bars_ingested_total"));
    }
}
