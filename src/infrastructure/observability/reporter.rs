//! Push-based metrics reporter for the regime engine.
//!
//! Periodically outputs metrics as structured JSON to stdout. No HTTP
//! server, no incoming requests — only outbound data, same as the
//! Prometheus registry this wraps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::regime::ports::StorageGateway;
use crate::domain::regime::position::PositionStatus;
use crate::infrastructure::observability::metrics::Metrics;

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub positions: PositionsSnapshot,
}

#[derive(Serialize)]
pub struct PositionsSnapshot {
    pub active: usize,
    pub regime_driver: usize,
    pub closed: usize,
}

/// Push-based metrics reporter. Outputs a JSON snapshot every `interval`
/// and updates the Prometheus registry it wraps so `/metrics`-style
/// scraping (if ever wired up) stays current between pushes.
pub struct MetricsReporter {
    storage: Arc<dyn StorageGateway>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(storage: Arc<dyn StorageGateway>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            storage,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "starting push-based metrics reporter");

        loop {
            tokio::time::sleep(self.interval).await;

            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{json}");
                        info!(
                            active = snapshot.positions.active,
                            regime_driver = snapshot.positions.regime_driver,
                            uptime_seconds = snapshot.uptime_seconds,
                            "metrics snapshot"
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let uptime = self.start_time.elapsed().as_secs();

        let active = self
            .storage
            .get_positions_by_status(PositionStatus::Active, None)
            .await?
            .len();
        let regime_driver = self
            .storage
            .get_positions_by_status(PositionStatus::RegimeDriver, None)
            .await?
            .len();
        let closed = self
            .storage
            .get_positions_by_status(PositionStatus::Closed, None)
            .await?
            .len();

        self.metrics.set_positions_count("active", active as f64);
        self.metrics
            .set_positions_count("regime_driver", regime_driver as f64);
        self.metrics.set_positions_count("closed", closed as f64);
        self.metrics.uptime_seconds.set(uptime as f64);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            positions: PositionsSnapshot {
                active,
                regime_driver,
                closed,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_with_expected_fields() {
        let snapshot = MetricsSnapshot {
            timestamp: "2026-01-10T10:00:00Z".to_string(),
            uptime_seconds: 3600,
            version: "0.4.0".to_string(),
            positions: PositionsSnapshot {
                active: 12,
                regime_driver: 16,
                closed: 5,
            },
        };

        let json = serde_json::to_string(&snapshot).expect("failed to serialize");
        assert!(json.contains("\"active\":12"));
        assert!(json.contains("\"regime_driver\":16"));
    }
}
