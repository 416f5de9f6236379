//! Dominance feed: BTC.d and USDT.d, read as instantaneous percentage
//! points and replicated across OHLC per the driver bar's storage
//! contract (`collector::dominance_point`). CoinGecko's free `/global`
//! endpoint has no historical series, so `backfill` is necessarily a
//! best-effort no-op — the collector's backfill loop already tolerates a
//! source returning nothing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use tracing::warn;

use crate::application::regime::collector::dominance_point;
use crate::domain::regime::{BarSource, CandleSource, Kline, Timeframe};
use crate::infrastructure::core::{CircuitBreaker, HttpClientFactory};

const BASE_URL: &str = "https://api.coingecko.com/api/v3/global";

/// Which leg of `market_cap_percentage` this source tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DominanceKind {
    Btc,
    Usdt,
}

impl DominanceKind {
    fn percentage_key(self) -> &'static str {
        match self {
            DominanceKind::Btc => "btc",
            DominanceKind::Usdt => "usdt",
        }
    }

    pub fn driver_name(self) -> &'static str {
        match self {
            DominanceKind::Btc => "BTC.d",
            DominanceKind::Usdt => "USDT.d",
        }
    }
}

pub struct DominanceCandleSource {
    client: ClientWithMiddleware,
    breaker: CircuitBreaker,
    kind: DominanceKind,
}

impl DominanceCandleSource {
    pub fn new(kind: DominanceKind) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            breaker: CircuitBreaker::new("DominanceCandleSource", 5, 3, Duration::from_secs(60)),
            kind,
        }
    }

    async fn fetch_percentage(&self) -> anyhow::Result<f64> {
        let client = &self.client;
        let result = self
            .breaker
            .call(async {
                client
                    .get(BASE_URL)
                    .send()
                    .await
                    .map_err(anyhow::Error::from)?
                    .error_for_status()
                    .map_err(anyhow::Error::from)?
                    .json::<serde_json::Value>()
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await;

        let body = match result {
            Ok(body) => body,
            Err(err) => anyhow::bail!("coingecko /global request failed: {err}"),
        };

        body.get("data")
            .and_then(|d| d.get("market_cap_percentage"))
            .and_then(|m| m.get(self.kind.percentage_key()))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("market_cap_percentage.{} missing from response", self.kind.percentage_key()))
    }
}

#[async_trait]
impl CandleSource for DominanceCandleSource {
    fn source(&self) -> BarSource {
        BarSource::Coingecko
    }

    async fn backfill(
        &self,
        _symbol: &str,
        _tf: Timeframe,
        _since: i64,
        _limit: usize,
    ) -> anyhow::Result<Vec<Kline>> {
        warn!(
            driver = self.kind.driver_name(),
            "dominance backfill unavailable from this source; relying on rollup from live ticks"
        );
        Ok(Vec::new())
    }

    async fn latest(&self, _symbol: &str, tf: Timeframe) -> anyhow::Result<Option<Kline>> {
        let pct = self.fetch_percentage().await?;
        let point = dominance_point(pct);
        Ok(Some(Kline {
            timestamp: tf.align(chrono::Utc::now().timestamp()),
            open: point.open,
            high: point.high,
            low: point.low,
            close: point.close,
            volume: point.volume,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_names_match_spec_labels() {
        assert_eq!(DominanceKind::Btc.driver_name(), "BTC.d");
        assert_eq!(DominanceKind::Usdt.driver_name(), "USDT.d");
    }
}
