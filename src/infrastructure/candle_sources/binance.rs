//! Binance REST candle source. Primary feed for the always-on regime
//! drivers (BTC, the ALT composite's majors) and for any tracked major
//! lowcap that happens to list on Binance.

use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use tracing::warn;

use crate::domain::regime::{BarSource, CandleSource, Kline, Timeframe};
use crate::infrastructure::core::{CircuitBreaker, HttpClientFactory};
use crate::infrastructure::core::http_client_factory::build_url_with_query;

const BASE_URL: &str = "https://api.binance.com";

fn interval_str(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M1 => "1m",
        Timeframe::H1 => "1h",
        Timeframe::D1 => "1d",
    }
}

/// Binance kline array-of-arrays row:
/// `[open_time, open, high, low, close, volume, close_time, ...]`, all
/// price/volume fields as strings.
fn parse_kline_row(row: &serde_json::Value) -> Option<Kline> {
    let arr = row.as_array()?;
    let open_time = arr.first()?.as_i64()?;
    let open: f64 = arr.get(1)?.as_str()?.parse().ok()?;
    let high: f64 = arr.get(2)?.as_str()?.parse().ok()?;
    let low: f64 = arr.get(3)?.as_str()?.parse().ok()?;
    let close: f64 = arr.get(4)?.as_str()?.parse().ok()?;
    let volume: f64 = arr.get(5)?.as_str()?.parse().ok()?;
    Some(Kline {
        timestamp: open_time / 1000,
        open,
        high,
        low,
        close,
        volume,
    })
}

pub struct BinanceCandleSource {
    client: ClientWithMiddleware,
    breaker: CircuitBreaker,
}

impl BinanceCandleSource {
    pub fn new() -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            breaker: CircuitBreaker::new("BinanceCandleSource", 5, 3, Duration::from_secs(60)),
        }
    }

    fn symbol_pair(symbol: &str) -> String {
        format!("{}USDT", symbol.to_uppercase())
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        tf: Timeframe,
        start_time_ms: Option<i64>,
        limit: usize,
    ) -> anyhow::Result<Vec<Kline>> {
        let pair = Self::symbol_pair(symbol);
        let limit_str = limit.to_string();
        let mut params: Vec<(&str, String)> = vec![
            ("symbol", pair),
            ("interval", interval_str(tf).to_string()),
            ("limit", limit_str),
        ];
        if let Some(start) = start_time_ms {
            params.push(("startTime", start.to_string()));
        }
        let url = build_url_with_query(&format!("{BASE_URL}/api/v3/klines"), &params);

        let client = &self.client;
        let result = self
            .breaker
            .call(async {
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(anyhow::Error::from)?
                    .error_for_status()
                    .map_err(anyhow::Error::from)?;
                response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await;

        let body = match result {
            Ok(body) => body,
            Err(err) => anyhow::bail!("binance klines request failed: {err}"),
        };

        let rows = body
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("unexpected binance klines response shape"))?;

        Ok(rows.iter().filter_map(parse_kline_row).collect())
    }
}

impl Default for BinanceCandleSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleSource for BinanceCandleSource {
    fn source(&self) -> BarSource {
        BarSource::Binance
    }

    async fn backfill(
        &self,
        symbol: &str,
        tf: Timeframe,
        since: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Kline>> {
        let capped = limit.min(1000);
        self.fetch_klines(symbol, tf, Some(since * 1000), capped)
            .await
    }

    async fn latest(&self, symbol: &str, tf: Timeframe) -> anyhow::Result<Option<Kline>> {
        match self.fetch_klines(symbol, tf, None, 2).await {
            Ok(mut klines) => Ok(klines.pop()),
            Err(err) => {
                warn!(symbol, %err, "binance latest() failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_kline_row() {
        let row = serde_json::json!([
            1_700_000_000_000i64,
            "42000.50",
            "42500.00",
            "41900.25",
            "42300.10",
            "1234.5678",
            1_700_000_059_999i64,
        ]);
        let kline = parse_kline_row(&row).expect("row should parse");
        assert_eq!(kline.timestamp, 1_700_000_000);
        assert_eq!(kline.open, 42000.50);
        assert_eq!(kline.close, 42300.10);
    }

    #[test]
    fn rejects_malformed_row() {
        let row = serde_json::json!(["not", "enough", "fields"]);
        assert!(parse_kline_row(&row).is_none());
    }

    #[test]
    fn symbol_pair_uppercases_and_appends_usdt() {
        assert_eq!(BinanceCandleSource::symbol_pair("btc"), "BTCUSDT");
    }
}
