//! Hyperliquid REST candle source. Secondary backfill source for majors
//! that also list on Binance; the sole source for HYPE, which only trades
//! on Hyperliquid.

use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use tracing::warn;

use crate::domain::regime::{BarSource, CandleSource, Kline, Timeframe};
use crate::infrastructure::core::{CircuitBreaker, HttpClientFactory};

const BASE_URL: &str = "https://api.hyperliquid.xyz/info";

fn interval_str(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M1 => "1m",
        Timeframe::H1 => "1h",
        Timeframe::D1 => "1d",
    }
}

#[derive(Serialize)]
struct CandleRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    req: CandleReq<'a>,
}

#[derive(Serialize)]
struct CandleReq<'a> {
    coin: &'a str,
    interval: &'a str,
    #[serde(rename = "startTime")]
    start_time: i64,
    #[serde(rename = "endTime")]
    end_time: i64,
}

/// One candle object from Hyperliquid's `candleSnapshot`:
/// `{t, T, s, i, o, h, l, c, v, n}`, prices/volume as strings.
fn parse_candle_obj(obj: &serde_json::Value) -> Option<Kline> {
    let open_time = obj.get("t")?.as_i64()?;
    let open: f64 = obj.get("o")?.as_str()?.parse().ok()?;
    let high: f64 = obj.get("h")?.as_str()?.parse().ok()?;
    let low: f64 = obj.get("l")?.as_str()?.parse().ok()?;
    let close: f64 = obj.get("c")?.as_str()?.parse().ok()?;
    let volume: f64 = obj.get("v")?.as_str()?.parse().ok()?;
    Some(Kline {
        timestamp: open_time / 1000,
        open,
        high,
        low,
        close,
        volume,
    })
}

pub struct HyperliquidCandleSource {
    client: ClientWithMiddleware,
    breaker: CircuitBreaker,
}

impl HyperliquidCandleSource {
    pub fn new() -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            breaker: CircuitBreaker::new("HyperliquidCandleSource", 5, 3, Duration::from_secs(60)),
        }
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        tf: Timeframe,
        start_time_ms: i64,
        end_time_ms: i64,
    ) -> anyhow::Result<Vec<Kline>> {
        let body = CandleRequest {
            kind: "candleSnapshot",
            req: CandleReq {
                coin: &symbol.to_uppercase(),
                interval: interval_str(tf),
                start_time: start_time_ms,
                end_time: end_time_ms,
            },
        };

        let client = &self.client;
        let result = self
            .breaker
            .call(async {
                let response = client
                    .post(BASE_URL)
                    .json(&body)
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

        let response_body = match result {
            Ok(b) => b,
            Err(err) => anyhow::bail!("hyperliquid candleSnapshot request failed: {err}"),
        };

        let rows = response_body
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("unexpected hyperliquid candle response shape"))?;

        Ok(rows.iter().filter_map(parse_candle_obj).collect())
    }
}

impl Default for HyperliquidCandleSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleSource for HyperliquidCandleSource {
    fn source(&self) -> BarSource {
        BarSource::Hyperliquid
    }

    async fn backfill(
        &self,
        symbol: &str,
        tf: Timeframe,
        since: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Kline>> {
        let span_secs = tf.seconds() * limit as i64;
        let end_ms = (since + span_secs) * 1000;
        self.fetch_candles(symbol, tf, since * 1000, end_ms).await
    }

    async fn latest(&self, symbol: &str, tf: Timeframe) -> anyhow::Result<Option<Kline>> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let start_ms = now_ms - tf.seconds() * 1000 * 3;
        match self.fetch_candles(symbol, tf, start_ms, now_ms).await {
            Ok(mut klines) => Ok(klines.pop()),
            Err(err) => {
                warn!(symbol, %err, "hyperliquid latest() failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_candle_object() {
        let obj = serde_json::json!({
            "t": 1_700_000_000_000i64,
            "T": 1_700_000_059_999i64,
            "s": "HYPE",
            "i": "1m",
            "o": "25.10",
            "h": "25.80",
            "l": "24.90",
            "c": "25.50",
            "v": "5000.0",
            "n": 120,
        });
        let kline = parse_candle_obj(&obj).expect("object should parse");
        assert_eq!(kline.timestamp, 1_700_000_000);
        assert_eq!(kline.close, 25.50);
    }

    #[test]
    fn rejects_missing_fields() {
        let obj = serde_json::json!({"t": 1, "o": "1.0"});
        assert!(parse_candle_obj(&obj).is_none());
    }
}
