//! Deterministic in-memory candle source for tests. Serves whatever
//! klines were seeded via [`MockCandleSource::seed`], never touches the
//! network, and never fails unless explicitly configured to.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::regime::{BarSource, CandleSource, Kline, Timeframe};

pub struct MockCandleSource {
    source_tag: BarSource,
    bars: RwLock<BTreeMap<(String, Timeframe), Vec<Kline>>>,
    fail_next: RwLock<bool>,
}

impl MockCandleSource {
    pub fn new(source_tag: BarSource) -> Self {
        Self {
            source_tag,
            bars: RwLock::new(BTreeMap::new()),
            fail_next: RwLock::new(false),
        }
    }

    /// Replaces the seeded series for `(symbol, tf)`, sorted ascending by
    /// timestamp.
    pub fn seed(&self, symbol: &str, tf: Timeframe, mut klines: Vec<Kline>) {
        klines.sort_by_key(|k| k.timestamp);
        self.bars
            .write()
            .expect("mock candle source lock poisoned")
            .insert((symbol.to_string(), tf), klines);
    }

    pub fn fail_once(&self) {
        *self.fail_next.write().expect("mock candle source lock poisoned") = true;
    }

    fn take_failure(&self) -> bool {
        let mut flag = self.fail_next.write().expect("mock candle source lock poisoned");
        std::mem::replace(&mut *flag, false)
    }
}

#[async_trait]
impl CandleSource for MockCandleSource {
    fn source(&self) -> BarSource {
        self.source_tag
    }

    async fn backfill(
        &self,
        symbol: &str,
        tf: Timeframe,
        since: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Kline>> {
        if self.take_failure() {
            anyhow::bail!("mock candle source configured to fail");
        }
        let bars = self.bars.read().expect("mock candle source lock poisoned");
        let series = bars.get(&(symbol.to_string(), tf));
        Ok(series
            .map(|klines| {
                klines
                    .iter()
                    .filter(|k| k.timestamp >= since)
                    .take(limit)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest(&self, symbol: &str, tf: Timeframe) -> anyhow::Result<Option<Kline>> {
        if self.take_failure() {
            anyhow::bail!("mock candle source configured to fail");
        }
        let bars = self.bars.read().expect("mock candle source lock poisoned");
        Ok(bars.get(&(symbol.to_string(), tf)).and_then(|k| k.last().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(ts: i64, close: f64) -> Kline {
        Kline {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[tokio::test]
    async fn seeded_series_serves_latest() {
        let source = MockCandleSource::new(BarSource::Binance);
        source.seed("BTC", Timeframe::M1, vec![kline(60, 100.0), kline(120, 101.0)]);
        let latest = source.latest("BTC", Timeframe::M1).await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 120);
    }

    #[tokio::test]
    async fn backfill_respects_since_and_limit() {
        let source = MockCandleSource::new(BarSource::Binance);
        source.seed(
            "BTC",
            Timeframe::M1,
            vec![kline(60, 1.0), kline(120, 2.0), kline(180, 3.0)],
        );
        let bars = source.backfill("BTC", Timeframe::M1, 120, 1).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, 120);
    }

    #[tokio::test]
    async fn fail_once_triggers_single_error() {
        let source = MockCandleSource::new(BarSource::Binance);
        source.seed("BTC", Timeframe::M1, vec![kline(60, 1.0)]);
        source.fail_once();
        assert!(source.latest("BTC", Timeframe::M1).await.is_err());
        assert!(source.latest("BTC", Timeframe::M1).await.is_ok());
    }
}
