//! Price Collector: drives external candle sources, writes driver and
//! tradable bars, and maintains the composite drivers (ALT, market-cap
//! buckets) and the dominance series by aligned-timestamp aggregation.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::regime::{
    detect_gaps, BarSource, CandleSource, DriverBar, Ohlc, StorageGateway, Timeframe,
};

/// ALT composite members. HYPE only arrives over the live stream, so it's
/// the one component a composite may legitimately miss.
const ALT_COMPONENTS: [&str; 4] = ["SOL", "ETH", "BNB", "HYPE"];
const ALT_REQUIRED_PRESENT: usize = 3;
const BUCKET_TOP_N: usize = 64;

/// Aggregates a per-timestamp group of bars into one composite bar using the
/// collector's fixed rule: mean open/close, max high, min low, summed
/// volume. Returns `None` for an empty group.
pub fn composite_ohlc(members: &[Ohlc]) -> Option<Ohlc> {
    if members.is_empty() {
        return None;
    }
    let n = members.len() as f64;
    let open = members.iter().map(|b| b.open).sum::<f64>() / n;
    let close = members.iter().map(|b| b.close).sum::<f64>() / n;
    let high = members
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let low = members.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let volume = members.iter().map(|b| b.volume).sum::<f64>();
    Some(Ohlc::new(open, high, low, close, volume))
}

/// Aggregates a timestamp-ordered run of bars into one bar by standard OHLC
/// rollup: first open, last close, max high, min low, summed volume. Used
/// for rolling a driver's own higher-cadence bars up to a coarser
/// timeframe (dominance 1m->1h/1d), as opposed to [`composite_ohlc`]'s
/// mean-based rule for combining *distinct* per-timestamp sources into one
/// synthetic driver. `members` must already be ordered ascending by
/// timestamp. Returns `None` for an empty group.
pub fn rollup_ohlc(members: &[Ohlc]) -> Option<Ohlc> {
    let first = members.first()?;
    let last = members.last()?;
    let high = members
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let low = members.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let volume = members.iter().map(|b| b.volume).sum::<f64>();
    Some(Ohlc::new(first.open, high, low, last.close, volume))
}

/// Builds the ALT composite for one timestamp from a map of
/// `component symbol -> bar`. Requires at least 3 of the 4 named
/// components; HYPE may be absent without failing the bar.
pub fn compute_alt_composite(components: &BTreeMap<&str, Ohlc>) -> Option<Ohlc> {
    let present: Vec<Ohlc> = ALT_COMPONENTS
        .iter()
        .filter_map(|sym| components.get(sym).copied())
        .collect();
    if present.len() < ALT_REQUIRED_PRESENT {
        return None;
    }
    composite_ohlc(&present)
}

/// Builds a market-cap-bucket composite from its member bars, capped to the
/// top 64 by whatever external ranking the caller already applied. Requires
/// at least one member; empty buckets are skipped entirely by the caller.
pub fn compute_bucket_composite(members: &[Ohlc]) -> Option<Ohlc> {
    let capped = if members.len() > BUCKET_TOP_N {
        &members[..BUCKET_TOP_N]
    } else {
        members
    };
    composite_ohlc(capped)
}

/// Builds a dominance "OHLC" point from a single percent-as-USD reading: all
/// four legs equal the instantaneous value, per the driver's storage contract.
pub fn dominance_point(value_pct: f64) -> Ohlc {
    Ohlc::new(value_pct, value_pct, value_pct, value_pct, 0.0)
}

/// Drives candle sources and writes driver bars; also produces the ALT and
/// bucket composites and rolls dominance points up to coarser timeframes.
pub struct PriceCollector {
    storage: Arc<dyn StorageGateway>,
    sources: Vec<Arc<dyn CandleSource>>,
    book_id: String,
}

impl PriceCollector {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        sources: Vec<Arc<dyn CandleSource>>,
        book_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            sources,
            book_id: book_id.into(),
        }
    }

    /// Runs one collection pass for `timeframe`: pulls the latest bar from
    /// every configured source and stores whatever succeeds. A single
    /// source's failure never aborts the tick — best-effort union.
    pub async fn tick(&self, driver: &str, symbol: &str, timeframe: Timeframe) -> usize {
        let mut written = 0usize;
        for source in &self.sources {
            match source.latest(symbol, timeframe).await {
                Ok(Some(kline)) => {
                    let bar = DriverBar {
                        driver: driver.to_string(),
                        timeframe,
                        book_id: self.book_id.clone(),
                        timestamp: timeframe.align(kline.timestamp),
                        ohlc_usd: Ohlc::new(
                            kline.open,
                            kline.high,
                            kline.low,
                            kline.close,
                            kline.volume,
                        ),
                        source: source.source(),
                    };
                    if bar.validate().is_err() {
                        warn!(driver, symbol, "rejected malformed bar from source");
                        continue;
                    }
                    if let Err(err) = self.storage.upsert_driver_bars(&[bar]).await {
                        warn!(driver, symbol, %err, "failed to persist bar");
                        continue;
                    }
                    written += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(driver, symbol, %err, "source unreachable on tick");
                }
            }
        }
        written
    }

    /// Batched historical fill, capped per timeframe (1m: 2 days, 1h: 30
    /// days, 1d: 730 days). Retries a failing source with fixed 100ms
    /// spacing and a bounded batch count; partial success is stored.
    pub async fn backfill(
        &self,
        driver: &str,
        symbol: &str,
        timeframe: Timeframe,
        since: i64,
    ) -> anyhow::Result<usize> {
        let cap = timeframe.backfill_cap_bars();
        let mut total_written = 0usize;
        for source in &self.sources {
            let mut attempts = 0;
            let klines = loop {
                match source.backfill(symbol, timeframe, since, cap).await {
                    Ok(klines) => break klines,
                    Err(err) if attempts < 3 => {
                        attempts += 1;
                        warn!(driver, symbol, attempt = attempts, %err, "backfill retry");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                    Err(err) => {
                        warn!(driver, symbol, %err, "backfill source exhausted retries");
                        break Vec::new();
                    }
                }
            };
            if klines.is_empty() {
                continue;
            }
            let rows: Vec<DriverBar> = klines
                .into_iter()
                .take(cap)
                .map(|k| DriverBar {
                    driver: driver.to_string(),
                    timeframe,
                    book_id: self.book_id.clone(),
                    timestamp: timeframe.align(k.timestamp),
                    ohlc_usd: Ohlc::new(k.open, k.high, k.low, k.close, k.volume),
                    source: source.source(),
                })
                .filter(|bar| bar.validate().is_ok())
                .collect();
            let timestamps: Vec<i64> = rows.iter().map(|b| b.timestamp).collect();
            for gap in detect_gaps(timeframe, &timestamps) {
                warn!(
                    driver,
                    symbol,
                    gap_bars = gap.length_bars(),
                    "gap detected during backfill"
                );
            }
            let n = rows.len();
            if let Err(err) = self.storage.upsert_driver_bars(&rows).await {
                warn!(driver, symbol, %err, "failed to persist backfill batch");
                continue;
            }
            total_written += n;
        }
        info!(driver, symbol, total_written, "backfill complete");
        Ok(total_written)
    }

    /// Recomputes the ALT composite for `timeframe` from the component
    /// majors' stored bars, aligning by timestamp before grouping.
    pub async fn compute_and_store_alt_composite(
        &self,
        timeframe: Timeframe,
        since: i64,
    ) -> anyhow::Result<usize> {
        let mut per_symbol = BTreeMap::new();
        for sym in ALT_COMPONENTS {
            let bars = self
                .storage
                .get_driver_bars(sym, &self.book_id, timeframe, Some(since), None, None)
                .await?;
            per_symbol.insert(sym, bars);
        }

        let mut by_timestamp: BTreeMap<i64, BTreeMap<&str, Ohlc>> = BTreeMap::new();
        for (sym, bars) in &per_symbol {
            for bar in bars {
                by_timestamp
                    .entry(bar.timestamp)
                    .or_default()
                    .insert(sym, bar.ohlc_usd);
            }
        }

        let mut rows = Vec::new();
        for (timestamp, components) in &by_timestamp {
            if let Some(ohlc) = compute_alt_composite(components) {
                rows.push(DriverBar {
                    driver: "ALT".to_string(),
                    timeframe,
                    book_id: self.book_id.clone(),
                    timestamp: *timestamp,
                    ohlc_usd: ohlc,
                    source: BarSource::Composite,
                });
            }
        }
        let n = rows.len();
        if !rows.is_empty() {
            self.storage.upsert_driver_bars(&rows).await?;
        }
        Ok(n)
    }

    /// Rolls 1m dominance points up to 1h/1d bars by standard OHLC
    /// aggregation over the bars that fall within each target bucket.
    pub async fn rollup_dominance(
        &self,
        driver: &str,
        src_tf: Timeframe,
        tgt_tf: Timeframe,
        since: i64,
    ) -> anyhow::Result<usize> {
        let bars = self
            .storage
            .get_driver_bars(driver, &self.book_id, src_tf, Some(since), None, None)
            .await?;

        let mut grouped: BTreeMap<i64, Vec<Ohlc>> = BTreeMap::new();
        for bar in &bars {
            grouped
                .entry(tgt_tf.align(bar.timestamp))
                .or_default()
                .push(bar.ohlc_usd);
        }

        let mut rows = Vec::new();
        for (bucket_ts, members) in &grouped {
            if let Some(ohlc) = rollup_ohlc(members) {
                rows.push(DriverBar {
                    driver: driver.to_string(),
                    timeframe: tgt_tf,
                    book_id: self.book_id.clone(),
                    timestamp: *bucket_ts,
                    ohlc_usd: ohlc,
                    source: BarSource::Rollup,
                });
            }
        }
        let n = rows.len();
        if !rows.is_empty() {
            self.storage.upsert_driver_bars(&rows).await?;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ohlc(o: f64, h: f64, l: f64, c: f64, v: f64) -> Ohlc {
        Ohlc::new(o, h, l, c, v)
    }

    #[test]
    fn composite_ohlc_aggregates_correctly() {
        let members = vec![ohlc(10.0, 12.0, 9.0, 11.0, 100.0), ohlc(20.0, 22.0, 19.0, 21.0, 50.0)];
        let result = composite_ohlc(&members).unwrap();
        assert_eq!(result.open, 15.0);
        assert_eq!(result.high, 22.0);
        assert_eq!(result.low, 9.0);
        assert_eq!(result.close, 16.0);
        assert_eq!(result.volume, 150.0);
    }

    #[test]
    fn composite_ohlc_empty_is_none() {
        assert!(composite_ohlc(&[]).is_none());
    }

    #[test]
    fn rollup_ohlc_uses_first_open_last_close() {
        let members = vec![
            ohlc(10.0, 10.0, 10.0, 10.0, 5.0),
            ohlc(12.0, 12.0, 12.0, 12.0, 5.0),
            ohlc(9.0, 9.0, 9.0, 9.0, 5.0),
        ];
        let result = rollup_ohlc(&members).unwrap();
        assert_eq!(result.open, 10.0);
        assert_eq!(result.close, 9.0);
        assert_eq!(result.high, 12.0);
        assert_eq!(result.low, 9.0);
        assert_eq!(result.volume, 15.0);
    }

    #[test]
    fn rollup_ohlc_empty_is_none() {
        assert!(rollup_ohlc(&[]).is_none());
    }

    #[test]
    fn alt_composite_requires_three_of_four() {
        let mut components = BTreeMap::new();
        components.insert("SOL", ohlc(1.0, 1.1, 0.9, 1.0, 10.0));
        components.insert("ETH", ohlc(2.0, 2.1, 1.9, 2.0, 10.0));
        assert!(compute_alt_composite(&components).is_none());

        components.insert("BNB", ohlc(3.0, 3.1, 2.9, 3.0, 10.0));
        assert!(compute_alt_composite(&components).is_some());
    }

    #[test]
    fn alt_composite_tolerates_missing_hype() {
        let mut components = BTreeMap::new();
        components.insert("SOL", ohlc(1.0, 1.1, 0.9, 1.0, 10.0));
        components.insert("ETH", ohlc(2.0, 2.1, 1.9, 2.0, 10.0));
        components.insert("BNB", ohlc(3.0, 3.1, 2.9, 3.0, 10.0));
        let result = compute_alt_composite(&components).unwrap();
        assert_eq!(result.open, 2.0);
    }

    #[test]
    fn bucket_composite_requires_at_least_one_member() {
        assert!(compute_bucket_composite(&[]).is_none());
        assert!(compute_bucket_composite(&[ohlc(1.0, 1.1, 0.9, 1.0, 10.0)]).is_some());
    }

    #[test]
    fn dominance_point_replicates_value_across_ohlc() {
        let point = dominance_point(52.3);
        assert_eq!(point.open, 52.3);
        assert_eq!(point.high, 52.3);
        assert_eq!(point.low, 52.3);
        assert_eq!(point.close, 52.3);
    }
}
