use async_trait::async_trait;

use crate::domain::errors::StorageError;
use crate::domain::learning::{Lesson, OverrideRow, ScopeSubset, TradeEvent};
use crate::domain::regime::bar::{BarSource, DriverBar, TradableBar};
use crate::domain::regime::position::{Features, Position, PositionStatus};
use crate::domain::regime::timeframe::Timeframe;

pub type StorageResult<T> = Result<T, StorageError>;

/// One typed interface over the persistence layer. No other component
/// reaches the store directly — collectors, the TA tracker, the engine,
/// and the learning jobs all depend on this trait, never on a concrete
/// database type.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn get_driver_bars(
        &self,
        driver: &str,
        book_id: &str,
        tf: Timeframe,
        since: Option<i64>,
        until: Option<i64>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<DriverBar>>;

    async fn upsert_driver_bars(&self, rows: &[DriverBar]) -> StorageResult<()>;

    async fn get_tradable_bars(
        &self,
        token_contract: &str,
        chain: &str,
        tf: Timeframe,
        since: Option<i64>,
        until: Option<i64>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<TradableBar>>;

    async fn upsert_tradable_bars(&self, rows: &[TradableBar]) -> StorageResult<()>;

    async fn get_position(&self, id: uuid::Uuid) -> StorageResult<Position>;

    async fn get_position_by_ticker(
        &self,
        ticker: &str,
        tf: Timeframe,
        status: PositionStatus,
    ) -> StorageResult<Option<Position>>;

    async fn upsert_position(&self, position: &Position) -> StorageResult<()>;

    async fn get_active_positions(&self, tf: Option<Timeframe>) -> StorageResult<Vec<Position>>;

    async fn get_positions_by_status(
        &self,
        status: PositionStatus,
        tf: Option<Timeframe>,
    ) -> StorageResult<Vec<Position>>;

    async fn read_features(&self, position_id: uuid::Uuid) -> StorageResult<Features>;

    async fn write_features(
        &self,
        position_id: uuid::Uuid,
        features: &Features,
    ) -> StorageResult<()>;

    async fn insert_trade_events(&self, rows: &[TradeEvent]) -> StorageResult<usize>;

    async fn get_trade_events(
        &self,
        since: Option<i64>,
        limit: usize,
        trade_id: Option<&str>,
    ) -> StorageResult<Vec<TradeEvent>>;

    async fn upsert_lessons(&self, batch: &[Lesson]) -> StorageResult<()>;

    async fn upsert_override(&self, row: &OverrideRow) -> StorageResult<()>;

    async fn get_active_lessons(
        &self,
        module: &str,
        lesson_type: &str,
    ) -> StorageResult<Vec<Lesson>>;

    async fn find_override(
        &self,
        pattern_key: &str,
        action_category: &str,
        scope: &ScopeSubset,
    ) -> StorageResult<Option<OverrideRow>>;
}

/// A single normalized candle as produced by an external data source,
/// before it's tagged with a [`BarSource`] and persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A venue- or feed-specific source of OHLC candles. Implementations live
/// in infrastructure (Binance REST/WS, Hyperliquid, a dominance feed, a
/// deterministic mock for tests); the collector depends only on this
/// trait.
#[async_trait]
pub trait CandleSource: Send + Sync {
    fn source(&self) -> BarSource;

    async fn backfill(
        &self,
        symbol: &str,
        tf: Timeframe,
        since: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Kline>>;

    async fn latest(&self, symbol: &str, tf: Timeframe) -> anyhow::Result<Option<Kline>>;
}
