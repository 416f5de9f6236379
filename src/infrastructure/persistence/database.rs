use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper: one pool, one schema, shared by every
/// repository. Only the Storage Gateway touches this directly.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!(db_url, "connected to database");

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Creates the six tables named in §6: two OHLC tables (drivers,
    /// tradables), `positions`, and the three learning tables.
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // Regime driver OHLC: conflict key (driver, book_id, timeframe, timestamp).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS regime_price_ohlc (
                driver TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                book_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open_usd REAL NOT NULL,
                high_usd REAL NOT NULL,
                low_usd REAL NOT NULL,
                close_usd REAL NOT NULL,
                volume REAL NOT NULL,
                source TEXT NOT NULL,
                PRIMARY KEY (driver, book_id, timeframe, timestamp)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create regime_price_ohlc table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_regime_price_ohlc_scan \
             ON regime_price_ohlc (driver, book_id, timeframe, timestamp);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create regime_price_ohlc index")?;

        // Tradable (major/lowcap) OHLC: native + USD, keyed by
        // (token_contract, chain, timeframe, timestamp).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lowcap_price_ohlc (
                token_contract TEXT NOT NULL,
                chain TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open_usd REAL NOT NULL,
                high_usd REAL NOT NULL,
                low_usd REAL NOT NULL,
                close_usd REAL NOT NULL,
                open_native REAL,
                high_native REAL,
                low_native REAL,
                close_native REAL,
                volume REAL NOT NULL,
                PRIMARY KEY (token_contract, chain, timeframe, timestamp)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create lowcap_price_ohlc table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_lowcap_price_ohlc_scan \
             ON lowcap_price_ohlc (token_contract, chain, timeframe, timestamp);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create lowcap_price_ohlc index")?;

        // Positions: features is a single JSON document, read-modify-written
        // whole (never partial writes), per §4.1.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                token_contract TEXT NOT NULL,
                chain TEXT NOT NULL,
                ticker TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                status TEXT NOT NULL,
                book_id TEXT NOT NULL,
                bars_count INTEGER NOT NULL DEFAULT 0,
                features_json TEXT NOT NULL DEFAULT '{}',
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create positions table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_positions_ticker \
             ON positions (ticker, timeframe, status);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create positions ticker index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_positions_status \
             ON positions (status, timeframe);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create positions status index")?;

        // Trade events: append-only, deduped by trade_id at ingestion.
        // `id` is the TradeEvent's own uuid (one row per pm_action strand);
        // `trade_id` is the closed position's id, used for idempotency.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pattern_trade_events (
                id TEXT PRIMARY KEY,
                trade_id TEXT NOT NULL,
                module TEXT NOT NULL,
                pattern_key TEXT NOT NULL,
                action_category TEXT NOT NULL,
                scope_json TEXT NOT NULL,
                rr REAL NOT NULL,
                pnl_usd REAL NOT NULL DEFAULT 0,
                decision TEXT,
                outcome TEXT,
                timestamp TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create pattern_trade_events table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trade_events_lookup \
             ON pattern_trade_events (pattern_key, action_category, timestamp);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create pattern_trade_events index")?;

        // Unique on (trade_id, action_category): a closed trade contributes
        // one row per recorded action, and re-processing the same
        // `position_closed` event must not duplicate any of them (§3/§6).
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_trade_events_trade_id \
             ON pattern_trade_events (trade_id, action_category);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create pattern_trade_events trade_id index")?;

        // Lessons: upsert on (module, pattern_key, action_category, scope_subset).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS learning_lessons (
                module TEXT NOT NULL,
                pattern_key TEXT NOT NULL,
                action_category TEXT NOT NULL,
                scope_subset_key TEXT NOT NULL,
                scope_subset_json TEXT NOT NULL,
                lesson_type TEXT NOT NULL,
                n INTEGER NOT NULL,
                stats_json TEXT NOT NULL,
                decay_halflife_hours REAL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (module, pattern_key, action_category, scope_subset_key)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create learning_lessons table")?;

        // Overrides: upsert on (pattern_key, action_category, scope_subset).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pm_overrides (
                pattern_key TEXT NOT NULL,
                action_category TEXT NOT NULL,
                scope_subset_key TEXT NOT NULL,
                scope_subset_json TEXT NOT NULL,
                multiplier REAL NOT NULL,
                confidence_score REAL NOT NULL,
                decay_state TEXT,
                last_updated_at TEXT NOT NULL,
                PRIMARY KEY (pattern_key, action_category, scope_subset_key)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create pm_overrides table")?;

        info!("regime engine schema initialized");
        Ok(())
    }
}
