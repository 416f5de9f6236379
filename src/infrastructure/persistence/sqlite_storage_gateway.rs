use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use crate::domain::errors::StorageError;
use crate::domain::learning::{
    ActionCategory, Decision, EpisodeOutcome, Lesson, LessonStats, LessonStatus, OverrideCategory,
    OverrideRow, ScopeSubset, TradeEvent,
};
use crate::domain::regime::bar::{BarSource, DriverBar, Ohlc, TradableBar};
use crate::domain::regime::engine_payload::EngineState;
use crate::domain::regime::position::{Features, Position, PositionStatus};
use crate::domain::regime::ports::{StorageGateway, StorageResult};
use crate::domain::regime::timeframe::Timeframe;

use super::database::Database;

/// `StorageGateway` backed by the shared SQLite pool. Every method maps a
/// domain type to/from its row representation; no caller sees a row or a
/// SQL string.
pub struct SqliteStorageGateway {
    db: Database,
}

impl SqliteStorageGateway {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn map_sqlx_err(what: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::RowNotFound => StorageError::NotFound {
            what: what.to_string(),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Transient {
                reason: err.to_string(),
            }
        }
        other => StorageError::Fatal {
            reason: other.to_string(),
        },
    }
}

fn parse_rfc3339(what: &str, s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Fatal {
            reason: format!("failed to parse timestamp for {what}: {e}"),
        })
}

fn position_status_as_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Active => "active",
        PositionStatus::RegimeDriver => "regime_driver",
        PositionStatus::Closed => "closed",
    }
}

fn position_status_from_str(s: &str) -> StorageResult<PositionStatus> {
    match s {
        "active" => Ok(PositionStatus::Active),
        "regime_driver" => Ok(PositionStatus::RegimeDriver),
        "closed" => Ok(PositionStatus::Closed),
        other => Err(StorageError::Fatal {
            reason: format!("unknown position status '{other}'"),
        }),
    }
}

fn engine_state_from_str(s: &str) -> StorageResult<EngineState> {
    match s {
        "S0" => Ok(EngineState::S0),
        "S1" => Ok(EngineState::S1),
        "S2" => Ok(EngineState::S2),
        "S3" => Ok(EngineState::S3),
        "S4" => Ok(EngineState::S4),
        other => Err(StorageError::Fatal {
            reason: format!("unknown engine state '{other}'"),
        }),
    }
}

fn bar_source_from_str(s: &str) -> StorageResult<BarSource> {
    match s {
        "binance" => Ok(BarSource::Binance),
        "hyperliquid" => Ok(BarSource::Hyperliquid),
        "composite" => Ok(BarSource::Composite),
        "rollup" => Ok(BarSource::Rollup),
        "coingecko" => Ok(BarSource::Coingecko),
        other => Err(StorageError::Fatal {
            reason: format!("unknown bar source '{other}'"),
        }),
    }
}

fn action_category_as_str(category: ActionCategory) -> &'static str {
    match category {
        ActionCategory::Entry => "entry",
        ActionCategory::Add => "add",
        ActionCategory::Trim => "trim",
        ActionCategory::Exit => "exit",
        ActionCategory::EmergencyExit => "emergency_exit",
    }
}

fn action_category_from_str(s: &str) -> StorageResult<ActionCategory> {
    match s {
        "entry" => Ok(ActionCategory::Entry),
        "add" => Ok(ActionCategory::Add),
        "trim" => Ok(ActionCategory::Trim),
        "exit" => Ok(ActionCategory::Exit),
        "emergency_exit" => Ok(ActionCategory::EmergencyExit),
        other => Err(StorageError::Fatal {
            reason: format!("unknown action category '{other}'"),
        }),
    }
}

fn decision_as_str(decision: Decision) -> &'static str {
    match decision {
        Decision::Acted => "acted",
        Decision::Skipped => "skipped",
    }
}

fn decision_from_str(s: &str) -> StorageResult<Decision> {
    match s {
        "acted" => Ok(Decision::Acted),
        "skipped" => Ok(Decision::Skipped),
        other => Err(StorageError::Fatal {
            reason: format!("unknown decision '{other}'"),
        }),
    }
}

fn outcome_as_str(outcome: EpisodeOutcome) -> &'static str {
    match outcome {
        EpisodeOutcome::Success => "success",
        EpisodeOutcome::Failure => "failure",
    }
}

fn outcome_from_str(s: &str) -> StorageResult<EpisodeOutcome> {
    match s {
        "success" => Ok(EpisodeOutcome::Success),
        "failure" => Ok(EpisodeOutcome::Failure),
        other => Err(StorageError::Fatal {
            reason: format!("unknown episode outcome '{other}'"),
        }),
    }
}

fn override_category_as_str(category: OverrideCategory) -> &'static str {
    match category {
        OverrideCategory::Entry => "entry",
        OverrideCategory::Add => "add",
        OverrideCategory::Trim => "trim",
        OverrideCategory::Exit => "exit",
        OverrideCategory::TuningTsMin => "tuning_ts_min",
        OverrideCategory::TuningHalo => "tuning_halo",
        OverrideCategory::TuningS2TsMin => "tuning_s2_ts_min",
        OverrideCategory::TuningS2Halo => "tuning_s2_halo",
        OverrideCategory::TuningDxMin => "tuning_dx_min",
        OverrideCategory::TuningDxLadder => "tuning_dx_ladder",
    }
}

fn override_category_from_str(s: &str) -> StorageResult<OverrideCategory> {
    match s {
        "entry" => Ok(OverrideCategory::Entry),
        "add" => Ok(OverrideCategory::Add),
        "trim" => Ok(OverrideCategory::Trim),
        "exit" => Ok(OverrideCategory::Exit),
        "tuning_ts_min" => Ok(OverrideCategory::TuningTsMin),
        "tuning_halo" => Ok(OverrideCategory::TuningHalo),
        "tuning_s2_ts_min" => Ok(OverrideCategory::TuningS2TsMin),
        "tuning_s2_halo" => Ok(OverrideCategory::TuningS2Halo),
        "tuning_dx_min" => Ok(OverrideCategory::TuningDxMin),
        "tuning_dx_ladder" => Ok(OverrideCategory::TuningDxLadder),
        other => Err(StorageError::Fatal {
            reason: format!("unknown override category '{other}'"),
        }),
    }
}

fn lesson_status_as_str(status: LessonStatus) -> &'static str {
    match status {
        LessonStatus::Active => "active",
        LessonStatus::Retired => "retired",
    }
}

fn lesson_status_from_str(s: &str) -> StorageResult<LessonStatus> {
    match s {
        "active" => Ok(LessonStatus::Active),
        "retired" => Ok(LessonStatus::Retired),
        other => Err(StorageError::Fatal {
            reason: format!("unknown lesson status '{other}'"),
        }),
    }
}

fn driver_bar_from_row(row: &SqliteRow) -> StorageResult<DriverBar> {
    let source: String = row.try_get("source").map_err(|e| map_sqlx_err("driver bar", e))?;
    let timeframe: String =
        row.try_get("timeframe").map_err(|e| map_sqlx_err("driver bar", e))?;
    Ok(DriverBar {
        driver: row.try_get("driver").map_err(|e| map_sqlx_err("driver bar", e))?,
        timeframe: timeframe.parse().map_err(|e: anyhow::Error| StorageError::Fatal {
            reason: e.to_string(),
        })?,
        book_id: row.try_get("book_id").map_err(|e| map_sqlx_err("driver bar", e))?,
        timestamp: row.try_get("timestamp").map_err(|e| map_sqlx_err("driver bar", e))?,
        ohlc_usd: Ohlc::new(
            row.try_get("open_usd").map_err(|e| map_sqlx_err("driver bar", e))?,
            row.try_get("high_usd").map_err(|e| map_sqlx_err("driver bar", e))?,
            row.try_get("low_usd").map_err(|e| map_sqlx_err("driver bar", e))?,
            row.try_get("close_usd").map_err(|e| map_sqlx_err("driver bar", e))?,
            row.try_get("volume").map_err(|e| map_sqlx_err("driver bar", e))?,
        ),
        source: bar_source_from_str(&source)?,
    })
}

fn tradable_bar_from_row(row: &SqliteRow) -> StorageResult<TradableBar> {
    let timeframe: String =
        row.try_get("timeframe").map_err(|e| map_sqlx_err("tradable bar", e))?;
    let open_native: Option<f64> =
        row.try_get("open_native").map_err(|e| map_sqlx_err("tradable bar", e))?;
    let ohlc_native = open_native.map(|open| {
        Ohlc::new(
            open,
            row.try_get("high_native").unwrap_or(open),
            row.try_get("low_native").unwrap_or(open),
            row.try_get("close_native").unwrap_or(open),
            0.0,
        )
    });
    Ok(TradableBar {
        token_contract: row
            .try_get("token_contract")
            .map_err(|e| map_sqlx_err("tradable bar", e))?,
        chain: row.try_get("chain").map_err(|e| map_sqlx_err("tradable bar", e))?,
        timeframe: timeframe.parse().map_err(|e: anyhow::Error| StorageError::Fatal {
            reason: e.to_string(),
        })?,
        timestamp: row.try_get("timestamp").map_err(|e| map_sqlx_err("tradable bar", e))?,
        ohlc_usd: Ohlc::new(
            row.try_get("open_usd").map_err(|e| map_sqlx_err("tradable bar", e))?,
            row.try_get("high_usd").map_err(|e| map_sqlx_err("tradable bar", e))?,
            row.try_get("low_usd").map_err(|e| map_sqlx_err("tradable bar", e))?,
            row.try_get("close_usd").map_err(|e| map_sqlx_err("tradable bar", e))?,
            row.try_get("volume").map_err(|e| map_sqlx_err("tradable bar", e))?,
        ),
        ohlc_native,
    })
}

fn position_from_row(row: &SqliteRow) -> StorageResult<Position> {
    let id: String = row.try_get("id").map_err(|e| map_sqlx_err("position", e))?;
    let timeframe: String = row.try_get("timeframe").map_err(|e| map_sqlx_err("position", e))?;
    let status: String = row.try_get("status").map_err(|e| map_sqlx_err("position", e))?;
    let state: String = row.try_get("state").map_err(|e| map_sqlx_err("position", e))?;
    let features_json: String =
        row.try_get("features_json").map_err(|e| map_sqlx_err("position", e))?;
    let created_at: String = row.try_get("created_at").map_err(|e| map_sqlx_err("position", e))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| map_sqlx_err("position", e))?;
    let bars_count: i64 = row.try_get("bars_count").map_err(|e| map_sqlx_err("position", e))?;

    Ok(Position {
        id: Uuid::parse_str(&id).map_err(|e| StorageError::Fatal {
            reason: format!("invalid position id '{id}': {e}"),
        })?,
        token_contract: row
            .try_get("token_contract")
            .map_err(|e| map_sqlx_err("position", e))?,
        chain: row.try_get("chain").map_err(|e| map_sqlx_err("position", e))?,
        ticker: row.try_get("ticker").map_err(|e| map_sqlx_err("position", e))?,
        timeframe: timeframe.parse().map_err(|e: anyhow::Error| StorageError::Fatal {
            reason: e.to_string(),
        })?,
        status: position_status_from_str(&status)?,
        book_id: row.try_get("book_id").map_err(|e| map_sqlx_err("position", e))?,
        bars_count: bars_count as u32,
        features: serde_json::from_str::<Features>(&features_json).map_err(|e| StorageError::Fatal {
            reason: format!("corrupt features json: {e}"),
        })?,
        state: engine_state_from_str(&state)?,
        created_at: parse_rfc3339("position.created_at", &created_at)?,
        updated_at: parse_rfc3339("position.updated_at", &updated_at)?,
    })
}

fn trade_event_from_row(row: &SqliteRow) -> StorageResult<TradeEvent> {
    let id: String = row.try_get("id").map_err(|e| map_sqlx_err("trade event", e))?;
    let trade_id: String = row.try_get("trade_id").map_err(|e| map_sqlx_err("trade event", e))?;
    let action_category: String =
        row.try_get("action_category").map_err(|e| map_sqlx_err("trade event", e))?;
    let scope_json: String = row.try_get("scope_json").map_err(|e| map_sqlx_err("trade event", e))?;
    let decision: Option<String> =
        row.try_get("decision").map_err(|e| map_sqlx_err("trade event", e))?;
    let outcome: Option<String> =
        row.try_get("outcome").map_err(|e| map_sqlx_err("trade event", e))?;
    let timestamp: String = row.try_get("timestamp").map_err(|e| map_sqlx_err("trade event", e))?;

    Ok(TradeEvent {
        id: Uuid::parse_str(&id).map_err(|e| StorageError::Fatal {
            reason: format!("invalid trade event id '{id}': {e}"),
        })?,
        trade_id,
        module: row.try_get("module").map_err(|e| map_sqlx_err("trade event", e))?,
        pattern_key: row.try_get("pattern_key").map_err(|e| map_sqlx_err("trade event", e))?,
        action_category: action_category_from_str(&action_category)?,
        scope: serde_json::from_str(&scope_json).map_err(|e| StorageError::Fatal {
            reason: format!("corrupt scope json: {e}"),
        })?,
        rr: row.try_get("rr").map_err(|e| map_sqlx_err("trade event", e))?,
        pnl_usd: row.try_get("pnl_usd").map_err(|e| map_sqlx_err("trade event", e))?,
        decision: decision.map(|d| decision_from_str(&d)).transpose()?,
        outcome: outcome.map(|o| outcome_from_str(&o)).transpose()?,
        timestamp: parse_rfc3339("trade_event.timestamp", &timestamp)?,
    })
}

fn lesson_from_row(row: &SqliteRow) -> StorageResult<Lesson> {
    let action_category: String =
        row.try_get("action_category").map_err(|e| map_sqlx_err("lesson", e))?;
    let scope_subset_json: String =
        row.try_get("scope_subset_json").map_err(|e| map_sqlx_err("lesson", e))?;
    let status: String = row.try_get("status").map_err(|e| map_sqlx_err("lesson", e))?;
    let stats_json: String = row.try_get("stats_json").map_err(|e| map_sqlx_err("lesson", e))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| map_sqlx_err("lesson", e))?;
    let n: i64 = row.try_get("n").map_err(|e| map_sqlx_err("lesson", e))?;

    Ok(Lesson {
        module: row.try_get("module").map_err(|e| map_sqlx_err("lesson", e))?,
        pattern_key: row.try_get("pattern_key").map_err(|e| map_sqlx_err("lesson", e))?,
        action_category: action_category_from_str(&action_category)?,
        scope_subset: serde_json::from_str::<ScopeSubset>(&scope_subset_json).map_err(|e| {
            StorageError::Fatal {
                reason: format!("corrupt scope subset json: {e}"),
            }
        })?,
        lesson_type: row.try_get("lesson_type").map_err(|e| map_sqlx_err("lesson", e))?,
        n: n as usize,
        stats: serde_json::from_str::<LessonStats>(&stats_json).map_err(|e| StorageError::Fatal {
            reason: format!("corrupt lesson stats json: {e}"),
        })?,
        decay_halflife_hours: row
            .try_get("decay_halflife_hours")
            .map_err(|e| map_sqlx_err("lesson", e))?,
        status: lesson_status_from_str(&status)?,
        updated_at: parse_rfc3339("lesson.updated_at", &updated_at)?,
    })
}

fn override_from_row(row: &SqliteRow) -> StorageResult<OverrideRow> {
    let action_category: String =
        row.try_get("action_category").map_err(|e| map_sqlx_err("override", e))?;
    let scope_subset_json: String =
        row.try_get("scope_subset_json").map_err(|e| map_sqlx_err("override", e))?;
    let last_updated_at: String =
        row.try_get("last_updated_at").map_err(|e| map_sqlx_err("override", e))?;

    Ok(OverrideRow {
        pattern_key: row.try_get("pattern_key").map_err(|e| map_sqlx_err("override", e))?,
        action_category: override_category_from_str(&action_category)?,
        scope_subset: serde_json::from_str::<ScopeSubset>(&scope_subset_json).map_err(|e| {
            StorageError::Fatal {
                reason: format!("corrupt scope subset json: {e}"),
            }
        })?,
        multiplier: row.try_get("multiplier").map_err(|e| map_sqlx_err("override", e))?,
        confidence_score: row
            .try_get("confidence_score")
            .map_err(|e| map_sqlx_err("override", e))?,
        decay_state: row.try_get("decay_state").map_err(|e| map_sqlx_err("override", e))?,
        last_updated_at: parse_rfc3339("override.last_updated_at", &last_updated_at)?,
    })
}

#[async_trait]
impl StorageGateway for SqliteStorageGateway {
    async fn get_driver_bars(
        &self,
        driver: &str,
        book_id: &str,
        tf: Timeframe,
        since: Option<i64>,
        until: Option<i64>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<DriverBar>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT driver, timeframe, book_id, timestamp, open_usd, high_usd, low_usd, \
             close_usd, volume, source FROM regime_price_ohlc WHERE driver = ",
        );
        qb.push_bind(driver.to_string());
        qb.push(" AND book_id = ").push_bind(book_id.to_string());
        qb.push(" AND timeframe = ").push_bind(tf.as_str());
        if let Some(s) = since {
            qb.push(" AND timestamp >= ").push_bind(s);
        }
        if let Some(u) = until {
            qb.push(" AND timestamp <= ").push_bind(u);
        }
        qb.push(" ORDER BY timestamp ASC");
        if let Some(l) = limit {
            qb.push(" LIMIT ").push_bind(l as i64);
        }

        let rows = qb
            .build()
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_err("regime_price_ohlc", e))?;
        rows.iter().map(driver_bar_from_row).collect()
    }

    async fn upsert_driver_bars(&self, rows: &[DriverBar]) -> StorageResult<()> {
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("regime_price_ohlc", e))?;

        for bar in rows {
            sqlx::query(
                r#"
                INSERT INTO regime_price_ohlc
                    (driver, timeframe, book_id, timestamp, open_usd, high_usd, low_usd, close_usd, volume, source)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(driver, book_id, timeframe, timestamp) DO UPDATE SET
                    open_usd = excluded.open_usd,
                    high_usd = excluded.high_usd,
                    low_usd = excluded.low_usd,
                    close_usd = excluded.close_usd,
                    volume = excluded.volume,
                    source = excluded.source
                "#,
            )
            .bind(&bar.driver)
            .bind(bar.timeframe.as_str())
            .bind(&bar.book_id)
            .bind(bar.timestamp)
            .bind(bar.ohlc_usd.open)
            .bind(bar.ohlc_usd.high)
            .bind(bar.ohlc_usd.low)
            .bind(bar.ohlc_usd.close)
            .bind(bar.ohlc_usd.volume)
            .bind(bar.source.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("regime_price_ohlc", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_err("regime_price_ohlc", e))?;
        Ok(())
    }

    async fn get_tradable_bars(
        &self,
        token_contract: &str,
        chain: &str,
        tf: Timeframe,
        since: Option<i64>,
        until: Option<i64>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<TradableBar>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT token_contract, chain, timeframe, timestamp, open_usd, high_usd, low_usd, \
             close_usd, volume, open_native, high_native, low_native, close_native \
             FROM lowcap_price_ohlc WHERE token_contract = ",
        );
        qb.push_bind(token_contract.to_string());
        qb.push(" AND chain = ").push_bind(chain.to_string());
        qb.push(" AND timeframe = ").push_bind(tf.as_str());
        if let Some(s) = since {
            qb.push(" AND timestamp >= ").push_bind(s);
        }
        if let Some(u) = until {
            qb.push(" AND timestamp <= ").push_bind(u);
        }
        qb.push(" ORDER BY timestamp ASC");
        if let Some(l) = limit {
            qb.push(" LIMIT ").push_bind(l as i64);
        }

        let rows = qb
            .build()
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_err("lowcap_price_ohlc", e))?;
        rows.iter().map(tradable_bar_from_row).collect()
    }

    async fn upsert_tradable_bars(&self, rows: &[TradableBar]) -> StorageResult<()> {
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("lowcap_price_ohlc", e))?;

        for bar in rows {
            let native = bar.ohlc_native.unwrap_or(Ohlc::new(0.0, 0.0, 0.0, 0.0, 0.0));
            sqlx::query(
                r#"
                INSERT INTO lowcap_price_ohlc
                    (token_contract, chain, timeframe, timestamp, open_usd, high_usd, low_usd,
                     close_usd, open_native, high_native, low_native, close_native, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(token_contract, chain, timeframe, timestamp) DO UPDATE SET
                    open_usd = excluded.open_usd,
                    high_usd = excluded.high_usd,
                    low_usd = excluded.low_usd,
                    close_usd = excluded.close_usd,
                    open_native = excluded.open_native,
                    high_native = excluded.high_native,
                    low_native = excluded.low_native,
                    close_native = excluded.close_native,
                    volume = excluded.volume
                "#,
            )
            .bind(&bar.token_contract)
            .bind(&bar.chain)
            .bind(bar.timeframe.as_str())
            .bind(bar.timestamp)
            .bind(bar.ohlc_usd.open)
            .bind(bar.ohlc_usd.high)
            .bind(bar.ohlc_usd.low)
            .bind(bar.ohlc_usd.close)
            .bind(native.open)
            .bind(native.high)
            .bind(native.low)
            .bind(native.close)
            .bind(bar.ohlc_usd.volume)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("lowcap_price_ohlc", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_err("lowcap_price_ohlc", e))?;
        Ok(())
    }

    async fn get_position(&self, id: Uuid) -> StorageResult<Position> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_err("positions", e))?
            .ok_or_else(|| StorageError::NotFound {
                what: format!("position {id}"),
            })?;
        position_from_row(&row)
    }

    async fn get_position_by_ticker(
        &self,
        ticker: &str,
        tf: Timeframe,
        status: PositionStatus,
    ) -> StorageResult<Option<Position>> {
        let row = sqlx::query(
            "SELECT * FROM positions WHERE ticker = ? AND timeframe = ? AND status = ? LIMIT 1",
        )
        .bind(ticker)
        .bind(tf.as_str())
        .bind(position_status_as_str(status))
        .fetch_optional(&self.db.pool)
        .await
        .map_err(|e| map_sqlx_err("positions", e))?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn upsert_position(&self, position: &Position) -> StorageResult<()> {
        let features_json =
            serde_json::to_string(&position.features).map_err(|e| StorageError::Fatal {
                reason: format!("failed to serialize features: {e}"),
            })?;

        sqlx::query(
            r#"
            INSERT INTO positions
                (id, token_contract, chain, ticker, timeframe, status, book_id, bars_count,
                 features_json, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                bars_count = excluded.bars_count,
                features_json = excluded.features_json,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(position.id.to_string())
        .bind(&position.token_contract)
        .bind(&position.chain)
        .bind(&position.ticker)
        .bind(position.timeframe.as_str())
        .bind(position_status_as_str(position.status))
        .bind(&position.book_id)
        .bind(position.bars_count as i64)
        .bind(features_json)
        .bind(position.state.as_str())
        .bind(position.created_at.to_rfc3339())
        .bind(position.updated_at.to_rfc3339())
        .execute(&self.db.pool)
        .await
        .map_err(|e| map_sqlx_err("positions", e))?;

        Ok(())
    }

    async fn get_active_positions(&self, tf: Option<Timeframe>) -> StorageResult<Vec<Position>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT * FROM positions WHERE status IN ('active', 'regime_driver')",
        );
        if let Some(tf) = tf {
            qb.push(" AND timeframe = ").push_bind(tf.as_str());
        }
        let rows = qb
            .build()
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_err("positions", e))?;
        rows.iter().map(position_from_row).collect()
    }

    async fn get_positions_by_status(
        &self,
        status: PositionStatus,
        tf: Option<Timeframe>,
    ) -> StorageResult<Vec<Position>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM positions WHERE status = ");
        qb.push_bind(position_status_as_str(status));
        if let Some(tf) = tf {
            qb.push(" AND timeframe = ").push_bind(tf.as_str());
        }
        let rows = qb
            .build()
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_err("positions", e))?;
        rows.iter().map(position_from_row).collect()
    }

    async fn read_features(&self, position_id: Uuid) -> StorageResult<Features> {
        let row = sqlx::query("SELECT features_json FROM positions WHERE id = ?")
            .bind(position_id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_err("positions", e))?
            .ok_or_else(|| StorageError::NotFound {
                what: format!("position {position_id}"),
            })?;
        let features_json: String =
            row.try_get("features_json").map_err(|e| map_sqlx_err("positions", e))?;
        serde_json::from_str(&features_json).map_err(|e| StorageError::Fatal {
            reason: format!("corrupt features json: {e}"),
        })
    }

    async fn write_features(&self, position_id: Uuid, features: &Features) -> StorageResult<()> {
        let features_json = serde_json::to_string(features).map_err(|e| StorageError::Fatal {
            reason: format!("failed to serialize features: {e}"),
        })?;
        let result = sqlx::query(
            "UPDATE positions SET features_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(features_json)
        .bind(Utc::now().to_rfc3339())
        .bind(position_id.to_string())
        .execute(&self.db.pool)
        .await
        .map_err(|e| map_sqlx_err("positions", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                what: format!("position {position_id}"),
            });
        }
        Ok(())
    }

    async fn insert_trade_events(&self, rows: &[TradeEvent]) -> StorageResult<usize> {
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("pattern_trade_events", e))?;
        let mut inserted = 0usize;

        for event in rows {
            let scope_json = serde_json::to_string(&event.scope).map_err(|e| StorageError::Fatal {
                reason: format!("failed to serialize scope: {e}"),
            })?;
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO pattern_trade_events
                    (id, trade_id, module, pattern_key, action_category, scope_json, rr,
                     pnl_usd, decision, outcome, timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.id.to_string())
            .bind(&event.trade_id)
            .bind(&event.module)
            .bind(&event.pattern_key)
            .bind(action_category_as_str(event.action_category))
            .bind(scope_json)
            .bind(event.rr)
            .bind(event.pnl_usd)
            .bind(event.decision.map(decision_as_str))
            .bind(event.outcome.map(outcome_as_str))
            .bind(event.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("pattern_trade_events", e))?;

            inserted += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(|e| map_sqlx_err("pattern_trade_events", e))?;
        Ok(inserted)
    }

    async fn get_trade_events(
        &self,
        since: Option<i64>,
        limit: usize,
        trade_id: Option<&str>,
    ) -> StorageResult<Vec<TradeEvent>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, trade_id, module, pattern_key, action_category, scope_json, rr, \
             pnl_usd, decision, outcome, timestamp FROM pattern_trade_events",
        );
        let mut where_pushed = false;
        if let Some(s) = since {
            qb.push(" WHERE timestamp >= ").push_bind(
                DateTime::<Utc>::from_timestamp(s, 0)
                    .unwrap_or_else(Utc::now)
                    .to_rfc3339(),
            );
            where_pushed = true;
        }
        if let Some(id) = trade_id {
            qb.push(if where_pushed { " AND trade_id = " } else { " WHERE trade_id = " });
            qb.push_bind(id.to_string());
        }
        qb.push(" ORDER BY timestamp ASC LIMIT ").push_bind(limit as i64);

        let rows = qb
            .build()
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_err("pattern_trade_events", e))?;
        rows.iter().map(trade_event_from_row).collect()
    }

    async fn upsert_lessons(&self, batch: &[Lesson]) -> StorageResult<()> {
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("learning_lessons", e))?;

        for lesson in batch {
            let scope_subset_json =
                serde_json::to_string(&lesson.scope_subset).map_err(|e| StorageError::Fatal {
                    reason: format!("failed to serialize scope subset: {e}"),
                })?;
            let stats_json = serde_json::to_string(&lesson.stats).map_err(|e| StorageError::Fatal {
                reason: format!("failed to serialize lesson stats: {e}"),
            })?;

            sqlx::query(
                r#"
                INSERT INTO learning_lessons
                    (module, pattern_key, action_category, scope_subset_key, scope_subset_json,
                     lesson_type, n, stats_json, decay_halflife_hours, status, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(module, pattern_key, action_category, scope_subset_key) DO UPDATE SET
                    lesson_type = excluded.lesson_type,
                    n = excluded.n,
                    stats_json = excluded.stats_json,
                    decay_halflife_hours = excluded.decay_halflife_hours,
                    status = excluded.status,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&lesson.module)
            .bind(&lesson.pattern_key)
            .bind(action_category_as_str(lesson.action_category))
            .bind(lesson.scope_subset.canonical_key())
            .bind(scope_subset_json)
            .bind(&lesson.lesson_type)
            .bind(lesson.n as i64)
            .bind(stats_json)
            .bind(lesson.decay_halflife_hours)
            .bind(lesson_status_as_str(lesson.status))
            .bind(lesson.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("learning_lessons", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_err("learning_lessons", e))?;
        Ok(())
    }

    async fn upsert_override(&self, row: &OverrideRow) -> StorageResult<()> {
        let scope_subset_json =
            serde_json::to_string(&row.scope_subset).map_err(|e| StorageError::Fatal {
                reason: format!("failed to serialize scope subset: {e}"),
            })?;

        sqlx::query(
            r#"
            INSERT INTO pm_overrides
                (pattern_key, action_category, scope_subset_key, scope_subset_json, multiplier,
                 confidence_score, decay_state, last_updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(pattern_key, action_category, scope_subset_key) DO UPDATE SET
                multiplier = excluded.multiplier,
                confidence_score = excluded.confidence_score,
                decay_state = excluded.decay_state,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(&row.pattern_key)
        .bind(override_category_as_str(row.action_category))
        .bind(row.scope_subset.canonical_key())
        .bind(scope_subset_json)
        .bind(row.multiplier)
        .bind(row.confidence_score)
        .bind(&row.decay_state)
        .bind(row.last_updated_at.to_rfc3339())
        .execute(&self.db.pool)
        .await
        .map_err(|e| map_sqlx_err("pm_overrides", e))?;

        Ok(())
    }

    async fn get_active_lessons(&self, module: &str, lesson_type: &str) -> StorageResult<Vec<Lesson>> {
        let rows = sqlx::query(
            "SELECT * FROM learning_lessons WHERE module = ? AND lesson_type = ? AND status = 'active'",
        )
        .bind(module)
        .bind(lesson_type)
        .fetch_all(&self.db.pool)
        .await
        .map_err(|e| map_sqlx_err("learning_lessons", e))?;
        rows.iter().map(lesson_from_row).collect()
    }

    async fn find_override(
        &self,
        pattern_key: &str,
        action_category: &str,
        scope: &ScopeSubset,
    ) -> StorageResult<Option<OverrideRow>> {
        let row = sqlx::query(
            "SELECT * FROM pm_overrides WHERE pattern_key = ? AND action_category = ? AND scope_subset_key = ?",
        )
        .bind(pattern_key)
        .bind(action_category)
        .bind(scope.canonical_key())
        .fetch_optional(&self.db.pool)
        .await
        .map_err(|e| map_sqlx_err("pm_overrides", e))?;

        row.as_ref().map(override_from_row).transpose()
    }
}
