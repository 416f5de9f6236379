//! Process configuration, loaded once at startup. Follows the teacher's
//! env-var-with-default-and-context idiom: every var is read, parsed, and
//! given a sensible default via `unwrap_or_else`, with `.context(...)`
//! reserved for values that have no safe default.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

use crate::domain::regime::EngineConstants;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Process-wide book scope, attached to every driver row this process
/// writes. Lets multiple engine instances share one `regime_price_ohlc`
/// table without colliding, per §3's "book_id scope" on driver bars.
#[derive(Debug, Clone)]
pub struct BookId(pub String);

impl Default for BookId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

/// Per-timeframe cadence knobs for the recurring task schedule (§5).
#[derive(Debug, Clone, Copy)]
pub struct TaskCadence {
    /// Seconds after a collector tick boundary that the TA+Engine task
    /// wakes. Resolved Open Question: midpoint of the spec's 5-15s range.
    pub ta_task_offset_seconds: u64,
    pub composite_rollup_interval_seconds: u64,
    pub event_logger_interval_hours: u64,
    pub miner_interval_hours: u64,
    pub materializer_interval_hours: u64,
    pub meta_learning_interval_hours: u64,
}

impl Default for TaskCadence {
    fn default() -> Self {
        Self {
            ta_task_offset_seconds: 10,
            composite_rollup_interval_seconds: 60,
            event_logger_interval_hours: 2,
            miner_interval_hours: 6,
            materializer_interval_hours: 2,
            meta_learning_interval_hours: 24 * 7,
        }
    }
}

/// Process-wide configuration, loaded once via [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub log_level: String,
    pub book_id: BookId,

    /// Tracked lowcap symbols this process collects bars and runs the
    /// engine for, independent of the always-on regime-driver set.
    pub tracked_symbols: Vec<String>,

    /// Toggles the live websocket ingester (§6). When false, only
    /// backfill/REST collection runs.
    pub ingest_enabled: bool,
    /// When true, the engine still computes and logs everything but the
    /// (external) execution collaborator skips side-effecting actions;
    /// observed here only to suppress attaching trade-outcome events.
    pub dry_run: bool,

    pub engine_constants: EngineConstants,
    pub cadence: TaskCadence,

    pub max_positions: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://regime_engine.db".to_string());
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let book_id = BookId(env::var("BOOK_ID").unwrap_or_else(|_| "default".to_string()));

        let tracked_symbols = env::var("TRACKED_SYMBOLS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let ingest_enabled = env_bool("INGEST_ENABLED", true);
        let dry_run = env_bool("DRY_RUN", false);

        let mut engine_constants = EngineConstants::default();
        engine_constants.adx_floor = env_or("ENGINE_ADX_FLOOR", engine_constants.adx_floor);
        engine_constants.ti_entry = env_or("ENGINE_TI_ENTRY", engine_constants.ti_entry);
        engine_constants.ts_entry = env_or("ENGINE_TS_ENTRY", engine_constants.ts_entry);
        engine_constants.dx_buy = env_or("ENGINE_DX_BUY", engine_constants.dx_buy);
        engine_constants.ox_sell = env_or("ENGINE_OX_SELL", engine_constants.ox_sell);

        let cadence = TaskCadence {
            ta_task_offset_seconds: env_or("TA_TASK_OFFSET_SECONDS", 10),
            composite_rollup_interval_seconds: env_or("ROLLUP_INTERVAL_SECONDS", 60),
            event_logger_interval_hours: env_or("EVENT_LOGGER_INTERVAL_HOURS", 2),
            miner_interval_hours: env_or("MINER_INTERVAL_HOURS", 6),
            materializer_interval_hours: env_or("MATERIALIZER_INTERVAL_HOURS", 2),
            meta_learning_interval_hours: env_or("META_LEARNING_INTERVAL_HOURS", 24 * 7),
        };

        let max_positions: usize = env::var("MAX_POSITIONS")
            .unwrap_or_else(|_| "40".to_string())
            .parse()
            .context("MAX_POSITIONS must be a positive integer")?;

        Ok(Self {
            database_url,
            log_level,
            book_id,
            tracked_symbols,
            ingest_enabled,
            dry_run,
            engine_constants,
            cadence,
            max_positions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cadence_matches_spec_midpoint() {
        let cadence = TaskCadence::default();
        assert_eq!(cadence.ta_task_offset_seconds, 10);
    }

    #[test]
    fn engine_constants_default_matches_v3_oracle_values() {
        let constants = EngineConstants::default();
        assert_eq!(constants.adx_floor, 18.0);
        assert_eq!(constants.ti_entry, 0.45);
        assert_eq!(constants.ts_entry, 0.58);
        assert_eq!(constants.dx_buy, 0.65);
        assert_eq!(constants.ox_sell, 0.65);
    }
}
