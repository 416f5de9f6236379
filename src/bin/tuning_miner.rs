//! `tuning-miner` — one-shot recursive-scope lesson mining pass over the
//! trade-event log, without materializing overrides. Useful for operator
//! inspection of what the miner would produce before the scheduled
//! materializer consumes it (§6 CLI surface).

use std::sync::Arc;

use regime_engine::application::learning::miner::EVENT_LOOKBACK;
use regime_engine::application::learning::{mine_lessons, mine_tuning_rate_lessons};
use regime_engine::config::Config;
use regime_engine::domain::regime::StorageGateway;
use regime_engine::infrastructure::persistence::{Database, SqliteStorageGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let database = Database::new(&config.database_url).await?;
    let storage: Arc<dyn StorageGateway> = Arc::new(SqliteStorageGateway::new(database));

    let events = storage.get_trade_events(None, EVENT_LOOKBACK, None).await?;
    let strength_lessons = mine_lessons("pm", &events);
    let tuning_lessons = mine_tuning_rate_lessons("pm", &events);

    println!(
        "mined {} pm_strength lessons, {} tuning_rates lessons from {} events",
        strength_lessons.len(),
        tuning_lessons.len(),
        events.len()
    );
    for lesson in strength_lessons.iter().chain(tuning_lessons.iter()) {
        println!(
            "  {} / {:?} / {:?} n={} avg_rr={:.3} delta_rr={:.3} edge_raw={:.3}",
            lesson.pattern_key,
            lesson.action_category,
            lesson.scope_subset,
            lesson.stats.n,
            lesson.stats.avg_rr,
            lesson.stats.delta_rr,
            lesson.stats.edge_raw,
        );
    }

    if !strength_lessons.is_empty() {
        storage.upsert_lessons(&strength_lessons).await?;
    }
    if !tuning_lessons.is_empty() {
        storage.upsert_lessons(&tuning_lessons).await?;
    }
    Ok(())
}
