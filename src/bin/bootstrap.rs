//! `bootstrap` — runs the idempotent startup sequence once and exits.
//! Prints the `working / degraded / failed` summary line and exits 0
//! unless bootstrap reports `Failed` (§4.7, §7).

use std::sync::Arc;

use regime_engine::application::bootstrap::{BootstrapOrchestrator, BootstrapSources};
use regime_engine::config::Config;
use regime_engine::domain::regime::{CandleSource, StorageGateway};
use regime_engine::infrastructure::candle_sources::{BinanceCandleSource, DominanceCandleSource, DominanceKind};
use regime_engine::infrastructure::persistence::{Database, SqliteStorageGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let database = Database::new(&config.database_url).await?;
    let storage: Arc<dyn StorageGateway> = Arc::new(SqliteStorageGateway::new(database));

    let btc: Vec<Arc<dyn CandleSource>> = vec![Arc::new(BinanceCandleSource::new())];
    let btc_dominance: Vec<Arc<dyn CandleSource>> = vec![Arc::new(DominanceCandleSource::new(DominanceKind::Btc))];
    let usdt_dominance: Vec<Arc<dyn CandleSource>> = vec![Arc::new(DominanceCandleSource::new(DominanceKind::Usdt))];

    let orchestrator = BootstrapOrchestrator::new(
        storage,
        BootstrapSources {
            btc,
            btc_dominance,
            usdt_dominance,
        },
        config.book_id.0.clone(),
        config.engine_constants,
        None,
    );

    let report = orchestrator.run().await?;
    println!("{}", report.summary_line());
    std::process::exit(report.status().exit_code());
}
