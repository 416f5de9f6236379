//! `learning-scheduler [--once]` — runs the miner, materializer, and weekly
//! meta-learning jobs. Without `--once`, loops on the configured cadence;
//! with it, runs exactly one pass of each and exits (§6 CLI surface).

use std::sync::Arc;

use clap::Parser;
use regime_engine::application::system::{run_materializer_pass, run_meta_learning_pass, run_miner_pass};
use regime_engine::config::Config;
use regime_engine::domain::regime::StorageGateway;
use regime_engine::infrastructure::persistence::{Database, SqliteStorageGateway};
use tokio::time::{interval, Duration};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "learning-scheduler")]
struct Args {
    /// Run one pass of every learning job and exit, instead of looping on cadence.
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let database = Database::new(&config.database_url).await?;
    let storage: Arc<dyn StorageGateway> = Arc::new(SqliteStorageGateway::new(database));

    if args.once {
        run_pass(&storage).await;
        return Ok(());
    }

    let mut miner_ticker = interval(Duration::from_secs(config.cadence.miner_interval_hours.max(1) * 3600));
    let mut materializer_ticker = interval(Duration::from_secs(
        config.cadence.materializer_interval_hours.max(1) * 3600,
    ));
    let mut meta_ticker = interval(Duration::from_secs(
        config.cadence.meta_learning_interval_hours.max(1) * 3600,
    ));
    loop {
        tokio::select! {
            _ = miner_ticker.tick() => {
                if let Err(err) = run_miner_pass(&storage).await {
                    warn!(%err, "lesson mining pass failed");
                }
            }
            _ = materializer_ticker.tick() => {
                if let Err(err) = run_materializer_pass(&storage).await {
                    warn!(%err, "materializer pass failed");
                }
            }
            _ = meta_ticker.tick() => {
                if let Err(err) = run_meta_learning_pass(&storage).await {
                    warn!(%err, "meta-learning pass failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("learning-scheduler shutting down");
                return Ok(());
            }
        }
    }
}

async fn run_pass(storage: &Arc<dyn StorageGateway>) {
    if let Err(err) = run_miner_pass(storage).await {
        warn!(%err, "lesson mining pass failed");
    }
    if let Err(err) = run_materializer_pass(storage).await {
        warn!(%err, "materializer pass failed");
    }
    if let Err(err) = run_meta_learning_pass(storage).await {
        warn!(%err, "meta-learning pass failed");
    }
    info!("learning-scheduler: one-shot pass complete");
}
