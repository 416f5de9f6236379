//! `regime-runner --timeframe 1h|1d|1m|--all|--summary` — on-demand driver
//! for the TA+Engine pass, outside the recurring scheduler (§6 CLI surface).

use std::sync::Arc;

use clap::Parser;
use regime_engine::application::system::run_ta_engine_pass;
use regime_engine::config::Config;
use regime_engine::domain::regime::{PositionStatus, StorageGateway, Timeframe};
use regime_engine::infrastructure::persistence::{Database, SqliteStorageGateway};

#[derive(Parser)]
#[command(name = "regime-runner")]
struct Args {
    /// Run one timeframe's TA+Engine pass: 1m, 1h, or 1d.
    #[arg(long)]
    timeframe: Option<String>,

    /// Run all three timeframes' passes in sequence.
    #[arg(long, default_value_t = false)]
    all: bool,

    /// Print current state/flags for every regime-driver position instead
    /// of running a pass.
    #[arg(long, default_value_t = false)]
    summary: bool,
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

    if args.summary {
        print_summary(&storage).await?;
        return Ok(());
    }

    let timeframes: Vec<Timeframe> = if args.all {
        Timeframe::ALL.to_vec()
    } else {
        let tf = args
            .timeframe
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("one of --timeframe <1m|1h|1d>, --all, or --summary is required"))?
            .parse::<Timeframe>()?;
        vec![tf]
    };

    for tf in timeframes {
        run_ta_engine_pass(&storage, &config.book_id.0, tf, &config.engine_constants).await?;
        println!("{}: TA+Engine pass complete", tf.as_str());
    }
    Ok(())
}

async fn print_summary(storage: &Arc<dyn StorageGateway>) -> anyhow::Result<()> {
    let drivers = storage.get_positions_by_status(PositionStatus::RegimeDriver, None).await?;
    println!("{:<12} {:<4} {:<4} {:<8}", "driver", "tf", "state", "bars");
    for position in drivers {
        println!(
            "{:<12} {:<4} {:<4?} {:<8}",
            position.ticker,
            position.timeframe.as_str(),
            position.state,
            position.bars_count
        );
    }
    Ok(())
}
