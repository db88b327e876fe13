mod config;
mod consolidate;
mod db;
mod error;
mod feed;
mod parser;
mod prune;
mod rankings;
mod spool;

use crate::config::Config;
use crate::consolidate::Consolidator;
use crate::spool::Spool;
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "punctuality-sidecar",
    version,
    about = "Rail punctuality feed ingest + consolidation"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the live feed subscriber until the broker session dies (default)
    Subscribe,
    /// Create the store schema if missing
    InitDb,
    /// Merge spooled feed records into the store (cron trigger)
    Consolidate,
    /// Collapse duplicate day records left in the store (cron trigger)
    Prune,
    /// Print operator rankings over a lookback window
    Rankings {
        /// Lookback window in days
        #[arg(long, default_value_t = 7)]
        window: u32,
    },
}

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,punctuality_sidecar=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing()?;

    match cli.command.unwrap_or(Command::Subscribe) {
        Command::Subscribe => {
            let spool = Spool::new(config.spool_path.clone())?;
            tokio::select! {
                result = feed::run_subscriber(&config, spool) => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                }
            }
        }
        Command::InitDb => {
            let pool = db::build_pool(&config.database_path, config.db_pool_size).await?;
            db::init_schema(&pool).await?;
            println!("initialized store at {}", config.database_path.display());
        }
        Command::Consolidate => {
            let pool = db::build_pool(&config.database_path, config.db_pool_size).await?;
            db::init_schema(&pool).await?;
            let spool = Spool::new(config.spool_path.clone())?;
            let outcome = Consolidator::new(pool, spool).run().await?;
            println!("{}", outcome.message);
        }
        Command::Prune => {
            let pool = db::build_pool(&config.database_path, config.db_pool_size).await?;
            db::init_schema(&pool).await?;
            let outcome = prune::run_prune(&pool).await?;
            println!("{}", outcome.message);
        }
        Command::Rankings { window } => {
            let pool = db::build_pool(&config.database_path, config.db_pool_size).await?;
            db::init_schema(&pool).await?;
            let as_of = chrono::Utc::now().date_naive();
            let table = rankings::window_rankings(&pool, as_of, window).await?;
            if table.is_empty() {
                println!("no records in the last {window} days");
            } else {
                for (position, row) in table.iter().enumerate() {
                    println!("{:>2}. {:<30} {:>6.2}", position + 1, row.operator_name, row.average_ppm);
                }
            }
        }
    }

    Ok(())
}
