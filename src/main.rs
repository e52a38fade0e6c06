//! # Fare Scanner CLI (`fares`)
//!
//! ## Usage
//!
//! ```bash
//! fares --config ./config/fares.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fares init` | Create the SQLite database and schema |
//! | `fares scan` | Scan on a fixed interval until Ctrl-C |
//! | `fares scan --once` | Run a single scan cycle and print its summary |
//! | `fares dates` | Print the date pairs and task count of a cycle |
//! | `fares stats <ORIGIN> <DEST>` | Show count, median and average for a route |

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use fare_scanner::config::{self, Config};
use fare_scanner::dates::DateWindow;
use fare_scanner::notifier::{create_notifier, Notifier};
use fare_scanner::provider::create_provider;
use fare_scanner::scanner::{build_tasks, Scanner};
use fare_scanner::store::SqliteStore;
use fare_scanner::{db, migrate, stats};

/// Fare Scanner: watch flight prices and report unusually cheap round trips.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/fares.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "fares", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fares.toml")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Scan routes for deals.
    ///
    /// Requires `AMADEUS_API_KEY` and `AMADEUS_API_SECRET`, or
    /// `TRAVELPAYOUTS_API_TOKEN` when `provider.kind = "travelpayouts"`, in
    /// the environment (a `.env` file is read if present).
    Scan {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },

    /// Print the date pairs one cycle would search.
    Dates,

    /// Show price statistics for a route.
    Stats {
        /// Origin IATA code.
        origin: String,

        /// Destination IATA code.
        destination: String,

        /// Restrict to a departure month (1-12).
        #[arg(long)]
        month: Option<u32>,

        /// Restrict to a departure year.
        #[arg(long)]
        year: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("fare_scanner={},fares={},sqlx=warn", cli.log_level, cli.log_level).into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Scan { once } => {
            run_scan(&cfg, once).await?;
        }
        Commands::Dates => {
            print_dates(&cfg);
        }
        Commands::Stats {
            origin,
            destination,
            month,
            year,
        } => {
            stats::run_stats(
                &cfg,
                &origin.to_uppercase(),
                &destination.to_uppercase(),
                month,
                year,
            )
            .await?;
        }
    }

    Ok(())
}

async fn run_scan(cfg: &Config, once: bool) -> Result<()> {
    let provider = create_provider(&cfg.provider)?;

    migrate::run_migrations(cfg).await?;
    let pool = db::connect(cfg).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));

    let notifier: Arc<dyn Notifier> = Arc::from(create_notifier(&cfg.notifier)?);

    let scanner = Arc::new(Scanner::new(cfg, provider, store, notifier));

    if once {
        let summary = scanner.run_cycle(Local::now().date_naive()).await;
        println!("Scan complete.");
        println!("  Observations:   {}", summary.total_observations);
        println!("  Deals detected: {}", summary.deals_detected);
        println!("  Deals notified: {}", summary.deals_notified);
    } else {
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("stop requested, finishing current cycle");
                let _ = stop_tx.send(true);
            }
        });
        scanner.run(stop_rx).await;
    }

    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

fn print_dates(cfg: &Config) {
    let today = Local::now().date_naive();
    let window = DateWindow::from_config(today, &cfg.scan);

    println!("{:<12} {:<12} {:>5}", "DEPARTURE", "RETURN", "STAY");
    let mut pairs = 0;
    for pair in window.pairs() {
        println!(
            "{:<12} {:<12} {:>5}",
            pair.departure.to_string(),
            pair.return_date.to_string(),
            (pair.return_date - pair.departure).num_days()
        );
        pairs += 1;
    }

    let tasks = build_tasks(&cfg.scan, today).len();
    println!();
    println!("{} date pairs", pairs);
    println!(
        "{} origins x {} destinations x {} pairs = {} searches per cycle",
        cfg.scan.origins.len(),
        cfg.scan.destinations.len(),
        pairs,
        tasks
    );
}
