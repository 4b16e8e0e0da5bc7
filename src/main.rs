use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shelfwatch::config::{LoggingConfig, MetricsConfig};
use shelfwatch::database::{self, ScraperStore};
use shelfwatch::models::ScraperConfig;
use shelfwatch::{AppConfig, HttpFetcher, ScraperRegistry, SqliteStore};

#[derive(Parser)]
#[command(name = "shelfwatch", about = "Scheduled product-listing scraper", version)]
struct Cli {
    /// Configuration file (defaults to config/default.toml when present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run,
    /// Perform a single tick and wait for its runs
    Once,
    /// Apply database migrations
    Migrate,
    /// Insert the sample scrapers into an empty database
    Seed,
    /// Print the configured scrapers
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _guard = init_logging(&config.logging)?;

    info!("Starting Shelfwatch {}", env!("CARGO_PKG_VERSION"));

    let pool = database::connect(&config.database).await?;
    database::migrate(&pool).await.context("Failed to apply migrations")?;
    let store = SqliteStore::new(pool);

    match cli.command {
        Commands::Migrate => info!("Migrations applied"),
        Commands::Seed => {
            let inserted = store.seed_sample_data().await?;
            info!("Seeded {} sample scraper(s)", inserted);
        }
        Commands::List { json } => list_scrapers(&store, json).await?,
        Commands::Once => {
            init_metrics(&config.metrics)?;
            let registry = build_registry(&config, store)?;
            registry.load_initial().await?;

            let report = registry.tick().await;
            let found = registry.wait_for_runs().await;
            info!(
                "Dispatched {} run(s), {} item(s) found",
                report.dispatched.len(),
                found
            );
        }
        Commands::Run => {
            init_metrics(&config.metrics)?;
            let registry = Arc::new(build_registry(&config, store)?);
            registry.load_initial().await?;

            let signal_registry = Arc::clone(&registry);
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Unable to listen for shutdown signal: {}", e);
                    return;
                }
                info!("Shutting down...");
                signal_registry.stop();
            });

            registry.run().await;

            let stats = registry.stats().await;
            info!(
                "Completed {} run(s), {} item(s) found in {}s",
                stats.completed_runs, stats.items_found, stats.uptime_seconds
            );
        }
    }

    Ok(())
}

fn build_registry(config: &AppConfig, store: SqliteStore) -> Result<ScraperRegistry> {
    let fetcher = HttpFetcher::new(&config.http)?;
    Ok(ScraperRegistry::new(
        Arc::new(store),
        Arc::new(fetcher),
        config.scheduler.clone(),
    ))
}

fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)?,
    };

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "shelfwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.port))
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics exporter listening on port {}", config.port);
    Ok(())
}

async fn list_scrapers(store: &SqliteStore, json: bool) -> Result<()> {
    let mut records = Vec::new();
    for summary in store.list_scrapers().await? {
        records.push(store.load_scraper(summary.id).await?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    for record in records {
        let id = record.id;
        let enabled = record.enabled;
        let name = record.name.clone();
        let frequency = record.run_frequency;
        let validity = match ScraperConfig::try_from(record) {
            Ok(config) => config.rules.url,
            Err(e) => format!("invalid: {e}"),
        };
        println!(
            "{:>4}  {:<8}  {:<24}  every {:.4}h  {}",
            id,
            if enabled { "enabled" } else { "disabled" },
            name,
            frequency,
            validity
        );
    }

    Ok(())
}
