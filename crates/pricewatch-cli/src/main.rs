use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pricewatch_storage::{CatalogStore, HttpFetcher, MemoryCatalogStore, PgCatalogStore};
use pricewatch_sync::{SourceRegistry, Supervisor, SyncConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pricewatch-cli")]
#[command(about = "Retail price watch crawler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl every enabled source until interrupted.
    Crawl {
        /// Keep results in memory instead of Postgres.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a single cycle for one source and print its summary.
    Once {
        #[arg(long)]
        source: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply database migrations.
    Migrate,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = matches!(
        std::env::var("PRICEWATCH_LOG_JSON").as_deref(),
        Ok("1" | "true" | "TRUE" | "True")
    );
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_store(config: &SyncConfig, dry_run: bool) -> Result<Arc<dyn CatalogStore>> {
    if dry_run {
        info!("dry run: catalog kept in memory");
        return Ok(Arc::new(MemoryCatalogStore::new()));
    }
    let store = PgCatalogStore::connect(&config.database_url)
        .await
        .context("connecting to catalog database")?;
    Ok(Arc::new(store))
}

async fn build_supervisor(config: &SyncConfig, dry_run: bool) -> Result<Supervisor> {
    let http = Arc::new(HttpFetcher::new(config.http_client())?);
    let store = open_store(config, dry_run).await?;
    Ok(Supervisor::new(http, store).with_page_delay(config.page_delay()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Crawl { dry_run: false }) {
        Commands::Crawl { dry_run } => {
            let registry = SourceRegistry::load(&config.sources_path).await?;
            let supervisor = build_supervisor(&config, dry_run).await?;
            supervisor.run_until_shutdown(&registry).await?;
        }
        Commands::Once { source, dry_run } => {
            let registry = SourceRegistry::load(&config.sources_path).await?;
            let Some(source_config) = registry.find(&source) else {
                bail!("source `{source}` not found in {}", config.sources_path.display());
            };
            let supervisor = build_supervisor(&config, dry_run).await?;
            let summary = supervisor
                .runner_for(source_config)
                .run_cycle(&CancellationToken::new())
                .await;
            println!(
                "cycle complete: source={} cycle_id={} pages={}/{} inserted={} updated={} skipped={} failed={} aborted={}",
                summary.source,
                summary.cycle_id,
                summary.pages_fetched,
                summary.total_pages.map_or_else(|| "?".to_string(), |n| n.to_string()),
                summary.inserted,
                summary.updated,
                summary.skipped,
                summary.failed,
                summary.aborted
            );
        }
        Commands::Migrate => {
            let store = PgCatalogStore::connect(&config.database_url)
                .await
                .context("connecting to catalog database")?;
            store.migrate().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
