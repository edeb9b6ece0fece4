use std::path::PathBuf;

use anyhow::Result;
use aozora_adapters::FeedLocation;
use aozora_sync::{BulkWriteReport, CatalogRunSummary, RosterRunSummary, SyncConfig, SyncMode};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "aozora-cli")]
#[command(about = "Sync the Aozora Bunko catalog and worker roster into a document store")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Args)]
struct Settings {
    #[arg(long, global = true, env = "AOZORA_DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, global = true, env = "AOZORA_MAX_CONNECTIONS")]
    max_connections: Option<u32>,

    /// Upserts in flight per collection batch.
    #[arg(long, global = true, env = "AOZORA_WRITE_CONCURRENCY")]
    write_concurrency: Option<usize>,

    #[arg(long, global = true, env = "AOZORA_CATALOG_URL")]
    catalog_url: Option<String>,

    #[arg(long, global = true, env = "AOZORA_ROSTER_URL")]
    roster_url: Option<String>,

    #[arg(long, global = true, env = "AOZORA_USER_AGENT")]
    user_agent: Option<String>,

    #[arg(long, global = true, env = "AOZORA_HTTP_TIMEOUT_SECS")]
    http_timeout_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upsert catalog rows newer than the stored watermark.
    Sync {
        /// Process every row regardless of the watermark.
        #[arg(long)]
        refresh: bool,

        /// Read a previously downloaded catalog zip instead of fetching it.
        #[arg(long, value_name = "PATH")]
        archive: Option<PathBuf>,
    },
    /// Refresh the workers collection from the roster page.
    Roster {
        #[arg(long, value_name = "PATH")]
        page: Option<PathBuf>,
    },
    Migrate,
}

impl Settings {
    fn into_config(self) -> SyncConfig {
        let mut config = SyncConfig::default();
        if let Some(url) = self.database_url {
            config.database_url = url;
        }
        if let Some(n) = self.max_connections {
            config.max_connections = n;
        }
        if let Some(n) = self.write_concurrency {
            config.write_concurrency = n.max(1);
        }
        if let Some(url) = self.catalog_url {
            config.catalog = FeedLocation::Remote(url);
        }
        if let Some(url) = self.roster_url {
            config.roster = FeedLocation::Remote(url);
        }
        if let Some(agent) = self.user_agent {
            config.user_agent = agent;
        }
        if let Some(secs) = self.http_timeout_secs {
            config.http_timeout_secs = secs;
        }
        config
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("AOZORA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn counts(summary: &BulkWriteReport) -> String {
    format!(
        "{}(inserted={} updated={} failed={})",
        summary.written(),
        summary.inserted,
        summary.updated,
        summary.failures.len()
    )
}

fn print_catalog(summary: &CatalogRunSummary) {
    println!(
        "sync complete: run_id={} selected={} books={} persons={}",
        summary.run_id,
        summary.selected_rows,
        counts(&summary.books),
        counts(&summary.persons)
    );
}

fn print_roster(summary: &RosterRunSummary) {
    println!(
        "roster complete: run_id={} scraped={} rejected={} workers={}",
        summary.run_id,
        summary.scraped,
        summary.rejected.len(),
        counts(&summary.workers)
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = cli.settings.into_config();

    match cli.command.unwrap_or(Commands::Sync {
        refresh: false,
        archive: None,
    }) {
        Commands::Sync { refresh, archive } => {
            let config = match archive {
                Some(path) => config.with_catalog_archive(path),
                None => config,
            };
            let mode = if refresh {
                SyncMode::FullRefresh
            } else {
                SyncMode::Incremental
            };
            let summary = aozora_sync::run_catalog_sync(config, mode).await?;
            print_catalog(&summary);
        }
        Commands::Roster { page } => {
            let config = match page {
                Some(path) => config.with_roster_page(path),
                None => config,
            };
            let summary = aozora_sync::run_roster_sync(config).await?;
            print_roster(&summary);
        }
        Commands::Migrate => {
            aozora_sync::migrate(&config).await?;
            tracing::info!("store migrations applied");
            println!("migrate complete");
        }
    }

    Ok(())
}
