use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commit;
mod config;
mod db;
mod enrichment;
mod event_log;
mod models;
mod oracle;
mod pipeline;
mod report;
mod resources;
#[cfg(test)]
mod testing;
mod windows;

use config::{OracleSettings, StoreSettings};
use db::PgRankingStore;
use event_log::ClickHouseEventLog;
use oracle::OracleClient;
use pipeline::RankingPipeline;
use resources::Resources;

#[derive(Parser)]
#[command(name = "driver-ranking-update")]
#[command(about = "Recomputes the driver ranking from reviews, profile views and an LLM judgment", long_about = None)]
struct Cli {
    #[command(flatten)]
    stores: StoreSettings,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the Postgres schema and the ClickHouse logs table
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Write the evidence the oracle would receive as a markdown report
    Preview {
        #[arg(long, default_value = "ranking-evidence.md")]
        out: PathBuf,
    },
    /// Compute and commit a new ranking
    Run {
        #[command(flatten)]
        settings: OracleSettings,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let resources = Arc::new(Resources::new(cli.stores));

    let result = execute(cli.command, &resources).await;
    resources.shutdown().await;

    if let Err(err) = &result {
        error!(error = %format!("{err:#}"), "command failed");
    }
    result
}

async fn execute(command: Commands, resources: &Arc<Resources>) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            let pool = resources
                .pg()
                .await
                .context("failed to connect to Postgres")?;
            db::init_db(pool).await?;
            ClickHouseEventLog::new(resources.clone())
                .init_table()
                .await
                .context("failed to create the ClickHouse logs table")?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = resources
                .pg()
                .await
                .context("failed to connect to Postgres")?;
            db::seed(pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Preview { out } => {
            let store = PgRankingStore::new(resources.clone());
            let event_log = ClickHouseEventLog::new(resources.clone());
            let now = Utc::now();

            let evidence = pipeline::collect_evidence(&store, &event_log, now).await?;
            let report = report::build_report(now, &evidence);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Run { settings } => {
            let template = settings.prompt_template()?;
            let event_log = Arc::new(ClickHouseEventLog::new(resources.clone()));
            let backend = oracle::from_settings(&settings).await;
            let client = OracleClient::new(backend, event_log.clone());

            let pipeline = RankingPipeline::new(
                Arc::new(PgRankingStore::new(resources.clone())),
                event_log.clone(),
                event_log,
                client,
                template,
            );
            let report = pipeline.run().await.context("ranking update failed")?;

            info!(run_id = %report.run_id, "ranking committed");
            println!(
                "Committed {} rankings at {}.",
                report.snapshot.entries.len(),
                report.snapshot.enforced_at
            );
        }
    }

    Ok(())
}
