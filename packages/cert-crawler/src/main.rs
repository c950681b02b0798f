//! Crawl worker binary.
//!
//! Every replica runs the same binary; replicas coordinate only through the
//! job ledger named by `DATABASE_URL`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cert_crawler::{
    CrawlContext, CrawlSettings, CrawlerConfig, FsArtifactSink, HttpDocumentFetcher,
    HttpResourceFetcher, JobLedger, JobStatus, KeywordClassifier, Orchestrator,
    PostgresJobLedger, WorkerIdentity,
};

#[derive(Parser)]
#[command(name = "cert-crawler")]
#[command(about = "Leaderless certificate crawl worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migrations, then crawl until the completion cap (default)
    Run,

    /// Apply ledger migrations and exit
    Migrate,

    /// Print job counts per status
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cert_crawler=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = CrawlerConfig::from_env().context("Failed to load configuration")?;

    let ledger = PostgresJobLedger::connect(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to job ledger")?;

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, ledger).await,
        Commands::Migrate => {
            ledger.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Migrations applied");
            Ok(())
        }
        Commands::Status { json } => status(&ledger, json).await,
    };

    if let Err(e) = &result {
        tracing::error!(error = ?e, "worker stopped");
    }
    result
}

async fn run(config: CrawlerConfig, ledger: PostgresJobLedger) -> Result<()> {
    ledger.migrate().await.context("Failed to run migrations")?;

    let identity = WorkerIdentity::new(&config.worker_name, config.exploration.offset_window);
    tracing::info!(
        worker = %identity.name,
        owner = %identity.owner_token,
        lower = config.bounds.lower,
        upper = config.bounds.upper,
        artifact_dir = %config.artifact_dir.display(),
        "Starting crawl worker"
    );

    let fetcher = HttpDocumentFetcher::new(config.fetch.clone())
        .context("Failed to build document client")?;
    let classifier = KeywordClassifier::new(config.classifier.clone())
        .context("Failed to compile classifier patterns")?;
    let resources = HttpResourceFetcher::new(config.fetch.timeout)
        .context("Failed to build resource client")?;
    let sink = FsArtifactSink::new(config.artifact_dir.clone());

    let ctx = CrawlContext::new(
        Arc::new(ledger),
        Arc::new(fetcher),
        Arc::new(classifier),
        Arc::new(resources),
        Arc::new(sink),
        identity,
        CrawlSettings::from(&config),
    );

    let summary = Orchestrator::new(ctx).run().await?;
    tracing::info!(
        completed = summary.completed,
        chains_from_queue = summary.chains_from_queue,
        chains_from_exploration = summary.chains_from_exploration,
        discarded_candidates = summary.discarded_candidates,
        "Worker finished"
    );
    Ok(())
}

async fn status(ledger: &PostgresJobLedger, json: bool) -> Result<()> {
    let counts = ledger
        .status_counts()
        .await
        .context("Failed to read status counts")?;

    if json {
        println!("{}", serde_json::to_string(&counts)?);
        return Ok(());
    }

    for status in JobStatus::ALL {
        let count = counts
            .iter()
            .find(|c| c.status == status)
            .map(|c| c.count)
            .unwrap_or(0);
        println!("{:<12} {}", status.as_str(), count);
    }
    Ok(())
}
