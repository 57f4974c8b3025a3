use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod allocator;
mod config;
mod db;
mod error;
mod grade;
mod models;
mod payload;
mod qr;
mod render;
mod report;
mod runner;
mod store;

use crate::allocator::CertificateNumberAllocator;
use crate::config::IssuerConfig;
use crate::qr::HttpQrProvider;
use crate::render::{ArtifactRenderer, Transformer};
use crate::runner::{BatchRunner, RunSettings};
use crate::store::PgIssuanceStore;

#[derive(Parser)]
#[command(name = "certificate-issuer")]
#[command(about = "Issues verifiable certificates for passed assessment results", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./certificate-issuer.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue certificates for every eligible result (default)
    Issue {
        /// Also write the run summary as markdown
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import assessment results from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Rebuild the verification payload of an issued certificate
    Verify {
        #[arg(long)]
        number: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let config = IssuerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command.unwrap_or(Commands::Issue { report: None }) {
        Commands::Issue { report } => {
            issue(pool, &config, report).await?;
        }
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} new results).");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} results from {}.", csv.display());
        }
        Commands::Verify { number } => {
            let Some(stored) = db::fetch_certificate(&pool, &number).await? else {
                anyhow::bail!("no certificate with number {number}");
            };
            let payload = payload::build(
                &stored.result,
                &stored.certificate_number,
                stored.issued_date,
                &config.certificate.verify_url_template,
            )?;
            println!(
                "Certificate {} ({}, {}) at {}",
                stored.certificate_number,
                stored.status.as_str(),
                stored.document_format.as_str(),
                stored.artifact_path
            );
            if let Some(qr_path) = &stored.qr_path {
                println!("QR image: {qr_path}");
            }
            println!("{}", payload.encode()?);
        }
    }

    Ok(())
}

async fn issue(
    pool: sqlx::PgPool,
    config: &IssuerConfig,
    report_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let transformer = Transformer::detect(&config.render);
    let renderer = ArtifactRenderer::new(&config.storage, transformer)
        .context("failed to prepare certificate storage directories")?;
    let qr = HttpQrProvider::new(&config.qr).context("failed to build QR client")?;
    let allocator = CertificateNumberAllocator::new(config.certificate.prefix.clone());
    let store = PgIssuanceStore::new(pool);

    let settings = RunSettings {
        issue_date: Utc::now().date_naive(),
        verify_url_template: config.certificate.verify_url_template.clone(),
        qr_policy: config.qr.on_failure,
    };
    let issue_date = settings.issue_date;

    let runner = BatchRunner::new(&store, &allocator, &qr, &renderer, settings);
    let summary = runner.run().await?;

    if summary.attempted == 0 {
        println!("No eligible results without a certificate.");
    }
    for cert in &summary.issued {
        println!(
            "- issued {} for result {}{}",
            cert.certificate_number,
            cert.result_id,
            if cert.is_degraded() { " (degraded)" } else { "" }
        );
    }
    for failure in &summary.errors {
        println!(
            "- failed result {} (student {}) at {}: {}",
            failure.result_id, failure.student_id, failure.stage, failure.cause
        );
    }
    println!("{}", report::summary_line(&summary));

    if let Some(path) = report_path {
        // The run has already committed its rows; a lost report is not fatal.
        match report::write_report(&path, issue_date, &summary) {
            Ok(()) => println!("Report written to {}.", path.display()),
            Err(err) => tracing::error!(
                error = format!("{err:#}"),
                "run completed but report was not written"
            ),
        }
    }

    Ok(())
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("CERT_ISSUER_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
