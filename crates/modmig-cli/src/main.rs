use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modmig_driver::{load_fixture, LineApplication, UiLineApplication, WebDriverClient};
use modmig_engine::{
    reconcile, write_run_report, MigrationConfig, MigrationOrchestrator, Reconciliation, RunSummary,
};
use modmig_storage::{read_catalog, write_matched_catalog, WorkQueue};
use tracing::{info, warn};

mod logging;

#[derive(Debug, Parser)]
#[command(name = "modmig")]
#[command(about = "Manufacturing activity template migrator")]
struct Cli {
    /// Debug output for modmig crates.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Errors only.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Find catalog rows already covered by a known-good configuration.
    Reconcile {
        #[arg(long)]
        to_verify: PathBuf,
        #[arg(long)]
        known_good: PathBuf,
        /// Where matched known-good rows are written.
        #[arg(long, default_value = "same_configurations.csv")]
        out: PathBuf,
        /// Also write rows still lacking a known-good configuration here.
        #[arg(long)]
        unmatched_out: Option<PathBuf>,
    },
    /// Replicate reference configurations for every queued product.
    Migrate {
        #[arg(long)]
        queue: Option<PathBuf>,
        /// Drive a JSON fixture instead of a WebDriver session. Needs an
        /// explicit `--queue`; reports land next to it.
        #[arg(long, requires = "queue")]
        fixture: Option<PathBuf>,
    },
    /// List products still waiting in the work queue.
    Queue {
        #[arg(long)]
        queue: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::Verbosity::from_flags(cli.verbose, cli.quiet));
    let mut config = MigrationConfig::from_env();

    match cli.command {
        Commands::Reconcile {
            to_verify,
            known_good,
            out,
            unmatched_out,
        } => {
            let to_verify = read_catalog(&to_verify).await?;
            let known_good = read_catalog(&known_good).await?;
            let result = reconcile(&to_verify, &known_good);
            for malformed in &result.malformed {
                warn!(catalog = ?malformed.side, error = %malformed.error, "skipped malformed catalog row");
            }
            write_matched_catalog(&out, &result.matched).await?;
            for line in unmatched_lines(&result) {
                println!("{line}");
            }
            if let Some(path) = &unmatched_out {
                write_matched_catalog(path, &result.unmatched).await?;
            }

            let summary = result.summary();
            println!(
                "reconcile complete: total={} matched={} unmatched={} malformed={} out={}",
                summary.total_records,
                summary.matched_count,
                summary.unmatched_count,
                summary.malformed_rows,
                out.display()
            );
        }
        Commands::Migrate { queue, fixture } => {
            if let Some(queue) = queue {
                config.queue_path = queue;
            }
            let summary = match fixture {
                Some(path) => {
                    config.reports_dir = fixture_reports_dir(&config.queue_path);
                    let line = load_fixture(&path)?;
                    run_migration(&config, line).await?
                }
                None => run_live_migration(&config).await?,
            };
            let report_dir = write_run_report(&config.reports_dir, &summary).await?;
            println!(
                "migration complete: run_id={} configured={} skipped={} failed={} remaining={} report={}",
                summary.run_id,
                summary.configured,
                summary.skipped,
                summary.failed,
                summary.remaining_in_queue,
                report_dir.display()
            );
            if let Some(reason) = &summary.aborted {
                eprintln!("run aborted: {reason}");
            }
        }
        Commands::Queue { queue } => {
            let path = queue.unwrap_or(config.queue_path);
            let queue = WorkQueue::load(&path)
                .await
                .with_context(|| format!("loading work queue {}", path.display()))?;
            for item in queue.items() {
                println!("{}\t{}", item.family_id, item.product_id);
            }
            println!("{} product(s) pending", queue.len());
        }
    }

    Ok(())
}

/// One `not matching:` line per row to verify, in catalog column order.
fn unmatched_lines(result: &Reconciliation) -> Vec<String> {
    result
        .unmatched
        .iter()
        .map(|record| format!("not matching: {}", record.to_csv_row()))
        .collect()
}

/// Fixture runs keep their reports beside the queue they were given.
fn fixture_reports_dir(queue_path: &Path) -> PathBuf {
    queue_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("reports")
}

async fn run_migration<A: LineApplication>(config: &MigrationConfig, app: A) -> Result<RunSummary> {
    let mut queue = WorkQueue::load(&config.queue_path)
        .await
        .with_context(|| format!("loading work queue {}", config.queue_path.display()))?;
    let mut orchestrator = MigrationOrchestrator::new(app, config.required_priority.clone());
    Ok(orchestrator.run(&mut queue).await)
}

async fn run_live_migration(config: &MigrationConfig) -> Result<RunSummary> {
    let selectors = config.selectors()?;
    let client = WebDriverClient::connect(&config.webdriver_url, config.stabilization)
        .await
        .with_context(|| format!("opening WebDriver session at {}", config.webdriver_url))?;
    let mut app = UiLineApplication::new(client, selectors, config.base_url.clone());

    app.login(&config.credentials, config.login_attempts)
        .await
        .context("logging in")?;
    app.enter_products_page().await.context("opening the product list")?;
    info!(base_url = %config.base_url, "session ready");

    let mut queue = WorkQueue::load(&config.queue_path)
        .await
        .with_context(|| format!("loading work queue {}", config.queue_path.display()))?;
    let mut orchestrator = MigrationOrchestrator::new(app, config.required_priority.clone());
    let summary = orchestrator.run(&mut queue).await;

    if let Err(err) = orchestrator.into_app().into_driver().quit().await {
        warn!(error = %err, "closing WebDriver session failed");
    }
    Ok(summary)
}
