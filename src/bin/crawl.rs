//! `harvest-crawl`: walks the remote tree into the ledger on a loop.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::logging::init_tracing;
use harvester_core::supervisor::stop_on_shutdown_signal;
use harvester_core::{
    CrawlArgs, CrawlPhase, Crawler, Database, RecordStore, RemoteClient, RetryPolicy, StopSignal,
    Supervisor,
};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    // Parse before tracing so --help works without logs
    let args = CrawlArgs::parse();

    let _guard = match init_tracing(
        args.common.verbose,
        args.common.quiet,
        args.common.log_dir.as_deref(),
        "harvest-crawl.log",
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: cannot set up logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "crawler failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CrawlArgs) -> Result<()> {
    debug!(?args, "CLI arguments parsed");
    let settings = args.into_settings().context("invalid configuration")?;

    let db = Database::new(&settings.database_path)
        .await
        .with_context(|| format!("cannot open ledger {}", settings.database_path.display()))?;
    let store = RecordStore::new(db.clone());

    let client = RemoteClient::new(settings.api_base.clone(), settings.api_token.clone())
        .context("cannot build HTTP client")?;
    let crawler = Crawler::new(client, store, settings.page_size)
        .with_retry_policy(RetryPolicy::with_max_attempts(settings.max_retries))
        .with_signature_policy(settings.signature_change);
    let phase = CrawlPhase::new(crawler, settings.root_dir.clone());

    let stop = StopSignal::new();
    stop_on_shutdown_signal(stop.clone());

    info!(
        api_base = %settings.api_base,
        root = %settings.root_dir,
        once = settings.run_once,
        "crawler starting"
    );

    let supervisor = Supervisor::new(settings.sleep, stop)
        .with_max_passes(settings.run_once.then_some(1));
    let summary = supervisor.run(&phase).await;

    db.close().await;
    info!(passes = summary.passes, failed_passes = summary.failed_passes, "crawler stopped");
    Ok(())
}
