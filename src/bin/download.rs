//! `harvest-download`: downloads pending ledger records on a loop.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::logging::init_tracing;
use harvester_core::supervisor::stop_on_shutdown_signal;
use harvester_core::{
    Database, DiskBudgetGuard, DownloadArgs, DownloadEngine, DownloadPhase, EngineSettings,
    Fetcher, RecordStore, RemoteClient, RetryPolicy, StopSignal, Supervisor, TargetLayout,
};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    // Parse before tracing so --help works without logs
    let args = DownloadArgs::parse();

    let _guard = match init_tracing(
        args.common.verbose,
        args.common.quiet,
        args.common.log_dir.as_deref(),
        "harvest-download.log",
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
            error!(error = %format!("{e:#}"), "downloader failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: DownloadArgs) -> Result<()> {
    debug!(?args, "CLI arguments parsed");
    let settings = args.into_settings().context("invalid configuration")?;

    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .with_context(|| format!("cannot create {}", settings.output_dir.display()))?;

    let db = Database::new(&settings.database_path)
        .await
        .with_context(|| format!("cannot open ledger {}", settings.database_path.display()))?;
    let store = RecordStore::new(db.clone());

    if settings.retry_failed {
        let reset = store
            .reset_failed()
            .await
            .context("cannot reset failed records")?;
        info!(reset, "failed records put back to pending");
    }

    let fetcher =
        Fetcher::new(settings.download_host.clone()).context("cannot build HTTP client")?;
    let layout = TargetLayout::new(
        &settings.output_dir,
        &settings.root_dir,
        settings.preserve_structure,
    );
    let budget = DiskBudgetGuard::new(&settings.output_dir, settings.disk_free_floor);
    let engine_settings = EngineSettings {
        batch_size: settings.batch_size,
        lease: settings.lease,
        heartbeat: settings.lease / 3,
        max_pass_retries: settings.max_pass_retries,
        delete_after_download: settings.delete_after_download,
    };

    let mut engine = DownloadEngine::new(
        Arc::new(store),
        fetcher,
        layout,
        budget,
        engine_settings,
    )
    .with_retry_policy(RetryPolicy::with_max_attempts(settings.max_retries));
    if let Some((api_base, token)) = &settings.remote {
        let client =
            RemoteClient::new(api_base.clone(), token.clone()).context("cannot build HTTP client")?;
        engine = engine.with_remote_cleanup(Arc::new(client));
    }
    let phase = DownloadPhase::new(engine);

    let stop = StopSignal::new();
    stop_on_shutdown_signal(stop.clone());

    info!(
        download_host = %settings.download_host,
        output_dir = %settings.output_dir.display(),
        floor = settings.disk_free_floor,
        once = settings.run_once,
        "downloader starting"
    );

    let supervisor = Supervisor::new(settings.sleep, stop)
        .with_max_passes(settings.run_once.then_some(1));
    let summary = supervisor.run(&phase).await;

    db.close().await;
    info!(passes = summary.passes, failed_passes = summary.failed_passes, "downloader stopped");
    Ok(())
}
