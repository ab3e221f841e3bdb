use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use caption_engine::{
    split_manifest_files, ChannelProgressSink, EngineEvent, Harvester, ReqwestFetcher,
    RetryingFetcher, Stage,
};
use engine_logging::{engine_debug, engine_info};

use crate::cli::{Cli, Command, DownloadArgs, SplitArgs};
use crate::config::HarvestConfig;

/// Completed records between two progress lines.
const PROGRESS_EVERY: usize = 50;

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Download(args) => download(&args),
        Command::Split(args) => split(&args),
    }
}

fn download(args: &DownloadArgs) -> Result<()> {
    let mut config = HarvestConfig::load(args.config.as_deref())?;
    config.apply_overrides(args);
    engine_debug!("effective configuration: {:?}", config);

    let fetcher = ReqwestFetcher::new(config.fetch_settings()).context("building http client")?;
    let fetcher = RetryingFetcher::new(fetcher, config.retry_policy());
    let source = config.build_source()?;

    let (tx, rx) = mpsc::channel();
    let harvester = Harvester::new(config.harvest_settings(), Arc::new(fetcher))
        .with_progress(Arc::new(ChannelProgressSink::new(tx)));
    let progress = spawn_progress_logger(rx);

    let result = harvester.run_blocking(source.as_ref(), config.workers);
    // Dropping the harvester closes the channel and ends the logger thread.
    drop(harvester);
    let _ = progress.join();

    let report = result.context("harvest failed")?;
    println!("{}", report.summary_line());
    println!("manifest: {}", report.manifest_path.display());
    Ok(())
}

fn split(args: &SplitArgs) -> Result<()> {
    let files = split_manifest_files(
        &args.manifest,
        &args.base_dir,
        &args.out_dir,
        args.train_ratio,
        args.seed,
    )
    .with_context(|| format!("splitting {}", args.manifest.display()))?;

    println!(
        "{} train rows -> {}, {} valid rows -> {} ({} invalid rows dropped)",
        files.train_len,
        files.train_path.display(),
        files.valid_len,
        files.valid_path.display(),
        files.invalid_len
    );
    Ok(())
}

fn spawn_progress_logger(rx: Receiver<EngineEvent>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut queued = 0usize;
        let mut completed = 0usize;
        let mut failed = 0usize;
        for event in rx {
            match event {
                EngineEvent::Progress(progress) if progress.stage == Stage::Queued => queued += 1,
                EngineEvent::Progress(_) => {}
                EngineEvent::RecordCompleted { record_id, result } => {
                    completed += 1;
                    if let Err(kind) = result {
                        failed += 1;
                        engine_debug!("record {} finished with {}", record_id, kind);
                    }
                    if completed % PROGRESS_EVERY == 0 {
                        engine_info!("{}/{} records done ({} failed)", completed, queued, failed);
                    }
                }
            }
        }
    })
}
