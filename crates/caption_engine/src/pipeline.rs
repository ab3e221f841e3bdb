use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use caption_core::{
    local_filename, normalize_caption, DatasetRecord, ExtensionFilter, FilenameClaims,
};
use chrono::Utc;
use engine_logging::{engine_error, engine_info, engine_warn};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Dispatcher, DEFAULT_MAX_IN_FLIGHT};
use crate::fetch::{Fetcher, NullProgressSink, ProgressSink};
use crate::manifest::{write_manifest, ManifestError, ManifestRow};
use crate::persist::{ensure_output_dir, ImagePersister, PersistError};
use crate::report::{ReportError, RunReport};
use crate::source::{RecordSource, SourceError};
use crate::{
    EngineEvent, FailureKind, FetchResult, MaterializedImage, RecordFailure, RecordId,
    RecordProgress, Stage,
};

pub const DEFAULT_OUT_DIR: &str = "moondream_images";
pub const DEFAULT_MANIFEST: &str = "moondream_2.csv";
pub const DEFAULT_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub out_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub report_path: Option<PathBuf>,
    /// Size of the dataset prefix to read.
    pub limit: usize,
    pub filter: ExtensionFilter,
    pub lowercase_captions: bool,
    pub max_in_flight: usize,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            manifest_path: PathBuf::from(DEFAULT_MANIFEST),
            report_path: None,
            limit: DEFAULT_LIMIT,
            filter: ExtensionFilter::default(),
            lowercase_captions: true,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("dataset source unavailable: {0}")]
    Source(#[from] SourceError),
    #[error("output directory unusable: {0}")]
    OutputDir(PersistError),
    #[error("run cancelled: {0}")]
    Cancelled(String),
    #[error("manifest could not be written: {0}")]
    Manifest(#[from] ManifestError),
    #[error("run report could not be written: {0}")]
    Report(#[from] ReportError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct PendingRecord {
    record_id: RecordId,
    url: String,
    caption: String,
    filename: String,
}

impl PendingRecord {
    fn failure(&self, kind: FailureKind, message: impl Into<String>) -> RecordFailure {
        RecordFailure {
            record_id: self.record_id,
            url: self.url.clone(),
            kind,
            message: message.into(),
        }
    }
}

struct TaskOutcome {
    result: FetchResult,
    /// Set when the failure would hit every other record too.
    fatal: bool,
}

/// Downloads a dataset prefix into a directory and writes its manifest.
pub struct Harvester {
    settings: HarvestSettings,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(settings: HarvestSettings, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            settings,
            fetcher,
            sink: Arc::new(NullProgressSink),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Cancelling this token stops the current run and every later one; the
    /// manifest is not written.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run on a dedicated multi-thread runtime with `workers` OS threads.
    pub fn run_blocking(
        &self,
        source: &dyn RecordSource,
        workers: usize,
    ) -> Result<RunReport, RunError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name("harvest-worker")
            .enable_all()
            .build()?;
        runtime.block_on(self.run(source))
    }

    pub async fn run(&self, source: &dyn RecordSource) -> Result<RunReport, RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled("cancelled before start".to_string()));
        }
        let started_utc = Utc::now();
        ensure_output_dir(&self.settings.out_dir).map_err(RunError::OutputDir)?;

        let source_name = source.describe();
        engine_info!(
            "reading up to {} records from {}",
            self.settings.limit,
            source_name
        );
        let records = source.fetch_prefix(self.settings.limit).await?;
        let total_records = records.len();

        let (pending, skipped_extension, mut failures) = self.plan(records);
        let attempted = pending.len();
        engine_info!(
            "{} of {} records accepted, fetching with {} in flight",
            attempted,
            total_records,
            self.settings.max_in_flight
        );

        // A fatal write error only cancels this run's child token.
        let cancel = self.cancel.child_token();
        let (images, mut task_failures) = self.dispatch(pending, cancel).await?;
        failures.append(&mut task_failures);
        failures.sort_by_key(|failure| failure.record_id);

        let (images, mut missing) = confirm_on_disk(images);
        if !missing.is_empty() {
            failures.append(&mut missing);
            failures.sort_by_key(|failure| failure.record_id);
        }

        let rows: Vec<ManifestRow> = images
            .iter()
            .map(|image| {
                ManifestRow::new(image.local_path.display().to_string(), &image.caption)
            })
            .collect();
        engine_info!("writing {} manifest rows", rows.len());
        let manifest_path = write_manifest(&self.settings.manifest_path, &rows)?;

        let report = RunReport {
            source: source_name,
            started_utc,
            finished_utc: Utc::now(),
            total_records,
            skipped_extension,
            attempted,
            manifest_path,
            images,
            failures,
        };
        if let Some(path) = &self.settings.report_path {
            report.write_json(path)?;
        }
        engine_info!("{}", report.summary_line());
        Ok(report)
    }

    /// Filter, normalize and name the records; duplicates fail right here.
    fn plan(
        &self,
        records: Vec<DatasetRecord>,
    ) -> (Vec<PendingRecord>, usize, Vec<RecordFailure>) {
        let mut claims = FilenameClaims::new();
        let mut pending = Vec::new();
        let mut failures = Vec::new();
        let mut skipped = 0;
        let mut next_id: RecordId = 0;

        for record in records {
            if !self.settings.filter.accepts(&record.url) {
                skipped += 1;
                continue;
            }
            let job = PendingRecord {
                record_id: next_id,
                filename: local_filename(&record.url),
                caption: normalize_caption(&record.caption, self.settings.lowercase_captions),
                url: record.url,
            };
            next_id += 1;

            if job.filename.is_empty() {
                failures.push(
                    job.failure(FailureKind::InvalidUrl, "url has no usable file name"),
                );
                continue;
            }
            if !claims.claim(&job.filename) {
                engine_warn!(
                    "skipping {}: {} is already used by an earlier record",
                    job.url,
                    job.filename
                );
                let filename = job.filename.clone();
                failures.push(job.failure(
                    FailureKind::DuplicateFilename { filename },
                    "local filename already claimed in this run",
                ));
                continue;
            }
            self.sink.emit(EngineEvent::Progress(RecordProgress {
                record_id: job.record_id,
                stage: Stage::Queued,
                bytes: None,
                attempt: None,
            }));
            pending.push(job);
        }

        (pending, skipped, failures)
    }

    async fn dispatch(
        &self,
        pending: Vec<PendingRecord>,
        cancel: CancellationToken,
    ) -> Result<(Vec<MaterializedImage>, Vec<RecordFailure>), RunError> {
        let persister = ImagePersister::new(self.settings.out_dir.clone());
        let dispatcher =
            Dispatcher::new(self.settings.max_in_flight).with_cancellation(cancel);

        let mut slots: Vec<(PendingRecord, Option<TaskOutcome>)> =
            pending.iter().cloned().map(|job| (job, None)).collect();

        let outcome = dispatcher
            .run(pending, |_, job, cancel| {
                let fetcher = Arc::clone(&self.fetcher);
                let sink = Arc::clone(&self.sink);
                let persister = persister.clone();
                async move { process_record(fetcher, sink, persister, job, cancel).await }
            })
            .await;

        for (index, task) in outcome.results {
            slots[index].1 = Some(task);
        }

        let mut fatal_cause = None;
        let mut images = Vec::new();
        let mut failures = Vec::new();
        for (index, (job, task)) in slots.into_iter().enumerate() {
            let task = task.unwrap_or_else(|| TaskOutcome {
                result: Err(if outcome.panicked.contains(&index) {
                    job.failure(FailureKind::Panicked, "task panicked")
                } else if outcome.cancelled {
                    job.failure(FailureKind::Cancelled, "not started, batch cancelled")
                } else {
                    job.failure(FailureKind::Panicked, "task ended without a result")
                }),
                fatal: false,
            });
            match task.result {
                Ok(image) => images.push(image),
                Err(failure) => {
                    if task.fatal && fatal_cause.is_none() {
                        fatal_cause = Some(format!("{} ({})", failure.message, failure.url));
                    }
                    failures.push(failure);
                }
            }
        }

        if outcome.cancelled {
            let cause = fatal_cause.unwrap_or_else(|| "cancelled by caller".to_string());
            engine_error!(
                "run aborted: {} ({} images written before cancellation)",
                cause,
                images.len()
            );
            return Err(RunError::Cancelled(cause));
        }
        Ok((images, failures))
    }
}

async fn process_record(
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn ProgressSink>,
    persister: ImagePersister,
    job: PendingRecord,
    cancel: CancellationToken,
) -> TaskOutcome {
    let outcome =
        fetch_and_persist(fetcher.as_ref(), sink.as_ref(), persister, &job, &cancel).await;
    sink.emit(EngineEvent::RecordCompleted {
        record_id: job.record_id,
        result: outcome.result.clone().map_err(|failure| failure.kind),
    });
    outcome
}

async fn fetch_and_persist(
    fetcher: &dyn Fetcher,
    sink: &dyn ProgressSink,
    persister: ImagePersister,
    job: &PendingRecord,
    cancel: &CancellationToken,
) -> TaskOutcome {
    let fetched = tokio::select! {
        _ = cancel.cancelled() => {
            return TaskOutcome {
                result: Err(job.failure(FailureKind::Cancelled, "batch cancelled")),
                fatal: false,
            };
        }
        result = fetcher.fetch(job.record_id, &job.url, sink) => result,
    };

    let output = match fetched {
        Ok(output) => output,
        Err(err) => {
            engine_warn!("error fetching {}: {}", job.url, err);
            return TaskOutcome {
                result: Err(job.failure(err.kind, err.message)),
                fatal: false,
            };
        }
    };

    sink.emit(EngineEvent::Progress(RecordProgress {
        record_id: job.record_id,
        stage: Stage::Writing,
        bytes: Some(output.metadata.byte_len),
        attempt: Some(output.metadata.attempts),
    }));

    let filename = job.filename.clone();
    let bytes = output.bytes;
    let written = tokio::task::spawn_blocking(move || {
        let path = persister.persist(&filename, &bytes)?;
        Ok::<_, PersistError>((path, bytes.len() as u64, sha256_hex(&bytes)))
    })
    .await;

    match written {
        Ok(Ok((local_path, byte_len, sha256))) => {
            sink.emit(EngineEvent::Progress(RecordProgress {
                record_id: job.record_id,
                stage: Stage::Done,
                bytes: Some(byte_len),
                attempt: None,
            }));
            TaskOutcome {
                result: Ok(MaterializedImage {
                    record_id: job.record_id,
                    url: job.url.clone(),
                    local_path,
                    caption: job.caption.clone(),
                    byte_len,
                    sha256,
                }),
                fatal: false,
            }
        }
        Ok(Err(err)) => {
            let fatal = err.is_fatal();
            if fatal {
                engine_error!("fatal write error for {}: {}", job.url, err);
                cancel.cancel();
            } else {
                engine_warn!("error writing {} from {}: {}", job.filename, job.url, err);
            }
            TaskOutcome {
                result: Err(job.failure(FailureKind::Persist, err.to_string())),
                fatal,
            }
        }
        Err(err) => TaskOutcome {
            result: Err(job.failure(FailureKind::Panicked, err.to_string())),
            fatal: false,
        },
    }
}

/// Drop successes whose file is gone or empty by the time the manifest is built.
fn confirm_on_disk(
    images: Vec<MaterializedImage>,
) -> (Vec<MaterializedImage>, Vec<RecordFailure>) {
    let mut kept = Vec::with_capacity(images.len());
    let mut missing = Vec::new();
    for image in images {
        if is_non_empty_file(&image.local_path) {
            kept.push(image);
        } else {
            engine_warn!(
                "{} vanished before the manifest was written",
                image.local_path.display()
            );
            missing.push(RecordFailure {
                record_id: image.record_id,
                url: image.url,
                kind: FailureKind::Persist,
                message: "file missing or empty when writing manifest".to_string(),
            });
        }
    }
    (kept, missing)
}

fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
