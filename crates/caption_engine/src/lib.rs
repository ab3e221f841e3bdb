//! Caption engine: fetch, persist and record image/caption datasets.
mod dispatch;
mod fetch;
mod manifest;
mod persist;
mod pipeline;
mod report;
mod retry;
mod source;
mod split;
mod types;
mod verify;

pub use dispatch::{DispatchOutcome, Dispatcher, DEFAULT_MAX_IN_FLIGHT};
pub use fetch::{
    ChannelProgressSink, FetchSettings, Fetcher, NullProgressSink, ProgressSink, ReqwestFetcher,
};
pub use manifest::{
    manifest_to_bytes, read_manifest, write_manifest, ManifestError, ManifestRow, CAPTION_COLUMN,
    IMAGE_PATH_COLUMN,
};
pub use persist::{ensure_output_dir, AtomicFileWriter, ImagePersister, PersistError};
pub use pipeline::{
    HarvestSettings, Harvester, RunError, DEFAULT_LIMIT, DEFAULT_MANIFEST, DEFAULT_OUT_DIR,
};
pub use report::{ReportError, RunReport};
pub use retry::{RetryDecision, RetryPolicy, RetryingFetcher};
pub use source::{
    CsvSource, HfDatasetSettings, HfRowsSource, RecordColumns, RecordSource, SourceError,
    VecSource, DEFAULT_DATASET, DEFAULT_HF_ENDPOINT, MAX_ROWS_PER_PAGE,
};
pub use split::{
    split_manifest_files, split_rows, validate_manifest, DatasetSplit, InvalidRow, SplitError,
    SplitFiles, ValidatedManifest, DEFAULT_SPLIT_SEED, DEFAULT_TRAIN_RATIO, TRAIN_FILE,
    VALID_FILE,
};
pub use types::{
    EngineEvent, FailureKind, FetchError, FetchMetadata, FetchOutput, FetchResult,
    MaterializedImage, RecordFailure, RecordId, RecordProgress, Stage,
};
pub use image::ImageFormat;
pub use verify::{decode_image, image_format, verify_image_file};
