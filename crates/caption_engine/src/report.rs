use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::persist::{AtomicFileWriter, PersistError};
use crate::{MaterializedImage, RecordFailure};

/// What one harvest run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub source: String,
    pub started_utc: DateTime<Utc>,
    pub finished_utc: DateTime<Utc>,
    /// Records read from the source.
    pub total_records: usize,
    /// Records rejected by the extension filter.
    pub skipped_extension: usize,
    /// Records handed to the dispatcher.
    pub attempted: usize,
    pub manifest_path: PathBuf,
    /// Successful records, in source order.
    pub images: Vec<MaterializedImage>,
    /// Dropped records, in source order.
    pub failures: Vec<RecordFailure>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("report path has no file name: {0}")]
    InvalidPath(PathBuf),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.images.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} images downloaded ({} failed, {} skipped by extension, {} records read)",
            self.succeeded(),
            self.failed(),
            self.skipped_extension,
            self.total_records
        )
    }

    pub fn write_json(&self, path: &Path) -> Result<PathBuf, ReportError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ReportError::InvalidPath(path.to_path_buf()))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let json = serde_json::to_string_pretty(self)?;
        Ok(AtomicFileWriter::new(dir).write(filename, &json)?)
    }
}
