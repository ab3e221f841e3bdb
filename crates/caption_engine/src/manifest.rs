use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::persist::{AtomicFileWriter, PersistError};

pub const IMAGE_PATH_COLUMN: &str = "image_path";
pub const CAPTION_COLUMN: &str = "caption";

/// One manifest line: where the image lives and what it shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub image_path: String,
    pub caption: String,
}

impl ManifestRow {
    pub fn new(image_path: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            caption: caption.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("manifest path has no file name: {0}")]
    InvalidPath(PathBuf),
    #[error("manifest {path} is missing column {column}")]
    MissingColumn { path: PathBuf, column: &'static str },
}

/// Serialize rows as CSV with an `image_path,caption` header.
pub fn manifest_to_bytes(rows: &[ManifestRow]) -> Result<Vec<u8>, ManifestError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    // Written explicitly so an empty manifest still carries its header.
    writer.write_record([IMAGE_PATH_COLUMN, CAPTION_COLUMN])?;
    for row in rows {
        writer.write_record([row.image_path.as_str(), row.caption.as_str()])?;
    }
    writer
        .into_inner()
        .map_err(|err| ManifestError::Io(err.into_error()))
}

/// Replace the file at `path` with a manifest of `rows`, in the given order.
pub fn write_manifest(path: &Path, rows: &[ManifestRow]) -> Result<PathBuf, ManifestError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ManifestError::InvalidPath(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let bytes = manifest_to_bytes(rows)?;
    let writer = AtomicFileWriter::new(dir);
    Ok(writer.write_bytes(filename, &bytes)?)
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>, ManifestError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    for column in [IMAGE_PATH_COLUMN, CAPTION_COLUMN] {
        if !headers.iter().any(|h| h == column) {
            return Err(ManifestError::MissingColumn {
                path: path.to_path_buf(),
                column,
            });
        }
    }
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}
