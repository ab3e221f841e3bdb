use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("storage full: {0}")]
    StorageFull(io::Error),
    #[error("io error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for PersistError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::StorageFull {
            PersistError::StorageFull(err)
        } else {
            PersistError::Io(err)
        }
    }
}

impl PersistError {
    /// Errors that will hit every remaining record too, so the run should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PersistError::OutputDir(_) | PersistError::StorageFull(_))
    }
}

/// Ensure output directory exists; create if missing.
///
/// Safe to call from several threads at once: a directory created by someone
/// else in between is accepted.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if let Err(err) = fs::create_dir_all(dir) {
        if err.kind() != io::ErrorKind::AlreadyExists || !dir.is_dir() {
            return Err(PersistError::OutputDir(err.to_string()));
        }
    }
    let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    if !meta.is_dir() {
        return Err(PersistError::OutputDir("path is not a directory".into()));
    }
    // Basic writability probe: try creating a temp file.
    NamedTempFile::new_in(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    Ok(())
}

/// Atomically write content to `{dir}/{filename}` by writing a temp file then renaming.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, filename: &str, content: &str) -> Result<PathBuf, PersistError> {
        self.write_bytes(filename, content.as_bytes())
    }

    pub fn write_bytes(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        // The rename replaces an existing target in one step.
        tmp.persist(&target).map_err(|e| PersistError::from(e.error))?;
        Ok(target)
    }
}

/// Writes fetched image bytes under the run's output directory.
///
/// The directory itself is created once per run by [`ensure_output_dir`];
/// every record only writes its own file.
#[derive(Debug, Clone)]
pub struct ImagePersister {
    writer: AtomicFileWriter,
}

impl ImagePersister {
    pub fn new(out_dir: PathBuf) -> Self {
        Self {
            writer: AtomicFileWriter::new(out_dir),
        }
    }

    pub fn out_dir(&self) -> &Path {
        self.writer.dir()
    }

    pub fn persist(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, PersistError> {
        if !self.writer.dir().is_dir() {
            return Err(PersistError::OutputDir(format!(
                "{} no longer exists",
                self.writer.dir().display()
            )));
        }
        self.writer.write_bytes(filename, bytes)
    }
}
