//! Manifest validation and the train/validation split.

use std::path::{Path, PathBuf};

use engine_logging::{engine_info, engine_warn};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::manifest::{write_manifest, ManifestError, ManifestRow};
use crate::verify::verify_image_file;

pub const DEFAULT_TRAIN_RATIO: f64 = 0.8;
pub const DEFAULT_SPLIT_SEED: u64 = 42;
pub const TRAIN_FILE: &str = "train.csv";
pub const VALID_FILE: &str = "valid.csv";

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("train ratio must be within 0..=1, got {0}")]
    InvalidRatio(f64),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRow {
    pub row: ManifestRow,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidatedManifest {
    pub valid: Vec<ManifestRow>,
    pub invalid: Vec<InvalidRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Vec<ManifestRow>,
    pub valid: Vec<ManifestRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitFiles {
    pub train_path: PathBuf,
    pub valid_path: PathBuf,
    pub train_len: usize,
    pub valid_len: usize,
    pub invalid_len: usize,
}

/// Keep rows whose image file exists and decodes.
///
/// Relative paths are resolved against `base_dir`.
pub fn validate_manifest(rows: Vec<ManifestRow>, base_dir: &Path) -> ValidatedManifest {
    let mut validated = ValidatedManifest::default();
    for row in rows {
        let path = base_dir.join(&row.image_path);
        match verify_image_file(&path) {
            Ok(()) => validated.valid.push(row),
            Err(err) => {
                engine_warn!("skipping invalid image {}: {}", path.display(), err);
                validated.invalid.push(InvalidRow {
                    row,
                    reason: err.to_string(),
                });
            }
        }
    }
    validated
}

/// Shuffle with a seeded RNG, then cut at `floor(len * train_ratio)`.
pub fn split_rows(
    mut rows: Vec<ManifestRow>,
    train_ratio: f64,
    seed: u64,
) -> Result<DatasetSplit, SplitError> {
    if !(0.0..=1.0).contains(&train_ratio) {
        return Err(SplitError::InvalidRatio(train_ratio));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    rows.shuffle(&mut rng);

    let train_len = (rows.len() as f64 * train_ratio).floor() as usize;
    let valid = rows.split_off(train_len.min(rows.len()));
    Ok(DatasetSplit { train: rows, valid })
}

/// Read, validate and split a manifest, writing `train.csv` and `valid.csv`
/// into `out_dir`.
pub fn split_manifest_files(
    manifest_path: &Path,
    base_dir: &Path,
    out_dir: &Path,
    train_ratio: f64,
    seed: u64,
) -> Result<SplitFiles, SplitError> {
    let rows = crate::manifest::read_manifest(manifest_path)?;
    let total = rows.len();
    let validated = validate_manifest(rows, base_dir);
    engine_info!(
        "{} of {} manifest rows point at readable images",
        validated.valid.len(),
        total
    );

    let invalid_len = validated.invalid.len();
    let split = split_rows(validated.valid, train_ratio, seed)?;
    let train_path = write_manifest(&out_dir.join(TRAIN_FILE), &split.train)?;
    let valid_path = write_manifest(&out_dir.join(VALID_FILE), &split.valid)?;

    Ok(SplitFiles {
        train_path,
        valid_path,
        train_len: split.train.len(),
        valid_len: split.valid.len(),
        invalid_len,
    })
}
