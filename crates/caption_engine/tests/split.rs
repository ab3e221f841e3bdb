mod common;

use std::fs;

use caption_engine::{
    read_manifest, split_manifest_files, split_rows, validate_manifest, write_manifest,
    ManifestRow, SplitError,
};
use common::{jpeg_bytes, png_bytes};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn rows(n: usize) -> Vec<ManifestRow> {
    (0..n)
        .map(|i| ManifestRow::new(format!("img{i}.png"), format!("caption {i}")))
        .collect()
}

#[test]
fn split_uses_floor_of_ratio_for_train() {
    let split = split_rows(rows(11), 0.8, 7).unwrap();
    assert_eq!(split.train.len(), 8);
    assert_eq!(split.valid.len(), 3);

    let mut all: Vec<_> = split.train.iter().chain(&split.valid).cloned().collect();
    all.sort_by(|a, b| a.image_path.cmp(&b.image_path));
    let mut expected = rows(11);
    expected.sort_by(|a, b| a.image_path.cmp(&b.image_path));
    assert_eq!(all, expected);
}

#[test]
fn split_is_deterministic_for_a_seed() {
    let a = split_rows(rows(20), 0.8, 42).unwrap();
    let b = split_rows(rows(20), 0.8, 42).unwrap();
    assert_eq!(a, b);
}

#[test]
fn split_handles_edges() {
    let empty = split_rows(Vec::new(), 0.8, 1).unwrap();
    assert!(empty.train.is_empty() && empty.valid.is_empty());

    let all_train = split_rows(rows(3), 1.0, 1).unwrap();
    assert_eq!((all_train.train.len(), all_train.valid.len()), (3, 0));

    assert!(matches!(
        split_rows(rows(3), 1.5, 1),
        Err(SplitError::InvalidRatio(_))
    ));
}

#[test]
fn validation_drops_missing_and_non_image_files() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("good.png"), png_bytes()).unwrap();
    fs::write(temp.path().join("text.jpg"), b"<html></html>").unwrap();

    let validated = validate_manifest(
        vec![
            ManifestRow::new("good.png", "ok"),
            ManifestRow::new("text.jpg", "html"),
            ManifestRow::new("absent.jpg", "gone"),
        ],
        temp.path(),
    );

    assert_eq!(validated.valid, vec![ManifestRow::new("good.png", "ok")]);
    assert_eq!(validated.invalid.len(), 2);
}

#[test]
fn split_files_are_written_with_manifest_header() {
    let temp = TempDir::new().unwrap();
    let mut manifest_rows = Vec::new();
    for i in 0..5 {
        let name = format!("{i}.jpg");
        fs::write(temp.path().join(&name), jpeg_bytes()).unwrap();
        manifest_rows.push(ManifestRow::new(name, format!("c{i}")));
    }
    manifest_rows.push(ManifestRow::new("missing.jpg", "nope"));
    let manifest = temp.path().join("moondream_2.csv");
    write_manifest(&manifest, &manifest_rows).unwrap();

    let out_dir = temp.path().join("splits");
    let files = split_manifest_files(&manifest, temp.path(), &out_dir, 0.8, 42).unwrap();

    assert_eq!((files.train_len, files.valid_len, files.invalid_len), (4, 1, 1));
    assert_eq!(read_manifest(&files.train_path).unwrap().len(), 4);
    assert_eq!(read_manifest(&files.valid_path).unwrap().len(), 1);
    assert!(fs::read_to_string(&files.valid_path)
        .unwrap()
        .starts_with("image_path,caption\n"));
}

#[test]
fn validation_rejects_images_that_do_not_decode() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("broken.jpg"), [0xFF, 0xD8, 0xFF]).unwrap();
    let mut truncated = png_bytes();
    truncated.truncate(truncated.len() / 2);
    fs::write(temp.path().join("half.png"), truncated).unwrap();
    fs::write(temp.path().join("whole.png"), png_bytes()).unwrap();

    let validated = validate_manifest(
        vec![
            ManifestRow::new("broken.jpg", "x"),
            ManifestRow::new("half.png", "y"),
            ManifestRow::new("whole.png", "z"),
        ],
        temp.path(),
    );

    assert_eq!(validated.valid, vec![ManifestRow::new("whole.png", "z")]);
    let invalid: Vec<_> = validated
        .invalid
        .iter()
        .map(|bad| bad.row.image_path.as_str())
        .collect();
    assert_eq!(invalid, vec!["broken.jpg", "half.png"]);
}
