//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use engine_logging::LogDestination;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Parser)]
#[command(version)]
#[command(name = "caption-harvest")]
#[command(about = "Download an image/caption dataset and write its CSV manifest", long_about = None)]
pub struct Cli {
    /// Log level: off, error, warn, info, debug or trace.
    #[arg(long, global = true, default_value = "info", value_parser = parse_level)]
    pub log_level: LevelFilter,

    /// Also write logs to this file.
    #[arg(long, global = true, value_name = "FILE", default_value = engine_logging::DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Log to the terminal only.
    #[arg(long, global = true)]
    pub no_log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn log_destination(&self) -> LogDestination {
        if self.no_log_file {
            LogDestination::Terminal
        } else {
            LogDestination::Both(self.log_file.clone())
        }
    }
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse()
        .map_err(|_| format!("unknown log level {value:?}"))
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch a dataset prefix, save accepted images and write the manifest.
    Download(DownloadArgs),
    /// Validate a manifest and split it into train.csv / valid.csv.
    Split(SplitArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Hugging Face datasets-server rows API.
    Hf,
    /// Local CSV file.
    Csv,
}

#[derive(Debug, Default, Args)]
pub struct DownloadArgs {
    /// TOML configuration file; flags below override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of dataset rows to read.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Worker threads for the runtime.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Maximum concurrent fetch+write tasks.
    #[arg(long, value_name = "N")]
    pub max_in_flight: Option<usize>,

    /// Directory the images are written to.
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Manifest CSV path.
    #[arg(long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Run report JSON path.
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Where records come from.
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,

    /// Input CSV when `--source csv` is used.
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Hugging Face dataset id, e.g. `owner/name`.
    #[arg(long)]
    pub dataset: Option<String>,

    /// Keep caption casing instead of lowercasing.
    #[arg(long)]
    pub keep_case: bool,

    /// Skip decoding downloaded bodies as images.
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Debug, Args)]
pub struct SplitArgs {
    /// Manifest to split.
    #[arg(long, default_value = caption_engine::DEFAULT_MANIFEST, value_name = "FILE")]
    pub manifest: PathBuf,

    /// Directory relative image paths are resolved against.
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub base_dir: PathBuf,

    /// Where train.csv and valid.csv are written.
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Share of rows that go to the training split.
    #[arg(long, default_value_t = caption_engine::DEFAULT_TRAIN_RATIO)]
    pub train_ratio: f64,

    /// Shuffle seed.
    #[arg(long, default_value_t = caption_engine::DEFAULT_SPLIT_SEED)]
    pub seed: u64,
}
