use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use caption_core::{ExtensionFilter, DEFAULT_EXTENSIONS};
use caption_engine::{
    CsvSource, FetchSettings, HarvestSettings, HfDatasetSettings, HfRowsSource, RecordColumns,
    RecordSource, RetryPolicy, DEFAULT_DATASET, DEFAULT_HF_ENDPOINT, DEFAULT_LIMIT,
    DEFAULT_MANIFEST, DEFAULT_MAX_IN_FLIGHT, DEFAULT_OUT_DIR, MAX_ROWS_PER_PAGE,
};
use serde::{Deserialize, Serialize};

use crate::cli::{DownloadArgs, SourceKind};

/// HTTP fetch parameters (`[fetch]` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub redirect_limit: usize,
    /// Bodies larger than this are dropped.
    pub max_bytes: u64,
    /// Accepted `Content-Type` values; `type/*` matches a whole family.
    pub allowed_content_types: Vec<String>,
    /// Overrides the built-in `caption-harvest/<version>` agent.
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let defaults = FetchSettings::default();
        Self {
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            request_timeout_ms: defaults.request_timeout.as_millis() as u64,
            redirect_limit: defaults.redirect_limit,
            max_bytes: defaults.max_bytes,
            allowed_content_types: defaults.allowed_content_types,
            user_agent: None,
        }
    }
}

/// Retry policy parameters (`[retry]` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per record, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

/// Settings for one `download` run, read from an optional TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub source: SourceKind,
    /// Input CSV for `source = "csv"`.
    pub input: Option<PathBuf>,
    pub endpoint: String,
    pub dataset: String,
    pub dataset_config: String,
    pub split: String,
    pub url_column: String,
    pub caption_column: String,
    /// Rows read from the head of the dataset.
    pub limit: usize,
    pub accepted_extensions: Vec<String>,
    pub lowercase_captions: bool,
    pub out_dir: PathBuf,
    pub manifest_path: PathBuf,
    /// Defaults to the manifest path with a `.report.json` extension.
    pub report_path: Option<PathBuf>,
    /// OS threads backing the runtime.
    pub workers: usize,
    pub max_in_flight: usize,
    pub verify_images: bool,
    pub fetch: FetchConfig,
    pub retry: RetryConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let columns = RecordColumns::default();
        let dataset = HfDatasetSettings::default();
        Self {
            source: SourceKind::Hf,
            input: None,
            endpoint: DEFAULT_HF_ENDPOINT.to_string(),
            dataset: DEFAULT_DATASET.to_string(),
            dataset_config: dataset.config,
            split: dataset.split,
            url_column: columns.url,
            caption_column: columns.caption,
            limit: DEFAULT_LIMIT,
            accepted_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            lowercase_captions: true,
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            manifest_path: PathBuf::from(DEFAULT_MANIFEST),
            report_path: None,
            workers: 4,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            verify_images: true,
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Read `path`, or fall back to the built-in defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: HarvestConfig = toml::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Command-line flags win over file values.
    pub fn apply_overrides(&mut self, args: &DownloadArgs) {
        if let Some(limit) = args.limit {
            self.limit = limit;
        }
        if let Some(workers) = args.workers {
            self.workers = workers;
        }
        if let Some(max_in_flight) = args.max_in_flight {
            self.max_in_flight = max_in_flight;
        }
        if let Some(out_dir) = &args.out_dir {
            self.out_dir = out_dir.clone();
        }
        if let Some(manifest) = &args.manifest {
            self.manifest_path = manifest.clone();
        }
        if let Some(report) = &args.report {
            self.report_path = Some(report.clone());
        }
        if let Some(source) = args.source {
            self.source = source;
        }
        if let Some(input) = &args.input {
            self.input = Some(input.clone());
            if args.source.is_none() {
                self.source = SourceKind::Csv;
            }
        }
        if let Some(dataset) = &args.dataset {
            self.dataset = dataset.clone();
        }
        if args.keep_case {
            self.lowercase_captions = false;
        }
        if args.no_verify {
            self.verify_images = false;
        }
    }

    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .clone()
            .unwrap_or_else(|| self.manifest_path.with_extension("report.json"))
    }

    fn columns(&self) -> RecordColumns {
        RecordColumns {
            url: self.url_column.clone(),
            caption: self.caption_column.clone(),
        }
    }

    pub fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            out_dir: self.out_dir.clone(),
            manifest_path: self.manifest_path.clone(),
            report_path: Some(self.report_path()),
            limit: self.limit,
            filter: ExtensionFilter::new(self.accepted_extensions.iter().cloned()),
            lowercase_captions: self.lowercase_captions,
            max_in_flight: self.max_in_flight,
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        let mut settings = FetchSettings {
            connect_timeout: Duration::from_millis(self.fetch.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.fetch.request_timeout_ms),
            redirect_limit: self.fetch.redirect_limit,
            max_bytes: self.fetch.max_bytes,
            allowed_content_types: self.fetch.allowed_content_types.clone(),
            verify_images: self.verify_images,
            ..FetchSettings::default()
        };
        if let Some(agent) = &self.fetch.user_agent {
            settings.user_agent = agent.clone();
        }
        settings
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn build_source(&self) -> Result<Box<dyn RecordSource>> {
        match self.source {
            SourceKind::Hf => {
                let settings = HfDatasetSettings {
                    endpoint: self.endpoint.clone(),
                    dataset: self.dataset.clone(),
                    config: self.dataset_config.clone(),
                    split: self.split.clone(),
                    columns: self.columns(),
                    page_size: MAX_ROWS_PER_PAGE,
                    ..HfDatasetSettings::default()
                };
                let source = HfRowsSource::new(settings).context("building dataset client")?;
                Ok(Box::new(source))
            }
            SourceKind::Csv => {
                let input = self
                    .input
                    .clone()
                    .context("source \"csv\" needs an input file (--input)")?;
                Ok(Box::new(CsvSource::new(input, self.columns())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_values() {
        let cfg = HarvestConfig::default();
        assert_eq!(cfg.source, SourceKind::Hf);
        assert_eq!(cfg.limit, 1000);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.max_in_flight, 4);
        assert_eq!(cfg.accepted_extensions, vec!["jpeg", "jpg", "png"]);
        assert_eq!(cfg.out_dir, PathBuf::from("moondream_images"));
        assert_eq!(cfg.manifest_path, PathBuf::from("moondream_2.csv"));
        assert_eq!(cfg.report_path(), PathBuf::from("moondream_2.report.json"));
        assert_eq!(cfg.fetch.connect_timeout_ms, 10_000);
        assert_eq!(cfg.fetch.request_timeout_ms, 30_000);
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = HarvestConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HarvestConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = r#"
            limit = 25
            source = "csv"
            input = "rows.csv"
            caption_column = "text"

            [retry]
            max_attempts = 5
        "#;
        let cfg: HarvestConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.limit, 25);
        assert_eq!(cfg.source, SourceKind::Csv);
        assert_eq!(cfg.input, Some(PathBuf::from("rows.csv")));
        assert_eq!(cfg.caption_column, "text");
        assert_eq!(cfg.url_column, "url");
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_delay_ms, 250);
        assert_eq!(cfg.fetch, FetchConfig::default());
    }

    #[test]
    fn unknown_source_kind_is_rejected() {
        let err = toml::from_str::<HarvestConfig>(r#"source = "s3""#).unwrap_err();
        assert!(err.to_string().contains("s3"), "{err}");
    }

    #[test]
    fn flags_override_file_values() {
        let mut cfg: HarvestConfig = toml::from_str(
            r#"
            limit = 25
            workers = 2
            lowercase_captions = true
            "#,
        )
        .unwrap();
        let args = DownloadArgs {
            limit: Some(7),
            out_dir: Some(PathBuf::from("imgs")),
            manifest: Some(PathBuf::from("out/list.csv")),
            input: Some(PathBuf::from("rows.csv")),
            keep_case: true,
            ..DownloadArgs::default()
        };
        cfg.apply_overrides(&args);

        assert_eq!(cfg.limit, 7);
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.out_dir, PathBuf::from("imgs"));
        assert_eq!(cfg.source, SourceKind::Csv);
        assert!(!cfg.lowercase_captions);
        assert_eq!(cfg.report_path(), PathBuf::from("out/list.report.json"));
    }

    #[test]
    fn settings_follow_config() {
        let mut cfg = HarvestConfig::default();
        cfg.fetch.user_agent = Some("tester/1".to_string());
        cfg.fetch.max_bytes = 1024;
        cfg.verify_images = false;
        cfg.retry.max_attempts = 0;
        cfg.accepted_extensions = vec!["webp".to_string()];

        let fetch = cfg.fetch_settings();
        assert_eq!(fetch.user_agent, "tester/1");
        assert_eq!(fetch.max_bytes, 1024);
        assert!(!fetch.verify_images);
        assert_eq!(cfg.retry_policy().max_attempts, 1);

        let harvest = cfg.harvest_settings();
        assert!(harvest.filter.accepts("http://x/a.webp"));
        assert!(!harvest.filter.accepts("http://x/a.png"));
    }

    #[test]
    fn csv_source_requires_input() {
        let cfg = HarvestConfig {
            source: SourceKind::Csv,
            ..HarvestConfig::default()
        };
        assert!(cfg.build_source().is_err());
    }

    #[test]
    fn load_without_file_is_default() {
        assert_eq!(HarvestConfig::load(None).unwrap(), HarvestConfig::default());
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        fs::write(&path, "dataset = \"someone/else\"\n[fetch]\nredirect_limit = 2\n").unwrap();
        let cfg = HarvestConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.dataset, "someone/else");
        assert_eq!(cfg.fetch.redirect_limit, 2);
    }
}
