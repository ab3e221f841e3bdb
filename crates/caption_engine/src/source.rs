//! Where records come from.
//!
//! Every source hands back an ordered prefix of at most `limit` rows. A source
//! that cannot be read fails the whole run before any image is fetched.

use std::path::PathBuf;
use std::time::Duration;

use caption_core::DatasetRecord;
use engine_logging::{engine_debug, engine_warn};
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_HF_ENDPOINT: &str = "https://datasets-server.huggingface.co";
pub const DEFAULT_DATASET: &str = "isidentical/moondream2-coyo-5M-captions";
/// The rows endpoint refuses pages larger than this.
pub const MAX_ROWS_PER_PAGE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("dataset request to {url} failed with status {status}")]
    Http { url: String, status: u16 },
    #[error("dataset request failed: {0}")]
    Network(String),
    #[error("dataset response could not be decoded: {0}")]
    Decode(String),
    #[error("invalid dataset endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{source_name} has no column {column}")]
    MissingColumn { source_name: String, column: String },
}

/// Which fields of a row hold the image URL and the caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordColumns {
    pub url: String,
    pub caption: String,
}

impl Default for RecordColumns {
    fn default() -> Self {
        Self {
            url: "url".to_string(),
            caption: "moondream2_caption".to_string(),
        }
    }
}

#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;

    async fn fetch_prefix(&self, limit: usize) -> Result<Vec<DatasetRecord>, SourceError>;
}

/// Records already in memory.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    records: Vec<DatasetRecord>,
}

impl VecSource {
    pub fn new(records: Vec<DatasetRecord>) -> Self {
        Self { records }
    }
}

#[async_trait::async_trait]
impl RecordSource for VecSource {
    fn describe(&self) -> String {
        format!("{} in-memory records", self.records.len())
    }

    async fn fetch_prefix(&self, limit: usize) -> Result<Vec<DatasetRecord>, SourceError> {
        Ok(self.records.iter().take(limit).cloned().collect())
    }
}

/// A local CSV export of the dataset.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    columns: RecordColumns,
}

impl CsvSource {
    pub fn new(path: PathBuf, columns: RecordColumns) -> Self {
        Self { path, columns }
    }

    fn read(&self, limit: usize) -> Result<Vec<DatasetRecord>, SourceError> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let position = |column: &str| {
            headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| SourceError::MissingColumn {
                    source_name: self.describe(),
                    column: column.to_string(),
                })
        };
        let url_idx = position(&self.columns.url)?;
        let caption_idx = position(&self.columns.caption)?;

        let mut records = Vec::new();
        for row in reader.records().take(limit) {
            let row = row?;
            match (row.get(url_idx), row.get(caption_idx)) {
                (Some(url), Some(caption)) if !url.is_empty() => {
                    records.push(DatasetRecord::new(url, caption));
                }
                _ => engine_warn!(
                    "{}: skipping incomplete row at line {:?}",
                    self.describe(),
                    row.position().map(|p| p.line())
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait::async_trait]
impl RecordSource for CsvSource {
    fn describe(&self) -> String {
        format!("csv {}", self.path.display())
    }

    async fn fetch_prefix(&self, limit: usize) -> Result<Vec<DatasetRecord>, SourceError> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || source.read(limit))
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))?
    }
}

#[derive(Debug, Clone)]
pub struct HfDatasetSettings {
    pub endpoint: String,
    pub dataset: String,
    pub config: String,
    pub split: String,
    pub columns: RecordColumns,
    pub page_size: usize,
    pub request_timeout: Duration,
}

impl Default for HfDatasetSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_HF_ENDPOINT.to_string(),
            dataset: DEFAULT_DATASET.to_string(),
            config: "default".to_string(),
            split: "train".to_string(),
            columns: RecordColumns::default(),
            page_size: MAX_ROWS_PER_PAGE,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Pages through the Hugging Face datasets-server `/rows` endpoint.
#[derive(Debug, Clone)]
pub struct HfRowsSource {
    settings: HfDatasetSettings,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
    #[serde(default)]
    num_rows_total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row_idx: usize,
    row: serde_json::Map<String, Value>,
}

impl HfRowsSource {
    pub fn new(settings: HfDatasetSettings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| SourceError::Network(err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn page_url(&self, offset: usize, length: usize) -> Result<url::Url, SourceError> {
        let base = format!("{}/rows", self.settings.endpoint.trim_end_matches('/'));
        let offset = offset.to_string();
        let length = length.to_string();
        url::Url::parse_with_params(
            &base,
            &[
                ("dataset", self.settings.dataset.as_str()),
                ("config", self.settings.config.as_str()),
                ("split", self.settings.split.as_str()),
                ("offset", offset.as_str()),
                ("length", length.as_str()),
            ],
        )
        .map_err(|err| SourceError::InvalidEndpoint(err.to_string()))
    }

    async fn fetch_page(&self, offset: usize, length: usize) -> Result<RowsPage, SourceError> {
        let url = self.page_url(offset, length)?;
        engine_debug!("fetching dataset rows {}..{} from {}", offset, offset + length, url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| SourceError::Network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| SourceError::Network(err.to_string()))?;
        serde_json::from_slice(&body).map_err(|err| SourceError::Decode(err.to_string()))
    }

    fn to_record(&self, entry: &RowEntry) -> Option<DatasetRecord> {
        let field = |name: &str| entry.row.get(name).and_then(Value::as_str);
        match (field(&self.settings.columns.url), field(&self.settings.columns.caption)) {
            (Some(url), Some(caption)) if !url.is_empty() => Some(DatasetRecord::new(url, caption)),
            _ => {
                engine_warn!(
                    "{}: row {} lacks a string {:?} or {:?} field",
                    self.describe(),
                    entry.row_idx,
                    self.settings.columns.url,
                    self.settings.columns.caption
                );
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl RecordSource for HfRowsSource {
    fn describe(&self) -> String {
        format!(
            "hf dataset {} ({}/{})",
            self.settings.dataset, self.settings.config, self.settings.split
        )
    }

    async fn fetch_prefix(&self, limit: usize) -> Result<Vec<DatasetRecord>, SourceError> {
        let page_size = self.settings.page_size.clamp(1, MAX_ROWS_PER_PAGE);
        let mut records = Vec::with_capacity(limit.min(4096));
        let mut offset = 0;

        while offset < limit {
            let length = page_size.min(limit - offset);
            let page = self.fetch_page(offset, length).await?;
            if page.rows.is_empty() {
                break;
            }
            let taken = page.rows.len().min(length);
            offset += taken;
            records.extend(
                page.rows
                    .iter()
                    .take(taken)
                    .filter_map(|entry| self.to_record(entry)),
            );
            if page.num_rows_total.is_some_and(|total| offset >= total) {
                break;
            }
        }

        Ok(records)
    }
}
