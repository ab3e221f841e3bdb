use std::time::Duration;

use bytes::BytesMut;
use engine_logging::engine_trace;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;

use crate::verify::decode_image;
use crate::{
    EngineEvent, FailureKind, FetchError, FetchMetadata, FetchOutput, RecordId, RecordProgress,
    Stage,
};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Exact media types, or `type/*` wildcards. A response without a
    /// content type is let through.
    pub allowed_content_types: Vec<String>,
    pub user_agent: String,
    /// Reject bodies that do not decode as JPEG, PNG, GIF or WebP.
    pub verify_images: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 10,
            max_bytes: 20 * 1024 * 1024,
            allowed_content_types: vec![
                "image/*".to_string(),
                "application/octet-stream".to_string(),
                "binary/octet-stream".to_string(),
            ],
            user_agent: concat!("caption-harvest/", env!("CARGO_PKG_VERSION")).to_string(),
            verify_images: true,
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

pub struct ChannelProgressSink {
    tx: std::sync::mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: std::sync::mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: EngineEvent) {}
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        record_id: RecordId,
        url: &str,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutput, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings.allowed_content_types.iter().any(|allowed| {
            match allowed.strip_suffix("/*") {
                Some(top) => ct
                    .split_once('/')
                    .is_some_and(|(ct_top, _)| ct_top.eq_ignore_ascii_case(top)),
                None => allowed.eq_ignore_ascii_case(ct),
            }
        })
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        record_id: RecordId,
        url: &str,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutput, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus {
                    status: status.as_u16(),
                },
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(FetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        sink.emit(EngineEvent::Progress(RecordProgress {
            record_id,
            stage: Stage::Downloading,
            bytes: Some(0),
            attempt: None,
        }));

        let mut bytes = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
            engine_trace!("record {}: {} bytes received", record_id, bytes.len());
            sink.emit(EngineEvent::Progress(RecordProgress {
                record_id,
                stage: Stage::Downloading,
                bytes: Some(bytes.len() as u64),
                attempt: None,
            }));
        }

        if bytes.is_empty() {
            return Err(FetchError::new(FailureKind::EmptyBody, "response body is empty"));
        }
        let bytes = bytes.freeze();
        if self.settings.verify_images {
            let body = bytes.clone();
            let decoded = tokio::task::spawn_blocking(move || decode_image(&body))
                .await
                .map_err(|err| FetchError::new(FailureKind::Panicked, err.to_string()))?;
            if let Err(err) = decoded {
                return Err(FetchError::new(
                    FailureKind::NotAnImage,
                    format!("body does not decode as an image: {err}"),
                ));
            }
        }

        let metadata = FetchMetadata {
            original_url: url.to_string(),
            final_url,
            content_type,
            byte_len: bytes.len() as u64,
            attempts: 1,
        };

        Ok(FetchOutput {
            bytes: bytes.to_vec(),
            metadata,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher_with(types: &[&str]) -> ReqwestFetcher {
        let settings = FetchSettings {
            allowed_content_types: types.iter().map(|t| t.to_string()).collect(),
            ..FetchSettings::default()
        };
        ReqwestFetcher::new(settings).unwrap()
    }

    #[test]
    fn wildcard_content_types_match_top_level_type() {
        let fetcher = fetcher_with(&["image/*"]);
        assert!(fetcher.is_content_type_allowed("image/png"));
        assert!(fetcher.is_content_type_allowed("IMAGE/JPEG; charset=binary"));
        assert!(!fetcher.is_content_type_allowed("text/html"));
        assert!(!fetcher.is_content_type_allowed("image"));
    }

    #[test]
    fn exact_content_types_ignore_parameters() {
        let fetcher = fetcher_with(&["application/octet-stream"]);
        assert!(fetcher.is_content_type_allowed("application/octet-stream; q=1"));
        assert!(!fetcher.is_content_type_allowed("application/json"));
    }
}
