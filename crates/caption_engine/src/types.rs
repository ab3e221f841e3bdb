use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Position of an accepted record in the source order.
pub type RecordId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Queued,
    Downloading,
    Retrying,
    Writing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordProgress {
    pub record_id: RecordId,
    pub stage: Stage,
    pub bytes: Option<u64>,
    pub attempt: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Progress(RecordProgress),
    RecordCompleted {
        record_id: RecordId,
        result: Result<MaterializedImage, FailureKind>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub content_type: Option<String>,
    pub byte_len: u64,
    pub attempts: u32,
}

/// A record whose image made it to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializedImage {
    pub record_id: RecordId,
    pub url: String,
    pub local_path: PathBuf,
    pub caption: String,
    pub byte_len: u64,
    pub sha256: String,
}

/// A record that was dropped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record_id: RecordId,
    pub url: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one fetch+persist attempt.
pub type FetchResult = Result<MaterializedImage, RecordFailure>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus { status: u16 },
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    EmptyBody,
    NotAnImage,
    DuplicateFilename { filename: String },
    Persist,
    Cancelled,
    Panicked,
    Network,
}

impl FailureKind {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureKind::Timeout | FailureKind::Network => true,
            FailureKind::HttpStatus { status } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus { status } => write!(f, "http status {status}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::EmptyBody => write!(f, "empty body"),
            FailureKind::NotAnImage => write!(f, "body is not a recognised image"),
            FailureKind::DuplicateFilename { filename } => {
                write!(f, "duplicate local filename {filename}")
            }
            FailureKind::Persist => write!(f, "write failed"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Panicked => write!(f, "task panicked"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}
