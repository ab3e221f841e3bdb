/// One `(url, caption)` pair read from a dataset source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRecord {
    pub url: String,
    pub caption: String,
}

impl DatasetRecord {
    pub fn new(url: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            caption: caption.into(),
        }
    }
}

/// Caption text as it lands in the manifest: surrounding whitespace trimmed,
/// optionally lowercased.
pub fn normalize_caption(caption: &str, lowercase: bool) -> String {
    let trimmed = caption.trim();
    if lowercase {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}
