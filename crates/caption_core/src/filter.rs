/// Extensions accepted when no explicit list is configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];

/// Accepts records whose URL ends with one of a fixed set of extensions.
///
/// The check is a literal, case-sensitive suffix match on the URL string:
/// `"a.JPG"` is rejected by the default set and a query string hides the
/// extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(Into::into)
                .filter(|ext: &String| !ext.is_empty())
                .collect(),
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn accepts(&self, url: &str) -> bool {
        self.extensions.iter().any(|ext| url.ends_with(ext.as_str()))
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().copied())
    }
}
