use std::collections::HashSet;

/// Strip every stem character that is not a word character or `-`.
///
/// The extension starts at the last `.` and is kept as-is. Since the cleaned
/// stem never contains a `.`, the same split is found again on a second pass,
/// which keeps the function idempotent.
pub fn sanitize_filename(name: &str) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    };
    let mut cleaned: String = stem.chars().filter(|c| is_kept(*c)).collect();
    cleaned.push_str(ext);
    cleaned
}

/// Everything after the last `/` of the URL, query included.
pub fn url_basename(url: &str) -> &str {
    match url.rfind('/') {
        Some(idx) => &url[idx + 1..],
        None => url,
    }
}

/// Local filename for an image URL.
pub fn local_filename(url: &str) -> String {
    sanitize_filename(url_basename(url))
}

fn is_kept(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Filenames already handed out during one run.
///
/// Two URLs can share a basename (`http://a/x.jpg`, `http://b/x.jpg`); only
/// the first one gets to write the file.
#[derive(Debug, Default)]
pub struct FilenameClaims {
    claimed: HashSet<String>,
}

impl FilenameClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the name is empty or already taken.
    pub fn claim(&mut self, filename: &str) -> bool {
        if filename.is_empty() {
            return false;
        }
        self.claimed.insert(filename.to_string())
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}
