//! Caption core: pure, IO-free helpers shared by the harvest pipeline.
mod filename;
mod filter;
mod record;

pub use filename::{local_filename, sanitize_filename, url_basename, FilenameClaims};
pub use filter::{ExtensionFilter, DEFAULT_EXTENSIONS};
pub use record::{normalize_caption, DatasetRecord};
