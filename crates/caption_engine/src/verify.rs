//! Image checks backed by the `image` decoders.
//!
//! A body counts as an image only if it fully decodes; a valid signature
//! followed by garbage is rejected.

use std::path::Path;

use image::{ImageFormat, ImageReader, ImageResult};

/// Format guessed from the leading bytes, without decoding.
pub fn image_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Decode an in-memory image and return its format.
pub fn decode_image(bytes: &[u8]) -> ImageResult<ImageFormat> {
    let format = image::guess_format(bytes)?;
    image::load_from_memory_with_format(bytes, format)?;
    Ok(format)
}

/// Open and fully decode the image file at `path`.
pub fn verify_image_file(path: &Path) -> ImageResult<()> {
    ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(())
}
