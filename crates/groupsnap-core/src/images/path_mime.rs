//! Loading local image files as inline images.

use std::path::Path;

use anyhow::{Context, Result};

use super::inline::InlineImage;

/// Returns MIME type inferred from file extension for supported image formats.
pub fn mime_type_for_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension().and_then(|e| e.to_str())?;

    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Reads a file from disk into an [`InlineImage`].
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_inline_image(path: &Path) -> Result<InlineImage> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(InlineImage::new(mime_type_for_extension(path), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_extension_is_case_insensitive() {
        assert_eq!(mime_type_for_extension(Path::new("a/B.JPG")), Some("image/jpeg"));
        assert_eq!(mime_type_for_extension(Path::new("x.webp")), Some("image/webp"));
        assert_eq!(mime_type_for_extension(Path::new("notes.txt")), None);
        assert_eq!(mime_type_for_extension(Path::new("no_extension")), None);
    }
}
