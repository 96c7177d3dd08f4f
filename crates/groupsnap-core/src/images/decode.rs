//! Generic decode/encode helpers for image workflows.

use std::io::Cursor;

use image::{DynamicImage, ImageError, RgbImage};

/// Decodes encoded image bytes, guessing the format from content.
///
/// # Errors
/// Returns an error if the format is unknown or the data is corrupt.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?;
    reader.decode()
}

/// Encodes an RGB buffer as baseline JPEG at `quality` (1..=100).
///
/// # Errors
/// Returns an error if the encoder rejects the buffer (for example dimensions
/// beyond the JPEG limit).
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    use image::ImageEncoder as _;
    use image::codecs::jpeg::JpegEncoder;

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    let (w, h) = img.dimensions();
    encoder.write_image(img.as_raw(), w, h, image::ExtendedColorType::Rgb8)?;
    Ok(buf)
}

/// Encodes a dynamic image as PNG.
///
/// # Errors
/// Returns an error if PNG encoding fails.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
