//! Vertical image stacking.
//!
//! Inputs are drawn top-to-bottom in order, each horizontally centered on a
//! white canvas as wide as the widest input, separated by `padding` pixels.
//! The geometry is computed by [`plan_layout`] from dimensions alone so it is
//! reproducible independently of the lossy encoder.

use image::{Rgba, RgbaImage};
use thiserror::Error;
use tracing::debug;

use super::decode::{decode_image, encode_jpeg};
use super::inline::InlineImage;
use crate::config::CompositorConfig;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const COMPOSITE_MIME: &str = "image/jpeg";
/// Largest side a baseline JPEG can describe.
pub const MAX_CANVAS_SIDE: u32 = 65_535;
/// Caps the RGBA canvas at roughly 160 MiB.
pub const MAX_CANVAS_PIXELS: u64 = 40_000_000;

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("no images to composite")]
    Empty,
    #[error("failed to decode image {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: image::ImageError,
    },
    #[error("composite canvas too large")]
    CanvasTooLarge,
    #[error("failed to encode composite: {0}")]
    Encode(#[source] image::ImageError),
}

/// Position and size of one input on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeLayout {
    pub width: u32,
    pub height: u32,
    pub placements: Vec<Placement>,
}

/// Result of compositing a batch.
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: InlineImage,
    pub image_count: usize,
    /// `None` when a single input was passed through untouched.
    pub layout: Option<CompositeLayout>,
}

impl Composite {
    pub fn has_multiple_images(&self) -> bool {
        self.image_count > 1
    }
}

/// Computes canvas size and placements for images of the given `(width, height)`.
///
/// Returns `None` for an empty input, or when the canvas would exceed
/// [`MAX_CANVAS_SIDE`] on either side or [`MAX_CANVAS_PIXELS`] in total.
pub fn plan_layout(dimensions: &[(u32, u32)], padding: u32) -> Option<CompositeLayout> {
    if dimensions.is_empty() {
        return None;
    }

    let width = dimensions.iter().map(|&(w, _)| w).max()?;
    let mut placements = Vec::with_capacity(dimensions.len());
    let mut y: u32 = 0;
    for (index, &(w, h)) in dimensions.iter().enumerate() {
        if index > 0 {
            y = y.checked_add(padding)?;
        }
        placements.push(Placement {
            x: (width - w) / 2,
            y,
            width: w,
            height: h,
        });
        y = y.checked_add(h)?;
    }

    if width > MAX_CANVAS_SIDE
        || y > MAX_CANVAS_SIDE
        || u64::from(width) * u64::from(y) > MAX_CANVAS_PIXELS
    {
        debug!(width, height = y, "composite canvas rejected");
        return None;
    }

    Some(CompositeLayout {
        width,
        height: y,
        placements,
    })
}

/// Renders `images` into one JPEG.
///
/// A single image is returned unchanged. With more than one, every input must
/// decode; any failure aborts the whole composite.
///
/// # Errors
/// Returns [`CompositeError`] for empty input, an undecodable image, an
/// oversized canvas, or an encoder failure.
pub fn composite(
    images: Vec<InlineImage>,
    options: CompositorConfig,
) -> Result<Composite, CompositeError> {
    let image_count = images.len();
    if image_count == 0 {
        return Err(CompositeError::Empty);
    }
    if image_count == 1 {
        debug!("single image, skipping composite pass");
        let image = images.into_iter().next().ok_or(CompositeError::Empty)?;
        return Ok(Composite {
            image,
            image_count,
            layout: None,
        });
    }

    let mut decoded = Vec::with_capacity(image_count);
    for (index, image) in images.iter().enumerate() {
        let img = decode_image(image.bytes())
            .map_err(|source| CompositeError::Decode { index, source })?;
        debug!(index, width = img.width(), height = img.height(), "decoded image");
        decoded.push(img.to_rgba8());
    }
    drop(images);

    let dimensions: Vec<(u32, u32)> = decoded.iter().map(RgbaImage::dimensions).collect();
    let layout = plan_layout(&dimensions, options.padding).ok_or(CompositeError::CanvasTooLarge)?;
    debug!(width = layout.width, height = layout.height, "composite canvas");

    let mut canvas = RgbaImage::from_pixel(layout.width, layout.height, BACKGROUND);
    for (img, placement) in decoded.iter().zip(&layout.placements) {
        image::imageops::overlay(
            &mut canvas,
            img,
            i64::from(placement.x),
            i64::from(placement.y),
        );
    }

    let rgb = image::DynamicImage::ImageRgba8(canvas).to_rgb8();
    let bytes = encode_jpeg(&rgb, options.jpeg_quality).map_err(CompositeError::Encode)?;

    Ok(Composite {
        image: InlineImage::new(Some(COMPOSITE_MIME), bytes),
        image_count,
        layout: Some(layout),
    })
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgb, RgbImage};

    use super::*;
    use crate::images::decode::encode_png;

    fn solid_png(width: u32, height: u32, color: [u8; 3]) -> InlineImage {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
        InlineImage::new(Some("image/png"), encode_png(&img).unwrap())
    }

    fn assert_close(actual: Rgb<u8>, expected: [u8; 3]) {
        for (a, e) in actual.0.iter().zip(expected) {
            assert!(
                a.abs_diff(e) <= 40,
                "pixel {:?} not close to {:?}",
                actual.0,
                expected
            );
        }
    }

    #[test]
    fn test_layout_two_images() {
        let layout = plan_layout(&[(100, 50), (60, 80)], 10).unwrap();

        assert_eq!((layout.width, layout.height), (100, 140));
        assert_eq!(
            layout.placements,
            vec![
                Placement { x: 0, y: 0, width: 100, height: 50 },
                Placement { x: 20, y: 60, width: 60, height: 80 },
            ]
        );
    }

    #[test]
    fn test_layout_odd_margin_rounds_down() {
        let layout = plan_layout(&[(11, 1), (4, 1), (11, 1)], 0).unwrap();
        assert_eq!(layout.placements[1].x, 3);
        assert_eq!(layout.height, 3);
    }

    #[test]
    fn test_layout_empty_and_overflow() {
        assert_eq!(plan_layout(&[], 10), None);
        assert_eq!(plan_layout(&[(1, u32::MAX), (1, 1)], 10), None);
    }

    #[test]
    fn test_layout_rejects_oversized_canvas() {
        assert_eq!(plan_layout(&[(10, 40_000), (10, 30_000)], 0), None);
        assert_eq!(plan_layout(&[(70_000, 1), (1, 1)], 0), None);
        assert_eq!(plan_layout(&[(8_000, 6_000), (8_000, 6_000)], 0), None);

        let edge = plan_layout(&[(10, 32_000), (10, 33_535)], 0).unwrap();
        assert_eq!(edge.height, MAX_CANVAS_SIDE);
    }

    #[test]
    fn test_oversized_composite_fails_before_drawing() {
        let images = vec![solid_png(4, 40_000, [0, 0, 0]), solid_png(4, 30_000, [0, 0, 0])];

        let err = composite(images, CompositorConfig::default()).unwrap_err();
        assert!(matches!(err, CompositeError::CanvasTooLarge));
    }

    #[test]
    fn test_layout_is_deterministic() {
        let dims = [(320, 200), (64, 64), (800, 10), (1, 1)];
        assert_eq!(plan_layout(&dims, 10), plan_layout(&dims, 10));
    }

    #[test]
    fn test_single_image_is_identity() {
        let input = solid_png(5, 5, [10, 20, 30]);
        let result = composite(vec![input.clone()], CompositorConfig::default()).unwrap();

        assert_eq!(result.image, input);
        assert_eq!(result.image_count, 1);
        assert!(!result.has_multiple_images());
        assert!(result.layout.is_none());
    }

    #[test]
    fn test_two_images_are_stacked_and_centered() {
        let images = vec![
            solid_png(100, 50, [255, 0, 0]),
            solid_png(60, 80, [0, 0, 255]),
        ];

        let result = composite(images, CompositorConfig::default()).unwrap();
        assert_eq!(result.image.mime_type(), "image/jpeg");
        assert_eq!(result.image_count, 2);
        assert!(result.has_multiple_images());

        let decoded = decode_image(result.image.bytes()).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (100, 140));
        // Sample points sit inside uniform JPEG blocks.
        assert_close(*decoded.get_pixel(56, 24), [255, 0, 0]);
        assert_close(*decoded.get_pixel(40, 100), [0, 0, 255]);
        assert_close(*decoded.get_pixel(4, 100), [255, 255, 255]);
    }

    #[test]
    fn test_undecodable_image_aborts() {
        let images = vec![
            solid_png(10, 10, [0, 0, 0]),
            InlineImage::new(Some("image/png"), b"broken".to_vec()),
        ];

        let err = composite(images, CompositorConfig::default()).unwrap_err();
        assert!(matches!(err, CompositeError::Decode { index: 1, .. }));
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(matches!(
            composite(Vec::new(), CompositorConfig::default()),
            Err(CompositeError::Empty)
        ));
    }
}
