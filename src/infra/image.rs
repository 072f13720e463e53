//! Raster codecs and the reference pixel comparator, backed by the `image` crate.

use crate::application::ports::{
    ComparatorOutcome, DecodeError, ImageComparator, ImageDecoder, ImageEncoder,
};
use anyhow::Context;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder as _, Rgba, RgbaImage};

/// Decodes any format the `image` crate recognizes and encodes PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl ImageDecoder for ImageCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, DecodeError> {
        image::load_from_memory(bytes)
            .map(|img| img.to_rgba8())
            .map_err(|err| DecodeError(err.to_string()))
    }
}

impl ImageEncoder for ImageCodec {
    fn encode(&self, image: &RgbaImage) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        PngEncoder::new_with_quality(&mut bytes, CompressionType::Fast, FilterType::Adaptive)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )
            .context("Failed to encode PNG")?;
        Ok(bytes)
    }
}

/// Largest possible YIQ delta between two colors.
const MAX_YIQ_DELTA: f64 = 35215.0;

const DIFF_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Per-pixel comparator using a perceptual YIQ color distance.
///
/// A pixel differs when its distance exceeds `MAX_YIQ_DELTA * threshold²`, so
/// `0.0` flags any change and `1.0` tolerates nearly everything. Pixels outside
/// the overlap of differently sized images always differ.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelComparator;

impl ImageComparator for PixelComparator {
    fn compare(
        &self,
        base: &RgbaImage,
        comparison: &RgbaImage,
        threshold: f64,
        with_visual_diff: bool,
    ) -> ComparatorOutcome {
        let max_delta = MAX_YIQ_DELTA * threshold * threshold;
        let width = base.width().max(comparison.width());
        let height = base.height().max(comparison.height());

        let mut visual = with_visual_diff.then(|| RgbaImage::new(width, height));
        let mut differing_pixels = 0u64;

        for y in 0..height {
            for x in 0..width {
                let a = base.get_pixel_checked(x, y);
                let b = comparison.get_pixel_checked(x, y);
                let differs = match (a, b) {
                    (Some(a), Some(b)) => a != b && color_delta(a, b) > max_delta,
                    _ => true,
                };

                if differs {
                    differing_pixels += 1;
                }

                if let Some(visual) = visual.as_mut() {
                    let pixel = match (differs, a.or(b)) {
                        (false, Some(source)) => faded_gray(source),
                        _ => DIFF_COLOR,
                    };
                    visual.put_pixel(x, y, pixel);
                }
            }
        }

        ComparatorOutcome {
            equal: differing_pixels == 0,
            differing_pixels,
            visual_diff: visual.filter(|_| differing_pixels > 0),
        }
    }
}

fn blend(channel: f64, alpha: f64) -> f64 {
    255.0 + (channel - 255.0) * alpha
}

fn yiq(pixel: &Rgba<u8>) -> (f64, f64, f64) {
    let alpha = f64::from(pixel[3]) / 255.0;
    let r = blend(f64::from(pixel[0]), alpha);
    let g = blend(f64::from(pixel[1]), alpha);
    let b = blend(f64::from(pixel[2]), alpha);
    (
        r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23,
        r * 0.595_977_99 - g * 0.274_176_10 - b * 0.321_801_89,
        r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94,
    )
}

fn color_delta(a: &Rgba<u8>, b: &Rgba<u8>) -> f64 {
    let (y1, i1, q1) = yiq(a);
    let (y2, i2, q2) = yiq(b);
    let (dy, di, dq) = (y1 - y2, i1 - i2, q1 - q2);
    0.5053 * dy * dy + 0.299 * di * di + 0.1957 * dq * dq
}

fn faded_gray(pixel: &Rgba<u8>) -> Rgba<u8> {
    let (luma, _, _) = yiq(pixel);
    let gray = blend(luma, 0.1).round().clamp(0.0, 255.0) as u8;
    Rgba([gray, gray, gray, 255])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(rgba))
    }

    #[test]
    fn test_identical_images_are_equal() {
        let img = solid(3, 3, [10, 20, 30, 255]);
        let outcome = PixelComparator.compare(&img, &img, 0.0, true);
        assert!(outcome.equal);
        assert_eq!(outcome.differing_pixels, 0);
        assert!(outcome.visual_diff.is_none());
    }

    #[test]
    fn test_threshold_tolerates_small_shifts() {
        let a = solid(2, 2, [100, 100, 100, 255]);
        let b = solid(2, 2, [102, 100, 100, 255]);
        assert!(!PixelComparator.compare(&a, &b, 0.0, false).equal);
        assert!(PixelComparator.compare(&a, &b, 0.1, false).equal);
    }

    #[test]
    fn test_visual_diff_marks_changed_pixels() {
        let a = solid(2, 1, [255, 255, 255, 255]);
        let mut b = a.clone();
        b.put_pixel(1, 0, Rgba([0, 0, 0, 255]));

        let outcome = PixelComparator.compare(&a, &b, 0.1, true);
        assert_eq!(outcome.differing_pixels, 1);
        let visual = outcome.visual_diff.unwrap();
        assert_eq!(*visual.get_pixel(1, 0), DIFF_COLOR);
        assert_ne!(*visual.get_pixel(0, 0), DIFF_COLOR);
    }

    #[test]
    fn test_size_mismatch_counts_uncovered_pixels() {
        let a = solid(2, 2, [0, 0, 0, 255]);
        let b = solid(3, 2, [0, 0, 0, 255]);
        let outcome = PixelComparator.compare(&a, &b, 0.1, true);
        assert_eq!(outcome.differing_pixels, 2);
        assert_eq!(outcome.visual_diff.unwrap().dimensions(), (3, 2));
    }

    #[test]
    fn test_codec_round_trip_preserves_pixels() {
        let img = RgbaImage::from_fn(4, 3, |x, y| Rgba([x as u8 * 60, y as u8 * 80, 7, 200]));
        let bytes = ImageCodec.encode(&img).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        assert_eq!(ImageCodec.decode(&bytes).unwrap(), img);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ImageCodec.decode(b"definitely not a png").is_err());
    }
}
