//! Byte-budget JPEG compression
//!
//! Re-encodes an image at shrinking `(width, quality)` pairs until the base64
//! payload's decoded size (`len * 3 / 4`) fits the budget:
//!
//! ```text
//! width:   W0 → ⌊W0·r⌋ → ⌊⌊W0·r⌋·r⌋ → …   (stop when < Wmin)
//! quality: Q0 → Q0−s  → Q0−2s      → …   (stop when < Qmin)
//! ```
//!
//! The first attempt under budget wins. If the bounds are exhausted, one final
//! encode at `(Wmin, Qmin)` is returned even when still over budget.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;
use tracing::{debug, info, warn};

use smsimg_core::config::CompressConfig;
use smsimg_core::{Caveat, SmsimgError, SmsimgResult};

use crate::payload::EncodedPayload;

/// One re-encode tried during the search
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub width: u32,
    pub quality: f64,
    pub decoded_size: usize,
}

/// Output of the budget search
#[derive(Debug, Clone)]
pub struct Compressed {
    pub payload: EncodedPayload,
    pub width: u32,
    pub quality: f64,
    pub target_bytes: usize,
    /// false when the fallback at `(Wmin, Qmin)` is still over budget
    pub within_budget: bool,
    /// Every encode performed, in order (the last one is `payload`)
    pub attempts: Vec<Attempt>,
}

impl Compressed {
    pub fn decoded_size(&self) -> usize {
        self.payload.decoded_size_estimate()
    }

    /// The soft-fail caveat, if the budget was not reached.
    pub fn caveat(&self) -> Option<Caveat> {
        (!self.within_budget).then(|| Caveat::BudgetExceeded {
            decoded_size: self.decoded_size(),
            target: self.target_bytes,
        })
    }
}

/// Read an image file and compress it.
///
/// An unreadable file is reported as a decode fault, same as an undecodable one.
pub fn compress_file(path: &Path, cfg: &CompressConfig) -> SmsimgResult<Compressed> {
    let bytes = std::fs::read(path)
        .map_err(|e| SmsimgError::Decode(format!("reading source image {}: {e}", path.display())))?;
    compress_to_budget(&bytes, cfg)
}

/// Decode raw image bytes (any enabled format) and compress them.
pub fn compress_to_budget(source: &[u8], cfg: &CompressConfig) -> SmsimgResult<Compressed> {
    let image = image::load_from_memory(source)
        .map_err(|e| SmsimgError::Decode(format!("decoding source image: {e}")))?;
    debug!(
        width = image.width(),
        height = image.height(),
        "decoded source image"
    );
    compress_image(&image, cfg)
}

/// Run the width/quality search over an already-decoded image.
pub fn compress_image(image: &DynamicImage, cfg: &CompressConfig) -> SmsimgResult<Compressed> {
    let mut width = cfg.initial_width;
    let mut quality = cfg.initial_quality;
    let mut attempts = Vec::new();

    while width >= cfg.min_width && quality >= cfg.min_quality {
        let payload = encode_jpeg(image, width, quality)?;
        let size = payload.decoded_size_estimate();
        debug!(width, quality, size, "compression attempt");
        attempts.push(Attempt {
            width,
            quality,
            decoded_size: size,
        });

        if size <= cfg.target_bytes {
            info!(width, quality, size, attempts = attempts.len(), "compression reached budget");
            return Ok(Compressed {
                payload,
                width,
                quality,
                target_bytes: cfg.target_bytes,
                within_budget: true,
                attempts,
            });
        }

        quality -= cfg.quality_step;
        width = (f64::from(width) * cfg.width_ratio).floor() as u32;
    }

    let payload = encode_jpeg(image, cfg.min_width, cfg.min_quality)?;
    let size = payload.decoded_size_estimate();
    attempts.push(Attempt {
        width: cfg.min_width,
        quality: cfg.min_quality,
        decoded_size: size,
    });
    let within_budget = size <= cfg.target_bytes;
    if !within_budget {
        warn!(
            size,
            target = cfg.target_bytes,
            "could not reach target size, returning smallest version"
        );
    }

    Ok(Compressed {
        payload,
        width: cfg.min_width,
        quality: cfg.min_quality,
        target_bytes: cfg.target_bytes,
        within_budget,
        attempts,
    })
}

/// Map a `(0, 1]` quality to the JPEG encoder's `1..=100` scale.
fn jpeg_quality(quality: f64) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Resize to `width` (aspect preserved) and encode as baseline JPEG.
fn encode_jpeg(image: &DynamicImage, width: u32, quality: f64) -> SmsimgResult<EncodedPayload> {
    let height = (f64::from(image.height()) * f64::from(width) / f64::from(image.width()))
        .round()
        .max(1.0) as u32;
    let rgb = image
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, jpeg_quality(quality))
        .encode_image(&rgb)
        .map_err(|e| SmsimgError::Decode(format!("JPEG encode at {width}px: {e}")))?;

    Ok(EncodedPayload::encode(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;

    fn solid(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 90])))
    }

    fn noise(width: u32, height: u32) -> DynamicImage {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, _| {
            Rgb([rng.gen(), rng.gen(), rng.gen()])
        }))
    }

    fn png_bytes(image: &DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_solid_image_converges_on_first_attempt() {
        let cfg = CompressConfig::default();
        let result = compress_image(&solid(2000, 2000), &cfg).unwrap();

        assert!(result.within_budget);
        assert!(result.decoded_size() <= 5500);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.width, 128);
        assert!(result.caveat().is_none());

        let jpeg = result.payload.decode().unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (128, 128));
    }

    #[test]
    fn test_unreachable_budget_soft_fails_with_documented_steps() {
        let cfg = CompressConfig {
            target_bytes: 100,
            ..CompressConfig::default()
        };
        let result = compress_image(&noise(256, 256), &cfg).unwrap();

        assert!(!result.within_budget);
        assert!(!result.payload.is_empty());
        assert_eq!(result.width, 64);

        let widths: Vec<u32> = result.attempts.iter().map(|a| a.width).collect();
        assert_eq!(widths, vec![128, 108, 91, 77, 65, 64]);

        let qualities: Vec<f64> = result.attempts.iter().map(|a| a.quality).collect();
        let expected = [0.8, 0.7, 0.6, 0.5, 0.4, 0.35];
        for (got, want) in qualities.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "quality {got} != {want}");
        }

        assert_eq!(
            result.caveat(),
            Some(Caveat::BudgetExceeded {
                decoded_size: result.decoded_size(),
                target: 100
            })
        );
    }

    #[test]
    fn test_smaller_attempts_shrink_payload() {
        let cfg = CompressConfig {
            target_bytes: 1,
            ..CompressConfig::default()
        };
        let result = compress_image(&noise(200, 150), &cfg).unwrap();
        let first = result.attempts.first().unwrap().decoded_size;
        let last = result.attempts.last().unwrap().decoded_size;
        assert!(last < first, "fallback ({last}) should be smaller than first ({first})");
    }

    #[test]
    fn test_aspect_ratio_preserved() {
        let result = compress_image(&solid(400, 100), &CompressConfig::default()).unwrap();
        let jpeg = result.payload.decode().unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (128, 32));
    }

    #[test]
    fn test_compress_png_bytes() {
        let bytes = png_bytes(&solid(300, 200));
        let result = compress_to_budget(&bytes, &CompressConfig::default()).unwrap();
        assert!(result.within_budget);
        assert!(result.payload.decode().unwrap().starts_with(&[0xFF, 0xD8]));
    }

    #[test]
    fn test_undecodable_source_is_decode_fault() {
        let err = compress_to_budget(b"definitely not an image", &CompressConfig::default())
            .unwrap_err();
        assert!(matches!(err, SmsimgError::Decode(_)));
    }

    #[test]
    fn test_missing_file_is_decode_fault() {
        let err = compress_file(
            Path::new("/nonexistent/smsimg/source.png"),
            &CompressConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SmsimgError::Decode(_)));
    }

    #[test]
    fn test_jpeg_quality_mapping() {
        assert_eq!(jpeg_quality(0.8), 80);
        assert_eq!(jpeg_quality(0.35), 35);
        assert_eq!(jpeg_quality(0.4000000000000001), 40);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(1.5), 100);
    }
}
