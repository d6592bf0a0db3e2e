use crate::config::EncoderConfig;
use crate::error::UploadError;
use crate::models::VariantSpec;
use async_trait::async_trait;
use bytes::Bytes;
use image::imageops::FilterType;
use image::io::{Limits, Reader as ImageReader};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;

/// Turns the complete bytes of one source image into one derived copy.
#[async_trait]
pub trait VariantEncoder: Send + Sync {
    async fn transform(&self, input: Bytes, spec: VariantSpec) -> Result<Bytes, UploadError>;
}

static ENCODE_SLOTS: OnceLock<Arc<Semaphore>> = OnceLock::new();

/// Process-wide count of files that may be buffered and encoded at once.
pub fn shared_encode_slots() -> Arc<Semaphore> {
    ENCODE_SLOTS
        .get_or_init(|| {
            Arc::new(Semaphore::new(
                EncoderConfig::current().max_concurrent_encodes,
            ))
        })
        .clone()
}

/// Resizes and re-encodes to WebP on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebpEncoder;

#[async_trait]
impl VariantEncoder for WebpEncoder {
    async fn transform(&self, input: Bytes, spec: VariantSpec) -> Result<Bytes, UploadError> {
        let config = *EncoderConfig::current();
        tokio::task::spawn_blocking(move || Self::encode(&input, spec, &config))
            .await
            .map_err(|e| UploadError::Encode(format!("Encoder task failed: {}", e)))?
            .map(Bytes::from)
    }
}

impl WebpEncoder {
    pub fn encode(
        input: &[u8],
        spec: VariantSpec,
        config: &EncoderConfig,
    ) -> Result<Vec<u8>, UploadError> {
        let mut reader = ImageReader::new(Cursor::new(input))
            .with_guessed_format()
            .map_err(|e| UploadError::Encode(format!("Failed to read image: {}", e)))?;

        let mut limits = Limits::default();
        limits.max_alloc = Some(config.max_decode_alloc);
        limits.max_image_width = Some(config.max_dimension);
        limits.max_image_height = Some(config.max_dimension);
        reader.limits(limits);

        let img = reader
            .decode()
            .map_err(|e| UploadError::Encode(format!("Failed to load image: {}", e)))?;

        Self::encode_to_webp(&Self::resize(img, spec))
    }

    /// One missing dimension follows the aspect ratio. Both given crops to fill.
    fn resize(img: DynamicImage, spec: VariantSpec) -> DynamicImage {
        match (spec.width, spec.height) {
            (None, None) => img,
            (Some(w), None) => {
                let h = scale_dimension(img.height(), w, img.width());
                img.resize_exact(w.max(1), h, FilterType::Lanczos3)
            }
            (None, Some(h)) => {
                let w = scale_dimension(img.width(), h, img.height());
                img.resize_exact(w, h.max(1), FilterType::Lanczos3)
            }
            (Some(w), Some(h)) => img.resize_to_fill(w.max(1), h.max(1), FilterType::Lanczos3),
        }
    }

    fn encode_to_webp(img: &DynamicImage) -> Result<Vec<u8>, UploadError> {
        // The WebP encoder only takes 8-bit color
        let img_8bit = if img.color().has_alpha() {
            DynamicImage::ImageRgba8(img.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(img.to_rgb8())
        };

        let mut out_data = Vec::new();
        let mut cursor = Cursor::new(&mut out_data);
        img_8bit
            .write_to(&mut cursor, ImageFormat::WebP)
            .map_err(|e| UploadError::Encode(format!("Failed to encode WebP: {}", e)))?;
        Ok(out_data)
    }
}

/// `other * target / source`, rounded, never zero.
fn scale_dimension(other: u32, target: u32, source: u32) -> u32 {
    if source == 0 {
        return target.max(1);
    }
    let scaled = (other as f64 * target as f64 / source as f64).round();
    (scaled as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer, Rgb};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 90]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn decode(bytes: &[u8]) -> DynamicImage {
        let format = image::guess_format(bytes).unwrap();
        assert_eq!(format, ImageFormat::WebP);
        image::load_from_memory(bytes).unwrap()
    }

    #[test]
    fn test_scale_dimension() {
        assert_eq!(scale_dimension(600, 300, 1200), 150);
        assert_eq!(scale_dimension(1, 10, 1000), 1);
        assert_eq!(scale_dimension(5, 7, 0), 7);
    }

    #[test]
    fn test_width_only_keeps_aspect_ratio() {
        let out = WebpEncoder::encode(
            &sample_png(400, 200),
            VariantSpec::width(100),
            &EncoderConfig::default(),
        )
        .unwrap();
        assert_eq!(decode(&out).dimensions(), (100, 50));
    }

    #[test]
    fn test_height_only_keeps_aspect_ratio() {
        let out = WebpEncoder::encode(
            &sample_png(400, 200),
            VariantSpec::height(20),
            &EncoderConfig::default(),
        )
        .unwrap();
        assert_eq!(decode(&out).dimensions(), (40, 20));
    }

    #[test]
    fn test_both_dimensions_fill() {
        let out = WebpEncoder::encode(
            &sample_png(400, 200),
            VariantSpec::sized(50, 50),
            &EncoderConfig::default(),
        )
        .unwrap();
        assert_eq!(decode(&out).dimensions(), (50, 50));
    }

    #[test]
    fn test_original_size_only_converts() {
        let out = WebpEncoder::encode(
            &sample_png(64, 48),
            VariantSpec::ORIGINAL,
            &EncoderConfig::default(),
        )
        .unwrap();
        assert_eq!(decode(&out).dimensions(), (64, 48));
    }

    #[test]
    fn test_rejects_non_image() {
        let err = WebpEncoder::encode(
            b"definitely not an image",
            VariantSpec::width(10),
            &EncoderConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, UploadError::Encode(_)));
    }

    #[test]
    fn test_rejects_oversized_dimensions() {
        let config = EncoderConfig {
            max_dimension: 32,
            ..EncoderConfig::default()
        };
        let err = WebpEncoder::encode(&sample_png(64, 64), VariantSpec::ORIGINAL, &config)
            .unwrap_err();
        assert!(matches!(err, UploadError::Encode(_)));
    }

    #[tokio::test]
    async fn test_transform_runs_off_the_runtime() {
        let out = WebpEncoder
            .transform(Bytes::from(sample_png(80, 40)), VariantSpec::width(40))
            .await
            .unwrap();
        assert_eq!(decode(&out).dimensions(), (40, 20));
    }
}
