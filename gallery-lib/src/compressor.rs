use crate::config::CompressionSettings;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageResult, RgbImage};
use std::path::Path;

/// An encoded payload ready to be uploaded once.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub payload: Vec<u8>,
    /// JPEG quality in `0.0..=1.0` the payload was encoded with
    pub quality: f32,
    /// Number of quality reductions after the initial attempt
    pub steps: u32,
}

/// Searches downwards from full JPEG quality until the payload fits the budget.
#[derive(Debug, Clone)]
pub struct ImageCompressor {
    settings: CompressionSettings,
}

impl Default for ImageCompressor {
    fn default() -> Self {
        Self::new(CompressionSettings::default())
    }
}

impl ImageCompressor {
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    /// Compresses against the configured byte budget.
    pub fn compress(&self, image: &DynamicImage) -> ImageResult<CompressionResult> {
        self.compress_to(image, self.settings.max_bytes)
    }

    /// Encodes at quality 1.0, then lowers the quality by the configured step until
    /// the payload fits `max_bytes` or the floor is reached. The last payload is
    /// returned even when it is still over budget.
    pub fn compress_to(
        &self,
        image: &DynamicImage,
        max_bytes: usize,
    ) -> ImageResult<CompressionResult> {
        // Percent grid keeps the search exact: 1.0 - 9 * 0.1 is not 0.1 in f32.
        let step = to_percent(self.settings.quality_step);
        let floor = to_percent(self.settings.quality_floor);
        let rgb = image.to_rgb8();

        let mut quality = 100u8;
        let mut payload = encode_jpeg(&rgb, quality)?;
        let mut steps = 0;

        while payload.len() > max_bytes && quality > floor {
            quality = quality.saturating_sub(step).max(floor);
            payload = encode_jpeg(&rgb, quality)?;
            steps += 1;
        }

        if payload.len() > max_bytes {
            tracing::debug!(
                "Payload still {} bytes over budget at minimum quality",
                payload.len() - max_bytes
            );
        }

        Ok(CompressionResult {
            payload,
            quality: f32::from(quality) / 100.0,
            steps,
        })
    }
}

/// Maps a `0.0..=1.0` quality to whole percent, never below 1.
/// Non-finite input counts as the smallest step.
fn to_percent(quality: f32) -> u8 {
    if !quality.is_finite() {
        return 1;
    }
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut payload = Vec::new();
    JpegEncoder::new_with_quality(&mut payload, quality).encode_image(image)?;
    Ok(payload)
}

/// Decodes a local image file, guessing the format from its content.
pub fn load_image(path: &Path) -> ImageResult<DynamicImage> {
    image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
}
