//! C7 Resizer / Normalizer (spec §4.7).
//!
//! Produces the final encoded JPEG for a selected candidate: downscale to
//! fit within `max_dim` on the long edge, flatten any alpha channel onto
//! white, and encode — stepping the JPEG quality down if the first
//! encode overshoots a byte budget.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use image::imageops::FilterType;

use crate::error::NormalizeError;

/// Quality ladder tried in order until the encoded size fits, or the
/// ladder is exhausted (the last attempt's output is returned regardless).
const QUALITY_LADDER: [u8; 5] = [85, 75, 65, 55, 50];

pub struct Resizer {
    max_dim: u32,
    target_quality: u8,
    max_output_bytes: u64,
}

impl Resizer {
    pub fn new(max_dim: u32, target_quality: u8, max_output_bytes: u64) -> Self {
        Self {
            max_dim,
            target_quality,
            max_output_bytes,
        }
    }

    /// Resize (if needed), flatten to RGB, and encode as JPEG.
    pub fn normalize(&self, image: &DynamicImage) -> Result<Vec<u8>, NormalizeError> {
        let resized = self.resize_to_fit(image)?;
        let rgb = flatten_to_rgb(&resized);

        let mut qualities: Vec<u8> = QUALITY_LADDER
            .iter()
            .copied()
            .filter(|q| *q <= self.target_quality)
            .collect();
        if qualities.is_empty() || qualities[0] != self.target_quality {
            qualities.insert(0, self.target_quality);
        }

        let mut last_encoded = Vec::new();
        for quality in qualities {
            let encoded = encode_jpeg(&rgb, quality)?;
            let fits = encoded.len() as u64 <= self.max_output_bytes;
            last_encoded = encoded;
            if fits {
                return Ok(last_encoded);
            }
        }
        Ok(last_encoded)
    }

    fn resize_to_fit(&self, image: &DynamicImage) -> Result<DynamicImage, NormalizeError> {
        let (width, height) = image.dimensions();
        let long_edge = width.max(height);
        let short_edge = width.min(height);

        // C3 admits any decoded image with min-dim >= 100 and max-dim <=
        // 10000, including extreme aspect ratios (e.g. 10000x100). Scaling
        // such an image down to fit `max_dim` on the long edge would also
        // shrink the short edge below the output floor of 100px — the two
        // invariants are mutually unsatisfiable for any resize once the
        // aspect ratio exceeds `max_dim / 100`, so reject rather than emit
        // output that breaks the floor.
        if long_edge > self.max_dim && short_edge * self.max_dim < 100 * long_edge {
            return Err(NormalizeError::Resize(format!(
                "aspect ratio {width}x{height} cannot be scaled to fit max_dim={} without \
                 the short edge falling below the 100px floor",
                self.max_dim
            )));
        }

        if long_edge <= self.max_dim {
            return Ok(image.clone());
        }

        let scale = self.max_dim as f64 / long_edge as f64;
        let new_width = ((width as f64) * scale).round().max(1.0) as u32;
        let new_height = ((height as f64) * scale).round().max(1.0) as u32;

        Ok(image.resize(new_width, new_height, FilterType::Lanczos3))
    }
}

/// Composite any alpha onto white, and convert palette/CMYK/grayscale
/// source data into a flat RGB buffer.
fn flatten_to_rgb(image: &DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgba8(rgba) => {
            let (w, h) = rgba.dimensions();
            let mut out = RgbImage::new(w, h);
            for (x, y, pixel) in rgba.enumerate_pixels() {
                let [r, g, b, a] = pixel.0;
                let alpha = a as f64 / 255.0;
                let blend = |channel: u8| -> u8 {
                    ((channel as f64 * alpha) + (255.0 * (1.0 - alpha))).round() as u8
                };
                out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
            }
            out
        }
        DynamicImage::ImageLumaA8(la) => {
            let (w, h) = la.dimensions();
            let mut out = RgbImage::new(w, h);
            for (x, y, pixel) in la.enumerate_pixels() {
                let [l, a] = pixel.0;
                let alpha = a as f64 / 255.0;
                let blended = ((l as f64 * alpha) + (255.0 * (1.0 - alpha))).round() as u8;
                out.put_pixel(x, y, Rgb([blended, blended, blended]));
            }
            out
        }
        other => other.to_rgb8(),
    }
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>, NormalizeError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), quality);
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| NormalizeError::Conversion(e.to_string()))?;
    Ok(buf)
}
