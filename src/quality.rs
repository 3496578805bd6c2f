//! C4 Quality Analyzer (spec §4.4).
//!
//! Six sub-scores in `[0, 1]`, combined into a weighted `overall`. The
//! piecewise break-points below are fixed by the specification, not
//! calibrated empirically — changing them changes the public contract.

use image::{DynamicImage, GrayImage};

use crate::types::QualityMetrics;

const W_RESOLUTION: f64 = 0.25;
const W_SHARPNESS: f64 = 0.25;
const W_BRIGHTNESS: f64 = 0.15;
const W_CONTRAST: f64 = 0.15;
const W_COLORFULNESS: f64 = 0.10;
const W_COMPRESSION: f64 = 0.10;

pub struct QualityAnalyzer;

impl QualityAnalyzer {
    /// `file_size_bytes` is the size of the original encoded bytes (pre
    /// normalization) so `compression_quality` can compute bits-per-pixel.
    pub fn analyze(img: &DynamicImage, file_size_bytes: u64) -> QualityMetrics {
        let gray = img.to_luma8();
        let pixel_count = (img.width() as u64) * (img.height() as u64);

        let resolution = score_resolution(pixel_count);
        let laplacian_variance = laplacian_variance(&gray);
        let sharpness = score_sharpness(laplacian_variance);
        let mean = grayscale_mean(&gray);
        let brightness = score_brightness(mean);
        let std_dev = grayscale_std_dev(&gray, mean);
        let contrast = score_contrast(std_dev);
        let colorfulness = score_colorfulness(img);
        let bpp = if pixel_count > 0 {
            file_size_bytes as f64 / pixel_count as f64
        } else {
            0.0
        };
        let compression_quality = score_compression(bpp);
        let edge_density = score_edge_density(&gray);
        let dynamic_range = score_dynamic_range(&gray);

        let overall = (W_RESOLUTION * resolution
            + W_SHARPNESS * sharpness
            + W_BRIGHTNESS * brightness
            + W_CONTRAST * contrast
            + W_COLORFULNESS * colorfulness
            + W_COMPRESSION * compression_quality)
            .clamp(0.0, 1.0);

        QualityMetrics {
            overall,
            resolution: resolution.clamp(0.0, 1.0),
            sharpness: sharpness.clamp(0.0, 1.0),
            brightness: brightness.clamp(0.0, 1.0),
            contrast: contrast.clamp(0.0, 1.0),
            colorfulness: colorfulness.clamp(0.0, 1.0),
            compression_quality: compression_quality.clamp(0.0, 1.0),
            blur_laplacian_variance: laplacian_variance,
            edge_density,
            dynamic_range,
        }
    }
}

/// `P = W*H` thresholds from spec §4.4.
fn score_resolution(pixel_count: u64) -> f64 {
    if pixel_count >= 1920 * 1080 {
        1.0
    } else if pixel_count >= 1280 * 720 {
        0.8
    } else if pixel_count >= 640 * 480 {
        0.5
    } else if pixel_count >= 320 * 240 {
        0.3
    } else {
        0.1
    }
}

/// Variance of the discrete 4-neighbor Laplacian response.
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0u64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = gray.get_pixel(x, y).0[0] as i32;
            let up = gray.get_pixel(x, y - 1).0[0] as i32;
            let down = gray.get_pixel(x, y + 1).0[0] as i32;
            let left = gray.get_pixel(x - 1, y).0[0] as i32;
            let right = gray.get_pixel(x + 1, y).0[0] as i32;
            let laplacian = (up + down + left + right - 4 * center) as f64;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let n = count as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Sharpness piecewise curve from spec §4.4, keyed on Laplacian variance `v`.
fn score_sharpness(v: f64) -> f64 {
    if v >= 500.0 {
        1.0
    } else if v >= 100.0 {
        0.7 + (v - 100.0) / 400.0 * 0.3
    } else if v >= 50.0 {
        0.5 + (v - 50.0) / 50.0 * 0.2
    } else {
        v / 50.0 * 0.5
    }
}

fn grayscale_mean(gray: &GrayImage) -> f64 {
    let sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    sum as f64 / gray.pixels().len() as f64
}

fn grayscale_std_dev(gray: &GrayImage, mean: f64) -> f64 {
    let n = gray.pixels().len() as f64;
    let sum_sq: f64 = gray.pixels().map(|p| (p.0[0] as f64 - mean).powi(2)).sum();
    (sum_sq / n).sqrt()
}

/// Brightness piecewise curve from spec §4.4, keyed on grayscale mean `μ`.
fn score_brightness(mean: f64) -> f64 {
    if (100.0..=160.0).contains(&mean) {
        1.0
    } else if (80.0..100.0).contains(&mean) {
        0.7 + (mean - 80.0) / 20.0 * 0.3
    } else if mean > 160.0 && mean <= 180.0 {
        1.0 - (mean - 160.0) / 20.0 * 0.3
    } else if mean < 80.0 {
        mean / 80.0 * 0.7
    } else {
        // mean > 180
        (1.0 - (mean - 180.0) / 75.0 * 0.7).max(0.3)
    }
}

/// Contrast piecewise curve from spec §4.4, keyed on grayscale σ.
fn score_contrast(std_dev: f64) -> f64 {
    if std_dev >= 50.0 {
        1.0
    } else if std_dev >= 30.0 {
        0.7 + (std_dev - 30.0) / 20.0 * 0.3
    } else if std_dev >= 15.0 {
        0.4 + (std_dev - 15.0) / 15.0 * 0.3
    } else {
        std_dev / 15.0 * 0.4
    }
}

/// Hasler & Süsstrunk colorfulness metric (spec §4.4). Grayscale input
/// (no chroma signal at all) yields exactly `0.5` per the spec.
fn score_colorfulness(img: &DynamicImage) -> f64 {
    let is_grayscale = matches!(
        img,
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_)
    );
    if is_grayscale {
        return 0.5;
    }

    let rgb = img.to_rgb8();
    let n = rgb.pixels().len() as f64;
    if n == 0.0 {
        return 0.5;
    }

    let mut rg_sum = 0.0;
    let mut rg_sq_sum = 0.0;
    let mut yb_sum = 0.0;
    let mut yb_sq_sum = 0.0;

    for p in rgb.pixels() {
        let r = p.0[0] as f64;
        let g = p.0[1] as f64;
        let b = p.0[2] as f64;
        let rg = r - g;
        let yb = 0.5 * (r + g) - b;
        rg_sum += rg;
        rg_sq_sum += rg * rg;
        yb_sum += yb;
        yb_sq_sum += yb * yb;
    }

    let rg_mean = rg_sum / n;
    let yb_mean = yb_sum / n;
    let rg_std = (rg_sq_sum / n - rg_mean * rg_mean).max(0.0).sqrt();
    let yb_std = (yb_sq_sum / n - yb_mean * yb_mean).max(0.0).sqrt();

    let c = (rg_std.powi(2) + yb_std.powi(2)).sqrt() + 0.3 * (rg_mean.powi(2) + yb_mean.powi(2)).sqrt();
    (c / 100.0).min(1.0)
}

/// Compression-quality piecewise curve from spec §4.4, keyed on bits-per-pixel.
fn score_compression(bpp: f64) -> f64 {
    if (0.5..=3.0).contains(&bpp) {
        1.0
    } else if bpp < 0.5 {
        (bpp / 0.5 * 0.7 + 0.3).max(0.3)
    } else {
        (1.0 - (bpp - 3.0) / 5.0 * 0.5).max(0.5)
    }
}

/// Diagnostic only (not part of `overall`): fraction of pixel pairs across
/// an edge-detection threshold.
fn score_edge_density(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 2 || h == 0 {
        return 0.0;
    }
    let threshold = 15i32;
    let mut edges = 0u64;
    for y in 0..h {
        for x in 1..w {
            let a = gray.get_pixel(x - 1, y).0[0] as i32;
            let b = gray.get_pixel(x, y).0[0] as i32;
            if (a - b).abs() > threshold {
                edges += 1;
            }
        }
    }
    edges as f64 / (w as u64 * h as u64) as f64
}

/// Diagnostic only: `(max - min) / 255` over the grayscale image.
fn score_dynamic_range(gray: &GrayImage) -> f64 {
    let (mut min, mut max) = (255u8, 0u8);
    for p in gray.pixels() {
        let v = p.0[0];
        min = min.min(v);
        max = max.max(v);
    }
    (max as f64 - min as f64) / 255.0
}
