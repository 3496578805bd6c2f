//! Data model (spec §3): the value types that flow between pipeline stages.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::StageError;

/// Output of C2 for a single URL. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub url: String,
    pub success: bool,
    pub bytes: Option<bytes::Bytes>,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub duration: Duration,
    pub retry_count: u32,
    pub error: Option<crate::error::DownloadError>,
}

/// Color mode of a decoded image, after any format-specific quirks are
/// normalized away by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    Rgb,
    Rgba,
    Palette,
    Luma,
    Cmyk,
    LumaAlpha,
    Bilevel,
}

/// Container format recognized by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormatKind {
    Jpeg,
    Png,
    WebP,
    Gif,
    Heif,
    Avif,
}

/// Opaque handle to a decoded pixel buffer (C3 output).
///
/// Invariant: by the time a `DecodedImage` exists, EXIF orientation has
/// already been applied — `pixels` is in display orientation.
#[derive(Clone)]
pub struct DecodedImage {
    pub pixels: image::DynamicImage,
    pub width: u32,
    pub height: u32,
    pub color_mode: ColorMode,
    pub format: ImageFormatKind,
    pub is_animated: bool,
    pub frame_count: u32,
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("color_mode", &self.color_mode)
            .field("format", &self.format)
            .field("is_animated", &self.is_animated)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

/// Six sub-scores plus the weighted overall (spec §4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub overall: f64,
    pub resolution: f64,
    pub sharpness: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub colorfulness: f64,
    pub compression_quality: f64,
    pub blur_laplacian_variance: f64,
    pub edge_density: f64,
    pub dynamic_range: f64,
}

/// Parsed GPS position, decimal-degrees form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpsPosition {
    pub lat: f64,
    pub lng: f64,
    pub altitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraInfo {
    pub make: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExifData {
    pub gps: Option<GpsPosition>,
    pub datetime_iso: Option<String>,
    pub camera: Option<CameraInfo>,
    pub orientation: Option<u16>,
}

/// Everything known about a downloaded/decoded image except its pixels
/// and quality score (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormatKind,
    pub color_mode: ColorMode,
    pub file_size_bytes: u64,
    pub aspect_ratio: f64,
    pub sha256: String,
    pub phash: u64,
    pub exif: ExifData,
    pub has_transparency: bool,
    pub is_animated: bool,
    pub frame_count: u32,
}

/// Internal tuple produced by C3+C4+C5, ranked by C6.
#[derive(Clone)]
pub struct Candidate {
    pub image: DecodedImage,
    pub metadata: ImageMetadata,
    pub quality: QualityMetrics,
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("metadata", &self.metadata)
            .field("quality", &self.quality)
            .finish()
    }
}

/// Final output of the coordinator (spec §3).
///
/// Invariant: `images.len() == metadata.len() == quality_scores.len() <= K`
/// and every input URL appears in exactly one of the selected output or
/// `errors`.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub images: Vec<DecodedImage>,
    pub metadata: Vec<ImageMetadata>,
    pub quality_scores: Vec<f64>,
    pub processing_time_seconds: f64,
    pub errors: Vec<StageError>,
}

impl PipelineResult {
    pub fn empty() -> Self {
        Self {
            images: Vec::new(),
            metadata: Vec::new(),
            quality_scores: Vec::new(),
            processing_time_seconds: 0.0,
            errors: Vec::new(),
        }
    }
}

/// Aggregate counters exposed alongside `PipelineResult` (additive, see
/// SPEC_FULL.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub urls_in: u64,
    pub validated: u64,
    pub cache_hits: u64,
    pub downloaded: u64,
    pub decoded: u64,
    pub candidates: u64,
    pub selected: u64,
    pub failed: u64,
    pub bytes_downloaded: u64,
}
