//! C5 Metadata Extractor (spec §4.5).
//!
//! Builds the descriptive [`ImageMetadata`] record: raw-byte and perceptual
//! hashes, EXIF GPS/datetime/camera fields, transparency and animation
//! flags. Never fails — a field whose source data is absent or unparsable
//! is simply `None`.

use std::io::Cursor;

use sha2::{Digest, Sha256};

use crate::phash;
use crate::types::{CameraInfo, ColorMode, DecodedImage, ExifData, GpsPosition, ImageMetadata};

pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn extract(url: &str, raw_bytes: &[u8], decoded: &DecodedImage) -> ImageMetadata {
        let sha256 = hex_sha256(raw_bytes);
        let phash = phash::average_hash(&decoded.pixels.to_luma8());
        let exif = parse_exif(raw_bytes);
        let has_transparency =
            matches!(decoded.color_mode, ColorMode::Rgba | ColorMode::LumaAlpha);

        ImageMetadata {
            url: url.to_string(),
            width: decoded.width,
            height: decoded.height,
            format: decoded.format,
            color_mode: decoded.color_mode,
            file_size_bytes: raw_bytes.len() as u64,
            aspect_ratio: decoded.width as f64 / decoded.height as f64,
            sha256,
            phash,
            exif,
            has_transparency,
            is_animated: decoded.is_animated,
            frame_count: decoded.frame_count,
        }
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn parse_exif(bytes: &[u8]) -> ExifData {
    let mut cursor = Cursor::new(bytes);
    let Ok(reader) = exif::Reader::new().read_from_container(&mut cursor) else {
        return ExifData::default();
    };

    let gps = parse_gps(&reader);
    let datetime_iso = reader
        .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
        .and_then(|f| parse_exif_datetime(&f.display_value().to_string()));
    let make = reader
        .get_field(exif::Tag::Make, exif::In::PRIMARY)
        .map(|f| f.display_value().to_string().trim_matches('"').to_string());
    let model = reader
        .get_field(exif::Tag::Model, exif::In::PRIMARY)
        .map(|f| f.display_value().to_string().trim_matches('"').to_string());
    let orientation = reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .map(|v| v as u16);

    let camera = if make.is_some() || model.is_some() {
        Some(CameraInfo { make, model })
    } else {
        None
    };

    ExifData {
        gps,
        datetime_iso,
        camera,
        orientation,
    }
}

fn parse_gps(reader: &exif::Exif) -> Option<GpsPosition> {
    let lat = gps_decimal(
        reader,
        exif::Tag::GPSLatitude,
        exif::Tag::GPSLatitudeRef,
        "S",
    )?;
    let lng = gps_decimal(
        reader,
        exif::Tag::GPSLongitude,
        exif::Tag::GPSLongitudeRef,
        "W",
    )?;
    let altitude = reader
        .get_field(exif::Tag::GPSAltitude, exif::In::PRIMARY)
        .and_then(|f| match &f.value {
            exif::Value::Rational(v) if !v.is_empty() => Some(v[0].to_f64()),
            _ => None,
        });

    Some(GpsPosition { lat, lng, altitude })
}

fn gps_decimal(
    reader: &exif::Exif,
    coord_tag: exif::Tag,
    ref_tag: exif::Tag,
    negative_ref: &str,
) -> Option<f64> {
    let field = reader.get_field(coord_tag, exif::In::PRIMARY)?;
    let exif::Value::Rational(rationals) = &field.value else {
        return None;
    };
    if rationals.len() < 3 {
        return None;
    }

    let degrees = rationals[0].to_f64();
    let minutes = rationals[1].to_f64();
    let seconds = rationals[2].to_f64();
    let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;

    if let Some(reference) = reader.get_field(ref_tag, exif::In::PRIMARY) {
        if reference.display_value().to_string().contains(negative_ref) {
            decimal = -decimal;
        }
    }

    Some(decimal)
}

/// Converts EXIF's `"YYYY:MM:DD HH:MM:SS"` into ISO-8601. Returns `None`
/// on any deviation from the expected format rather than guessing.
fn parse_exif_datetime(raw: &str) -> Option<String> {
    let trimmed = raw.trim_matches('"');
    let (date_part, time_part) = trimmed.split_once(' ')?;
    let date_part = date_part.replace(':', "-");
    if date_part.len() != 10 || time_part.len() != 8 {
        return None;
    }
    Some(format!("{date_part}T{time_part}Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageFormatKind;
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn decoded_stub() -> DecodedImage {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(64, 64, |_, _| Rgb([10, 20, 30])));
        DecodedImage {
            width: 64,
            height: 64,
            color_mode: ColorMode::Rgb,
            format: ImageFormatKind::Jpeg,
            is_animated: false,
            frame_count: 1,
            pixels: img,
        }
    }

    #[test]
    fn hashes_are_deterministic() {
        let bytes = b"some raw image bytes";
        let a = hex_sha256(bytes);
        let b = hex_sha256(bytes);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn metadata_without_exif_has_no_gps_or_datetime() {
        let decoded = decoded_stub();
        let meta = MetadataExtractor::extract("https://example.com/a.jpg", b"no exif here", &decoded);
        assert!(meta.exif.gps.is_none());
        assert!(meta.exif.datetime_iso.is_none());
        assert_eq!(meta.width, 64);
        assert_eq!(meta.height, 64);
    }

    #[test]
    fn aspect_ratio_matches_dimensions() {
        let decoded = decoded_stub();
        let meta = MetadataExtractor::extract("https://example.com/a.jpg", b"x", &decoded);
        assert!((meta.aspect_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn exif_datetime_parses_to_iso8601() {
        assert_eq!(
            parse_exif_datetime("\"2023:08:15 14:30:00\""),
            Some("2023-08-15T14:30:00Z".to_string())
        );
        assert_eq!(parse_exif_datetime("garbage"), None);
    }
}
