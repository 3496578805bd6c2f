//! C3 Decoder / Sandbox (spec §4.3).
//!
//! Bytes → [`DecodedImage`], guarded against decompression bombs, with EXIF
//! orientation applied before any other stage observes pixel data.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat as LibFormat, ImageReader};
use tracing::debug;

use crate::error::DecodeError;
use crate::types::{ColorMode, DecodedImage, ImageFormatKind};

const MIN_DIM: u32 = 100;
const MAX_DIM_HARD: u32 = 10_000;

pub struct Decoder {
    max_pixels: u64,
}

impl Decoder {
    pub fn new(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    /// Decode frame 0 of `bytes`, applying EXIF orientation so the
    /// returned buffer is already in display orientation.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::InvalidFormat(e.to_string()))?;

        let format = reader
            .format()
            .ok_or_else(|| DecodeError::InvalidFormat("unrecognized container".to_string()))?;
        let format_kind = map_format(format)?;

        let (decl_w, decl_h) = reader
            .into_dimensions()
            .map_err(|e| DecodeError::Corrupted(e.to_string()))?;
        let declared_pixels = decl_w as u64 * decl_h as u64;
        if declared_pixels > self.max_pixels {
            return Err(DecodeError::DecompressionBomb(declared_pixels));
        }

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::InvalidFormat(e.to_string()))?;
        let dynamic = reader
            .decode()
            .map_err(|e| DecodeError::Corrupted(e.to_string()))?;

        let width = dynamic.width();
        let height = dynamic.height();
        let realized_pixels = width as u64 * height as u64;
        if realized_pixels > self.max_pixels {
            return Err(DecodeError::DecompressionBomb(realized_pixels));
        }
        if width < MIN_DIM || height < MIN_DIM || width > MAX_DIM_HARD || height > MAX_DIM_HARD {
            return Err(DecodeError::Corrupted(format!(
                "dimensions {width}x{height} outside [{MIN_DIM}, {MAX_DIM_HARD}]"
            )));
        }

        let orientation = read_exif_orientation(bytes);
        let oriented = apply_orientation(dynamic, orientation);

        let color_mode = map_color_mode(&oriented);
        let (is_animated, frame_count) = detect_animation(bytes, format);
        debug!(
            width = oriented.width(),
            height = oriented.height(),
            ?format_kind,
            is_animated,
            frame_count,
            "decoded image"
        );

        Ok(DecodedImage {
            width: oriented.width(),
            height: oriented.height(),
            color_mode,
            format: format_kind,
            is_animated,
            frame_count,
            pixels: oriented,
        })
    }
}

/// True frame count for multi-frame containers (spec §3: `DecodedImage`/
/// `ImageMetadata` carry `is_animated`/`frame_count` even though only
/// frame 0 is ever decoded into pixels, per spec §4.3). GIF is counted by
/// walking frames via the format's own `AnimationDecoder`; WebP's
/// animation flag and frame count are read directly off its RIFF
/// container (`VP8X`/`ANMF` chunks) rather than assuming the installed
/// `image` build exposes WebP animation decoding.
fn detect_animation(bytes: &[u8], format: LibFormat) -> (bool, u32) {
    match format {
        LibFormat::Gif => gif_frame_count(bytes),
        LibFormat::WebP => webp_animation_info(bytes),
        _ => (false, 1),
    }
}

fn gif_frame_count(bytes: &[u8]) -> (bool, u32) {
    use image::codecs::gif::GifDecoder;
    use image::AnimationDecoder;

    let Ok(decoder) = GifDecoder::new(Cursor::new(bytes)) else {
        return (false, 1);
    };
    let count = decoder.into_frames().take_while(Result::is_ok).count().max(1) as u32;
    (count > 1, count)
}

/// Walks a WebP RIFF container's top-level chunks to read the `VP8X`
/// animation flag and count `ANMF` (animation frame) chunks, without
/// decoding any pixel data beyond what [`Decoder::decode`] already did.
/// Never panics on a malformed or truncated container — returns "not
/// animated" on any structural surprise, since the bitstream has already
/// passed a full pixel decode by the time this runs.
fn webp_animation_info(bytes: &[u8]) -> (bool, u32) {
    if bytes.get(0..4) != Some(b"RIFF".as_slice()) || bytes.get(8..12) != Some(b"WEBP".as_slice()) {
        return (false, 1);
    }

    let mut offset = 12usize;
    let mut is_animated = false;
    let mut frame_count: u32 = 0;
    while let (Some(fourcc), Some(size_bytes)) =
        (bytes.get(offset..offset + 4), bytes.get(offset + 4..offset + 8))
    {
        let size = u32::from_le_bytes(size_bytes.try_into().expect("exactly 4 bytes")) as usize;
        if fourcc == b"VP8X" {
            if let Some(&flags) = bytes.get(offset + 8) {
                is_animated = flags & 0b0000_0010 != 0;
            }
        } else if fourcc == b"ANMF" {
            frame_count += 1;
        }
        let advance = 8 + size + (size % 2);
        offset = match offset.checked_add(advance) {
            Some(next) => next,
            None => break,
        };
    }

    if is_animated {
        (true, frame_count.max(1))
    } else {
        (false, 1)
    }
}

fn map_format(format: LibFormat) -> Result<ImageFormatKind, DecodeError> {
    match format {
        LibFormat::Jpeg => Ok(ImageFormatKind::Jpeg),
        LibFormat::Png => Ok(ImageFormatKind::Png),
        LibFormat::WebP => Ok(ImageFormatKind::WebP),
        LibFormat::Gif => Ok(ImageFormatKind::Gif),
        other => Err(DecodeError::Unsupported(format!("{other:?}"))),
    }
}

fn map_color_mode(img: &DynamicImage) -> ColorMode {
    use image::DynamicImage::*;
    match img {
        ImageLuma8(_) | ImageLuma16(_) => ColorMode::Luma,
        ImageLumaA8(_) | ImageLumaA16(_) => ColorMode::LumaAlpha,
        ImageRgb8(_) | ImageRgb16(_) | ImageRgb32F(_) => ColorMode::Rgb,
        ImageRgba8(_) | ImageRgba16(_) | ImageRgba32F(_) => ColorMode::Rgba,
        _ => ColorMode::Rgb,
    }
}

/// Read the EXIF `Orientation` tag (0x0112) if present. Returns `1`
/// (identity) when absent or unparsable — decode must not fail just
/// because EXIF is missing.
fn read_exif_orientation(bytes: &[u8]) -> u16 {
    let mut cursor = Cursor::new(bytes);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) else {
        return 1;
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(|v| v as u16)
        .unwrap_or(1)
}

/// Apply the standard 8-value EXIF orientation table.
fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    use image::imageops::{flip_horizontal, flip_vertical, rotate180, rotate270, rotate90};
    match orientation {
        1 => img,
        2 => DynamicImage::ImageRgba8(flip_horizontal(&img.to_rgba8())),
        3 => DynamicImage::ImageRgba8(rotate180(&img.to_rgba8())),
        4 => DynamicImage::ImageRgba8(flip_vertical(&img.to_rgba8())),
        5 => DynamicImage::ImageRgba8(flip_horizontal(&rotate90(&img.to_rgba8()))),
        6 => DynamicImage::ImageRgba8(rotate90(&img.to_rgba8())),
        7 => DynamicImage::ImageRgba8(flip_horizontal(&rotate270(&img.to_rgba8()))),
        8 => DynamicImage::ImageRgba8(rotate270(&img.to_rgba8())),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn encode_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), LibFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn decodes_a_valid_jpeg() {
        let bytes = encode_jpeg(200, 150);
        let decoder = Decoder::new(100_000_000);
        let decoded = decoder.decode(&bytes).unwrap();
        assert_eq!(decoded.width, 200);
        assert_eq!(decoded.height, 150);
        assert_eq!(decoded.format, ImageFormatKind::Jpeg);
    }

    #[test]
    fn rejects_image_below_minimum_dimension() {
        let bytes = encode_jpeg(99, 100);
        let decoder = Decoder::new(100_000_000);
        assert!(decoder.decode(&bytes).is_err());
    }

    #[test]
    fn accepts_image_at_minimum_dimension() {
        let bytes = encode_jpeg(100, 100);
        let decoder = Decoder::new(100_000_000);
        assert!(decoder.decode(&bytes).is_ok());
    }

    #[test]
    fn rejects_garbage_bytes() {
        let decoder = Decoder::new(100_000_000);
        assert!(decoder.decode(b"not an image").is_err());
    }

    #[test]
    fn rejects_declared_pixel_count_over_cap() {
        // A 10000x10000 JPEG is within MAX_DIM_HARD but a tiny max_pixels cap
        // should still trip the bomb guard on the declared dimensions.
        let bytes = encode_jpeg(500, 500);
        let decoder = Decoder::new(1000); // 500*500 = 250_000 > 1000
        assert!(matches!(decoder.decode(&bytes), Err(DecodeError::DecompressionBomb(_))));
    }

    fn encode_gif(w: u32, h: u32, frames: u32) -> Vec<u8> {
        use image::codecs::gif::GifEncoder;
        use image::Frame;

        let mut buf = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buf);
            for i in 0..frames {
                let rgba: image::RgbaImage =
                    ImageBuffer::from_fn(w, h, |x, y| image::Rgba([((x + i) % 256) as u8, (y % 256) as u8, 0, 255]));
                encoder.encode_frame(Frame::new(rgba)).unwrap();
            }
        }
        buf
    }

    #[test]
    fn single_frame_gif_is_not_animated() {
        let bytes = encode_gif(120, 120, 1);
        let decoder = Decoder::new(100_000_000);
        let decoded = decoder.decode(&bytes).unwrap();
        assert!(!decoded.is_animated);
        assert_eq!(decoded.frame_count, 1);
    }

    #[test]
    fn multi_frame_gif_reports_true_frame_count() {
        let bytes = encode_gif(120, 120, 4);
        let decoder = Decoder::new(100_000_000);
        let decoded = decoder.decode(&bytes).unwrap();
        assert!(decoded.is_animated);
        assert_eq!(decoded.frame_count, 4);
        // Only frame 0's pixels are ever decoded into the buffer.
        assert_eq!(decoded.width, 120);
        assert_eq!(decoded.height, 120);
    }

    fn riff_chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(fourcc);
        chunk.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        chunk.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            chunk.push(0);
        }
        chunk
    }

    fn fake_webp_container(animated: bool, anmf_chunks: u32) -> Vec<u8> {
        let vp8x_flags: u8 = if animated { 0b0000_0010 } else { 0 };
        let vp8x_payload = [vp8x_flags, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut body = riff_chunk(b"VP8X", &vp8x_payload);
        for _ in 0..anmf_chunks {
            body.extend(riff_chunk(b"ANMF", &[0u8; 16]));
        }

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(b"WEBP");
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn webp_animation_info_detects_static_container() {
        let bytes = fake_webp_container(false, 0);
        assert_eq!(webp_animation_info(&bytes), (false, 1));
    }

    #[test]
    fn webp_animation_info_counts_anmf_chunks() {
        let bytes = fake_webp_container(true, 3);
        assert_eq!(webp_animation_info(&bytes), (true, 3));
    }

    #[test]
    fn webp_animation_info_never_panics_on_truncated_bytes() {
        assert_eq!(webp_animation_info(b"RIFF"), (false, 1));
        assert_eq!(webp_animation_info(b""), (false, 1));
        assert_eq!(webp_animation_info(b"RIFF\x00\x00\x00\x00WEBPVP8X"), (false, 1));
    }
}
