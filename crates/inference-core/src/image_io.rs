//! Image decoding and artifact encoding
//!
//! - **mozjpeg** (SIMD-optimized) for JPEG decode/encode
//! - **image crate** for PNG, BMP and TIFF
//!
//! Screening input arrives as raw bytes, so the format is sniffed from the
//! content rather than a file extension.

use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Smallest edge accepted for screening
pub const MIN_DIMENSION: u32 = 32;

/// Errors that can occur during image I/O operations
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to decode image: {0}")]
    DecodeError(String),

    #[error("Failed to encode image: {0}")]
    EncodeError(String),

    #[error("Failed to write image file: {0}")]
    WriteError(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image too small: {width}x{height} (minimum {MIN_DIMENSION}x{MIN_DIMENSION})")]
    TooSmall { width: u32, height: u32 },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Decode raw upload bytes into an RGB image
///
/// Fails with [`ImageError::UnsupportedFormat`] for recognizable formats
/// outside JPEG/PNG/BMP/TIFF and with [`ImageError::TooSmall`] below 32×32.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::DecodeError("empty input".to_string()));
    }

    let format = image::guess_format(bytes)
        .map_err(|e| ImageError::DecodeError(format!("Unrecognized image data: {e}")))?;

    let img = match format {
        ImageFormat::Jpeg => decode_jpeg_mozjpeg(bytes)?,
        ImageFormat::Png | ImageFormat::Bmp | ImageFormat::Tiff => {
            image::load_from_memory_with_format(bytes, format)
                .map_err(|e| ImageError::DecodeError(format!("Failed to decode {format:?}: {e}")))?
                .to_rgb8()
        }
        other => {
            return Err(ImageError::UnsupportedFormat(
                other.extensions_str().first().copied().unwrap_or("unknown").to_string(),
            ))
        }
    };

    let (width, height) = img.dimensions();
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(ImageError::TooSmall { width, height });
    }

    debug!("Decoded {:?} image {}x{}", format, width, height);
    Ok(img)
}

/// Load an image file from disk (CLI convenience)
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage, ImageError> {
    let bytes = fs::read(path.as_ref())?;
    decode_image(&bytes)
}

fn decode_jpeg_mozjpeg(data: &[u8]) -> Result<RgbImage, ImageError> {
    let d = mozjpeg::Decompress::new_mem(data)
        .map_err(|e| ImageError::DecodeError(format!("Failed to create decompressor: {e}")))?;

    let (width, height) = (d.width(), d.height());

    let mut rgb = d
        .rgb()
        .map_err(|e| ImageError::DecodeError(format!("Failed to decode RGB: {e}")))?;

    let image_data: Vec<u8> = rgb
        .read_scanlines()
        .map_err(|e| ImageError::DecodeError(format!("Failed to read scanlines: {e}")))?;

    ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(width as u32, height as u32, image_data).ok_or_else(
        || {
            ImageError::DecodeError(format!(
                "Failed to create image buffer from mozjpeg output ({width}x{height})"
            ))
        },
    )
}

/// Save an RGB image, format chosen by extension
///
/// JPEG goes through mozjpeg; PNG and anything else through the `image` crate.
pub fn save_image<P: AsRef<Path>>(image: &RgbImage, path: P, quality: u8) -> Result<(), ImageError> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => save_jpeg_mozjpeg(image, path, quality),
        _ => image
            .save(path)
            .map_err(|e| ImageError::WriteError(format!("Failed to save image: {e}"))),
    }
}

fn save_jpeg_mozjpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<(), ImageError> {
    let (width, height) = image.dimensions();

    let mut file = fs::File::create(path)
        .map_err(|e| ImageError::WriteError(format!("Failed to create output file: {e}")))?;

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width as usize, height as usize);
    comp.set_quality(f32::from(quality.clamp(1, 100)));

    let mut started = comp
        .start_compress(&mut file)
        .map_err(|e| ImageError::EncodeError(format!("Failed to start compression: {e}")))?;

    started
        .write_scanlines(image.as_raw())
        .map_err(|e| ImageError::EncodeError(format!("Failed to write scanlines: {e}")))?;

    started
        .finish()
        .map_err(|e| ImageError::EncodeError(format!("Failed to finish compression: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_png_bytes() {
        let img = RgbImage::from_pixel(64, 48, Rgb([0, 255, 0]));
        let decoded = decode_image(&encode(&img, ImageFormat::Png)).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
        assert_eq!(decoded.get_pixel(10, 10), &Rgb([0, 255, 0]));
    }

    #[test]
    fn test_decode_bmp_bytes() {
        let img = RgbImage::from_pixel(40, 40, Rgb([10, 20, 30]));
        let decoded = decode_image(&encode(&img, ImageFormat::Bmp)).unwrap();
        assert_eq!(decoded.dimensions(), (40, 40));
    }

    #[test]
    fn test_jpeg_roundtrip_through_mozjpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.jpg");
        let img = RgbImage::from_pixel(100, 80, Rgb([200, 30, 30]));

        save_image(&img, &path, 90).unwrap();
        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.dimensions(), (100, 80));
    }

    #[test]
    fn test_rejects_small_images() {
        let img = RgbImage::from_pixel(16, 64, Rgb([0, 0, 0]));
        let err = decode_image(&encode(&img, ImageFormat::Png)).unwrap_err();
        assert!(matches!(err, ImageError::TooSmall { width: 16, height: 64 }));
    }

    #[test]
    fn test_rejects_garbage_and_empty() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(ImageError::DecodeError(_))
        ));
        assert!(matches!(decode_image(&[]), Err(ImageError::DecodeError(_))));
    }

    #[test]
    fn test_unsupported_format_detected() {
        // GIF magic bytes are recognized but not accepted for screening
        let err = decode_image(b"GIF89a\x01\x00\x01\x00\x00\x00\x00").unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedFormat(_)));
    }
}
