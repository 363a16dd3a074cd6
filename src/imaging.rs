//! Local image transforms.
//!
//! Quality enhancement and wallpaper conversion run entirely locally via the
//! `image` crate. Decoding and resampling large images is CPU-heavy, so the
//! public functions hop onto the blocking thread pool and never stall the
//! update dispatcher.

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// Candidate 16:9 wallpaper targets, smallest first
const WALLPAPER_SIZES: &[(u32, u32)] = &[(1920, 1080), (2560, 1440), (3840, 2160)];

/// Errors from local image processing
#[derive(Debug, Error)]
pub enum ImagingError {
    /// Decoding or encoding failed
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    /// The blocking worker task died
    #[error("image worker failed: {0}")]
    Worker(String),
}

/// Resize an image to a quality preset, preserving aspect ratio and padding
/// to the exact target dimensions.
///
/// # Errors
///
/// Returns an [`ImagingError`] if the payload cannot be decoded or the
/// worker task fails.
pub async fn enhance_quality(
    bytes: Bytes,
    target_width: u32,
    target_height: u32,
) -> Result<Bytes, ImagingError> {
    tokio::task::spawn_blocking(move || enhance_quality_sync(&bytes, target_width, target_height))
        .await
        .map_err(|e| ImagingError::Worker(e.to_string()))?
}

fn enhance_quality_sync(
    bytes: &[u8],
    target_width: u32,
    target_height: u32,
) -> Result<Bytes, ImagingError> {
    let img = image::load_from_memory(bytes)?;
    // Transparency is flattened onto white before resampling.
    let rgb = flatten_alpha(&img, Rgb([255, 255, 255]));

    let (orig_width, orig_height) = rgb.dimensions();
    debug!("Enhancing {orig_width}x{orig_height} to {target_width}x{target_height}");

    let (fit_width, fit_height) = fit_within(orig_width, orig_height, target_width, target_height);
    let resized = imageops::resize(&rgb, fit_width, fit_height, FilterType::Lanczos3);

    // Pad to the exact preset dimensions, image centered on black.
    let mut canvas = RgbImage::from_pixel(target_width, target_height, Rgb([0, 0, 0]));
    let offset_x = i64::from((target_width - fit_width) / 2);
    let offset_y = i64::from((target_height - fit_height) / 2);
    imageops::replace(&mut canvas, &resized, offset_x, offset_y);

    encode_png(canvas)
}

/// Convert an image into a 16:9 wallpaper: pick a target resolution from the
/// source size, scale to fill, and center-crop the overflow.
///
/// # Errors
///
/// Returns an [`ImagingError`] if the payload cannot be decoded or the
/// worker task fails.
pub async fn to_wallpaper(bytes: Bytes) -> Result<Bytes, ImagingError> {
    tokio::task::spawn_blocking(move || to_wallpaper_sync(&bytes))
        .await
        .map_err(|e| ImagingError::Worker(e.to_string()))?
}

fn to_wallpaper_sync(bytes: &[u8]) -> Result<Bytes, ImagingError> {
    let img = image::load_from_memory(bytes)?;
    // Black background suits wallpapers better than white.
    let rgb = flatten_alpha(&img, Rgb([0, 0, 0]));

    let (orig_width, orig_height) = rgb.dimensions();
    let (target_width, target_height) = wallpaper_target(orig_width, orig_height);
    debug!("Converting {orig_width}x{orig_height} to {target_width}x{target_height} wallpaper");

    // Scale to fill: the shorter relative side matches the target, the other
    // overflows and is cropped away.
    let scale = f64::from(target_width) / f64::from(orig_width);
    let scale = scale.max(f64::from(target_height) / f64::from(orig_height));
    let fill_width = scale_dim(orig_width, scale).max(target_width);
    let fill_height = scale_dim(orig_height, scale).max(target_height);

    let resized = imageops::resize(&rgb, fill_width, fill_height, FilterType::Lanczos3);
    let crop_x = (fill_width - target_width) / 2;
    let crop_y = (fill_height - target_height) / 2;
    let cropped =
        imageops::crop_imm(&resized, crop_x, crop_y, target_width, target_height).to_image();

    encode_png(cropped)
}

/// Pick the largest wallpaper target whose pixel count the source at least
/// half-covers, defaulting to the smallest.
fn wallpaper_target(width: u32, height: u32) -> (u32, u32) {
    let pixels = u64::from(width) * u64::from(height);
    let mut target = WALLPAPER_SIZES[0];
    for &(w, h) in WALLPAPER_SIZES {
        if pixels * 2 >= u64::from(w) * u64::from(h) {
            target = (w, h);
        }
    }
    target
}

/// Largest dimensions that fit inside the target while keeping aspect ratio
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let ratio = f64::from(width) / f64::from(height);
    let target_ratio = f64::from(max_width) / f64::from(max_height);

    if ratio > target_ratio {
        (max_width, scale_dim(max_width, 1.0 / ratio).min(max_height))
    } else {
        (scale_dim(max_height, ratio).min(max_width), max_height)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_dim(dim: u32, scale: f64) -> u32 {
    ((f64::from(dim) * scale).round() as u32).max(1)
}

/// Composite the image over a solid background, dropping the alpha channel
fn flatten_alpha(img: &DynamicImage, background: Rgb<u8>) -> RgbImage {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut out = RgbImage::new(width, height);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = f32::from(pixel[3]) / 255.0;
        let blend = |fg: u8, bg: u8| {
            (f32::from(fg).mul_add(alpha, f32::from(bg) * (1.0 - alpha))).round() as u8
        };
        out.put_pixel(
            x,
            y,
            Rgb([
                blend(pixel[0], background[0]),
                blend(pixel[1], background[1]),
                blend(pixel[2], background[2]),
            ]),
        );
    }
    out
}

fn encode_png(img: RgbImage) -> Result<Bytes, ImagingError> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png)?;
    Ok(Bytes::from(out.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(img: RgbaImage) -> Bytes {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode test image");
        Bytes::from(out.into_inner())
    }

    #[test]
    fn test_fit_within_preserves_ratio() {
        // Wider than target: fit to width.
        assert_eq!(fit_within(200, 100, 100, 100), (100, 50));
        // Taller than target: fit to height.
        assert_eq!(fit_within(100, 200, 100, 100), (50, 100));
        // Exact ratio: fills the box.
        assert_eq!(fit_within(16, 9, 1280, 720), (1280, 720));
    }

    #[test]
    fn test_wallpaper_target_ladder() {
        // Tiny source stays at Full HD.
        assert_eq!(wallpaper_target(100, 100), (1920, 1080));
        // Half of QHD's pixels is enough to step up.
        assert_eq!(wallpaper_target(1920, 1080), (2560, 1440));
        // 4K-sized source gets the 4K target.
        assert_eq!(wallpaper_target(3840, 2160), (3840, 2160));
    }

    #[tokio::test]
    async fn test_enhance_outputs_exact_preset_dimensions() {
        let source = png_bytes(RgbaImage::from_pixel(64, 48, Rgba([10, 20, 30, 255])));

        let result = enhance_quality(source, 1280, 720).await.expect("enhance");
        let decoded = image::load_from_memory(&result).expect("decode result");

        assert_eq!(decoded.width(), 1280);
        assert_eq!(decoded.height(), 720);
        assert_eq!(
            image::guess_format(&result).expect("format"),
            ImageFormat::Png
        );
    }

    #[tokio::test]
    async fn test_enhance_flattens_transparency_onto_white() {
        // Fully transparent source: result must be the white background,
        // padded region excepted (it is black by construction).
        let source = png_bytes(RgbaImage::from_pixel(32, 18, Rgba([255, 0, 0, 0])));

        let result = enhance_quality(source, 64, 36).await.expect("enhance");
        let decoded = image::load_from_memory(&result).expect("decode result").to_rgb8();

        assert_eq!(decoded.get_pixel(32, 18), &Rgb([255, 255, 255]));
    }

    #[tokio::test]
    async fn test_wallpaper_crops_to_sixteen_nine() {
        let source = png_bytes(RgbaImage::from_pixel(100, 100, Rgba([0, 128, 255, 255])));

        let result = to_wallpaper(source).await.expect("wallpaper");
        let decoded = image::load_from_memory(&result).expect("decode result");

        assert_eq!(decoded.width(), 1920);
        assert_eq!(decoded.height(), 1080);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected() {
        let result = enhance_quality(Bytes::from_static(b"not an image"), 1280, 720).await;
        assert!(matches!(result, Err(ImagingError::Image(_))));
    }
}
