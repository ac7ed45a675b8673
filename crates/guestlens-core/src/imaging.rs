//! Image loading: decoding, EXIF orientation and size normalisation.
//!
//! Phone photos often store rotation in EXIF instead of rotating the pixels.
//! Detection runs on upright images, so orientation is applied before anything else.

use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbImage};
use std::path::Path;
use thiserror::Error;

/// Longest side an image is reduced to before detection.
pub const DEFAULT_MAX_SIDE: u32 = 1024;

/// File extensions accepted for photos and selfies (lowercase).
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Error, Debug)]
pub enum ImageLoadError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Load an image as upright RGB, shrinking it so the longest side is at most `max_side`.
pub fn load_image(path: &Path, max_side: u32) -> Result<RgbImage, ImageLoadError> {
    let display = path.display().to_string();
    let io_err = |source| ImageLoadError::Io { path: display.clone(), source };
    let decode_err = |source| ImageLoadError::Decode { path: display.clone(), source };

    let mut decoder = ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?
        .into_decoder()
        .map_err(decode_err)?;

    // Missing or malformed EXIF is not fatal: keep the pixels as stored.
    let orientation = decoder.orientation().ok();
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    if let Some(orientation) = orientation {
        image.apply_orientation(orientation);
    }

    Ok(downscale(image, max_side).into_rgb8())
}

/// Target dimensions after fitting `(width, height)` into a `max_side` square.
///
/// Returns the input unchanged when it already fits.
pub fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    if width.max(height) <= max_side || max_side == 0 {
        return (width, height);
    }
    if width > height {
        let new_height = (u64::from(height) * u64::from(max_side) / u64::from(width)) as u32;
        (max_side, new_height.max(1))
    } else {
        let new_width = (u64::from(width) * u64::from(max_side) / u64::from(height)) as u32;
        (new_width.max(1), max_side)
    }
}

fn downscale(image: DynamicImage, max_side: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let (new_width, new_height) = fit_within(width, height, max_side);
    if (new_width, new_height) == (width, height) {
        return image;
    }
    tracing::debug!(width, height, new_width, new_height, "downscaling image");
    image.resize_exact(new_width, new_height, FilterType::Triangle)
}

/// Whether a filename carries one of the [`ALLOWED_EXTENSIONS`].
pub fn is_allowed_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Identify the image format from content, accepting only PNG, JPEG and GIF.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif)) => Some(format),
        _ => None,
    }
}
