//! Decode, resize, and encode fetched images into cache artifacts.
//!
//! PNG sources keep their format; everything else is flattened to RGB and
//! encoded as JPEG. The artifact is written to a temp file and renamed into
//! place, so a failure at any point leaves no partial artifact behind.

use image::{DynamicImage, ImageFormat};
use pixmirror_core::{ArtifactKind, Error};
use std::fs;
use std::path::Path;

/// Resize bounds for cached artifacts.
#[derive(Debug, Clone, Copy)]
pub struct ResizeLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ResizeLimits {
    fn default() -> Self {
        Self { max_width: 640, max_height: 480 }
    }
}

/// Decode `bytes`, constrain to `limits`, and write the artifact at `dest`.
///
/// Blocking: decode and encode are CPU-bound. Callers on an async runtime
/// should run this on a blocking worker thread.
pub fn write_artifact(bytes: &[u8], dest: &Path, kind: ArtifactKind, limits: ResizeLimits) -> Result<(), Error> {
    let img = image::load_from_memory(bytes).map_err(|e| Error::ImageDecode(e.to_string()))?;
    let img = constrain(img, limits);

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = dest.with_extension("part");
    let encoded = match kind {
        ArtifactKind::Png => img.save_with_format(&tmp, ImageFormat::Png),
        // JPEG has no alpha channel; flatten first.
        ArtifactKind::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()).save_with_format(&tmp, ImageFormat::Jpeg),
    };

    if let Err(e) = encoded {
        let _ = fs::remove_file(&tmp);
        return Err(Error::ImageEncode(e.to_string()));
    }

    fs::rename(&tmp, dest)?;
    Ok(())
}

/// Downscale to fit within the bounds, preserving aspect ratio. Images
/// already within bounds pass through untouched; nothing is ever upscaled.
fn constrain(img: DynamicImage, limits: ResizeLimits) -> DynamicImage {
    if img.width() > limits.max_width || img.height() > limits.max_height {
        img.thumbnail(limits.max_width, limits.max_height)
    } else {
        img
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([10, 120, 200, 255]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn test_oversized_image_is_downscaled() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("img_cache_test.jpg");

        let bytes = png_bytes(1280, 960);
        write_artifact(&bytes, &dest, ArtifactKind::Jpeg, ResizeLimits::default()).unwrap();

        let written = image::open(&dest).unwrap();
        assert!(written.width() <= 640);
        assert!(written.height() <= 480);
    }

    #[test]
    fn test_small_image_keeps_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("img_cache_test.png");

        let bytes = png_bytes(320, 240);
        write_artifact(&bytes, &dest, ArtifactKind::Png, ResizeLimits::default()).unwrap();

        let written = image::open(&dest).unwrap();
        assert_eq!(written.width(), 320);
        assert_eq!(written.height(), 240);
    }

    #[test]
    fn test_aspect_ratio_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("img_cache_test.png");

        let bytes = png_bytes(2000, 1000);
        write_artifact(&bytes, &dest, ArtifactKind::Png, ResizeLimits::default()).unwrap();

        let written = image::open(&dest).unwrap();
        assert_eq!(written.width(), 640);
        assert_eq!(written.height(), 320);
    }

    #[test]
    fn test_png_stays_png_jpeg_gets_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = png_bytes(100, 100);

        let png_dest = dir.path().join("img_cache_a.png");
        write_artifact(&bytes, &png_dest, ArtifactKind::Png, ResizeLimits::default()).unwrap();
        let written = std::fs::read(&png_dest).unwrap();
        assert_eq!(image::guess_format(&written).unwrap(), ImageFormat::Png);

        let jpg_dest = dir.path().join("img_cache_b.jpg");
        write_artifact(&bytes, &jpg_dest, ArtifactKind::Jpeg, ResizeLimits::default()).unwrap();
        let written = std::fs::read(&jpg_dest).unwrap();
        assert_eq!(image::guess_format(&written).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_garbage_bytes_leave_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("img_cache_test.jpg");

        let result = write_artifact(b"not an image at all", &dest, ArtifactKind::Jpeg, ResizeLimits::default());
        assert!(matches!(result, Err(Error::ImageDecode(_))));
        assert!(!dest.exists());
        assert!(!dest.with_extension("part").exists());
    }

    #[test]
    fn test_creates_missing_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("img_cache_test.png");

        write_artifact(&png_bytes(10, 10), &dest, ArtifactKind::Png, ResizeLimits::default()).unwrap();
        assert!(dest.exists());
    }
}
