//! In-place image normalization to the canonical resolution.
//!
//! Gallery files are rewritten in place, so a gallery that
//! has been scanned once holds only canonical-size images and later scans
//! skip the resize.

use crate::types::CanonicalSize;
use image::imageops::FilterType;
use image::ImageReader;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unrecognized image format: {0}")]
    UnknownFormat(PathBuf),
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("cannot encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// What `normalize` did to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Dimensions already matched; the file was not touched.
    AlreadyCanonical,
    /// The file was resized and overwritten.
    Resized { from: (u32, u32) },
}

/// Bring the image at `path` to `size`, overwriting it in its decoded format.
///
/// The format is guessed from the file content, not the extension. An image
/// already at `size` is left byte-for-byte unchanged.
pub fn normalize(path: &Path, size: CanonicalSize) -> Result<NormalizeOutcome, NormalizeError> {
    let io_err = |source| NormalizeError::Io {
        path: path.to_path_buf(),
        source,
    };

    let reader = ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?;
    let format = reader
        .format()
        .ok_or_else(|| NormalizeError::UnknownFormat(path.to_path_buf()))?;
    let img = reader.decode().map_err(|source| NormalizeError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let (width, height) = (img.width(), img.height());
    if size.matches(width, height) {
        return Ok(NormalizeOutcome::AlreadyCanonical);
    }

    let resized = img.resize_exact(size.width, size.height, FilterType::Triangle);

    // Encode fully before touching the file so a failed encode leaves it intact.
    let mut encoded = Cursor::new(Vec::new());
    resized
        .write_to(&mut encoded, format)
        .map_err(|source| NormalizeError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    std::fs::write(path, encoded.into_inner()).map_err(io_err)?;

    tracing::debug!(
        path = %path.display(),
        from_width = width,
        from_height = height,
        to_width = size.width,
        to_height = size.height,
        ?format,
        "image resized in place"
    );

    Ok(NormalizeOutcome::Resized {
        from: (width, height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([120, 80, 40]))
            .save_with_format(path, ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn test_resizes_to_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        write_png(&path, 64, 48);

        let outcome = normalize(&path, CanonicalSize::default()).unwrap();
        assert_eq!(outcome, NormalizeOutcome::Resized { from: (64, 48) });

        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (224, 224));
    }

    #[test]
    fn test_already_canonical_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("square.png");
        write_png(&path, 224, 224);
        let before = std::fs::read(&path).unwrap();

        assert_eq!(
            normalize(&path, CanonicalSize::default()).unwrap(),
            NormalizeOutcome::AlreadyCanonical
        );
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_second_pass_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tall.png");
        write_png(&path, 30, 90);

        normalize(&path, CanonicalSize::default()).unwrap();
        let first = std::fs::read(&path).unwrap();
        let outcome = normalize(&path, CanonicalSize::default()).unwrap();
        assert_eq!(outcome, NormalizeOutcome::AlreadyCanonical);
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_format_follows_content_not_extension() {
        let dir = tempfile::tempdir().unwrap();
        // PNG bytes behind a .jpg name
        let path = dir.path().join("mislabelled.jpg");
        let mut buf = Cursor::new(Vec::new());
        RgbImage::from_pixel(10, 10, Rgb([1, 2, 3]))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, buf.into_inner()).unwrap();

        normalize(&path, CanonicalSize::square(32)).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_jpeg_stays_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        RgbImage::from_pixel(50, 40, Rgb([200, 10, 10]))
            .save_with_format(&path, ImageFormat::Jpeg)
            .unwrap();

        normalize(&path, CanonicalSize::default()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_corrupt_file_is_reported_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();

        let err = normalize(&path, CanonicalSize::default()).unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::UnknownFormat(_) | NormalizeError::Decode { .. }
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"definitely not an image");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = normalize(&dir.path().join("nope.png"), CanonicalSize::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::Io { .. }));
    }
}
