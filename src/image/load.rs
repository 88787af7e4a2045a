//! Sketch loading from files and `data:` URIs.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use crate::error::{Error, Result};

use super::Bitmap;

/// Load a sketch given either a filesystem path or a `data:` URI.
///
/// Browser canvases export their content as `data:image/png;base64,...`,
/// so anything starting with `data:` is decoded inline.
///
/// # Errors
///
/// Returns an error if the file or URI cannot be decoded into a bitmap.
pub fn load_sketch(source: &str) -> Result<Bitmap> {
    if source.starts_with("data:") {
        decode_data_uri(source)
    } else {
        load_image(source)
    }
}

/// Load an image file from disk as a [`Bitmap`].
///
/// # Errors
///
/// Returns an error if the image cannot be loaded or has zero area.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Bitmap> {
    let path = path.as_ref();

    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(
        "Loaded {} ({}x{}, {:?})",
        path.display(),
        img.width(),
        img.height(),
        img.color()
    );

    Bitmap::from_image(&img)
}

/// Decode a base64 `data:image/...` URI into a [`Bitmap`].
///
/// # Errors
///
/// Returns [`Error::DataUri`] when the URI is not a base64 image URI and
/// [`Error::ImageDecode`] when the payload is not a readable image.
pub fn decode_data_uri(uri: &str) -> Result<Bitmap> {
    let rest = uri.strip_prefix("data:").ok_or_else(|| malformed("missing `data:` scheme"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| malformed("missing `,` before payload"))?;

    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| malformed("only base64 payloads are supported"))?;
    if !mime.starts_with("image/") {
        return Err(malformed(&format!("expected an image MIME type, got `{mime}`")));
    }

    let bytes = B64
        .decode(payload.trim())
        .map_err(|err| malformed(&format!("invalid base64: {err}")))?;

    let img = image::load_from_memory(&bytes).map_err(|source| Error::ImageDecode { source })?;

    tracing::debug!("Decoded {mime} sketch ({}x{})", img.width(), img.height());

    Bitmap::from_image(&img)
}

fn malformed(reason: &str) -> Error {
    Error::DataUri {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::to_data_uri;
    use image::{DynamicImage, Rgba, RgbaImage};

    #[test]
    fn test_data_uri_round_trip() {
        let mut img = RgbaImage::from_pixel(6, 4, Rgba([255, 255, 255, 255]));
        img.put_pixel(2, 1, Rgba([0, 0, 0, 255]));
        let uri = to_data_uri(&DynamicImage::ImageRgba8(img)).unwrap();

        let bitmap = decode_data_uri(&uri).unwrap();
        assert_eq!((bitmap.height(), bitmap.width(), bitmap.channels()), (4, 6, 4));
        assert_eq!(bitmap.rgb_at(1, 2), [0, 0, 0]);
        assert_eq!(bitmap.rgb_at(0, 0), [255, 255, 255]);
    }

    #[test]
    fn test_data_uri_rejects_non_image() {
        let err = decode_data_uri("data:text/plain;base64,aGVsbG8=").unwrap_err();
        assert!(matches!(err, Error::DataUri { .. }));
    }

    #[test]
    fn test_data_uri_rejects_missing_payload() {
        let err = decode_data_uri("data:image/png;base64").unwrap_err();
        assert!(matches!(err, Error::DataUri { .. }));
    }

    #[test]
    fn test_data_uri_rejects_bad_base64() {
        let err = decode_data_uri("data:image/png;base64,@@@").unwrap_err();
        assert!(matches!(err, Error::DataUri { .. }));
    }

    #[test]
    fn test_data_uri_rejects_garbage_image() {
        let err = decode_data_uri("data:image/png;base64,aGVsbG8=").unwrap_err();
        assert!(matches!(err, Error::ImageDecode { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_sketch("/definitely/not/here.png").unwrap_err();
        assert!(matches!(err, Error::ImageLoad { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sketch.png");
        DynamicImage::new_luma8(9, 3).save(&path).unwrap();

        let bitmap = load_sketch(path.to_str().unwrap()).unwrap();
        assert_eq!((bitmap.height(), bitmap.width(), bitmap.channels()), (3, 9, 1));
    }
}
