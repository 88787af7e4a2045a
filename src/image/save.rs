//! Image saving utilities.

use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageBuffer, ImageFormat, Rgb, RgbImage};

use crate::error::{Error, Result};

use super::{ImageTensor, RGB_CHANNELS};

/// Horizontal gap between panel tiles, in pixels.
const PANEL_GAP: u32 = 8;

/// Save an image, the format inferred from the extension.
///
/// # Errors
///
/// Returns an error if the image cannot be saved.
pub fn save_image<P: AsRef<Path>>(img: &DynamicImage, path: P) -> Result<()> {
    let path = path.as_ref();

    img.save(path).map_err(|source| Error::ImageSave {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!("Saved {}", path.display());
    Ok(())
}

/// Encode an image as a `data:image/png;base64,...` URI.
///
/// # Errors
///
/// Returns an error if PNG encoding fails.
pub fn to_data_uri(img: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|source| Error::ImageEncode { source })?;

    Ok(format!("data:image/png;base64,{}", B64.encode(bytes)))
}

/// Lay out sketch, edge map and generated image side by side.
///
/// Every tile is scaled to `height`, keeping its aspect ratio, on a white
/// background.
#[must_use]
pub fn compose_panel(
    sketch: &RgbImage,
    edges: &GrayImage,
    generated: &RgbImage,
    height: u32,
) -> RgbImage {
    let edges = DynamicImage::ImageLuma8(edges.clone()).to_rgb8();
    let tiles: Vec<RgbImage> = [sketch, &edges, generated]
        .into_iter()
        .map(|tile| scale_to_height(tile, height))
        .collect();

    let width = tiles.iter().map(RgbImage::width).sum::<u32>() + PANEL_GAP * 2;
    let mut panel = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

    let mut x = 0i64;
    for tile in &tiles {
        image::imageops::replace(&mut panel, tile, x, 0);
        x += i64::from(tile.width() + PANEL_GAP);
    }

    panel
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn scale_to_height(img: &RgbImage, height: u32) -> RgbImage {
    if img.height() == height {
        return img.clone();
    }
    // Safe: result is at least 1 and bounded by the scaled source width
    let width = ((img.width() as f32 * height as f32 / img.height() as f32).round() as u32).max(1);
    image::imageops::resize(img, width, height, FilterType::Triangle)
}

/// Convert the first image of a normalized NCHW tensor to an RGB image.
///
/// # Errors
///
/// Returns an error unless the tensor holds at least one non-empty
/// 3-channel image.
pub fn tensor_to_image(tensor: &ImageTensor) -> Result<RgbImage> {
    let (batch, channels, height, width) = tensor.dim();
    let shape_err = || Error::ShapeMismatch {
        expected: "(1, 3, H, W) image tensor".to_string(),
        actual: format!("{:?}", tensor.shape()),
    };

    if batch == 0 || channels != RGB_CHANNELS || height == 0 || width == 0 {
        return Err(shape_err());
    }
    let (w, h) = (
        u32::try_from(width).map_err(|_| shape_err())?,
        u32::try_from(height).map_err(|_| shape_err())?,
    );

    Ok(ImageBuffer::from_fn(w, h, |x, y| {
        let (x, y) = (x as usize, y as usize);
        // Denormalize from [-1, 1] to [0, 255]
        Rgb([0, 1, 2].map(|c| denormalize(tensor[[0, c, y, x]])))
    }))
}

/// Denormalize a value from [-1, 1] to [0, 255] with clamping.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn denormalize(value: f32) -> u8 {
    // Safe: clamped to [0, 255] range before casting
    let scaled = (value + 1.0) * 127.5;
    scaled.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::SD_IMAGE_SIZE;
    use image::GenericImageView;
    use ndarray::Array4;

    #[test]
    fn test_denormalize() {
        assert_eq!(denormalize(-1.0), 0);
        assert_eq!(denormalize(0.0), 127);
        assert_eq!(denormalize(1.0), 255);
    }

    #[test]
    fn test_denormalize_clamp() {
        assert_eq!(denormalize(-2.0), 0);
        assert_eq!(denormalize(2.0), 255);
    }

    #[test]
    fn test_tensor_to_image_size() {
        let size = SD_IMAGE_SIZE as usize;
        let img = tensor_to_image(&Array4::from_elem((1, 3, size, size), 1.0)).unwrap();
        assert_eq!(img.dimensions(), (SD_IMAGE_SIZE, SD_IMAGE_SIZE));
        assert_eq!(img.get_pixel(100, 200), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_tensor_to_image_reads_channels() {
        let mut tensor = Array4::from_elem((1, 3, 4, 6), -1.0f32);
        tensor[[0, 0, 1, 5]] = 1.0;
        tensor[[0, 2, 1, 5]] = 0.0;

        let img = tensor_to_image(&tensor).unwrap();
        assert_eq!(img.dimensions(), (6, 4));
        assert_eq!(img.get_pixel(5, 1), &Rgb([255, 0, 127]));
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_tensor_to_image_rejects_bad_shapes() {
        for shape in [(1, 4, 64, 64), (0, 3, 8, 8), (1, 3, 0, 8), (1, 1, 8, 8)] {
            let err = tensor_to_image(&Array4::zeros(shape)).unwrap_err();
            assert!(matches!(err, Error::ShapeMismatch { .. }), "{shape:?}");
        }
    }

    #[test]
    fn test_panel_layout() {
        let sketch = RgbImage::new(400, 400);
        let edges = GrayImage::new(400, 400);
        let generated = RgbImage::new(512, 512);

        let panel = compose_panel(&sketch, &edges, &generated, 400);
        assert_eq!(panel.dimensions(), (400 * 3 + PANEL_GAP * 2, 400));
        // Gap after the first tile stays white
        assert_eq!(panel.get_pixel(400, 10), &Rgb([255, 255, 255]));
        assert_eq!(panel.get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let img = DynamicImage::new_rgba8(16, 16);

        let png = dir.path().join("out.png");
        save_image(&img, &png).unwrap();
        assert_eq!(image::open(&png).unwrap().dimensions(), (16, 16));
    }

    #[test]
    fn test_save_failure_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.png");

        let err = save_image(&DynamicImage::new_rgb8(4, 4), &path).unwrap_err();
        assert!(matches!(err, Error::ImageSave { path: p, .. } if p == path));
    }
}
