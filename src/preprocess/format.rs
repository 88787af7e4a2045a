//! Conversion of edge maps into diffusion model input.

use image::imageops::{self, FilterType};

use crate::image::{Bitmap, ReadyImage, SD_IMAGE_SIZE};

/// Format a bitmap (usually an edge map) as a `512 x 512 x 3` image in [0, 1].
///
/// Gray input is replicated into three identical channels, then the image is
/// resampled bilinearly to the model resolution and divided by 255.
#[must_use]
pub fn format_for_model(bitmap: &Bitmap) -> ReadyImage {
    let rgb = bitmap.to_rgb_image();

    let resized = if rgb.dimensions() == (SD_IMAGE_SIZE, SD_IMAGE_SIZE) {
        rgb
    } else {
        imageops::resize(&rgb, SD_IMAGE_SIZE, SD_IMAGE_SIZE, FilterType::Triangle)
    };

    ReadyImage::from_rgb8(&resized)
}
