//! Sketch bitmaps, model-ready images, and their loading and saving.

mod load;
mod save;

pub use load::{decode_data_uri, load_image, load_sketch};
pub use save::{compose_panel, save_image, tensor_to_image, to_data_uri};

use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::{Array3, Array4};

use crate::error::{Error, Result};

/// Image tensor in NCHW format (batch, channels, height, width).
/// Values are normalized to [-1, 1] range for diffusion model compatibility.
pub type ImageTensor = Array4<f32>;

/// Standard image size for Stable Diffusion 1.5.
pub const SD_IMAGE_SIZE: u32 = 512;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;

/// Side length of the drawing canvas the sketches come from.
pub const CANVAS_SIZE: u32 = 400;

/// A raw sketch capture: `height x width x channels` bytes.
///
/// Channels are 1 (gray), 3 (RGB) or 4 (RGBA). Both spatial dimensions are
/// non-zero. The shape is checked once, on construction, so every function
/// taking a `Bitmap` can rely on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pixels: Array3<u8>,
}

impl Bitmap {
    /// Wrap a `height x width x channels` array.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidShape`] for an empty array or an unsupported
    /// channel count.
    pub fn new(pixels: Array3<u8>) -> Result<Self> {
        let (height, width, channels) = pixels.dim();
        let reason = if height == 0 || width == 0 {
            Some("bitmap is empty")
        } else if !matches!(channels, 1 | 3 | 4) {
            Some("expected 1, 3 or 4 channels")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(Error::InvalidShape {
                height,
                width,
                channels,
                reason: reason.to_string(),
            });
        }

        Ok(Self { pixels })
    }

    /// Convert a decoded image, keeping gray images single-channel and
    /// keeping alpha only when the source has it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidShape`] if the image has zero area.
    pub fn from_image(img: &DynamicImage) -> Result<Self> {
        let (width, height) = (img.width() as usize, img.height() as usize);

        let pixels = match img {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
                let gray = img.to_luma8();
                Array3::from_shape_fn((height, width, 1), |(y, x, _)| {
                    gray.get_pixel(x as u32, y as u32)[0]
                })
            }
            _ if img.color().has_alpha() => {
                let rgba = img.to_rgba8();
                Array3::from_shape_fn((height, width, 4), |(y, x, c)| {
                    rgba.get_pixel(x as u32, y as u32)[c]
                })
            }
            _ => {
                let rgb = img.to_rgb8();
                Array3::from_shape_fn((height, width, RGB_CHANNELS), |(y, x, c)| {
                    rgb.get_pixel(x as u32, y as u32)[c]
                })
            }
        };

        Self::new(pixels)
    }

    /// Single-channel bitmap from a gray image with non-zero area.
    pub(crate) fn from_gray(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let pixels = Array3::from_shape_fn((height as usize, width as usize, 1), |(y, x, _)| {
            gray.get_pixel(x as u32, y as u32)[0]
        });
        Self { pixels }
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    /// Number of channels (1, 3 or 4).
    #[must_use]
    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }

    /// The underlying `height x width x channels` array.
    #[must_use]
    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// RGB value of one pixel. Gray is replicated, RGBA is composited over
    /// white so transparent canvas regions read as blank paper.
    #[must_use]
    pub fn rgb_at(&self, y: usize, x: usize) -> [u8; 3] {
        let p = &self.pixels;
        match self.channels() {
            1 => [p[[y, x, 0]]; 3],
            3 => [p[[y, x, 0]], p[[y, x, 1]], p[[y, x, 2]]],
            _ => {
                let alpha = p[[y, x, 3]];
                [
                    over_white(p[[y, x, 0]], alpha),
                    over_white(p[[y, x, 1]], alpha),
                    over_white(p[[y, x, 2]], alpha),
                ]
            }
        }
    }

    /// The bitmap as an 8-bit RGB image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_rgb_image(&self) -> RgbImage {
        // Safe: dimensions originate from u32 image sizes or checked arrays
        RgbImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
            image::Rgb(self.rgb_at(y as usize, x as usize))
        })
    }
}

/// Composite one channel over a white background.
#[inline]
#[allow(clippy::cast_possible_truncation)]
fn over_white(value: u8, alpha: u8) -> u8 {
    let (v, a) = (u32::from(value), u32::from(alpha));
    // Safe: weighted mean of two bytes stays within u8
    ((v * a + 255 * (255 - a) + 127) / 255) as u8
}

/// The formatter's output: a `512 x 512 x 3` float image in [0.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyImage {
    data: Array3<f32>,
}

impl ReadyImage {
    /// Normalize an RGB image already resized to the model resolution.
    pub(crate) fn from_rgb8(img: &RgbImage) -> Self {
        debug_assert_eq!(img.dimensions(), (SD_IMAGE_SIZE, SD_IMAGE_SIZE));
        let size = SD_IMAGE_SIZE as usize;
        let data = Array3::from_shape_fn((size, size, RGB_CHANNELS), |(y, x, c)| {
            f32::from(img.get_pixel(x as u32, y as u32)[c]) / 255.0
        });
        Self { data }
    }

    /// The `height x width x channels` float array.
    #[must_use]
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Shape as `(height, width, channels)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Back to 8-bit RGB, scaling by 255.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(SD_IMAGE_SIZE, SD_IMAGE_SIZE, |x, y| {
            let (x, y) = (x as usize, y as usize);
            // Safe: clamped to [0, 255] before casting
            image::Rgb(std::array::from_fn(|c| {
                (self.data[[y, x, c]] * 255.0).round().clamp(0.0, 255.0) as u8
            }))
        })
    }

    /// NCHW tensor `(1, 3, 512, 512)` in [-1, 1] for the VAE encoder.
    #[must_use]
    pub fn to_tensor(&self) -> ImageTensor {
        let size = SD_IMAGE_SIZE as usize;
        Array4::from_shape_fn((1, RGB_CHANNELS, size, size), |(_, c, y, x)| {
            self.data[[y, x, c]].mul_add(2.0, -1.0)
        })
    }
}
