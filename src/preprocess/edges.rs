//! Edge extraction from freehand sketches.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::separable_filter_equal;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use imageproc::morphology::dilate;

use crate::error::{Error, Result};
use crate::image::Bitmap;

/// 5-tap binomial approximation of a Gaussian, `[1, 4, 6, 4, 1] / 16`.
const BLUR_TAPS: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];

/// tan(22.5 degrees), the boundary between gradient direction sectors.
const TAN_22_5: f32 = 0.414_213_57;

/// Intensity of an "on" edge pixel.
pub const EDGE_ON: u8 = 255;

/// Canny hysteresis thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeParams {
    /// Gradients below this are never edges.
    pub low_threshold: f32,
    /// Gradients above this are always edges.
    pub high_threshold: f32,
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self {
            low_threshold: 50.0,
            high_threshold: 150.0,
        }
    }
}

impl EdgeParams {
    /// Validate the thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if a threshold is negative or not finite, or if the
    /// low threshold exceeds the high one.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("low_threshold", self.low_threshold),
            ("high_threshold", self.high_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::invalid_parameter(name, "must be a finite value >= 0"));
            }
        }

        if self.low_threshold > self.high_threshold {
            return Err(Error::invalid_parameter(
                "low_threshold",
                "must not exceed high_threshold",
            ));
        }

        Ok(())
    }
}

/// Binary edge map: 0 for background, [`EDGE_ON`] for edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMap(GrayImage);

impl EdgeMap {
    /// The edge map as a gray image.
    #[must_use]
    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    /// Consume into the underlying gray image.
    #[must_use]
    pub fn into_image(self) -> GrayImage {
        self.0
    }

    /// `(width, height)` in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    /// Number of edge pixels.
    #[must_use]
    pub fn on_pixels(&self) -> usize {
        count_on(&self.0)
    }

    /// True when no edge was found, e.g. for a blank canvas.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.on_pixels() == 0
    }

    /// Single-channel bitmap, ready for [`format_for_model`](super::format_for_model).
    #[must_use]
    pub fn to_bitmap(&self) -> Bitmap {
        Bitmap::from_gray(&self.0)
    }
}

/// Extract a binary edge map using the default thresholds (50, 150).
#[must_use]
pub fn extract_edges(bitmap: &Bitmap) -> EdgeMap {
    extract_edges_with(bitmap, &EdgeParams::default())
}

/// Extract a binary edge map: grayscale, 5x5 blur, Canny, 3x3 dilation.
///
/// Thresholds given out of order are swapped rather than rejected.
#[must_use]
pub fn extract_edges_with(bitmap: &Bitmap, params: &EdgeParams) -> EdgeMap {
    let gray = to_grayscale(bitmap);
    let blurred = gaussian_smooth(&gray);
    let edges = detect_edges(&blurred, params.low_threshold, params.high_threshold);
    EdgeMap(dilate_edges(&edges))
}

/// Convert a bitmap to single-channel luminance.
///
/// Uses the standard luminosity formula `0.299*R + 0.587*G + 0.114*B`.
/// Gray input is copied unchanged.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_grayscale(bitmap: &Bitmap) -> GrayImage {
    let pixels = bitmap.pixels();
    // Safe: bitmap dimensions come from u32 image sizes
    GrayImage::from_fn(bitmap.width() as u32, bitmap.height() as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if bitmap.channels() == 1 {
            return Luma([pixels[[y, x, 0]]]);
        }

        let [r, g, b] = bitmap.rgb_at(y, x).map(f32::from);
        // Safe: clamped to [0, 255] before casting
        let luma = 0.299_f32
            .mul_add(r, 0.587_f32.mul_add(g, 0.114 * b))
            .round()
            .clamp(0.0, 255.0) as u8;
        Luma([luma])
    })
}

/// Smooth with a 5x5 Gaussian (binomial taps, clamped borders).
#[must_use]
pub fn gaussian_smooth(gray: &GrayImage) -> GrayImage {
    separable_filter_equal(gray, &BLUR_TAPS)
}

/// Two-threshold (hysteresis) Canny edge detection.
///
/// Gradients are taken on `gray` as given, with no smoothing of its own, so
/// callers choose the blur. Thresholds apply to the L1 Sobel magnitude
/// `|gx| + |gy|`; if `low_threshold > high_threshold` they are swapped.
#[must_use]
pub fn detect_edges(gray: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let (low, high) = if low_threshold <= high_threshold {
        (low_threshold, high_threshold)
    } else {
        (high_threshold, low_threshold)
    };

    let thinned = non_maximum_suppression(gray);
    hysteresis(&thinned, low, high)
}

/// Sobel magnitude, zeroed wherever a pixel is not the peak along its
/// gradient direction.
fn non_maximum_suppression(gray: &GrayImage) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);
    let (width, height) = gray.dimensions();

    let magnitude = ImageBuffer::from_fn(width, height, |x, y| {
        let (dx, dy) = (gx.get_pixel(x, y)[0], gy.get_pixel(x, y)[0]);
        Luma([f32::from(dx).abs() + f32::from(dy).abs()])
    });

    let at = |x: i64, y: i64| -> f32 {
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(x), Ok(y)) if x < width && y < height => magnitude.get_pixel(x, y)[0],
            _ => 0.0,
        }
    };

    ImageBuffer::from_fn(width, height, |x, y| {
        let mag = magnitude.get_pixel(x, y)[0];
        if mag <= 0.0 {
            return Luma([0.0]);
        }

        let dx = f32::from(gx.get_pixel(x, y)[0]);
        let dy = f32::from(gy.get_pixel(x, y)[0]);
        let (ax, ay) = (dx.abs(), dy.abs());

        // Neighbour offset along the gradient; y grows downward
        let (ox, oy) = if ay <= TAN_22_5 * ax {
            (1, 0)
        } else if ax <= TAN_22_5 * ay {
            (0, 1)
        } else if (dx > 0.0) == (dy > 0.0) {
            (1, 1)
        } else {
            (1, -1)
        };

        let (x, y) = (i64::from(x), i64::from(y));
        // Strict on one side only, so flat ridges keep a single pixel
        if mag > at(x - ox, y - oy) && mag >= at(x + ox, y + oy) {
            Luma([mag])
        } else {
            Luma([0.0])
        }
    })
}

/// Keep pixels above `high`, plus pixels above `low` 8-connected to them.
fn hysteresis(thinned: &ImageBuffer<Luma<f32>, Vec<f32>>, low: f32, high: f32) -> GrayImage {
    let (width, height) = thinned.dimensions();
    let mut edges = GrayImage::new(width, height);
    let mut stack = Vec::new();

    for (x, y, p) in thinned.enumerate_pixels() {
        if p[0] <= high || edges.get_pixel(x, y)[0] == EDGE_ON {
            continue;
        }

        edges.put_pixel(x, y, Luma([EDGE_ON]));
        stack.push((x, y));

        while let Some((cx, cy)) = stack.pop() {
            for ny in cy.saturating_sub(1)..=(cy + 1).min(height - 1) {
                for nx in cx.saturating_sub(1)..=(cx + 1).min(width - 1) {
                    if thinned.get_pixel(nx, ny)[0] > low && edges.get_pixel(nx, ny)[0] == 0 {
                        edges.put_pixel(nx, ny, Luma([EDGE_ON]));
                        stack.push((nx, ny));
                    }
                }
            }
        }
    }

    edges
}

/// One pass of dilation with a 3x3 all-ones structuring element.
#[must_use]
pub fn dilate_edges(edges: &GrayImage) -> GrayImage {
    // A chessboard (L-inf) radius of 1 is exactly the 3x3 square
    dilate(edges, Norm::LInf, 1)
}

fn count_on(img: &GrayImage) -> usize {
    img.pixels().filter(|p| p[0] != 0).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::CANVAS_SIZE;
    use ndarray::Array3;

    fn white_canvas() -> Bitmap {
        let size = CANVAS_SIZE as usize;
        Bitmap::new(Array3::from_elem((size, size, 3), 255)).unwrap()
    }

    /// White canvas with a horizontal stroke of the given gray value.
    fn stroke_canvas(value: u8, thickness: usize) -> Bitmap {
        let size = CANVAS_SIZE as usize;
        let mut pixels = Array3::from_elem((size, size, 3), 255u8);
        for y in 200..200 + thickness {
            for x in 50..350 {
                for c in 0..3 {
                    pixels[[y, x, c]] = value;
                }
            }
        }
        Bitmap::new(pixels).unwrap()
    }

    /// White canvas with a black horizontal stroke, 3 px thick.
    fn line_canvas() -> Bitmap {
        stroke_canvas(0, 3)
    }

    fn is_binary(img: &GrayImage) -> bool {
        img.pixels().all(|p| p[0] == 0 || p[0] == EDGE_ON)
    }

    #[test]
    fn test_blank_canvas_has_no_edges() {
        let edges = extract_edges(&white_canvas());
        assert_eq!(edges.dimensions(), (CANVAS_SIZE, CANVAS_SIZE));
        assert!(edges.is_empty());
    }

    #[test]
    fn test_line_produces_binary_edges() {
        let edges = extract_edges(&line_canvas());
        assert_eq!(edges.dimensions(), (CANVAS_SIZE, CANVAS_SIZE));
        assert!(!edges.is_empty());
        assert!(is_binary(edges.as_image()));
    }

    #[test]
    fn test_thin_stroke_produces_edges() {
        let edges = extract_edges(&stroke_canvas(0, 1));
        assert!(!edges.is_empty());
        assert!(is_binary(edges.as_image()));

        // Edges hug the stroke rather than drifting away from it
        let far = edges
            .as_image()
            .enumerate_pixels()
            .filter(|(_, y, p)| p[0] == EDGE_ON && y.abs_diff(200) > 4)
            .count();
        assert_eq!(far, 0);
    }

    #[test]
    fn test_mid_gray_thin_stroke_produces_edges() {
        // Gradient peaks near 160 after smoothing, just above the high threshold
        assert!(!extract_edges(&stroke_canvas(128, 1)).is_empty());
    }

    #[test]
    fn test_faint_stroke_below_thresholds_is_ignored() {
        assert!(extract_edges(&stroke_canvas(240, 1)).is_empty());
    }

    #[test]
    fn test_edges_are_thinned_before_dilation() {
        let gray = to_grayscale(&stroke_canvas(0, 1));
        let raw = detect_edges(&gaussian_smooth(&gray), 50.0, 150.0);

        // One edge row on each side of the stroke
        let column: Vec<u32> = (0..CANVAS_SIZE)
            .filter(|&y| raw.get_pixel(200, y)[0] == EDGE_ON)
            .collect();
        assert_eq!(column, vec![199, 201]);
    }

    #[test]
    fn test_swapped_thresholds_do_not_panic() {
        let gray = gaussian_smooth(&to_grayscale(&line_canvas()));
        assert_eq!(
            detect_edges(&gray, 150.0, 50.0),
            detect_edges(&gray, 50.0, 150.0)
        );

        let params = EdgeParams {
            low_threshold: 200.0,
            high_threshold: 100.0,
        };
        assert!(!extract_edges_with(&line_canvas(), &params).is_empty());
    }

    #[test]
    fn test_dilation_grows_line_edges() {
        let gray = to_grayscale(&line_canvas());
        let raw = detect_edges(&gaussian_smooth(&gray), 50.0, 150.0);
        let dilated = dilate_edges(&raw);

        assert!(count_on(&raw) > 0);
        assert!(count_on(&dilated) > count_on(&raw));
    }

    #[test]
    fn test_dilation_is_monotonic() {
        let mut edges = GrayImage::new(20, 20);
        for (x, y) in [(0, 0), (5, 5), (6, 5), (19, 19), (10, 3)] {
            edges.put_pixel(x, y, Luma([EDGE_ON]));
        }
        let dilated = dilate_edges(&edges);

        for (x, y, p) in edges.enumerate_pixels() {
            if p[0] == EDGE_ON {
                assert_eq!(dilated.get_pixel(x, y)[0], EDGE_ON);
            }
        }
        assert!(is_binary(&dilated));
    }

    #[test]
    fn test_dilation_uses_3x3_square() {
        let mut edges = GrayImage::new(9, 9);
        edges.put_pixel(4, 4, Luma([EDGE_ON]));
        let dilated = dilate_edges(&edges);

        assert_eq!(count_on(&dilated), 9);
        assert_eq!(dilated.get_pixel(3, 3)[0], EDGE_ON);
        assert_eq!(dilated.get_pixel(5, 5)[0], EDGE_ON);
        assert_eq!(dilated.get_pixel(2, 4)[0], 0);
    }

    #[test]
    fn test_grayscale_weights() {
        let mut pixels = Array3::zeros((1, 3, 3));
        pixels[[0, 0, 0]] = 255;
        pixels[[0, 1, 1]] = 255;
        pixels[[0, 2, 2]] = 255;
        let gray = to_grayscale(&Bitmap::new(pixels).unwrap());

        assert_eq!(gray.get_pixel(0, 0)[0], 76);
        assert_eq!(gray.get_pixel(1, 0)[0], 150);
        assert_eq!(gray.get_pixel(2, 0)[0], 29);
    }

    #[test]
    fn test_grayscale_passes_single_channel_through() {
        let pixels = Array3::from_shape_fn((2, 2, 1), |(y, x, _)| (y * 2 + x) as u8 * 10);
        let gray = to_grayscale(&Bitmap::new(pixels).unwrap());
        assert_eq!(gray.get_pixel(1, 1)[0], 30);
    }

    #[test]
    fn test_transparent_canvas_has_no_edges() {
        let size = CANVAS_SIZE as usize;
        let bitmap = Bitmap::new(Array3::zeros((size, size, 4))).unwrap();
        assert!(extract_edges(&bitmap).is_empty());
    }

    #[test]
    fn test_blur_taps_are_normalized_binomial() {
        assert!((BLUR_TAPS.iter().sum::<f32>() - 1.0).abs() < f32::EPSILON);
        assert_eq!(BLUR_TAPS.map(|t| t * 16.0), [1.0, 4.0, 6.0, 4.0, 1.0]);
    }

    #[test]
    fn test_smoothing_keeps_uniform_image_uniform() {
        let gray = GrayImage::from_pixel(12, 12, Luma([200]));
        let blurred = gaussian_smooth(&gray);

        assert!(blurred.pixels().all(|p| p[0].abs_diff(200) <= 1));
        assert!(detect_edges(&blurred, 50.0, 150.0).pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_smoothing_spreads_a_single_pixel() {
        let mut gray = GrayImage::new(9, 9);
        gray.put_pixel(4, 4, Luma([255]));
        let blurred = gaussian_smooth(&gray);

        // Center keeps (6/16)^2 of the energy; the 5x5 footprint is the limit
        assert!((34..=37).contains(&blurred.get_pixel(4, 4)[0]));
        assert!(blurred.get_pixel(2, 2)[0] <= 1);
        assert_eq!(blurred.get_pixel(1, 4)[0], 0);
    }

    #[test]
    fn test_params_validation() {
        assert!(EdgeParams::default().validate().is_ok());
        assert!(EdgeParams {
            low_threshold: 200.0,
            high_threshold: 100.0
        }
        .validate()
        .is_err());
        assert!(EdgeParams {
            low_threshold: f32::NAN,
            high_threshold: 100.0
        }
        .validate()
        .is_err());
    }
}
