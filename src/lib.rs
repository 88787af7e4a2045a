//! # sketch2img
//!
//! Turn freehand sketches into images.
//!
//! A sketch is reduced to a binary edge map (grayscale, 5x5 Gaussian blur,
//! Canny edge detection, 3x3 dilation), formatted as a 512x512 RGB image in
//! [0, 1], and handed to a Stable Diffusion 1.5 img2img pass guided by a text
//! prompt.
//!
//! The preprocessing stages are plain functions in [`preprocess`] and need no
//! model. Generation sits behind the [`Generator`] trait; [`OnnxImg2Img`] is
//! the ONNX Runtime implementation.
//!
//! ## Example
//!
//! ```no_run
//! use sketch2img::{image, Config, Device, OnnxImg2Img, SketchPipeline, DEFAULT_PROMPT};
//!
//! # fn main() -> sketch2img::Result<()> {
//! let sketch = image::load_sketch("sketch.png")?;
//! let generator = OnnxImg2Img::new(Device::Auto)?;
//! let mut pipeline = SketchPipeline::new(generator, Config::default())?;
//!
//! let output = pipeline.run(&sketch, DEFAULT_PROMPT)?;
//! output.generated.save("generated.png").ok();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;
pub mod preprocess;

pub use error::{Error, Result};
pub use model::Device;
pub use pipeline::{
    Config, GenerationRequest, Generator, OnnxImg2Img, PipelineOutput, SketchPipeline,
    DEFAULT_PROMPT,
};
pub use preprocess::{extract_edges, format_for_model, EdgeMap};
