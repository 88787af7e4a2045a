//! Orchestration: sketch in, edge map and generated image out.

use image::RgbImage;

use crate::error::{Error, Result};
use crate::image::{Bitmap, ReadyImage};
use crate::preprocess::{self, EdgeMap, EdgeParams, Preprocessed};

/// Prompt used when the caller does not supply one.
pub const DEFAULT_PROMPT: &str = "A detailed, realistic image based on this sketch";

/// Everything a generator needs for one image.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Formatted edge map.
    pub image: ReadyImage,
    /// Text conditioning.
    pub prompt: String,
    /// Denoising strength (0.0-1.0).
    pub strength: f32,
    /// Classifier-free guidance scale.
    pub guidance_scale: f32,
    /// Number of scheduler steps before strength is applied.
    pub num_steps: u32,
    /// Random seed for reproducibility. None for random.
    pub seed: Option<u64>,
}

/// An image-to-image generative model.
///
/// Kept behind a trait so preprocessing and orchestration can be exercised
/// without model weights.
pub trait Generator {
    /// Produce one image for the request.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn generate(&mut self, request: &GenerationRequest) -> Result<RgbImage>;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&mut self, request: &GenerationRequest) -> Result<RgbImage> {
        (**self).generate(request)
    }
}

/// Configuration for the sketch pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Denoising strength (0.0-1.0). Higher values follow the sketch less closely.
    pub strength: f32,

    /// Guidance scale. Values above 1.0 enable classifier-free guidance.
    pub guidance_scale: f32,

    /// Number of denoising steps.
    pub num_steps: u32,

    /// Edge detection thresholds.
    pub edges: EdgeParams,

    /// Random seed for reproducibility. None for random.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strength: 0.75,
            guidance_scale: 7.5,
            num_steps: 50,
            edges: EdgeParams::default(),
            seed: None,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(Error::invalid_parameter(
                "strength",
                "must be between 0.0 and 1.0",
            ));
        }

        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            return Err(Error::invalid_parameter(
                "guidance_scale",
                "must be a finite value >= 0",
            ));
        }

        if self.num_steps == 0 {
            return Err(Error::invalid_parameter(
                "num_steps",
                "must be greater than 0",
            ));
        }

        self.edges.validate()
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The input sketch as RGB.
    pub sketch: RgbImage,
    /// Binary edge map at sketch resolution.
    pub edges: EdgeMap,
    /// What the generator was given.
    pub model_input: ReadyImage,
    /// The generated image.
    pub generated: RgbImage,
}

/// Runs preprocessing and generation for sketches.
///
/// The generator is created once and reused for every run.
pub struct SketchPipeline<G> {
    config: Config,
    generator: G,
}

impl<G: Generator> SketchPipeline<G> {
    /// Create a new pipeline around a loaded generator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(generator: G, config: Config) -> Result<Self> {
        config.validate()?;

        tracing::info!("Initializing pipeline with config: {config:?}");

        Ok(Self { config, generator })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Extract edges and format them, without touching the model.
    #[must_use]
    pub fn preprocess(&self, sketch: &Bitmap) -> Preprocessed {
        preprocess::preprocess(sketch, &self.config.edges)
    }

    /// Turn a sketch into an image guided by `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt is blank or generation fails.
    pub fn run(&mut self, sketch: &Bitmap, prompt: &str) -> Result<PipelineOutput> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::invalid_parameter("prompt", "must not be empty"));
        }

        tracing::info!(
            "Processing {}x{} sketch with prompt: {prompt:?}",
            sketch.width(),
            sketch.height()
        );

        let Preprocessed { edges, model_input } = self.preprocess(sketch);
        if edges.is_empty() {
            tracing::warn!("No edges found in sketch; the model will see a blank input");
        }

        let request = GenerationRequest {
            image: model_input,
            prompt: prompt.to_string(),
            strength: self.config.strength,
            guidance_scale: self.config.guidance_scale,
            num_steps: self.config.num_steps,
            seed: self.config.seed,
        };

        tracing::info!("Generating image...");
        let generated = self.generator.generate(&request)?;

        tracing::info!("Processing complete");
        Ok(PipelineOutput {
            sketch: sketch.to_rgb_image(),
            edges,
            model_input: request.image,
            generated,
        })
    }
}
