//! Sketch-to-image pipeline and the diffusion backend behind it.

mod diffusion;
mod guidance;
mod scheduler;
mod sketch;
mod tensor;
mod text;
mod vae;

pub use diffusion::OnnxImg2Img;
pub use scheduler::DdimScheduler;
pub use sketch::{
    Config, GenerationRequest, Generator, PipelineOutput, SketchPipeline, DEFAULT_PROMPT,
};
