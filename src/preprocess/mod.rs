//! Sketch preprocessing: edge extraction and model input formatting.
//!
//! Both stages are pure functions of their input. Shape contracts are
//! enforced by [`Bitmap`](crate::image::Bitmap) construction and edge
//! thresholds are put in order before use, so neither stage can fail or
//! panic at call time.

mod edges;
mod format;

pub use edges::{
    detect_edges, dilate_edges, extract_edges, extract_edges_with, gaussian_smooth, to_grayscale,
    EdgeMap, EdgeParams, EDGE_ON,
};
pub use format::format_for_model;

use crate::image::{Bitmap, ReadyImage};

/// Output of the preprocessing stages for one sketch.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Binary edge map at the sketch's resolution.
    pub edges: EdgeMap,
    /// Edge map formatted for the diffusion model.
    pub model_input: ReadyImage,
}

/// Run edge extraction followed by model formatting.
#[must_use]
pub fn preprocess(sketch: &Bitmap, params: &EdgeParams) -> Preprocessed {
    let edges = extract_edges_with(sketch, params);
    let model_input = format_for_model(&edges.to_bitmap());

    tracing::debug!(
        "Preprocessed {}x{} sketch: {} edge pixels",
        sketch.width(),
        sketch.height(),
        edges.on_pixels()
    );

    Preprocessed { edges, model_input }
}
