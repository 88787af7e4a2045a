//! VAE: moves images in and out of the 4-channel latent space.

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};
use crate::image::ImageTensor;

use super::tensor::{extract_array, missing_output};

/// Latent tensor type (1, 4, 64, 64) for 512x512 images.
pub type LatentTensor = Array4<f32>;

/// VAE scaling factor (from Stable Diffusion).
const VAE_SCALE: f32 = 0.18215;

/// Encoder and decoder halves of the SD 1.5 VAE.
pub struct Autoencoder {
    encoder: Session,
    decoder: Session,
}

impl Autoencoder {
    /// Pair the two VAE sessions.
    #[must_use]
    pub fn new(encoder: Session, decoder: Session) -> Self {
        Self { encoder, decoder }
    }

    /// NCHW image in [-1, 1] to scaled latents.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    pub fn encode(&mut self, image: &ImageTensor) -> Result<LatentTensor> {
        let latent = run_single(&mut self.encoder, image.clone(), "latent_sample")?;
        Ok(latent * VAE_SCALE)
    }

    /// Scaled latents back to an NCHW image in roughly [-1, 1].
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    pub fn decode(&mut self, latent: &LatentTensor) -> Result<ImageTensor> {
        run_single(&mut self.decoder, latent / VAE_SCALE, "sample")
    }
}

/// Feed one 4D tensor through a single-input session, read the first output.
fn run_single(session: &mut Session, input: Array4<f32>, output_name: &str) -> Result<Array4<f32>> {
    let input_value = Tensor::from_array(input).map_err(|source| Error::Inference { source })?;

    let outputs = session
        .run(ort::inputs![input_value])
        .map_err(|source| Error::Inference { source })?;

    let output = outputs
        .values()
        .next()
        .ok_or_else(|| missing_output(output_name))?;

    extract_array(&output)
}
