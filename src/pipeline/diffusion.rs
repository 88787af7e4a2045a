//! Stable Diffusion img2img on ONNX Runtime.

use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{concatenate, Array1, Array4, Axis, Ix4};
use ort::session::Session;
use ort::value::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::image::tensor_to_image;
use crate::model::{Device, ModelCache, ModelType, MODEL_ID};

use super::guidance::{apply_guidance, split_batch, uses_guidance};
use super::scheduler::DdimScheduler;
use super::sketch::{GenerationRequest, Generator};
use super::text::{TextEmbeddings, TextEncoder};
use super::tensor::{extract_array, missing_output};
use super::vae::{Autoencoder, LatentTensor};

/// Stable Diffusion 1.5 image-to-image generator.
///
/// All sessions are loaded once in [`OnnxImg2Img::new`] and reused for every
/// request.
pub struct OnnxImg2Img {
    text_encoder: TextEncoder,
    vae: Autoencoder,
    unet: Session,
}

impl OnnxImg2Img {
    /// Load every model from the default cache, downloading missing files.
    ///
    /// # Errors
    ///
    /// Returns an error if models cannot be loaded.
    pub fn new(device: Device) -> Result<Self> {
        Self::from_cache(&ModelCache::new()?, device)
    }

    /// Load every model from `cache`.
    ///
    /// # Errors
    ///
    /// Returns an error if models cannot be loaded.
    pub fn from_cache(cache: &ModelCache, device: Device) -> Result<Self> {
        tracing::info!("Loading {MODEL_ID} (fp32, device {device:?})");

        tracing::info!("Loading text encoder...");
        let text_encoder = TextEncoder::new(
            cache.load_tokenizer()?,
            cache.load_session(ModelType::TextEncoder, device)?,
        );

        tracing::info!("Loading VAE...");
        let vae = Autoencoder::new(
            cache.load_session(ModelType::VaeEncoder, device)?,
            cache.load_session(ModelType::VaeDecoder, device)?,
        );

        tracing::info!("Loading `UNet`...");
        let unet = cache.load_session(ModelType::Unet, device)?;

        tracing::info!("Models loaded successfully");

        Ok(Self {
            text_encoder,
            vae,
            unet,
        })
    }

    /// Prompt embeddings, with the empty-prompt embedding stacked first when
    /// guidance is on.
    fn embed_prompt(&mut self, prompt: &str, guided: bool) -> Result<TextEmbeddings> {
        let text = self.text_encoder.encode(prompt)?;
        if !guided {
            return Ok(text);
        }

        let uncond = self.text_encoder.encode("")?;
        concatenate(Axis(0), &[uncond.view(), text.view()]).map_err(|_| Error::ShapeMismatch {
            expected: "matching prompt embeddings".to_string(),
            actual: format!("{:?} and {:?}", uncond.shape(), text.shape()),
        })
    }

    /// Run the DDIM denoising loop over the retained timesteps.
    fn diffusion_loop(
        &mut self,
        latents: &LatentTensor,
        embeddings: &TextEmbeddings,
        request: &GenerationRequest,
    ) -> Result<LatentTensor> {
        let scheduler = DdimScheduler::new(request.num_steps as usize);
        let timesteps = scheduler.img2img_timesteps(request.strength);

        let Some(&first) = timesteps.first() else {
            tracing::debug!("Strength {} keeps no timesteps", request.strength);
            return Ok(latents.clone());
        };

        let mut rng = request
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let noise = gaussian_noise(latents.dim(), &mut rng);
        let mut latents = scheduler.add_noise(latents, &noise, first);

        let guided = uses_guidance(request.guidance_scale);

        // Progress bar for denoising
        let pb = ProgressBar::new(timesteps.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Denoising [{bar:40.cyan/blue}] {pos}/{len}")
                .expect("valid template")
                .progress_chars("#>-"),
        );

        for &timestep in timesteps {
            let model_input = if guided {
                concatenate(Axis(0), &[latents.view(), latents.view()]).map_err(|_| {
                    Error::ShapeMismatch {
                        expected: "batch of two latents".to_string(),
                        actual: format!("{:?}", latents.shape()),
                    }
                })?
            } else {
                latents.clone()
            };

            let noise_pred = self.predict_noise(model_input, timestep, embeddings)?;
            let noise_pred = if guided {
                let (uncond, text) = split_batch(&noise_pred);
                apply_guidance(&uncond, &text, request.guidance_scale)
            } else {
                noise_pred
            };

            latents = scheduler.step(&noise_pred, timestep, &latents);
            pb.inc(1);
        }

        pb.finish_with_message("Denoising complete");
        Ok(latents)
    }

    /// Predict noise using the `UNet`.
    #[allow(clippy::cast_possible_wrap)]
    fn predict_noise(
        &mut self,
        latents: LatentTensor,
        timestep: usize,
        embeddings: &TextEmbeddings,
    ) -> Result<LatentTensor> {
        let sample_value =
            Tensor::from_array(latents).map_err(|source| Error::Inference { source })?;

        // Safe: timesteps are below 1000
        let timestep_arr = Array1::from_vec(vec![timestep as i64]);
        let timestep_value =
            Tensor::from_array(timestep_arr).map_err(|source| Error::Inference { source })?;

        let hidden_value = Tensor::from_array(embeddings.clone())
            .map_err(|source| Error::Inference { source })?;

        let outputs = self
            .unet
            .run(ort::inputs![
                "sample" => sample_value,
                "timestep" => timestep_value,
                "encoder_hidden_states" => hidden_value,
            ])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| missing_output("noise prediction"))?;

        extract_array::<Ix4>(&output)
    }
}

impl Generator for OnnxImg2Img {
    fn generate(&mut self, request: &GenerationRequest) -> Result<RgbImage> {
        let guided = uses_guidance(request.guidance_scale);

        tracing::info!("Encoding prompt...");
        let embeddings = self.embed_prompt(&request.prompt, guided)?;

        tracing::info!("Encoding to latent space...");
        let latents = self.vae.encode(&request.image.to_tensor())?;

        tracing::info!("Running diffusion...");
        let denoised = self.diffusion_loop(&latents, &embeddings, request)?;

        tracing::info!("Decoding from latent space...");
        let decoded = self.vae.decode(&denoised)?;

        tensor_to_image(&decoded)
    }
}

/// Standard normal noise via the Box-Muller transform.
fn gaussian_noise(shape: (usize, usize, usize, usize), rng: &mut StdRng) -> Array4<f32> {
    Array4::from_shape_simple_fn(shape, || {
        // Shift away from zero so ln() stays finite
        let u1 = 1.0 - rng.random::<f32>();
        let u2 = rng.random::<f32>();
        (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
    })
}
