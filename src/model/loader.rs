//! Model downloading and loading utilities.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;
use tokenizers::Tokenizer;

use crate::error::{Error, Result};

use super::Device;

/// The Stable Diffusion checkpoint the ONNX exports are built from.
pub const MODEL_ID: &str = "runwayml/stable-diffusion-v1-5";

const ONNX_REPO: &str = "https://huggingface.co/modularai/stable-diffusion-1.5-onnx/resolve/main";

/// CLIP ViT-L/14 tokenizer, the one SD 1.5's text encoder was trained with.
const TOKENIZER_URL: &str =
    "https://huggingface.co/openai/clip-vit-large-patch14/resolve/main/tokenizer.json";
const TOKENIZER_FILENAME: &str = "tokenizer.json";

/// Types of models used in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// CLIP text encoder - embeds the prompt.
    TextEncoder,
    /// VAE Encoder - encodes images to latent space.
    VaeEncoder,
    /// VAE Decoder - decodes latents to images.
    VaeDecoder,
    /// `UNet` - performs the denoising diffusion.
    Unet,
}

impl ModelType {
    /// Get the filename for this model type.
    #[must_use]
    pub const fn filename(&self) -> &'static str {
        match self {
            Self::TextEncoder => "text_encoder.onnx",
            Self::VaeEncoder => "vae_encoder.onnx",
            Self::VaeDecoder => "vae_decoder.onnx",
            Self::Unet => "unet.onnx",
        }
    }

    /// Directory of this model inside the ONNX export.
    const fn subdir(&self) -> &'static str {
        match self {
            Self::TextEncoder => "text_encoder",
            Self::VaeEncoder => "vae_encoder",
            Self::VaeDecoder => "vae_decoder",
            Self::Unet => "unet",
        }
    }

    /// Get the download URL for this model type.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{ONNX_REPO}/{}/model.onnx", self.subdir())
    }

    /// Get the approximate size in bytes for progress indication.
    #[must_use]
    pub const fn approx_size(&self) -> u64 {
        match self {
            Self::TextEncoder => 490_000_000, // ~490 MB
            Self::VaeEncoder => 140_000_000,  // ~140 MB
            Self::VaeDecoder => 100_000_000,  // ~100 MB
            Self::Unet => 1_300_000,          // ~1.3 MB (graph only, weights are external)
        }
    }

    /// Get the external data file URL if this model has one.
    #[must_use]
    pub fn data_url(&self) -> Option<String> {
        match self {
            Self::Unet => Some(format!("{ONNX_REPO}/unet/model.onnx_data")),
            _ => None,
        }
    }

    /// Get the data filename for models with external data.
    /// Note: Must match the reference in the ONNX file (usually `model.onnx_data`).
    #[must_use]
    pub const fn data_filename(&self) -> Option<&'static str> {
        match self {
            // ONNX file references this exact name internally
            Self::Unet => Some("model.onnx_data"),
            _ => None,
        }
    }

    /// Get the approximate size of the data file in bytes.
    #[must_use]
    pub const fn data_approx_size(&self) -> u64 {
        match self {
            Self::Unet => 3_500_000_000, // ~3.5 GB
            _ => 0,
        }
    }
}

/// Manages the model cache directory and downloads.
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a new model cache.
    ///
    /// Uses the platform-appropriate cache directory:
    /// - Windows: `%LOCALAPPDATA%\sketch2img\models`
    /// - Linux: `~/.cache/sketch2img/models`
    /// - macOS: `~/Library/Caches/sketch2img/models`
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new() -> Result<Self> {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::at(base.join("sketch2img").join("models"))
    }

    /// Use an explicit cache directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn at(cache_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&cache_dir).map_err(|source| Error::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;

        Ok(Self { cache_dir })
    }

    /// The directory model files are stored in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the path to a model file, downloading if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be downloaded or accessed.
    pub fn get_model_path(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.cache_dir.join(model_type.filename());

        if !path.exists() {
            download_file(
                &model_type.url(),
                &path,
                model_type.filename(),
                model_type.approx_size(),
            )?;
        }

        // Download external data file if needed
        if let (Some(data_url), Some(data_filename)) =
            (model_type.data_url(), model_type.data_filename())
        {
            let data_path = self.cache_dir.join(data_filename);
            if !data_path.exists() {
                download_file(
                    &data_url,
                    &data_path,
                    data_filename,
                    model_type.data_approx_size(),
                )?;
            }
        }

        Ok(path)
    }

    /// Load an ONNX model session on the requested device.
    ///
    /// With [`Device::Auto`] the CUDA execution provider is registered;
    /// ONNX Runtime skips it and stays on the CPU when no GPU is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn load_session(&self, model_type: ModelType, device: Device) -> Result<Session> {
        let path = self.get_model_path(model_type)?;
        let load_err = |source: ort::Error| Error::ModelLoad {
            name: model_type.filename().to_string(),
            source,
        };

        let mut builder = Session::builder().map_err(load_err)?;
        if device == Device::Auto {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(|err| load_err(err.into()))?;
        }

        tracing::debug!("Loading {} on {device:?}", path.display());
        builder.commit_from_file(&path).map_err(load_err)
    }

    /// Load the prompt tokenizer, downloading it if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the tokenizer cannot be downloaded or parsed.
    pub fn load_tokenizer(&self) -> Result<Tokenizer> {
        let path = self.cache_dir.join(TOKENIZER_FILENAME);
        if !path.exists() {
            download_file(TOKENIZER_URL, &path, TOKENIZER_FILENAME, 2_000_000)?;
        }

        Tokenizer::from_file(&path).map_err(|err| Error::Tokenizer {
            reason: format!("{}: {err}", path.display()),
        })
    }
}

/// Download a file from a URL to a path with progress indication.
fn download_file(url: &str, path: &Path, name: &str, approx_size: u64) -> Result<()> {
    tracing::info!("Downloading {name} from {url}");

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|source| Error::ModelDownload {
            name: name.to_string(),
            source,
        })?;

    let total_size = response.content_length().unwrap_or(approx_size);

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {name}"));

    // Write to a temporary file first, then rename for atomicity
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;

    let mut downloaded = 0u64;
    let mut reader = response;
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = std::io::Read::read(&mut reader, &mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
        pb.set_position(downloaded);
    }
    file.flush()?;

    pb.finish_with_message(format!("Downloaded {name}"));

    fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_urls() {
        assert!(ModelType::VaeEncoder.url().ends_with("/vae_encoder/model.onnx"));
        assert!(ModelType::TextEncoder.url().ends_with("/text_encoder/model.onnx"));
        assert_eq!(ModelType::VaeDecoder.data_url(), None);
        assert!(ModelType::Unet
            .data_url()
            .is_some_and(|url| url.ends_with("/unet/model.onnx_data")));
    }

    #[test]
    fn test_cached_files_are_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::at(dir.path().join("models")).unwrap();
        let path = cache.dir().join(ModelType::VaeDecoder.filename());
        fs::write(&path, b"stub").unwrap();

        assert_eq!(cache.get_model_path(ModelType::VaeDecoder).unwrap(), path);
    }

    #[test]
    fn test_cache_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let cache = ModelCache::at(nested.clone()).unwrap();
        assert!(nested.is_dir());
        assert_eq!(cache.dir(), nested.as_path());
    }
}
