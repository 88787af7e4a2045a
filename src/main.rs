//! `sketch2img` CLI - turn a sketch into an image.

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use image::DynamicImage;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sketch2img::image::{compose_panel, load_sketch, save_image, to_data_uri, CANVAS_SIZE};
use sketch2img::preprocess::{self, Preprocessed};
use sketch2img::{Config, Device, OnnxImg2Img, SketchPipeline, DEFAULT_PROMPT};

/// Turn a freehand sketch into a realistic image with edge-guided diffusion.
#[derive(Parser, Debug)]
#[command(name = "sketch2img")]
#[command(version, about, long_about = None)]
struct Args {
    /// Sketch image path, or a `data:image/...;base64,` URI.
    #[arg(value_name = "INPUT")]
    input: String,

    /// Text prompt guiding generation.
    #[arg(short, long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// Directory for the output images.
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    output_dir: std::path::PathBuf,

    /// Denoising strength (0.0-1.0). Higher values stray further from the sketch.
    #[arg(short, long, default_value = "0.75", value_name = "FLOAT")]
    strength: f32,

    /// Classifier-free guidance scale. Higher values follow the prompt more closely.
    #[arg(short, long, default_value = "7.5", value_name = "FLOAT")]
    guidance_scale: f32,

    /// Number of denoising steps. More steps = better quality but slower.
    #[arg(long, default_value = "50", value_name = "INT")]
    steps: u32,

    /// Random seed for reproducibility.
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,

    /// Inference device.
    #[arg(long, value_enum, default_value_t = DeviceArg::Auto)]
    device: DeviceArg,

    /// Only write the edge map and model input; do not load the model.
    #[arg(long)]
    preprocess_only: bool,

    /// Also print the generated image as a PNG data URI.
    #[arg(long)]
    data_uri: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DeviceArg {
    /// CUDA when available, CPU otherwise.
    Auto,
    /// CPU only.
    Cpu,
}

impl From<DeviceArg> for Device {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Auto => Self::Auto,
            DeviceArg::Cpu => Self::Cpu,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sketch2img={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(&args) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: &Args) -> Result<()> {
    let sketch = load_sketch(&args.input).context("Failed to load sketch")?;

    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("Failed to create output directory {}", args.output_dir.display())
    })?;

    // Build configuration
    let config = Config {
        strength: args.strength,
        guidance_scale: args.guidance_scale,
        num_steps: args.steps,
        seed: args.seed,
        ..Config::default()
    };
    config.validate().context("Invalid configuration")?;

    if args.preprocess_only {
        let Preprocessed { edges, model_input } = preprocess::preprocess(&sketch, &config.edges);
        write(&args.output_dir, "edges.png", &DynamicImage::ImageLuma8(edges.into_image()))?;
        write(
            &args.output_dir,
            "model_input.png",
            &DynamicImage::ImageRgb8(model_input.to_rgb8()),
        )?;
        return Ok(());
    }

    // Models are loaded once, before any sketch is processed
    let generator =
        OnnxImg2Img::new(args.device.into()).context("Failed to initialize models")?;
    let mut pipeline = SketchPipeline::new(generator, config)?;

    let output = pipeline
        .run(&sketch, &args.prompt)
        .context("Failed to generate image")?;

    let panel = compose_panel(
        &output.sketch,
        output.edges.as_image(),
        &output.generated,
        CANVAS_SIZE,
    );

    write(
        &args.output_dir,
        "edges.png",
        &DynamicImage::ImageLuma8(output.edges.into_image()),
    )?;
    write(
        &args.output_dir,
        "model_input.png",
        &DynamicImage::ImageRgb8(output.model_input.to_rgb8()),
    )?;
    let generated = DynamicImage::ImageRgb8(output.generated);
    write(&args.output_dir, "generated.png", &generated)?;
    write(&args.output_dir, "panel.png", &DynamicImage::ImageRgb8(panel))?;

    if args.data_uri {
        println!("{}", to_data_uri(&generated)?);
    }

    println!("Successfully wrote results to {}", args.output_dir.display());

    Ok(())
}

fn write(dir: &Path, name: &str, img: &DynamicImage) -> Result<()> {
    let path = dir.join(name);
    save_image(img, &path).with_context(|| format!("Failed to save {name}"))?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}
