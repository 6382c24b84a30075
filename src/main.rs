//! `latentkit` CLI - fit, caption and VAE round-trip images.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use latentkit::image::{
    add_caption, fit_image_within, load_image, resolve_image_inputs, save_image, CaptionStyle,
    FitOptions, DEFAULT_FONT_SIZE, DEFAULT_SNAP_SIZE, SD_IMAGE_SIZE,
};
use latentkit::{Config, Device, ImageConverter, Precision};

/// Image and latent conversion utilities for latent diffusion models.
#[derive(Parser, Debug)]
#[command(name = "latentkit")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resize images to fit the model bounds, snapped to a multiple of the snap size.
    Fit {
        /// Input image paths.
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        /// Directory the fitted PNG images are written to.
        #[arg(short, long, value_name = "DIR")]
        out_dir: PathBuf,

        #[command(flatten)]
        bounds: BoundsArgs,
    },

    /// Draw a caption in the bottom-left corner of an image.
    Caption {
        /// Input image path.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output image path.
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Caption text.
        #[arg(short, long)]
        text: String,

        /// TrueType font file. Defaults to the bundled DejaVu Sans.
        #[arg(long, value_name = "PATH")]
        font: Option<PathBuf>,

        /// Font size in pixels.
        #[arg(long, default_value_t = DEFAULT_FONT_SIZE, value_name = "INT")]
        font_size: u32,

        /// Output JPEG quality (1-100).
        #[arg(short, long, default_value = "95", value_name = "INT")]
        quality: u8,
    },

    /// Encode an image to latents with the SD VAE and decode it back.
    Roundtrip {
        /// Input image path.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output image path.
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        bounds: BoundsArgs,

        /// Compute device: `cpu`, `cuda` or `cuda:N`.
        #[arg(long, default_value = "cpu", value_name = "DEVICE")]
        device: String,

        /// Feed the encoder half-precision inputs.
        #[arg(long)]
        half: bool,

        /// Number of latents per image; extra outputs get a numeric suffix.
        #[arg(long, default_value = "1", value_name = "INT")]
        batch_size: usize,

        /// Random seed for reproducibility.
        #[arg(long, value_name = "INT")]
        seed: Option<u64>,

        /// Directory holding the VAE ONNX models.
        #[arg(long, value_name = "DIR")]
        model_dir: Option<PathBuf>,

        /// Output JPEG quality (1-100).
        #[arg(short, long, default_value = "95", value_name = "INT")]
        quality: u8,
    },
}

/// Fit bounds shared by subcommands.
#[derive(clap::Args, Debug)]
struct BoundsArgs {
    /// Maximum output width.
    #[arg(long, default_value_t = SD_IMAGE_SIZE, value_name = "INT")]
    max_width: u32,

    /// Maximum output height.
    #[arg(long, default_value_t = SD_IMAGE_SIZE, value_name = "INT")]
    max_height: u32,

    /// Output sides are truncated to a multiple of this.
    #[arg(long, default_value_t = DEFAULT_SNAP_SIZE, value_name = "INT")]
    snap: u32,
}

impl BoundsArgs {
    fn to_fit_options(&self) -> FitOptions {
        FitOptions {
            max_width: self.max_width,
            max_height: self.max_height,
            snap_size: self.snap,
            ..FitOptions::default()
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
                .unwrap_or_else(|_| format!("latentkit={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(args.command) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Fit {
            inputs,
            out_dir,
            bounds,
        } => fit(&inputs, &out_dir, &bounds.to_fit_options()),
        Command::Caption {
            input,
            output,
            text,
            font,
            font_size,
            quality,
        } => {
            let mut img = load_image(&input)?;
            let style = CaptionStyle {
                font_size,
                font_path: font,
            };
            add_caption(&mut img, &text, &style).context("Failed to draw caption")?;
            save_image(&img, &output, quality)?;
            println!("Captioned {} -> {}", input.display(), output.display());
            Ok(())
        }
        Command::Roundtrip {
            input,
            output,
            bounds,
            device,
            half,
            batch_size,
            seed,
            model_dir,
            quality,
        } => {
            if !input.exists() {
                anyhow::bail!("Input file does not exist: {}", input.display());
            }

            let config = Config {
                fit: bounds.to_fit_options(),
                batch_size,
                precision: if half { Precision::Half } else { Precision::Full },
                device: device.parse::<Device>()?,
                seed,
                output_quality: quality,
                model_dir,
            };

            let mut converter =
                ImageConverter::new(config).context("Failed to initialize converter")?;
            let written = converter
                .process(&input, &output)
                .context("Failed to process image")?;

            for path in written {
                println!("Successfully processed {} -> {}", input.display(), path.display());
            }
            Ok(())
        }
    }
}

fn fit(inputs: &[PathBuf], out_dir: &Path, options: &FitOptions) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let handles = resolve_image_inputs(inputs.iter().cloned());
    let mut taken = HashSet::new();

    for (input, handle) in inputs.iter().zip(&handles) {
        let img = handle.image()?;
        let fitted = fit_image_within(img, options)
            .with_context(|| format!("Failed to fit {}", input.display()))?;

        let output = fitted_output_path(out_dir, input, &mut taken);
        save_image(&fitted, &output, 100)?;

        println!(
            "{} ({}x{}) -> {} ({}x{})",
            input.display(),
            img.width(),
            img.height(),
            output.display(),
            fitted.width(),
            fitted.height()
        );
    }

    Ok(())
}

/// `<out_dir>/<stem>.png`, with `-N` appended when an earlier input already
/// claimed that name.
fn fitted_output_path(out_dir: &Path, input: &Path, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "image".into(), |s| s.to_string_lossy());

    let mut output = out_dir.join(format!("{stem}.png"));
    let mut suffix = 1;
    while !taken.insert(output.clone()) {
        output = out_dir.join(format!("{stem}-{suffix}.png"));
        suffix += 1;
    }

    output
}
