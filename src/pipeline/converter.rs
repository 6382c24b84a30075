//! Image converter that binds a first-stage model and its device.

use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbImage};

use crate::error::{Error, Result};
use crate::image::{fit_image_within, load_image, save_image, FitOptions};
use crate::model::{Device, FirstStageModel, LatentTensor, ModelCache, Precision};

use super::latent::{image_to_latent, latents_to_images};
use super::vae::OnnxVae;

/// Configuration for the image converter.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bounds, color mode and snapping applied before encoding.
    pub fit: FitOptions,

    /// Number of identical latents produced per encoded image.
    pub batch_size: usize,

    /// Precision of the pixel batch handed to the encoder.
    pub precision: Precision,

    /// Device the model sessions run on.
    pub device: Device,

    /// Random seed for posterior sampling. None for random.
    pub seed: Option<u64>,

    /// Output JPEG quality (1-100).
    pub output_quality: u8,

    /// Directory holding the ONNX models. None for the platform cache.
    pub model_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fit: FitOptions::default(),
            batch_size: 1,
            precision: Precision::Full,
            device: Device::Cpu,
            seed: None,
            output_quality: 95,
            model_dir: None,
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
        if self.fit.max_width == 0 || self.fit.max_height == 0 {
            return Err(Error::InvalidParameter {
                name: "fit".to_string(),
                reason: "maximum width and height must be greater than 0".to_string(),
            });
        }

        if self.fit.snap_size == 0 {
            return Err(Error::InvalidParameter {
                name: "snap_size".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.batch_size == 0 {
            return Err(Error::InvalidParameter {
                name: "batch_size".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if !(1..=100).contains(&self.output_quality) {
            return Err(Error::InvalidParameter {
                name: "output_quality".to_string(),
                reason: "must be between 1 and 100".to_string(),
            });
        }

        Ok(())
    }
}

/// Converts images to latents and back through a first-stage model.
///
/// The model, and with it the compute device, is fixed at construction.
pub struct ImageConverter<M = OnnxVae> {
    config: Config,
    model: M,
}

impl ImageConverter<OnnxVae> {
    /// Create a converter backed by the ONNX VAE.
    ///
    /// This will download models if they are not already cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or models cannot be loaded.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tracing::info!("Initializing converter with config: {config:?}");

        let cache = match &config.model_dir {
            Some(dir) => ModelCache::with_dir(dir)?,
            None => ModelCache::new()?,
        };
        let model = OnnxVae::load(&cache, config.device, config.seed)?;

        tracing::info!("Converter initialized successfully");

        Ok(Self { config, model })
    }
}

impl<M: FirstStageModel> ImageConverter<M> {
    /// Create a converter around an existing model.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_model(config: Config, model: M) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, model })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying model.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Fit an image to the configured bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if the fitted size is degenerate.
    pub fn fit(&self, img: &DynamicImage) -> Result<DynamicImage> {
        fit_image_within(img, &self.config.fit)
    }

    /// Fit an image and encode it into `batch_size` latents.
    ///
    /// # Errors
    ///
    /// Returns an error if fitting or encoding fails.
    pub fn encode(&mut self, img: &DynamicImage) -> Result<LatentTensor> {
        let fitted = self.fit(img)?;
        image_to_latent(
            &mut self.model,
            &fitted,
            self.config.batch_size,
            self.config.precision,
        )
    }

    /// Decode latents into one image per batch element.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&mut self, latents: &LatentTensor) -> Result<Vec<RgbImage>> {
        latents_to_images(&mut self.model, latents)
    }

    /// Encode an image file and decode it again, saving the reconstruction.
    ///
    /// With a batch size above one, element `i > 0` is written next to
    /// `output_path` with `-i` appended to the file stem.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, conversion or saving fails.
    pub fn process<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        input_path: P,
        output_path: Q,
    ) -> Result<Vec<PathBuf>> {
        let input_path = input_path.as_ref();
        let output_path = output_path.as_ref();

        tracing::info!("Processing image: {}", input_path.display());
        let img = load_image(input_path)?;

        tracing::info!("Encoding to latent space...");
        let latents = self.encode(&img)?;

        tracing::info!("Decoding from latent space...");
        let decoded = self.decode(&latents)?;

        let mut written = Vec::with_capacity(decoded.len());
        for (index, rgb) in decoded.into_iter().enumerate() {
            let path = numbered_path(output_path, index);
            tracing::info!("Saving output to: {}", path.display());
            save_image(
                &DynamicImage::ImageRgb8(rgb),
                &path,
                self.config.output_quality,
            )?;
            written.push(path);
        }

        tracing::info!("Processing complete");
        Ok(written)
    }
}

/// `out.png` for index 0, `out-2.png` for index 2.
fn numbered_path(path: &Path, index: usize) -> PathBuf {
    if index == 0 {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map_or_else(|| "output".into(), |s| s.to_string_lossy());
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{index}"),
    };

    path.with_file_name(name)
}
