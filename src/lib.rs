//! # latentkit
//!
//! Image and tensor conversion utilities for latent diffusion pipelines.
//!
//! The crate covers the plumbing around a diffusion model's first stage (VAE):
//! fitting images to model-compatible sizes, converting between images and
//! normalized NCHW tensors, encoding images to latents and decoding latents
//! back to images, BGR conversion for OpenCV-style consumers, deferred image
//! loading for batches of inputs, and caption overlays.
//!
//! ## Example
//!
//! ```no_run
//! use latentkit::image::{fit_image_within, image_to_tensor, load_image, tensor_to_image, FitOptions};
//!
//! # fn main() -> latentkit::Result<()> {
//! let img = load_image("photo.jpg")?;
//! let fitted = fit_image_within(&img, &FitOptions::default())?;
//!
//! let tensor = image_to_tensor(&fitted);
//! let restored = tensor_to_image(&tensor)?;
//! restored.save("restored.png").ok();
//! # Ok(())
//! # }
//! ```
//!
//! Encoding and decoding through the Stable Diffusion VAE:
//!
//! ```no_run
//! use latentkit::{Config, ImageConverter};
//!
//! # fn main() -> latentkit::Result<()> {
//! let mut converter = ImageConverter::new(Config::default())?;
//! converter.process("input.png", "reconstructed.png")?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;

pub use error::{Error, Result};
pub use model::{Device, FirstStageModel, LatentTensor, PixelBatch, Precision};
pub use pipeline::{Config, ImageConverter};
