//! Latent encoding and decoding through a first-stage model.

mod converter;
mod latent;
mod vae;

pub use converter::{Config, ImageConverter};
pub use latent::{image_to_latent, latents_to_images};
pub use vae::{OnnxVae, Posterior, LATENT_CHANNELS, VAE_SCALE};
