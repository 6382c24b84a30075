//! First-stage (VAE) model contract, compute devices, and model files.

mod loader;
#[cfg(test)]
pub(crate) mod testing;

pub use loader::{ModelCache, ModelType};

use std::fmt;
use std::str::FromStr;

use half::f16;
use ndarray::Array4;

use crate::error::{Error, Result};
use crate::image::ImageTensor;

/// Latent tensor in NCHW format, (batch, 4, height / 8, width / 8) for SD 1.5.
pub type LatentTensor = Array4<f32>;

/// The pixel-space <-> latent-space stage of a latent diffusion model.
///
/// Implementations own whatever compute resources they need; the device is
/// chosen when the model is built, not per call.
pub trait FirstStageModel {
    /// Intermediate result of [`encode_first_stage`](Self::encode_first_stage),
    /// turned into latents by [`get_first_stage_encoding`](Self::get_first_stage_encoding).
    type Encoding;

    /// Decode a batch of latents into image tensors with values in [-1, 1].
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails or the output has an unexpected shape.
    fn decode_first_stage(&mut self, latents: &LatentTensor) -> Result<ImageTensor>;

    /// Encode a batch of normalized image tensors.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails or the output has an unexpected shape.
    fn encode_first_stage(&mut self, images: PixelBatch) -> Result<Self::Encoding>;

    /// Turn an encoding into the latents the diffusion model works on.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoding has an unexpected shape.
    fn get_first_stage_encoding(&mut self, encoding: Self::Encoding) -> Result<LatentTensor>;
}

/// Floating point precision used when feeding images to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// 32-bit floats.
    #[default]
    Full,
    /// 16-bit floats.
    Half,
}

/// A batch of normalized NCHW image tensors at a given precision.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBatch {
    /// 32-bit batch.
    Full(Array4<f32>),
    /// 16-bit batch.
    Half(Array4<f16>),
}

impl PixelBatch {
    /// Build a batch, downcasting to `f16` for [`Precision::Half`].
    #[must_use]
    pub fn new(images: ImageTensor, precision: Precision) -> Self {
        match precision {
            Precision::Full => Self::Full(images),
            Precision::Half => Self::Half(images.mapv(f16::from_f32)),
        }
    }

    /// Precision of the stored values.
    #[must_use]
    pub const fn precision(&self) -> Precision {
        match self {
            Self::Full(_) => Precision::Full,
            Self::Half(_) => Precision::Half,
        }
    }

    /// Shape as (batch, channels, height, width).
    #[must_use]
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        match self {
            Self::Full(images) => images.dim(),
            Self::Half(images) => images.dim(),
        }
    }

    /// Convert to `precision`, leaving the batch alone if it already matches.
    #[must_use]
    pub fn into_precision(self, precision: Precision) -> Self {
        if self.precision() == precision {
            return self;
        }
        Self::new(self.into_f32(), precision)
    }

    /// Widen to 32-bit floats.
    #[must_use]
    pub fn into_f32(self) -> Array4<f32> {
        match self {
            Self::Full(images) => images,
            Self::Half(images) => images.mapv(f16::to_f32),
        }
    }
}

/// Compute device that model sessions run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Run on the CPU.
    #[default]
    Cpu,
    /// Run on the CUDA GPU with the given ordinal.
    Cuda(i32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidParameter {
            name: "device".to_string(),
            reason: format!("expected `cpu`, `cuda` or `cuda:N`, got `{s}`"),
        };

        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            other => {
                let id = other.strip_prefix("cuda:").ok_or_else(invalid)?;
                id.parse::<i32>()
                    .ok()
                    .filter(|id| *id >= 0)
                    .map(Self::Cuda)
                    .ok_or_else(invalid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda(0));
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Cuda(2));
        assert!("cuda:-1".parse::<Device>().is_err());
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn test_device_display_round_trip() {
        for device in [Device::Cpu, Device::Cuda(3)] {
            assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
        }
    }

    #[test]
    fn test_half_batch_downcasts() {
        let images = Array4::from_elem((2, 3, 4, 4), 0.1_f32);
        let batch = PixelBatch::new(images, Precision::Half);

        assert_eq!(batch.precision(), Precision::Half);
        assert_eq!(batch.dim(), (2, 3, 4, 4));

        let widened = batch.into_f32();
        assert!(widened.iter().all(|&v| (v - 0.1).abs() < 1e-3));
    }

    #[test]
    fn test_full_batch_is_unchanged() {
        let images = Array4::from_elem((1, 3, 2, 2), -0.25_f32);
        let batch = PixelBatch::new(images.clone(), Precision::Full);

        assert_eq!(batch.into_f32(), images);
    }

    #[test]
    fn test_into_precision() {
        let images = Array4::from_elem((1, 3, 2, 2), 0.5_f32);

        let half = PixelBatch::new(images.clone(), Precision::Full).into_precision(Precision::Half);
        assert!(matches!(&half, PixelBatch::Half(_)));

        let full = half.into_precision(Precision::Full);
        assert_eq!(full, PixelBatch::Full(images));
    }
}
