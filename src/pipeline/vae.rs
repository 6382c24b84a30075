//! ONNX Runtime implementation of the VAE first stage.

use half::f16;
use ndarray::{Array4, Axis};
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{DynValue, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::image::ImageTensor;
use crate::model::{
    Device, FirstStageModel, LatentTensor, ModelCache, ModelType, PixelBatch, Precision,
};

/// VAE scaling factor (from Stable Diffusion).
pub const VAE_SCALE: f32 = 0.18215;

/// Number of latent channels in the SD VAE.
pub const LATENT_CHANNELS: usize = 4;

/// Log-variance range used when sampling the posterior.
const LOGVAR_RANGE: (f32, f32) = (-30.0, 20.0);

/// Stable Diffusion VAE backed by two ONNX sessions.
pub struct OnnxVae {
    encoder: Session,
    decoder: Session,
    device: Device,
    rng: StdRng,
}

impl OnnxVae {
    /// Load the VAE encoder and decoder on `device`, downloading them if needed.
    ///
    /// `seed` makes posterior sampling reproducible.
    ///
    /// # Errors
    ///
    /// Returns an error if either model cannot be loaded.
    pub fn load(cache: &ModelCache, device: Device, seed: Option<u64>) -> Result<Self> {
        tracing::info!("Loading VAE encoder on {device}...");
        let encoder = cache.load_session(ModelType::VaeEncoder, device)?;

        tracing::info!("Loading VAE decoder on {device}...");
        let decoder = cache.load_session(ModelType::VaeDecoder, device)?;

        Ok(Self::from_sessions(encoder, decoder, device, seed))
    }

    /// Wrap already created sessions.
    #[must_use]
    pub fn from_sessions(
        encoder: Session,
        decoder: Session,
        device: Device,
        seed: Option<u64>,
    ) -> Self {
        let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        Self {
            encoder,
            decoder,
            device,
            rng,
        }
    }

    /// Device the sessions were created on.
    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }
}

impl FirstStageModel for OnnxVae {
    type Encoding = Posterior;

    fn decode_first_stage(&mut self, latents: &LatentTensor) -> Result<ImageTensor> {
        decode(&mut self.decoder, latents)
    }

    fn encode_first_stage(&mut self, images: PixelBatch) -> Result<Posterior> {
        let declared = self
            .encoder
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_type());

        encode(&mut self.encoder, conform_batch(images, declared)).map(Posterior::new)
    }

    fn get_first_stage_encoding(&mut self, encoding: Posterior) -> Result<LatentTensor> {
        // Scale latents as per SD convention
        Ok(encoding.sample(&mut self.rng)? * VAE_SCALE)
    }
}

/// Raw VAE encoder output.
///
/// Either posterior moments (mean and log-variance stacked along the channel
/// axis) or a latent sample the exporter already drew.
#[derive(Debug, Clone, PartialEq)]
pub struct Posterior {
    moments: Array4<f32>,
}

impl Posterior {
    /// Wrap encoder output.
    #[must_use]
    pub const fn new(moments: Array4<f32>) -> Self {
        Self { moments }
    }

    /// The raw encoder output.
    #[must_use]
    pub const fn moments(&self) -> &Array4<f32> {
        &self.moments
    }

    /// Draw an unscaled latent sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the output has neither 4 nor 8 channels.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<LatentTensor> {
        let channels = self.moments.len_of(Axis(1));

        if channels == LATENT_CHANNELS {
            return Ok(self.moments.clone());
        }

        if channels != 2 * LATENT_CHANNELS {
            return Err(Error::ShapeMismatch {
                expected: format!("{LATENT_CHANNELS} or {} channels", 2 * LATENT_CHANNELS),
                actual: format!("{channels} channels"),
            });
        }

        let (mean, logvar) = self.moments.view().split_at(Axis(1), LATENT_CHANNELS);
        let std = logvar.mapv(|v| (0.5 * v.clamp(LOGVAR_RANGE.0, LOGVAR_RANGE.1)).exp());
        let noise = Array4::from_shape_fn(mean.raw_dim(), |_| standard_normal(rng));

        Ok(&mean + &(std * noise))
    }
}

/// Precision matching a graph input's element type, if it is a float type we can feed.
const fn input_precision(element_type: Option<TensorElementType>) -> Option<Precision> {
    match element_type {
        Some(TensorElementType::Float32) => Some(Precision::Full),
        Some(TensorElementType::Float16) => Some(Precision::Half),
        _ => None,
    }
}

/// Convert a batch to the precision the encoder graph declares.
///
/// Exported graphs take one float type only, so a half batch is widened for an
/// fp32 export and a full batch narrowed for an fp16 one.
fn conform_batch(images: PixelBatch, element_type: Option<TensorElementType>) -> PixelBatch {
    match input_precision(element_type) {
        Some(precision) if precision != images.precision() => {
            tracing::debug!(
                "Encoder expects {precision:?} input, converting {:?} batch",
                images.precision()
            );
            images.into_precision(precision)
        }
        _ => images,
    }
}

/// Draw from N(0, 1) with the Box-Muller transform.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    // 1 - u keeps the log argument in (0, 1]
    let u1 = 1.0 - rng.random::<f32>();
    let u2 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

/// Encode an image batch with the VAE encoder.
///
/// # Arguments
///
/// * `encoder` - ONNX session for the VAE encoder
/// * `images` - Image batch in NCHW format with values in [-1, 1]
///
/// # Errors
///
/// Returns an error if inference fails.
fn encode(encoder: &mut Session, images: PixelBatch) -> Result<Array4<f32>> {
    tracing::debug!("Encoding batch {:?} ({:?})", images.dim(), images.precision());

    let input_value: DynValue = match images {
        PixelBatch::Full(images) => Tensor::from_array(images).map(|tensor| tensor.into_dyn()),
        PixelBatch::Half(images) => Tensor::from_array(images).map(|tensor| tensor.into_dyn()),
    }
    .map_err(|source| Error::Inference { source })?;

    let outputs = encoder
        .run(ort::inputs![input_value])
        .map_err(|source| Error::Inference { source })?;

    // Get first output
    let output = outputs
        .values()
        .next()
        .ok_or_else(|| Error::ShapeMismatch {
            expected: "latent output".to_string(),
            actual: "no output".to_string(),
        })?;

    extract_array4(&output)
}

/// Decode latents back to image space using the VAE decoder.
///
/// # Arguments
///
/// * `decoder` - ONNX session for the VAE decoder
/// * `latent` - Scaled latent tensor in NCHW format
///
/// # Returns
///
/// Image tensor in NCHW format with values in [-1, 1].
///
/// # Errors
///
/// Returns an error if inference fails.
fn decode(decoder: &mut Session, latent: &LatentTensor) -> Result<ImageTensor> {
    tracing::debug!("Decoding latents {:?}", latent.dim());

    // Unscale latents
    let unscaled = latent / VAE_SCALE;

    let input_value =
        Tensor::from_array(unscaled).map_err(|source| Error::Inference { source })?;

    let outputs = decoder
        .run(ort::inputs![input_value])
        .map_err(|source| Error::Inference { source })?;

    // Get first output
    let output = outputs
        .values()
        .next()
        .ok_or_else(|| Error::ShapeMismatch {
            expected: "sample output".to_string(),
            actual: "no output".to_string(),
        })?;

    extract_array4(&output)
}

/// Extract a 4D `f32` array from an ONNX value, widening `f16` outputs.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn extract_array4(value: &ort::value::ValueRef<'_>) -> Result<Array4<f32>> {
    let (dims, data): (Vec<i64>, Vec<f32>) = match value.try_extract_tensor::<f32>() {
        Ok((shape, data)) => (shape.to_vec(), data.to_vec()),
        Err(_) => {
            let (shape, data) = value
                .try_extract_tensor::<f16>()
                .map_err(|source| Error::Inference { source })?;
            (shape.to_vec(), data.iter().map(|v| v.to_f32()).collect())
        }
    };

    // Safe: tensor dimensions are always non-negative and within bounds
    let dims: Vec<usize> = dims.iter().map(|&x| x as usize).collect();

    if dims.len() != 4 {
        return Err(Error::ShapeMismatch {
            expected: "4D tensor".to_string(),
            actual: format!("{}D tensor", dims.len()),
        });
    }

    Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]), data).map_err(|_| {
        Error::ShapeMismatch {
            expected: format!("{dims:?}"),
            actual: "reshape failed".to_string(),
        }
    })
}
