//! In-memory first-stage model for tests.

use ndarray::Array4;

use crate::error::Result;
use crate::image::ImageTensor;

use super::{FirstStageModel, LatentTensor, PixelBatch};

/// Keeps spatial size: decoding copies latent channel 0 into RGB, encoding
/// halves the pixel values. Every encoded batch is recorded.
#[derive(Debug, Default)]
pub(crate) struct ScriptedVae {
    pub(crate) encoded: Vec<PixelBatch>,
}

impl FirstStageModel for ScriptedVae {
    type Encoding = Array4<f32>;

    fn decode_first_stage(&mut self, latents: &LatentTensor) -> Result<ImageTensor> {
        let (batch, _, height, width) = latents.dim();
        Ok(Array4::from_shape_fn(
            (batch, 3, height, width),
            |(b, _, y, x)| latents[[b, 0, y, x]],
        ))
    }

    fn encode_first_stage(&mut self, images: PixelBatch) -> Result<Array4<f32>> {
        self.encoded.push(images.clone());
        Ok(images.into_f32())
    }

    fn get_first_stage_encoding(&mut self, encoding: Array4<f32>) -> Result<LatentTensor> {
        Ok(encoding * 0.5)
    }
}
