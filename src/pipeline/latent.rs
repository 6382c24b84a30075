//! Conversions between images and model latents.

use image::{DynamicImage, RgbImage};
use ndarray::Axis;

use crate::error::{Error, Result};
use crate::image::{chw_to_image, image_to_tensor};
use crate::model::{FirstStageModel, LatentTensor, PixelBatch, Precision};

/// Decode a batch of latents into one image per batch element.
///
/// The model output is clamped to [-1, 1], scaled to [0, 255] and truncated,
/// the same way [`tensor_to_image`](crate::image::tensor_to_image) does it.
/// Output order matches the batch order.
///
/// # Errors
///
/// Returns an error if decoding fails or the decoded tensor does not have
/// three channels.
pub fn latents_to_images<M>(model: &mut M, latents: &LatentTensor) -> Result<Vec<RgbImage>>
where
    M: FirstStageModel + ?Sized,
{
    let decoded = model.decode_first_stage(latents)?;

    tracing::debug!("Decoded latents {:?} -> {:?}", latents.dim(), decoded.dim());

    decoded.axis_iter(Axis(0)).map(chw_to_image).collect()
}

/// Encode an image into a batch of identical latents.
///
/// The image is normalized with [`image_to_tensor`], repeated `batch_size`
/// times along the batch axis, downcast for [`Precision::Half`], and passed
/// through the model's first stage. The image should already have
/// model-compatible dimensions.
///
/// # Errors
///
/// Returns an error if `batch_size` is zero or encoding fails.
pub fn image_to_latent<M>(
    model: &mut M,
    img: &DynamicImage,
    batch_size: usize,
    precision: Precision,
) -> Result<LatentTensor>
where
    M: FirstStageModel + ?Sized,
{
    if batch_size == 0 {
        return Err(Error::InvalidParameter {
            name: "batch_size".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    let tensor = image_to_tensor(img);
    let (_, channels, height, width) = tensor.dim();

    let batch = tensor
        .broadcast((batch_size, channels, height, width))
        .ok_or_else(|| Error::ShapeMismatch {
            expected: format!("({batch_size}, {channels}, {height}, {width})"),
            actual: format!("{:?}", tensor.shape()),
        })?
        .to_owned();

    let encoding = model.encode_first_stage(PixelBatch::new(batch, precision))?;
    model.get_first_stage_encoding(encoding)
}

#[cfg(test)]
mod tests {
    use image::Rgb;
    use ndarray::Array4;

    use super::*;
    use crate::image::ImageTensor;
    use crate::model::testing::ScriptedVae;

    /// Model double whose decoder returns a single channel.
    struct GrayVae;

    impl FirstStageModel for GrayVae {
        type Encoding = ();

        fn decode_first_stage(&mut self, latents: &LatentTensor) -> Result<ImageTensor> {
            let (batch, _, height, width) = latents.dim();
            Ok(Array4::zeros((batch, 1, height, width)))
        }

        fn encode_first_stage(&mut self, _images: PixelBatch) -> Result<()> {
            Ok(())
        }

        fn get_first_stage_encoding(&mut self, _encoding: ()) -> Result<LatentTensor> {
            Ok(Array4::zeros((1, 4, 1, 1)))
        }
    }

    #[test]
    fn test_latents_to_images_preserves_order() {
        let mut latents = Array4::<f32>::zeros((3, 4, 2, 2));
        for (b, value) in [-1.0, 0.0, 1.0].into_iter().enumerate() {
            latents.index_axis_mut(Axis(0), b).fill(value);
        }

        let images = latents_to_images(&mut ScriptedVae::default(), &latents).unwrap();

        assert_eq!(images.len(), 3);
        assert_eq!(images[0].get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(images[1].get_pixel(1, 1), &Rgb([127, 127, 127]));
        assert_eq!(images[2].get_pixel(0, 1), &Rgb([255, 255, 255]));
        assert!(images.iter().all(|img| img.dimensions() == (2, 2)));
    }

    #[test]
    fn test_latents_to_images_clamps() {
        let mut latents = Array4::<f32>::zeros((2, 4, 1, 1));
        latents[[0, 0, 0, 0]] = 5.0;
        latents[[1, 0, 0, 0]] = -5.0;

        let images = latents_to_images(&mut ScriptedVae::default(), &latents).unwrap();

        assert_eq!(images[0].get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(images[1].get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_latents_to_images_rejects_wrong_channels() {
        let latents = Array4::<f32>::zeros((1, 4, 2, 2));

        assert!(matches!(
            latents_to_images(&mut GrayVae, &latents),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_image_to_latent_replicates_batch() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(8, 4, Rgb([255, 0, 255])));
        let mut model = ScriptedVae::default();

        let latents = image_to_latent(&mut model, &img, 3, Precision::Full).unwrap();

        assert_eq!(latents.dim(), (3, 3, 4, 8));
        let first = latents.index_axis(Axis(0), 0).to_owned();
        for b in 1..3 {
            assert_eq!(latents.index_axis(Axis(0), b), first);
        }
        assert!((latents[[2, 0, 3, 7]] - 0.5).abs() < 1e-6);
        assert!((latents[[2, 1, 3, 7]] + 0.5).abs() < 1e-6);
        assert_eq!(model.encoded[0].precision(), Precision::Full);
    }

    #[test]
    fn test_image_to_latent_half_precision() {
        let img = DynamicImage::new_rgb8(8, 8);
        let mut model = ScriptedVae::default();

        image_to_latent(&mut model, &img, 2, Precision::Half).unwrap();

        assert_eq!(model.encoded.len(), 1);
        assert!(matches!(&model.encoded[0], PixelBatch::Half(batch) if batch.dim() == (2, 3, 8, 8)));
    }

    #[test]
    fn test_image_to_latent_rejects_zero_batch() {
        let img = DynamicImage::new_rgb8(8, 8);
        let mut model = ScriptedVae::default();

        assert!(matches!(
            image_to_latent(&mut model, &img, 0, Precision::Full),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(model.encoded.is_empty());
    }

    #[test]
    fn test_round_trip_through_identity_model() {
        let mut rgb = image::RgbImage::new(4, 4);
        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            let v = (x * 60 + y * 3) as u8;
            *pixel = Rgb([v, v, v]);
        }
        let img = DynamicImage::ImageRgb8(rgb.clone());
        let mut model = ScriptedVae::default();

        let latents = image_to_latent(&mut model, &img, 1, Precision::Full).unwrap();
        let decoded = latents_to_images(&mut model, &(latents * 2.0)).unwrap();

        for (a, b) in rgb.pixels().zip(decoded[0].pixels()) {
            assert!(a[0].abs_diff(b[0]) <= 1);
        }
    }
}
