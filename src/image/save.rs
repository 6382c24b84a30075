//! Tensor-to-image conversion and image saving utilities.

use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{ArrayView3, Axis};

use crate::error::{Error, Result};

use super::{ImageTensor, RGB_CHANNELS};

/// Save an image file.
///
/// The format is inferred from the extension (PNG when there is none).
/// JPEG output is written as RGB with the given quality.
///
/// # Arguments
///
/// * `img` - Image to save
/// * `path` - Output file path
/// * `quality` - JPEG quality (1-100), ignored for other formats
///
/// # Errors
///
/// Returns an error if the image cannot be saved.
pub fn save_image<P: AsRef<Path>>(img: &DynamicImage, path: P, quality: u8) -> Result<()> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => {
            let mut output = std::fs::File::create(path)?;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        _ => {
            img.save(path).map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    tracing::debug!("Saved {}", path.display());
    Ok(())
}

/// Convert the first element of a normalized NCHW tensor to an RGB image.
///
/// Values are mapped from [-1, 1] to [0, 255]; anything outside that range is
/// clipped, never rejected.
///
/// # Errors
///
/// Returns an error if the batch is empty or the tensor does not have
/// three channels.
pub fn tensor_to_image(tensor: &ImageTensor) -> Result<RgbImage> {
    if tensor.len_of(Axis(0)) == 0 {
        return Err(Error::ShapeMismatch {
            expected: "at least one batch element".to_string(),
            actual: format!("{:?}", tensor.shape()),
        });
    }

    chw_to_image(tensor.index_axis(Axis(0), 0))
}

/// Convert a single normalized CHW tensor to an RGB image.
///
/// # Errors
///
/// Returns an error if the tensor does not have three channels.
#[allow(clippy::cast_possible_truncation)]
pub fn chw_to_image(tensor: ArrayView3<'_, f32>) -> Result<RgbImage> {
    let (channels, height, width) = tensor.dim();

    if channels != RGB_CHANNELS {
        return Err(Error::ShapeMismatch {
            expected: format!("{RGB_CHANNELS} channels"),
            actual: format!("{channels} channels"),
        });
    }

    // Safe: dimensions come from an image-sized tensor and fit in u32
    let mut img = RgbImage::new(width as u32, height as u32);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        *pixel = Rgb([
            denormalize(tensor[[0, y, x]]),
            denormalize(tensor[[1, y, x]]),
            denormalize(tensor[[2, y, x]]),
        ]);
    }

    Ok(img)
}

/// Denormalize a value from [-1, 1] to [0, 255] with clamping.
///
/// The scaled value is truncated toward zero. Every decoding path shares this
/// rounding rule.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn denormalize(value: f32) -> u8 {
    // Safe: clamped to [0, 1] before scaling and casting
    let unit = ((value + 1.0) / 2.0).clamp(0.0, 1.0);
    (unit * 255.0) as u8
}

#[cfg(test)]
mod tests {
    use image::GenericImageView;
    use ndarray::Array4;

    use super::super::image_to_tensor;
    use super::*;

    #[test]
    fn test_denormalize() {
        assert_eq!(denormalize(-1.0), 0);
        assert_eq!(denormalize(0.0), 127);
        assert_eq!(denormalize(1.0), 255);
    }

    #[test]
    fn test_denormalize_clamp() {
        assert_eq!(denormalize(-5.0), 0);
        assert_eq!(denormalize(5.0), 255);
        assert_eq!(denormalize(f32::NAN), 0);
    }

    #[test]
    fn test_tensor_to_image_dimensions() {
        let tensor = Array4::<f32>::zeros((2, 3, 24, 40));
        let img = tensor_to_image(&tensor).unwrap();
        assert_eq!(img.dimensions(), (40, 24));
        assert_eq!(img.get_pixel(0, 0), &Rgb([127, 127, 127]));
    }

    #[test]
    fn test_tensor_to_image_uses_first_element() {
        let mut tensor = Array4::<f32>::from_elem((2, 3, 1, 1), -1.0);
        tensor[[1, 0, 0, 0]] = 1.0;
        let img = tensor_to_image(&tensor).unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_out_of_range_values_clipped() {
        let mut tensor = Array4::<f32>::zeros((1, 3, 1, 2));
        tensor.slice_mut(ndarray::s![0, .., 0, 0]).fill(5.0);
        tensor.slice_mut(ndarray::s![0, .., 0, 1]).fill(-5.0);
        let img = tensor_to_image(&tensor).unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(1, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_wrong_channel_count() {
        let tensor = Array4::<f32>::zeros((1, 4, 8, 8));
        assert!(matches!(
            tensor_to_image(&tensor),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_batch() {
        let tensor = Array4::<f32>::zeros((0, 3, 8, 8));
        assert!(matches!(
            tensor_to_image(&tensor),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_round_trip_within_truncation() {
        let mut rgb = RgbImage::new(16, 16);
        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            let v = (y * 16 + x) as u8;
            *pixel = Rgb([v, 255 - v, v.wrapping_mul(7)]);
        }
        let original = DynamicImage::ImageRgb8(rgb.clone());

        let decoded = tensor_to_image(&image_to_tensor(&original)).unwrap();

        for (a, b) in rgb.pixels().zip(decoded.pixels()) {
            for c in 0..3 {
                assert!(a[c].abs_diff(b[c]) <= 1, "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn test_save_png_and_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let img = DynamicImage::new_rgba8(8, 8);

        let png = dir.path().join("out.png");
        save_image(&img, &png, 90).unwrap();
        assert_eq!(image::open(&png).unwrap().dimensions(), (8, 8));

        let jpg = dir.path().join("out.jpg");
        save_image(&img, &jpg, 90).unwrap();
        assert_eq!(image::open(&jpg).unwrap().color(), image::ColorType::Rgb8);
    }
}
