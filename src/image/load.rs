//! Image loading and image-to-tensor conversion.

use std::path::Path;

use image::DynamicImage;
use ndarray::Array4;

use crate::error::{Error, Result};

use super::{ImageTensor, RGB_CHANNELS};

/// Load an image from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();

    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(
        "Loaded {} ({}x{}, {:?})",
        path.display(),
        img.width(),
        img.height(),
        img.color()
    );

    Ok(img)
}

/// Convert an image to a normalized NCHW tensor.
///
/// The image is:
/// 1. Converted to RGB
/// 2. Scaled from [0, 255] to [0, 1]
/// 3. Laid out as (1, 3, height, width)
/// 4. Mapped to [-1, 1] via `2x - 1`
///
/// The image keeps its size; use [`fit_image_within`](super::fit_image_within)
/// first to get model-compatible dimensions.
pub fn image_to_tensor(img: &DynamicImage) -> ImageTensor {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut tensor = Array4::<f32>::zeros((1, RGB_CHANNELS, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..RGB_CHANNELS {
            tensor[[0, c, y, x]] = normalize(pixel[c]);
        }
    }

    tensor
}

/// Normalize a channel value from [0, 255] to [-1, 1].
#[inline]
fn normalize(value: u8) -> f32 {
    (f32::from(value) / 255.0).mul_add(2.0, -1.0)
}
