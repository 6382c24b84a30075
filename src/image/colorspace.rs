//! Channel order conversion for OpenCV-style (BGR) consumers.

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use ndarray::{s, Array3};

use crate::error::{Error, Result};

/// Convert an image to an owned HWC array with the channel order reversed.
///
/// The image keeps its own channel count: RGB becomes BGR, RGBA becomes ABGR,
/// grayscale is left as is. Images with 16-bit or float channels are
/// brought to 8-bit first.
///
/// # Errors
///
/// Returns an error if the pixel buffer does not match the image dimensions.
pub fn image_to_bgr(img: &DynamicImage) -> Result<Array3<u8>> {
    let color = img.color();
    let (width, height) = (img.width() as usize, img.height() as usize);

    let (channels, raw) = match (color.has_color(), color.has_alpha()) {
        (false, false) => (1, img.to_luma8().into_raw()),
        (false, true) => (2, img.to_luma_alpha8().into_raw()),
        (true, false) => (3, img.to_rgb8().into_raw()),
        (true, true) => (4, img.to_rgba8().into_raw()),
    };

    let pixels = Array3::from_shape_vec((height, width, channels), raw).map_err(|err| {
        Error::ShapeMismatch {
            expected: format!("({height}, {width}, {channels})"),
            actual: err.to_string(),
        }
    })?;

    Ok(reverse_channels(&pixels))
}

/// Reverse the innermost (channel) axis of an HWC array.
///
/// Applying this twice returns the original array.
#[must_use]
pub fn reverse_channels(pixels: &Array3<u8>) -> Array3<u8> {
    let mut reversed = Array3::zeros(pixels.raw_dim());
    reversed.assign(&pixels.slice(s![.., .., ..;-1]));
    reversed
}

/// Rebuild an image from a channel-reversed HWC array.
///
/// This is the inverse of [`image_to_bgr`] for 1, 2, 3 and 4 channel arrays.
///
/// # Errors
///
/// Returns an error for any other channel count.
#[allow(clippy::cast_possible_truncation)]
pub fn bgr_to_image(pixels: &Array3<u8>) -> Result<DynamicImage> {
    let (height, width, channels) = pixels.dim();
    let raw: Vec<u8> = reverse_channels(pixels).iter().copied().collect();

    // Safe: dimensions come from an image-sized array and fit in u32
    let (width, height) = (width as u32, height as u32);

    let img = match channels {
        1 => GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8),
        2 => GrayAlphaImage::from_raw(width, height, raw).map(DynamicImage::ImageLumaA8),
        3 => RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(width, height, raw).map(DynamicImage::ImageRgba8),
        _ => None,
    };

    img.ok_or_else(|| Error::ShapeMismatch {
        expected: "1, 2, 3 or 4 channels".to_string(),
        actual: format!("{channels} channels"),
    })
}
