//! Fit images to model-compatible dimensions.

use image::{imageops::FilterType, DynamicImage, GenericImageView};

use crate::error::{Error, Result};

use super::SD_IMAGE_SIZE;

/// Default divisor that output dimensions are truncated to.
///
/// The SD VAE downsamples by 8, so both sides must be multiples of it.
pub const DEFAULT_SNAP_SIZE: u32 = 8;

/// Color mode an image is converted to before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// 8-bit grayscale.
    Luma,
    /// 8-bit grayscale with alpha.
    LumaAlpha,
    /// 8-bit RGB.
    #[default]
    Rgb,
    /// 8-bit RGB with alpha.
    Rgba,
}

impl ColorMode {
    /// Convert an image to this color mode.
    #[must_use]
    pub fn convert(self, img: &DynamicImage) -> DynamicImage {
        match self {
            Self::Luma => DynamicImage::ImageLuma8(img.to_luma8()),
            Self::LumaAlpha => DynamicImage::ImageLumaA8(img.to_luma_alpha8()),
            Self::Rgb => DynamicImage::ImageRgb8(img.to_rgb8()),
            Self::Rgba => DynamicImage::ImageRgba8(img.to_rgba8()),
        }
    }
}

/// Bounds and snapping used by [`fit_image_within`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOptions {
    /// Maximum output width in pixels.
    pub max_width: u32,

    /// Maximum output height in pixels.
    pub max_height: u32,

    /// Color mode of the returned image.
    pub color: ColorMode,

    /// Output dimensions are truncated down to a multiple of this value.
    pub snap_size: u32,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_width: SD_IMAGE_SIZE,
            max_height: SD_IMAGE_SIZE,
            color: ColorMode::Rgb,
            snap_size: DEFAULT_SNAP_SIZE,
        }
    }
}

/// Scale an image to fit the given bounds, snapping both sides to `snap_size`.
///
/// The image is:
/// 1. Converted to `options.color`
/// 2. Shrunk by the smaller ratio if either side exceeds its bound, or
///    enlarged by the larger ratio if both sides are strictly smaller
/// 3. Truncated down to a multiple of `options.snap_size` on each side
/// 4. Resized with Lanczos3, unless the size is already correct
///
/// # Errors
///
/// Returns an error if `snap_size` is zero or the fitted size has zero area.
pub fn fit_image_within(img: &DynamicImage, options: &FitOptions) -> Result<DynamicImage> {
    if options.snap_size == 0 {
        return Err(Error::InvalidParameter {
            name: "snap_size".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    let image = options.color.convert(img);
    let (width, height) = image.dimensions();

    if width == 0 || height == 0 {
        return Err(Error::UnsupportedDimensions {
            width,
            height,
            reason: "image has zero area".to_string(),
        });
    }

    let (new_width, new_height) = fitted_dimensions(width, height, options);

    if new_width == 0 || new_height == 0 {
        return Err(Error::UnsupportedDimensions {
            width,
            height,
            reason: format!("fitted size {new_width}x{new_height} has zero area"),
        });
    }

    if (new_width, new_height) == (width, height) {
        return Ok(image);
    }

    tracing::debug!("Resizing {width}x{height} -> {new_width}x{new_height}");
    Ok(image.resize_exact(new_width, new_height, FilterType::Lanczos3))
}

/// Compute the fitted size before any resampling happens.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fitted_dimensions(width: u32, height: u32, options: &FitOptions) -> (u32, u32) {
    let (w, h) = (f64::from(width), f64::from(height));
    let (max_w, max_h) = (f64::from(options.max_width), f64::from(options.max_height));

    let ratio = if width > options.max_width || height > options.max_height {
        (max_w / w).min(max_h / h)
    } else if width < options.max_width && height < options.max_height {
        (max_w / w).max(max_h / h)
    } else {
        1.0
    };

    // Safe: ratio is finite and non-negative, truncation is intended
    let new_width = (w * ratio) as u32;
    let new_height = (h * ratio) as u32;

    (
        new_width - new_width % options.snap_size,
        new_height - new_height % options.snap_size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit_dims(width: u32, height: u32) -> (u32, u32) {
        let img = DynamicImage::new_rgb8(width, height);
        fit_image_within(&img, &FitOptions::default())
            .unwrap()
            .dimensions()
    }

    #[test]
    fn test_shrinks_wide_image() {
        assert_eq!(fit_dims(1000, 500), (512, 256));
    }

    #[test]
    fn test_enlarges_small_image() {
        assert_eq!(fit_dims(100, 100), (512, 512));
    }

    #[test]
    fn test_enlarges_aligned_image_within_bounds() {
        assert_eq!(fit_dims(256, 256), (512, 512));
    }

    #[test]
    fn test_enlarge_fills_larger_ratio() {
        // max(512 / 100, 512 / 50) = 10.24
        assert_eq!(fit_dims(100, 50), (1024, 512));
    }

    #[test]
    fn test_exact_bounds_unchanged() {
        assert_eq!(fit_dims(512, 512), (512, 512));
        assert_eq!(fit_dims(512, 256), (512, 256));
    }

    #[test]
    fn test_snaps_down_to_multiple() {
        // 700 * 0.512 = 358.4 -> 358 -> 352
        assert_eq!(fit_dims(1000, 700), (512, 352));
    }

    #[test]
    fn test_idempotent_on_fitted_output() {
        let img = DynamicImage::new_rgb8(1000, 500);
        let options = FitOptions::default();
        let once = fit_image_within(&img, &options).unwrap();
        let twice = fit_image_within(&once, &options).unwrap();
        assert_eq!(once.dimensions(), twice.dimensions());
    }

    #[test]
    fn test_converts_color_mode() {
        let img = DynamicImage::new_rgba8(512, 512);
        let fitted = fit_image_within(&img, &FitOptions::default()).unwrap();
        assert_eq!(fitted.color(), image::ColorType::Rgb8);

        let options = FitOptions {
            color: ColorMode::Luma,
            ..FitOptions::default()
        };
        let gray = fit_image_within(&img, &options).unwrap();
        assert_eq!(gray.color(), image::ColorType::L8);
    }

    #[test]
    fn test_custom_snap_size() {
        let img = DynamicImage::new_rgb8(1000, 700);
        let options = FitOptions {
            snap_size: 64,
            ..FitOptions::default()
        };
        let fitted = fit_image_within(&img, &options).unwrap();
        assert_eq!(fitted.dimensions(), (512, 320));
    }

    #[test]
    fn test_zero_snap_size_rejected() {
        let img = DynamicImage::new_rgb8(10, 10);
        let options = FitOptions {
            snap_size: 0,
            ..FitOptions::default()
        };
        assert!(matches!(
            fit_image_within(&img, &options),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_degenerate_aspect_rejected() {
        let img = DynamicImage::new_rgb8(1, 1000);
        assert!(matches!(
            fit_image_within(&img, &FitOptions::default()),
            Err(Error::UnsupportedDimensions { .. })
        ));
    }
}
