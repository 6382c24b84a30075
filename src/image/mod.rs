//! Image conversion, resizing, and annotation utilities.
//!
//! Everything here is a stateless conversion between [`image`] types and
//! [`ndarray`] tensors, except [`add_caption`], which draws onto an image in
//! place.

mod caption;
mod colorspace;
mod fit;
mod lazy;
mod load;
mod save;

pub use caption::{add_caption, CaptionStyle, DEFAULT_FONT_SIZE};
pub use colorspace::{bgr_to_image, image_to_bgr, reverse_channels};
pub use fit::{fit_image_within, ColorMode, FitOptions, DEFAULT_SNAP_SIZE};
pub use lazy::{resolve_image_inputs, ImageHandle, ImageInput, LazyImage};
pub use load::{image_to_tensor, load_image};
pub use save::{chw_to_image, save_image, tensor_to_image};

use ndarray::Array4;

/// Image tensor in NCHW format (batch, channels, height, width).
/// Values are normalized to [-1, 1] range for diffusion model compatibility.
pub type ImageTensor = Array4<f32>;

/// Standard image size for Stable Diffusion 1.5.
pub const SD_IMAGE_SIZE: u32 = 512;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;
