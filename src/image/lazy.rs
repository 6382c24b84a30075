//! Deferred image loading and path resolution for batches of inputs.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use image::DynamicImage;

use crate::error::Result;

use super::load_image;

/// An image that is read from disk the first time its pixels are needed.
///
/// The decoded image is cached, so later accesses are free.
#[derive(Debug, Clone)]
pub struct LazyImage {
    path: PathBuf,
    image: OnceCell<DynamicImage>,
}

impl LazyImage {
    /// Create a reference to the image at `path` without reading it.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            image: OnceCell::new(),
        }
    }

    /// Path the image is loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the image has already been decoded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.image.get().is_some()
    }

    /// Get the image, loading it on first access.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded. A failed load
    /// is not cached and will be retried on the next access.
    pub fn image(&self) -> Result<&DynamicImage> {
        if let Some(img) = self.image.get() {
            return Ok(img);
        }

        tracing::debug!("Loading deferred image {}", self.path.display());
        let img = load_image(&self.path)?;
        Ok(self.image.get_or_init(|| img))
    }

    /// Consume the reference and return the loaded image.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn into_image(self) -> Result<DynamicImage> {
        match self.image.into_inner() {
            Some(img) => Ok(img),
            None => load_image(&self.path),
        }
    }
}

/// An image that is either already in memory or loaded on demand.
#[derive(Debug, Clone)]
pub enum ImageHandle {
    /// Decoded image held in memory.
    Loaded(DynamicImage),
    /// Image read from disk on first access.
    Lazy(LazyImage),
}

impl ImageHandle {
    /// Get the image, loading it if this is a lazy handle.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy image cannot be loaded.
    pub fn image(&self) -> Result<&DynamicImage> {
        match self {
            Self::Loaded(img) => Ok(img),
            Self::Lazy(lazy) => lazy.image(),
        }
    }

    /// Image width and height.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy image cannot be loaded.
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        let img = self.image()?;
        Ok((img.width(), img.height()))
    }

    /// Image width.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy image cannot be loaded.
    pub fn width(&self) -> Result<u32> {
        Ok(self.image()?.width())
    }

    /// Image height.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy image cannot be loaded.
    pub fn height(&self) -> Result<u32> {
        Ok(self.image()?.height())
    }

    /// Source path for lazy handles.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Loaded(_) => None,
            Self::Lazy(lazy) => Some(lazy.path()),
        }
    }

    /// Consume the handle and return the image.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy image cannot be loaded.
    pub fn into_image(self) -> Result<DynamicImage> {
        match self {
            Self::Loaded(img) => Ok(img),
            Self::Lazy(lazy) => lazy.into_image(),
        }
    }
}

impl From<DynamicImage> for ImageHandle {
    fn from(img: DynamicImage) -> Self {
        Self::Loaded(img)
    }
}

impl From<LazyImage> for ImageHandle {
    fn from(lazy: LazyImage) -> Self {
        Self::Lazy(lazy)
    }
}

/// One entry of a batch of images: a file path or an image handle.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Path to an image file.
    Path(PathBuf),
    /// An image that is already resolved.
    Image(ImageHandle),
}

impl From<&str> for ImageInput {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<String> for ImageInput {
    fn from(path: String) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for ImageInput {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ImageInput {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<ImageHandle> for ImageInput {
    fn from(handle: ImageHandle) -> Self {
        Self::Image(handle)
    }
}

impl From<DynamicImage> for ImageInput {
    fn from(img: DynamicImage) -> Self {
        Self::Image(ImageHandle::Loaded(img))
    }
}

impl From<LazyImage> for ImageInput {
    fn from(lazy: LazyImage) -> Self {
        Self::Image(ImageHandle::Lazy(lazy))
    }
}

/// Resolve a batch of inputs into image handles.
///
/// Paths become [`LazyImage`] references and handles pass through unchanged.
/// Order and length are preserved and nothing is read from disk.
pub fn resolve_image_inputs<I>(inputs: I) -> Vec<ImageHandle>
where
    I: IntoIterator,
    I::Item: Into<ImageInput>,
{
    inputs
        .into_iter()
        .map(|input| match input.into() {
            ImageInput::Path(path) => ImageHandle::Lazy(LazyImage::new(path)),
            ImageInput::Image(handle) => handle,
        })
        .collect()
}
