//! VAE model downloading and session loading.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::Session;

use crate::error::{Error, Result};

use super::Device;

/// First-stage models used by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// VAE Encoder - encodes images to latent space.
    VaeEncoder,
    /// VAE Decoder - decodes latents to images.
    VaeDecoder,
}

impl ModelType {
    /// Get the filename for this model type.
    #[must_use]
    pub const fn filename(&self) -> &'static str {
        match self {
            Self::VaeEncoder => "vae_encoder.onnx",
            Self::VaeDecoder => "vae_decoder.onnx",
        }
    }

    /// Get the download URL for this model type.
    /// Using modularai's ONNX exports of Stable Diffusion 1.5 (publicly available).
    #[must_use]
    pub const fn url(&self) -> &'static str {
        match self {
            Self::VaeEncoder => {
                "https://huggingface.co/modularai/stable-diffusion-1.5-onnx/resolve/main/vae_encoder/model.onnx"
            }
            Self::VaeDecoder => {
                "https://huggingface.co/modularai/stable-diffusion-1.5-onnx/resolve/main/vae_decoder/model.onnx"
            }
        }
    }

    /// Get the approximate size in bytes for progress indication.
    #[must_use]
    pub const fn approx_size(&self) -> u64 {
        match self {
            Self::VaeEncoder => 140_000_000, // ~140 MB
            Self::VaeDecoder => 100_000_000, // ~100 MB
        }
    }
}

/// Manages the model cache directory and downloads.
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a model cache in the platform cache directory.
    ///
    /// - Windows: `%LOCALAPPDATA%\latentkit\models`
    /// - Linux: `~/.cache/latentkit/models`
    /// - macOS: `~/Library/Caches/latentkit/models`
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new() -> Result<Self> {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_dir(base.join("latentkit").join("models"))
    }

    /// Create a model cache rooted at `cache_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_dir<P: Into<PathBuf>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.into();

        fs::create_dir_all(&cache_dir).map_err(|source| Error::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;

        Ok(Self { cache_dir })
    }

    /// Directory model files are stored in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the path to a model file, downloading if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be downloaded or accessed.
    pub fn get_model_path(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.cache_dir.join(model_type.filename());

        if !path.exists() {
            download_model(model_type, &path)?;
        }

        Ok(path)
    }

    /// Load an ONNX model session on the given device.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded or the device is unavailable.
    pub fn load_session(&self, model_type: ModelType, device: Device) -> Result<Session> {
        let path = self.get_model_path(model_type)?;
        let model_error = |source| Error::ModelLoad {
            name: model_type.filename().to_string(),
            source,
        };

        tracing::debug!("Creating {} session on {device}", model_type.filename());

        Session::builder()
            .map_err(model_error)?
            .with_execution_providers([execution_provider(device)])
            .map_err(model_error)?
            .commit_from_file(&path)
            .map_err(model_error)
    }
}

/// Map a device to its ONNX Runtime execution provider.
fn execution_provider(device: Device) -> ExecutionProviderDispatch {
    match device {
        Device::Cpu => CPUExecutionProvider::default().build(),
        Device::Cuda(id) => CUDAExecutionProvider::default()
            .with_device_id(id)
            .build()
            .error_on_failure(),
    }
}

/// Download a model to the specified path.
fn download_model(model_type: ModelType, path: &Path) -> Result<()> {
    download_file(
        model_type.url(),
        path,
        model_type.filename(),
        model_type.approx_size(),
    )
}

/// Download a file from a URL to a path with progress indication.
fn download_file(url: &str, path: &Path, name: &str, approx_size: u64) -> Result<()> {
    tracing::info!("Downloading {name} from {url}");

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|source| Error::ModelDownload {
            name: name.to_string(),
            source,
        })?;

    let total_size = response.content_length().unwrap_or(approx_size);

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {name}"));

    match write_atomically(response, path, &pb) {
        Ok(()) => {
            pb.finish_with_message(format!("Downloaded {name}"));
            Ok(())
        }
        Err(err) => {
            pb.abandon_with_message(format!("Failed to download {name}"));
            Err(err)
        }
    }
}

/// Stream `reader` into `path` through a temporary sibling file.
///
/// The temporary file is renamed into place on success and removed on failure,
/// so `path` only ever holds a complete download.
fn write_atomically<R: Read>(reader: R, path: &Path, pb: &ProgressBar) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    if let Err(err) = stream_to_file(reader, &temp_path, pb) {
        if let Err(cleanup) = fs::remove_file(&temp_path) {
            tracing::warn!("Could not remove {}: {cleanup}", temp_path.display());
        }
        return Err(err);
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Copy `reader` into a new file at `path`, advancing `pb` per chunk.
fn stream_to_file<R: Read>(mut reader: R, path: &Path, pb: &ProgressBar) -> Result<()> {
    let mut file = fs::File::create(path)?;

    let mut downloaded = 0u64;
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
        pb.set_position(downloaded);
    }

    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_filenames_are_distinct() {
        assert_ne!(
            ModelType::VaeEncoder.filename(),
            ModelType::VaeDecoder.filename()
        );
        assert!(ModelType::VaeEncoder.url().ends_with(".onnx"));
        assert!(ModelType::VaeDecoder.url().contains("vae_decoder"));
    }

    #[test]
    fn test_cache_with_dir_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("models");

        let cache = ModelCache::with_dir(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(cache.dir(), dir.as_path());
    }

    #[test]
    fn test_cached_model_is_not_downloaded() {
        let root = tempfile::tempdir().unwrap();
        let cache = ModelCache::with_dir(root.path()).unwrap();
        let existing = root.path().join(ModelType::VaeDecoder.filename());
        std::fs::write(&existing, b"placeholder").unwrap();

        assert_eq!(cache.get_model_path(ModelType::VaeDecoder).unwrap(), existing);
    }

    /// Yields `chunks` successful reads, then fails.
    struct FailingReader {
        chunks: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.chunks == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ));
            }
            self.chunks -= 1;
            buf[..4].copy_from_slice(b"onnx");
            Ok(4)
        }
    }

    #[test]
    fn test_write_atomically_renames_into_place() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("vae_decoder.onnx");

        write_atomically(&b"weights"[..], &path, &ProgressBar::hidden()).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"weights");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_failed_download_leaves_no_partial_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("vae_decoder.onnx");

        let result = write_atomically(FailingReader { chunks: 2 }, &path, &ProgressBar::hidden());

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!path.exists());
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
