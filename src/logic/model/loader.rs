//! Model loading
//!
//! Runs once at boot. The artifact is read fully, hashed (and checked
//! against the configured SHA-256 when one is set), then handed to the
//! backend matching its extension. Any failure here disables inference
//! for the session.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use super::backend::{ModelBackend, ModelFormat, ModelInfo, ModelMetadata, OnnxModel};
use super::quantized::QuantizedLinearModel;
use crate::logic::sampling::layout_hash;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model not found: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("unsupported model format: {0:?}")]
    UnsupportedFormat(String),

    #[error("invalid model artifact: {0}")]
    Format(String),

    #[error("channel layout mismatch: device {expected:08x}, model {actual:08x}")]
    LayoutMismatch { expected: u32, actual: u32 },

    #[error("model window {actual} does not match configured window {expected}")]
    WindowMismatch { expected: usize, actual: usize },

    #[error("model has {outputs} outputs but {labels} labels are configured")]
    LabelMismatch { outputs: usize, labels: usize },

    #[error("runtime error: {0}")]
    Backend(String),
}

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Load and verify the model for a `window`-sample input
pub fn load_model(
    path: &Path,
    expected_sha256: Option<&str>,
    window: usize,
) -> Result<Box<dyn ModelBackend>, ModelLoadError> {
    log::info!("Loading model from: {:?}", path);

    if !path.exists() {
        return Err(ModelLoadError::NotFound(path.to_path_buf()));
    }

    let bytes = fs::read(path).map_err(|source| ModelLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let digest = sha256_hex(&bytes);
    if let Some(expected) = expected_sha256 {
        if !expected.trim().eq_ignore_ascii_case(&digest) {
            return Err(ModelLoadError::ChecksumMismatch {
                expected: expected.trim().to_lowercase(),
                actual: digest,
            });
        }
        log::info!("Model checksum verified");
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let backend: Box<dyn ModelBackend> = match extension.as_str() {
        "json" => {
            let model = QuantizedLinearModel::from_bytes(&bytes, path, digest)?;
            check_layout(model.metadata())?;
            Box::new(model)
        }
        "onnx" => {
            let metadata = read_sidecar(path)?;
            check_layout(&metadata)?;

            let info = ModelInfo {
                name: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "onnx".to_string()),
                format: ModelFormat::Onnx,
                path: path.to_path_buf(),
                sha256: digest,
                window: metadata.window.unwrap_or(window),
                outputs: None,
                normalization: metadata.normalization,
                loaded_at: Utc::now(),
            };
            Box::new(OnnxModel::from_memory(&bytes, info)?)
        }
        other => return Err(ModelLoadError::UnsupportedFormat(other.to_string())),
    };

    let model_window = backend.info().window;
    if model_window != window {
        return Err(ModelLoadError::WindowMismatch {
            expected: window,
            actual: model_window,
        });
    }

    log::info!(
        "Model loaded: {} ({:?}, window={}, sha256={})",
        backend.info().name,
        backend.info().format,
        model_window,
        backend.info().sha256.get(..12).unwrap_or_default()
    );

    Ok(backend)
}

/// `<stem>.meta.json` next to an ONNX file; absent means defaults
fn read_sidecar(path: &Path) -> Result<ModelMetadata, ModelLoadError> {
    let sidecar = path.with_extension("meta.json");
    if !sidecar.exists() {
        return Ok(ModelMetadata::default());
    }

    let content = fs::read(&sidecar).map_err(|source| ModelLoadError::Io {
        path: sidecar.clone(),
        source,
    })?;

    serde_json::from_slice(&content)
        .map_err(|e| ModelLoadError::Format(format!("{:?}: {}", sidecar, e)))
}

fn check_layout(metadata: &ModelMetadata) -> Result<(), ModelLoadError> {
    match metadata.layout_hash {
        Some(actual) if actual != layout_hash() => Err(ModelLoadError::LayoutMismatch {
            expected: layout_hash(),
            actual,
        }),
        _ => Ok(()),
    }
}
