//! Model backends - ONNX Runtime integration
//!
//! A backend turns a `(1, window, CHANNEL_COUNT)` tensor into raw outputs.
//! Interpretation (softmax, thresholds, labels) lives in `inference`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ndarray::Array3;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use serde::{Deserialize, Serialize};

use super::inference::{InferenceError, NormalizationParams};
use super::loader::ModelLoadError;

/// Artifact kinds the loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFormat {
    Onnx,
    QuantizedLinear,
}

/// Optional header shipped with a model (inline for quantized
/// artifacts, `<stem>.meta.json` next to ONNX files)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Samples per window the model was trained on
    #[serde(default)]
    pub window: Option<usize>,
    /// Channel layout hash at training time
    #[serde(default)]
    pub layout_hash: Option<u32>,
    #[serde(default)]
    pub normalization: Option<NormalizationParams>,
}

/// Description of a loaded model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub format: ModelFormat,
    pub path: PathBuf,
    pub sha256: String,
    pub window: usize,
    /// Output count when the artifact declares it
    pub outputs: Option<usize>,
    pub normalization: Option<NormalizationParams>,
    pub loaded_at: DateTime<Utc>,
}

/// Loaded, ready-to-run model
pub trait ModelBackend {
    fn info(&self) -> &ModelInfo;

    /// Raw model outputs for one input tensor
    fn run(&mut self, input: Array3<f32>) -> Result<Vec<f32>, InferenceError>;
}

// ============================================================================
// ONNX IMPLEMENTATION
// ============================================================================

pub struct OnnxModel {
    session: Session,
    output_name: String,
    info: ModelInfo,
}

impl OnnxModel {
    /// Build a session from verified model bytes
    pub fn from_memory(model_bytes: &[u8], info: ModelInfo) -> Result<Self, ModelLoadError> {
        log::info!("Loading ONNX model from memory ({} bytes)", model_bytes.len());

        let session = Session::builder()
            .map_err(|e| ModelLoadError::Backend(format!("Session builder error: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelLoadError::Backend(format!("Optimization error: {}", e)))?
            .commit_from_memory(model_bytes)
            .map_err(|e| ModelLoadError::Backend(format!("Load from memory error: {}", e)))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelLoadError::Format("model defines no outputs".to_string()))?;

        Ok(Self {
            session,
            output_name,
            info,
        })
    }
}

impl ModelBackend for OnnxModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn run(&mut self, input: Array3<f32>) -> Result<Vec<f32>, InferenceError> {
        let input_tensor = Value::from_array(input)
            .map_err(|e| InferenceError::Backend(format!("Tensor error: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| InferenceError::Backend(format!("Inference failed: {}", e)))?;

        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| InferenceError::Backend("No output".to_string()))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Backend(format!("Extract error: {}", e)))?;

        Ok(data.to_vec())
    }
}
