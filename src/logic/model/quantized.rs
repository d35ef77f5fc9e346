//! Quantized linear classifier
//!
//! Small int8 model for targets without an ONNX runtime. The artifact is
//! JSON: one weight row per output over the flattened window, a shared
//! scale and zero point, and one float bias per output.
//!
//! `logit_k = bias_k + scale * sum_j (w_kj - zero_point) * x_j`

use std::path::Path;

use chrono::Utc;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use super::backend::{ModelBackend, ModelFormat, ModelInfo, ModelMetadata};
use super::inference::InferenceError;
use super::loader::ModelLoadError;
use crate::logic::sampling::CHANNEL_COUNT;

/// On-disk form of the quantized model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedArtifact {
    pub name: String,
    #[serde(flatten)]
    pub metadata: ModelMetadata,
    pub channels: usize,
    pub scale: f32,
    #[serde(default)]
    pub zero_point: i8,
    pub weights: Vec<Vec<i8>>,
    pub bias: Vec<f32>,
}

impl QuantizedArtifact {
    fn validate(&self) -> Result<usize, ModelLoadError> {
        let window = self
            .metadata
            .window
            .ok_or_else(|| ModelLoadError::Format("quantized model must declare its window".to_string()))?;

        if self.channels != CHANNEL_COUNT {
            return Err(ModelLoadError::Format(format!(
                "model expects {} channels, device provides {}",
                self.channels, CHANNEL_COUNT
            )));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(ModelLoadError::Format(format!("invalid scale {}", self.scale)));
        }
        if self.weights.is_empty() {
            return Err(ModelLoadError::Format("model has no outputs".to_string()));
        }
        if self.bias.len() != self.weights.len() {
            return Err(ModelLoadError::Format(format!(
                "{} weight rows but {} biases",
                self.weights.len(),
                self.bias.len()
            )));
        }

        let width = window * self.channels;
        if let Some((row, w)) = self.weights.iter().enumerate().find(|(_, w)| w.len() != width) {
            return Err(ModelLoadError::Format(format!(
                "weight row {} has {} entries, expected {}",
                row,
                w.len(),
                width
            )));
        }

        Ok(window)
    }
}

pub struct QuantizedLinearModel {
    artifact: QuantizedArtifact,
    info: ModelInfo,
}

impl QuantizedLinearModel {
    pub fn from_artifact(
        artifact: QuantizedArtifact,
        path: &Path,
        sha256: String,
    ) -> Result<Self, ModelLoadError> {
        let window = artifact.validate()?;

        let info = ModelInfo {
            name: artifact.name.clone(),
            format: ModelFormat::QuantizedLinear,
            path: path.to_path_buf(),
            sha256,
            window,
            outputs: Some(artifact.weights.len()),
            normalization: artifact.metadata.normalization.clone(),
            loaded_at: Utc::now(),
        };

        Ok(Self { artifact, info })
    }

    pub fn from_bytes(bytes: &[u8], path: &Path, sha256: String) -> Result<Self, ModelLoadError> {
        let artifact: QuantizedArtifact =
            serde_json::from_slice(bytes).map_err(|e| ModelLoadError::Format(e.to_string()))?;
        Self::from_artifact(artifact, path, sha256)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.artifact.metadata
    }
}

impl ModelBackend for QuantizedLinearModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn run(&mut self, input: Array3<f32>) -> Result<Vec<f32>, InferenceError> {
        let expected = self.info.window * self.artifact.channels;
        if input.len() != expected {
            return Err(InferenceError::Backend(format!(
                "input has {} values, model expects {}",
                input.len(),
                expected
            )));
        }

        let zero_point = self.artifact.zero_point as i32;
        let scale = self.artifact.scale;

        let logits = self
            .artifact
            .weights
            .iter()
            .zip(&self.artifact.bias)
            .map(|(row, bias)| {
                let acc: f32 = row
                    .iter()
                    .zip(input.iter())
                    .map(|(&w, &x)| (w as i32 - zero_point) as f32 * x)
                    .sum();
                bias + scale * acc
            })
            .collect();

        Ok(logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(window: usize, rows: Vec<Vec<i8>>, bias: Vec<f32>) -> QuantizedArtifact {
        QuantizedArtifact {
            name: "test-linear".to_string(),
            metadata: ModelMetadata {
                window: Some(window),
                layout_hash: None,
                normalization: None,
            },
            channels: CHANNEL_COUNT,
            scale: 0.5,
            zero_point: 0,
            weights: rows,
            bias,
        }
    }

    #[test]
    fn test_linear_forward() {
        let width = 2 * CHANNEL_COUNT;
        let model_artifact = artifact(2, vec![vec![1; width], vec![-2; width]], vec![0.0, 1.0]);
        let mut model =
            QuantizedLinearModel::from_artifact(model_artifact, Path::new("m.json"), String::new()).unwrap();

        let input = Array3::<f32>::from_elem((1, 2, CHANNEL_COUNT), 1.0);
        let out = model.run(input).unwrap();

        // row 0: 0.5 * 8 = 4; row 1: 1 + 0.5 * -16 = -7
        assert_eq!(out, vec![4.0, -7.0]);
    }

    #[test]
    fn test_zero_point_applied() {
        let width = CHANNEL_COUNT;
        let mut model_artifact = artifact(1, vec![vec![3; width]], vec![0.0]);
        model_artifact.zero_point = 3;
        let mut model =
            QuantizedLinearModel::from_artifact(model_artifact, Path::new("m.json"), String::new()).unwrap();

        let out = model.run(Array3::from_elem((1, 1, CHANNEL_COUNT), 9.0)).unwrap();
        assert_eq!(out, vec![0.0]);
    }

    #[test]
    fn test_rejects_ragged_weights() {
        let model_artifact = artifact(2, vec![vec![1; 3]], vec![0.0]);
        let result = QuantizedLinearModel::from_artifact(model_artifact, Path::new("m.json"), String::new());
        assert!(matches!(result, Err(ModelLoadError::Format(_))));
    }

    #[test]
    fn test_rejects_bias_mismatch() {
        let model_artifact = artifact(1, vec![vec![1; CHANNEL_COUNT]], vec![0.0, 1.0]);
        let result = QuantizedLinearModel::from_artifact(model_artifact, Path::new("m.json"), String::new());
        assert!(matches!(result, Err(ModelLoadError::Format(_))));
    }

    #[test]
    fn test_requires_window() {
        let mut model_artifact = artifact(1, vec![vec![1; CHANNEL_COUNT]], vec![0.0]);
        model_artifact.metadata.window = None;
        let result = QuantizedLinearModel::from_artifact(model_artifact, Path::new("m.json"), String::new());
        assert!(matches!(result, Err(ModelLoadError::Format(_))));
    }
}
