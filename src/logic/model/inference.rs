//! Inference Engine - bounded-latency inference over a sample window
//!
//! Wraps one pre-loaded backend. Input windows are normalized, run through
//! the model and turned into a labelled `InferenceResult`. A run that
//! overshoots the deadline is discarded as `InferenceError::Timeout`.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use super::backend::{ModelBackend, ModelInfo};
use super::loader::ModelLoadError;
use crate::logic::sampling::{Sample, CHANNEL_COUNT};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Per-channel min/max from training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub min_vals: Vec<f32>,
    pub max_vals: Vec<f32>,
}

impl NormalizationParams {
    /// Scale into [0, 1]; channels without bounds pass through untouched
    pub fn apply(&self, readings: &[f32; CHANNEL_COUNT]) -> [f32; CHANNEL_COUNT] {
        let mut normalized = *readings;

        for (i, value) in normalized.iter_mut().enumerate() {
            if let (Some(&min_val), Some(&max_val)) = (self.min_vals.get(i), self.max_vals.get(i)) {
                let range = (max_val - min_val).max(1e-8);
                *value = ((*value - min_val) / range).clamp(0.0, 1.0);
            }
        }

        normalized
    }
}

/// One inference output, queued for upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Tick of the newest sample in the window
    pub tick: u64,
    /// Capture time of the newest sample in the window
    pub captured_at: DateTime<Utc>,
    pub label: String,
    pub score: f32,
    pub confidence: f32,
}

/// How raw outputs become a label
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub labels: Vec<String>,
    /// Used only by single-output models
    pub score_threshold: f32,
    pub deadline: Duration,
}

/// Latency stats
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub inference_count: u64,
    pub timeout_count: u64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// The cycle ran past its deadline; the result is discarded
    #[error("inference timeout: took {elapsed:?}, deadline {deadline:?}")]
    Timeout { elapsed: Duration, deadline: Duration },

    #[error("window has {actual} samples, model expects {expected}")]
    WindowMismatch { expected: usize, actual: usize },

    #[error("model produced {outputs} outputs for {labels} labels")]
    OutputMismatch { outputs: usize, labels: usize },

    #[error("model produced a non-finite output")]
    NonFinite,

    #[error("backend error: {0}")]
    Backend(String),
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct InferenceEngine {
    backend: Box<dyn ModelBackend>,
    settings: EngineSettings,
    latency_sum_us: u64,
    stats: EngineStats,
}

impl InferenceEngine {
    /// Pair a loaded backend with its output labels
    pub fn new(backend: Box<dyn ModelBackend>, settings: EngineSettings) -> Result<Self, ModelLoadError> {
        let labels = settings.labels.len();

        // single-output models pick between the first and last label
        match backend.info().outputs {
            Some(1) if labels < 2 => {
                return Err(ModelLoadError::LabelMismatch { outputs: 1, labels });
            }
            Some(outputs) if outputs != 1 && outputs != labels => {
                return Err(ModelLoadError::LabelMismatch { outputs, labels });
            }
            _ => {}
        }

        log::info!(
            "Inference engine ready: model={} window={} labels={:?} deadline={:?}",
            backend.info().name,
            backend.info().window,
            settings.labels,
            settings.deadline
        );

        Ok(Self {
            backend,
            settings,
            latency_sum_us: 0,
            stats: EngineStats::default(),
        })
    }

    pub fn info(&self) -> &ModelInfo {
        self.backend.info()
    }

    /// Samples per window the model consumes
    pub fn window_size(&self) -> usize {
        self.backend.info().window
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.clone()
    }

    /// Run the model over `window` (oldest sample first)
    pub fn infer(&mut self, window: &[Sample]) -> Result<InferenceResult, InferenceError> {
        let expected = self.window_size();
        let newest = match window.last() {
            Some(sample) if window.len() == expected => *sample,
            _ => {
                return Err(InferenceError::WindowMismatch {
                    expected,
                    actual: window.len(),
                })
            }
        };

        let input = self.prepare_input(window)?;

        let start_time = Instant::now();
        let outputs = self.backend.run(input)?;
        let elapsed = start_time.elapsed();

        self.track_latency(elapsed);

        if elapsed > self.settings.deadline {
            self.stats.timeout_count += 1;
            return Err(InferenceError::Timeout {
                elapsed,
                deadline: self.settings.deadline,
            });
        }

        let (label, score, confidence) = self.interpret(&outputs)?;

        Ok(InferenceResult {
            tick: newest.tick,
            captured_at: newest.captured_at,
            label,
            score,
            confidence,
        })
    }

    fn prepare_input(&self, window: &[Sample]) -> Result<Array3<f32>, InferenceError> {
        let normalization = self.backend.info().normalization.as_ref();

        let mut input_data = Vec::with_capacity(window.len() * CHANNEL_COUNT);
        for sample in window {
            match normalization {
                Some(params) => input_data.extend_from_slice(&params.apply(&sample.readings)),
                None => input_data.extend_from_slice(&sample.readings),
            }
        }

        Array3::<f32>::from_shape_vec((1, window.len(), CHANNEL_COUNT), input_data)
            .map_err(|e| InferenceError::Backend(format!("Array error: {}", e)))
    }

    fn track_latency(&mut self, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        self.stats.inference_count += 1;
        self.latency_sum_us += micros;
        self.stats.avg_latency_us = self.latency_sum_us / self.stats.inference_count;
        self.stats.max_latency_us = self.stats.max_latency_us.max(micros);
    }

    /// (label, score, confidence) from raw outputs
    fn interpret(&self, outputs: &[f32]) -> Result<(String, f32, f32), InferenceError> {
        if outputs.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite);
        }

        let labels = &self.settings.labels;

        if outputs.len() == 1 && labels.len() >= 2 {
            let threshold = self.settings.score_threshold.max(f32::EPSILON);
            let score = outputs[0].clamp(0.0, 1.0);
            let label = if score >= threshold {
                &labels[labels.len() - 1]
            } else {
                &labels[0]
            };
            let distance = (score - threshold).abs() / threshold;
            let confidence = (0.5 + distance * 0.5).min(1.0);
            return Ok((label.clone(), score, confidence));
        }

        if outputs.len() != labels.len() {
            return Err(InferenceError::OutputMismatch {
                outputs: outputs.len(),
                labels: labels.len(),
            });
        }

        let probs = softmax(outputs);
        let (best, prob) = probs
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });

        Ok((labels[best].clone(), prob, prob))
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}
