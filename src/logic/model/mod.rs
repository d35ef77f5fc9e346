//! Model Module - on-device inference
//!
//! - `loader` - read, verify and open the artifact (once, at boot)
//! - `backend` - ONNX Runtime backend and the backend trait
//! - `quantized` - int8 linear classifier for runtime-less targets
//! - `inference` - deadline-bounded engine producing `InferenceResult`s

pub mod backend;
pub mod inference;
pub mod loader;
pub mod quantized;

pub use backend::{ModelBackend, ModelFormat, ModelInfo, ModelMetadata};
pub use inference::{
    EngineSettings, EngineStats, InferenceEngine, InferenceError, InferenceResult, NormalizationParams,
};
pub use loader::{load_model, ModelLoadError};
