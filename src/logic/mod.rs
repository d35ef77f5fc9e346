//! Logic Module - device pipeline
//!
//! - `sampling/` - channel layout, sensor sources, sample ring
//! - `model/` - model loading and deadline-bounded inference
//! - `upload/` - result queue, HTTP endpoint, retry/backoff transport
//! - `scheduler/` - the cooperative tick loop tying them together
//! - `telemetry/` - device event log and counters

pub mod config;

pub mod model;
pub mod sampling;
pub mod scheduler;
pub mod telemetry;
pub mod upload;
