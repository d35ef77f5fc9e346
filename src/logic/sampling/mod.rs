//! Sampling Module - sensor front-end and sample storage
//!
//! - `layout` - channel schema (versioned, hashed)
//! - `source` - where readings come from
//! - `buffer` - ring of the most recent samples

pub mod buffer;
pub mod layout;
pub mod source;

pub use buffer::{BufferError, BufferStatus, SampleBuffer};
pub use layout::{layout_hash, LayoutInfo, CHANNEL_COUNT, CHANNEL_LAYOUT, LAYOUT_VERSION};
pub use source::{SensorError, SensorSource, SimulatedSensor};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One capture of every channel at a scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic tick the sample was captured on
    pub tick: u64,
    /// Wall-clock capture time, carried through to uploaded results
    pub captured_at: DateTime<Utc>,
    pub readings: [f32; CHANNEL_COUNT],
}

impl Sample {
    /// Capture stamped with the current time
    pub fn new(tick: u64, readings: [f32; CHANNEL_COUNT]) -> Self {
        Self::at(tick, Utc::now(), readings)
    }

    pub fn at(tick: u64, captured_at: DateTime<Utc>, readings: [f32; CHANNEL_COUNT]) -> Self {
        Self {
            tick,
            captured_at,
            readings,
        }
    }
}
