//! Channel Layout - Centralized Sensor Channel Definition
//!
//! **This file controls the sample schema.**
//!
//! Add, remove or reorder a channel → increment `LAYOUT_VERSION`.
//! Models carry the layout hash they were trained on and are rejected
//! at load time when it differs.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Current channel layout version
pub const LAYOUT_VERSION: u8 = 1;

/// Channel names in the exact order they appear in a sample
pub const CHANNEL_LAYOUT: &[&str] = &[
    "heart_rate_bpm",      // 0: PPG-derived heart rate
    "skin_conductance_us", // 1: electrodermal activity (microsiemens)
    "skin_temp_c",         // 2: wrist skin temperature
    "motion_g",            // 3: accelerometer magnitude minus gravity
];

/// Total number of channels
/// Must match CHANNEL_LAYOUT.len()
pub const CHANNEL_COUNT: usize = 4;

/// CRC32 over version + channel names
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[LAYOUT_VERSION]);

    for name in CHANNEL_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }

    hasher.finalize()
}

/// Layout description for logs and upload payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub version: u8,
    pub hash: u32,
    pub channel_count: usize,
    pub channel_names: Vec<String>,
}

impl LayoutInfo {
    pub fn current() -> Self {
        Self {
            version: LAYOUT_VERSION,
            hash: layout_hash(),
            channel_count: CHANNEL_COUNT,
            channel_names: CHANNEL_LAYOUT.iter().map(|s| s.to_string()).collect(),
        }
    }
}
