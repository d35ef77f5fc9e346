//! Sample Buffer - fixed-capacity ring of recent samples
//!
//! Holds the N most recent samples; the oldest is overwritten on insert
//! once full. Windows for inference are copied out in chronological order.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::Sample;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Fewer samples than the window have been pushed so far
    #[error("insufficient data: window of {required} requested, {available} buffered")]
    InsufficientData { required: usize, available: usize },

    /// The window can never fit in this buffer
    #[error("window of {window} exceeds buffer capacity {capacity}")]
    WindowExceedsCapacity { window: usize, capacity: usize },
}

/// Buffer status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStatus {
    pub current_size: usize,
    pub capacity: usize,
    pub total_pushed: u64,
    pub fill_percent: f32,
}

pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    total_pushed: u64,
}

impl SampleBuffer {
    /// `capacity` of zero is bumped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total_pushed: 0,
        }
    }

    /// O(1); overwrites the oldest sample when full
    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total_pushed += 1;
    }

    /// Most recent `window_size` samples, oldest first
    pub fn snapshot(&self, window_size: usize) -> Result<Vec<Sample>, BufferError> {
        if window_size > self.capacity {
            return Err(BufferError::WindowExceedsCapacity {
                window: window_size,
                capacity: self.capacity,
            });
        }
        if self.samples.len() < window_size {
            return Err(BufferError::InsufficientData {
                required: window_size,
                available: self.samples.len(),
            });
        }

        let start = self.samples.len() - window_size;
        Ok(self.samples.range(start..).cloned().collect())
    }

    pub fn is_ready(&self, window_size: usize) -> bool {
        window_size <= self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Drop every sample; `total_pushed` keeps counting
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            current_size: self.samples.len(),
            capacity: self.capacity,
            total_pushed: self.total_pushed,
            fill_percent: (self.samples.len() as f32 / self.capacity as f32 * 100.0).min(100.0),
        }
    }
}
