//! In-memory counters for the running session

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub ticks: u64,
    pub samples: u64,
    pub sensor_faults: u64,
    pub inferences: u64,
    pub inference_timeouts: u64,
    pub inference_errors: u64,
    pub enqueued: u64,
    pub evictions: u64,
    pub delivered: u64,
    pub delivery_attempts: u64,
    pub delivery_failures: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-line summary for the periodic status log
    pub fn status_line(&self, pending: usize) -> String {
        format!(
            "ticks={} samples={} sensor_faults={} inferences={} timeouts={} errors={} \
             enqueued={} pending={} evicted={} delivered={} attempts={} failures={}",
            self.ticks,
            self.samples,
            self.sensor_faults,
            self.inferences,
            self.inference_timeouts,
            self.inference_errors,
            self.enqueued,
            pending,
            self.evictions,
            self.delivered,
            self.delivery_attempts,
            self.delivery_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_lists_counters() {
        let metrics = Metrics {
            ticks: 10,
            samples: 9,
            sensor_faults: 1,
            evictions: 2,
            ..Default::default()
        };

        let line = metrics.status_line(5);
        assert!(line.starts_with("ticks=10 samples=9 sensor_faults=1"));
        assert!(line.contains("pending=5 evicted=2"));
    }
}
