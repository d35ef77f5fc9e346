//! Device Event Types
//!
//! Timestamped lifecycle and fault events. One event is one JSONL line.

use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::model::{InferenceResult, ModelInfo};

// ============================================================================
// EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Boot,
    ConnectivityAcquired,
    /// Boot wait ran out; the loop started offline
    ConnectivityTimeout,
    ModelLoaded,
    /// Inference is off for the rest of the session
    ModelLoadFailed,
    InferenceTimeout,
    DeliveryFailed,
    QueueEviction,
    SensorFault,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Boot => "boot",
            EventType::ConnectivityAcquired => "connectivity_acquired",
            EventType::ConnectivityTimeout => "connectivity_timeout",
            EventType::ModelLoaded => "model_loaded",
            EventType::ModelLoadFailed => "model_load_failed",
            EventType::InferenceTimeout => "inference_timeout",
            EventType::DeliveryFailed => "delivery_failed",
            EventType::QueueEviction => "queue_eviction",
            EventType::SensorFault => "sensor_fault",
        }
    }
}

// ============================================================================
// DEVICE EVENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// Same value as the upload payloads of this boot
    pub session_id: Uuid,
    /// Scheduler tick, for events raised inside the loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub description: String,
}

impl DeviceEvent {
    pub fn new(session_id: Uuid, event_type: EventType, description: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            session_id,
            tick: None,
            details: None,
            description: description.to_string(),
        }
    }

    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Single JSON line, no trailing newline
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// CONVENIENCE CONSTRUCTORS
// ============================================================================

impl DeviceEvent {
    pub fn boot(session_id: Uuid, device_id: &str, version: &str) -> Self {
        Self::new(
            session_id,
            EventType::Boot,
            &format!("Device {} booted (v{})", device_id, version),
        )
        .with_details(serde_json::json!({
            "device_id": device_id,
            "version": version,
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }))
    }

    pub fn connectivity(session_id: Uuid, acquired: bool, waited: Duration) -> Self {
        let (event_type, description) = if acquired {
            (EventType::ConnectivityAcquired, "Endpoint reachable")
        } else {
            (EventType::ConnectivityTimeout, "Endpoint unreachable, starting offline")
        };

        Self::new(session_id, event_type, description).with_details(serde_json::json!({
            "waited_ms": waited.as_millis() as u64,
        }))
    }

    pub fn model_loaded(session_id: Uuid, info: &ModelInfo) -> Self {
        Self::new(
            session_id,
            EventType::ModelLoaded,
            &format!("Model {} loaded", info.name),
        )
        .with_details(serde_json::json!({
            "format": info.format,
            "window": info.window,
            "sha256": info.sha256,
        }))
    }

    pub fn model_load_failed(session_id: Uuid, error: &dyn Display) -> Self {
        Self::new(
            session_id,
            EventType::ModelLoadFailed,
            &format!("Model load failed, inference disabled: {}", error),
        )
    }

    pub fn inference_timeout(session_id: Uuid, tick: u64, elapsed: Duration, deadline: Duration) -> Self {
        Self::new(
            session_id,
            EventType::InferenceTimeout,
            &format!("Inference took {:?} (deadline {:?})", elapsed, deadline),
        )
        .with_tick(tick)
        .with_details(serde_json::json!({
            "elapsed_us": elapsed.as_micros() as u64,
            "deadline_us": deadline.as_micros() as u64,
        }))
    }

    pub fn delivery_failed(session_id: Uuid, tick: u64, attempts: u32, pending: usize, error: &dyn Display) -> Self {
        Self::new(
            session_id,
            EventType::DeliveryFailed,
            &format!("Delivery failed after {} attempts: {}", attempts, error),
        )
        .with_tick(tick)
        .with_details(serde_json::json!({
            "attempts": attempts,
            "batch_len": pending,
        }))
    }

    pub fn queue_eviction(session_id: Uuid, tick: u64, evicted: &InferenceResult) -> Self {
        Self::new(
            session_id,
            EventType::QueueEviction,
            &format!("Queue full, dropped result from tick {}", evicted.tick),
        )
        .with_tick(tick)
        .with_details(serde_json::json!({
            "evicted_tick": evicted.tick,
            "evicted_label": evicted.label,
        }))
    }

    pub fn sensor_fault(session_id: Uuid, tick: u64, error: &dyn Display) -> Self {
        Self::new(
            session_id,
            EventType::SensorFault,
            &format!("Sensor read failed: {}", error),
        )
        .with_tick(tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let session = Uuid::new_v4();
        let event = DeviceEvent::new(session, EventType::Boot, "Started");
        assert!(!event.id.is_empty());
        assert_eq!(event.session_id, session);
        assert_eq!(event.event_type, EventType::Boot);
        assert!(event.tick.is_none());
    }

    #[test]
    fn test_event_to_jsonl() {
        let event = DeviceEvent::sensor_fault(Uuid::new_v4(), 42, &"i2c nack");
        let jsonl = event.to_jsonl();

        assert!(jsonl.contains("\"sensor_fault\""));
        assert!(jsonl.contains("\"tick\":42"));
        assert!(!jsonl.contains('\n'));
        // no details on this one, so the key is skipped
        assert!(!jsonl.contains("details"));
    }

    #[test]
    fn test_connectivity_variants() {
        let session = Uuid::new_v4();
        let ok = DeviceEvent::connectivity(session, true, Duration::from_millis(1500));
        let timeout = DeviceEvent::connectivity(session, false, Duration::from_secs(30));

        assert_eq!(ok.event_type, EventType::ConnectivityAcquired);
        assert_eq!(timeout.event_type, EventType::ConnectivityTimeout);
        assert_eq!(ok.details.unwrap()["waited_ms"], 1500);
    }

    #[test]
    fn test_eviction_names_dropped_result() {
        let evicted = InferenceResult {
            tick: 7,
            captured_at: Utc::now(),
            label: "engaged".to_string(),
            score: 0.6,
            confidence: 0.6,
        };
        let event = DeviceEvent::queue_eviction(Uuid::new_v4(), 90, &evicted);

        assert_eq!(event.tick, Some(90));
        let details = event.details.unwrap();
        assert_eq!(details["evicted_tick"], 7);
        assert_eq!(details["evicted_label"], "engaged");
    }
}
