//! Telemetry Module
//!
//! Device event log and session counters.
//!
//! ## Structure
//! - `event.rs` - DeviceEvent (timestamped, tagged with the boot session)
//! - `recorder.rs` - append-only JSONL writer with rotation
//! - `metrics.rs` - counters behind the periodic status line

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::{DeviceEvent, EventType};
pub use metrics::Metrics;
pub use recorder::{list_log_files, read_events, Recorder, RecorderStats, LOG_DIR};
