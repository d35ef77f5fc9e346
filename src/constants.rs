//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Every value can be overridden through the matching `EMPATHY_*`
//! environment variable (see `logic::config`).

/// Default upload endpoint
///
/// For development: http://localhost:8080/api/v1/results
pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:8080/api/v1/results";

/// Default model artifact path
pub const DEFAULT_MODEL_PATH: &str = "model.json";

/// Default output labels (one per model output)
pub const DEFAULT_LABELS: &[&str] = &["calm", "engaged", "stressed"];

/// Threshold used when the model emits a single score
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.7;

/// Scheduler tick interval (milliseconds)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Sample ring capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// Samples per inference window
pub const DEFAULT_WINDOW_SIZE: usize = 8;

/// Ticks between inferences once the window is full
pub const DEFAULT_INFERENCE_STRIDE: u64 = 1;

/// Inference deadline (milliseconds)
pub const DEFAULT_INFERENCE_DEADLINE_MS: u64 = 50;

/// Upload queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Results per upload batch
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Attempts per batch before `DeliveryFailed`
pub const DEFAULT_RETRY_CEILING: u32 = 3;

/// First backoff step (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Backoff cap (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Per-request timeout (milliseconds); must stay below the tick interval
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 800;

/// How long boot waits for connectivity before starting anyway (seconds)
pub const DEFAULT_BOOT_CONNECT_WAIT_SECS: u64 = 30;

/// Ticks between status log lines
pub const DEFAULT_STATUS_INTERVAL_TICKS: u64 = 60;

/// Seed for the simulated sensor front-end
pub const DEFAULT_SENSOR_SEED: u64 = 0x5eed;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "empathy-core";

/// Directory name used under the platform data dir
pub const DATA_DIR_NAME: &str = "empathy-device";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Read a string variable or fall back to `default`
pub fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse a variable; unset variables yield `None`
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| raw),
        Err(_) => Ok(None),
    }
}

/// Read a boolean flag ("false"/"0" disable)
pub fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|s| s.to_lowercase() != "false" && s != "0")
        .unwrap_or(default)
}

/// Device id fallback: the host name
pub fn default_device_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-device".to_string())
}
