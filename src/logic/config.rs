//! Device Configuration
//!
//! One explicit struct handed to the boot routine. Defaults live in
//! `constants`, every field can be overridden from the environment
//! (optionally seeded from a `.env` file).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{self, env_flag, env_parse, env_string};
use crate::logic::telemetry;
use crate::logic::upload::RetryPolicy;

/// Configuration errors (fatal at boot)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("window size {window} exceeds buffer capacity {capacity}")]
    WindowTooLarge { window: usize, capacity: usize },

    #[error("backoff base {base_ms}ms exceeds backoff max {max_ms}ms")]
    BackoffRange { base_ms: u64, max_ms: u64 },

    #[error("request timeout {timeout_ms}ms must be shorter than the {tick_ms}ms tick")]
    TimeoutNotBelowTick { timeout_ms: u64, tick_ms: u64 },

    #[error("at least one output label is required")]
    NoLabels,

    #[error("invalid endpoint url {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// Full device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Identifier sent with every upload
    pub device_id: String,
    /// HTTP(S) POST target for result batches
    pub endpoint_url: String,

    /// Model artifact (`.onnx` or quantized `.json`)
    pub model_path: PathBuf,
    /// Expected SHA-256 of the artifact (hex), checked when set
    pub model_sha256: Option<String>,
    /// Output labels, one per model output
    pub labels: Vec<String>,
    /// Decision threshold for single-output models
    pub score_threshold: f32,

    pub tick_interval_ms: u64,
    pub buffer_capacity: usize,
    pub window_size: usize,
    pub inference_stride: u64,
    pub inference_deadline_ms: u64,

    pub queue_capacity: usize,
    pub batch_size: usize,
    pub retry_ceiling: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub request_timeout_ms: u64,
    pub boot_connect_wait_secs: u64,

    pub status_interval_ticks: u64,
    pub sensor_seed: u64,

    /// JSONL event log directory; `None` disables the recorder
    pub telemetry_dir: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: constants::default_device_id(),
            endpoint_url: constants::DEFAULT_ENDPOINT_URL.to_string(),
            model_path: PathBuf::from(constants::DEFAULT_MODEL_PATH),
            model_sha256: None,
            labels: constants::DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            score_threshold: constants::DEFAULT_SCORE_THRESHOLD,
            tick_interval_ms: constants::DEFAULT_TICK_INTERVAL_MS,
            buffer_capacity: constants::DEFAULT_BUFFER_CAPACITY,
            window_size: constants::DEFAULT_WINDOW_SIZE,
            inference_stride: constants::DEFAULT_INFERENCE_STRIDE,
            inference_deadline_ms: constants::DEFAULT_INFERENCE_DEADLINE_MS,
            queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
            batch_size: constants::DEFAULT_BATCH_SIZE,
            retry_ceiling: constants::DEFAULT_RETRY_CEILING,
            backoff_base_ms: constants::DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: constants::DEFAULT_BACKOFF_MAX_MS,
            request_timeout_ms: constants::DEFAULT_REQUEST_TIMEOUT_MS,
            boot_connect_wait_secs: constants::DEFAULT_BOOT_CONNECT_WAIT_SECS,
            status_interval_ticks: constants::DEFAULT_STATUS_INTERVAL_TICKS,
            sensor_seed: constants::DEFAULT_SENSOR_SEED,
            telemetry_dir: Some(default_telemetry_dir()),
        }
    }
}

/// Parse an optional override, keeping `current` when the variable is unset
fn read<T: FromStr>(key: &'static str, current: T) -> Result<T, ConfigError> {
    env_parse::<T>(key)
        .map(|v| v.unwrap_or(current))
        .map_err(|value| ConfigError::InvalidValue { key, value })
}

impl DeviceConfig {
    /// Load configuration from environment variables (after `.env`, if any)
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("Loaded environment from {:?}", path);
        }

        let d = Self::default();

        let labels = match std::env::var("EMPATHY_LABELS") {
            Ok(raw) => parse_labels(&raw),
            Err(_) => d.labels,
        };

        let telemetry_dir = if env_flag("EMPATHY_TELEMETRY_ENABLED", true) {
            std::env::var("EMPATHY_TELEMETRY_DIR")
                .map(PathBuf::from)
                .ok()
                .or(d.telemetry_dir)
        } else {
            None
        };

        let config = Self {
            device_id: env_string("EMPATHY_DEVICE_ID", &d.device_id),
            endpoint_url: env_string("EMPATHY_ENDPOINT_URL", &d.endpoint_url),
            model_path: std::env::var("EMPATHY_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.model_path),
            model_sha256: std::env::var("EMPATHY_MODEL_SHA256")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            labels,
            score_threshold: read("EMPATHY_SCORE_THRESHOLD", d.score_threshold)?,
            tick_interval_ms: read("EMPATHY_TICK_INTERVAL_MS", d.tick_interval_ms)?,
            buffer_capacity: read("EMPATHY_BUFFER_CAPACITY", d.buffer_capacity)?,
            window_size: read("EMPATHY_WINDOW_SIZE", d.window_size)?,
            inference_stride: read("EMPATHY_INFERENCE_STRIDE", d.inference_stride)?,
            inference_deadline_ms: read("EMPATHY_INFERENCE_DEADLINE_MS", d.inference_deadline_ms)?,
            queue_capacity: read("EMPATHY_QUEUE_CAPACITY", d.queue_capacity)?,
            batch_size: read("EMPATHY_BATCH_SIZE", d.batch_size)?,
            retry_ceiling: read("EMPATHY_RETRY_CEILING", d.retry_ceiling)?,
            backoff_base_ms: read("EMPATHY_BACKOFF_BASE_MS", d.backoff_base_ms)?,
            backoff_max_ms: read("EMPATHY_BACKOFF_MAX_MS", d.backoff_max_ms)?,
            request_timeout_ms: read("EMPATHY_REQUEST_TIMEOUT_MS", d.request_timeout_ms)?,
            boot_connect_wait_secs: read("EMPATHY_BOOT_CONNECT_WAIT_SECS", d.boot_connect_wait_secs)?,
            status_interval_ticks: read("EMPATHY_STATUS_INTERVAL_TICKS", d.status_interval_ticks)?,
            sensor_seed: read("EMPATHY_SENSOR_SEED", d.sensor_seed)?,
            telemetry_dir,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("tick_interval_ms", self.tick_interval_ms == 0),
            ("buffer_capacity", self.buffer_capacity == 0),
            ("window_size", self.window_size == 0),
            ("inference_stride", self.inference_stride == 0),
            ("inference_deadline_ms", self.inference_deadline_ms == 0),
            ("queue_capacity", self.queue_capacity == 0),
            ("batch_size", self.batch_size == 0),
            ("retry_ceiling", self.retry_ceiling == 0),
            ("request_timeout_ms", self.request_timeout_ms == 0),
        ];
        if let Some(&(field, _)) = non_zero.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero { field });
        }

        if self.window_size > self.buffer_capacity {
            return Err(ConfigError::WindowTooLarge {
                window: self.window_size,
                capacity: self.buffer_capacity,
            });
        }

        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::BackoffRange {
                base_ms: self.backoff_base_ms,
                max_ms: self.backoff_max_ms,
            });
        }

        // uploads run inside the tick
        if self.request_timeout_ms >= self.tick_interval_ms {
            return Err(ConfigError::TimeoutNotBelowTick {
                timeout_ms: self.request_timeout_ms,
                tick_ms: self.tick_interval_ms,
            });
        }

        if self.labels.is_empty() {
            return Err(ConfigError::NoLabels);
        }

        let url = reqwest::Url::parse(&self.endpoint_url).map_err(|e| ConfigError::InvalidEndpoint {
            url: self.endpoint_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                url: self.endpoint_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn inference_deadline(&self) -> Duration {
        Duration::from_millis(self.inference_deadline_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn boot_connect_wait(&self) -> Duration {
        Duration::from_secs(self.boot_connect_wait_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            ceiling: self.retry_ceiling,
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            attempt_timeout: self.request_timeout(),
        }
    }
}

/// Comma-separated label list, blanks dropped
pub fn parse_labels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_telemetry_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(constants::DATA_DIR_NAME)
        .join(telemetry::LOG_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DeviceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_window_larger_than_buffer() {
        let config = DeviceConfig {
            buffer_capacity: 4,
            window_size: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WindowTooLarge { window: 5, capacity: 4 })
        ));
    }

    #[test]
    fn test_rejects_zero_fields() {
        let config = DeviceConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero { field: "queue_capacity" })
        ));

        let config = DeviceConfig {
            retry_ceiling: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero { field: "retry_ceiling" })
        ));
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let config = DeviceConfig {
            endpoint_url: "ftp://example.com/upload".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEndpoint { .. })));

        let config = DeviceConfig {
            endpoint_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let config = DeviceConfig {
            backoff_base_ms: 10_000,
            backoff_max_ms: 1_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BackoffRange { .. })));
    }

    #[test]
    fn test_rejects_request_timeout_not_below_tick() {
        let config = DeviceConfig {
            tick_interval_ms: 1_000,
            request_timeout_ms: 5_000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TimeoutNotBelowTick { timeout_ms: 5_000, tick_ms: 1_000 })
        ));

        let config = DeviceConfig {
            tick_interval_ms: 1_000,
            request_timeout_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DeviceConfig {
            tick_interval_ms: 1_000,
            request_timeout_ms: 999,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!(parse_labels("calm, stressed,,  "), vec!["calm", "stressed"]);
        assert!(parse_labels(" , ").is_empty());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = DeviceConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.ceiling, config.retry_ceiling);
        assert_eq!(policy.base, Duration::from_millis(config.backoff_base_ms));
        assert_eq!(policy.max, Duration::from_millis(config.backoff_max_ms));
        assert_eq!(policy.attempt_timeout, config.request_timeout());
        assert!(policy.attempt_timeout < config.tick_interval());
    }
}
