//! Upload API Client
//!
//! HTTP client for the result endpoint, plus the `Endpoint` seam the
//! transport is written against.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::queue::Batch;
use crate::logic::model::InferenceResult;
use crate::logic::sampling::{layout_hash, LAYOUT_VERSION};

/// Upload errors (all retryable)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error: {0}")]
    Server(u16),

    #[error("client setup error: {0}")]
    Setup(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = e.status() {
            TransportError::Server(status.as_u16())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// Wire body of one POST
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPayload {
    pub device_id: String,
    /// Changes every boot; with `first_seq` lets the server drop resends
    pub session_id: Uuid,
    pub layout_version: u8,
    pub layout_hash: u32,
    pub sent_at: DateTime<Utc>,
    pub first_seq: u64,
    pub last_seq: u64,
    pub results: Vec<InferenceResult>,
}

impl UploadPayload {
    pub fn new(device_id: &str, session_id: Uuid, batch: &Batch) -> Self {
        Self {
            device_id: device_id.to_string(),
            session_id,
            layout_version: LAYOUT_VERSION,
            layout_hash: layout_hash(),
            sent_at: Utc::now(),
            first_seq: batch.first_seq,
            last_seq: batch.last_seq,
            results: batch.items.clone(),
        }
    }
}

/// Where batches go
#[allow(async_fn_in_trait)]
pub trait Endpoint {
    /// One delivery attempt; `Ok` only when the server accepted the batch
    async fn deliver(&self, payload: &UploadPayload) -> Result<(), TransportError>;

    /// Cheap reachability check used while booting
    async fn probe(&self) -> Result<(), TransportError>;
}

// ============================================================================
// HTTP IMPLEMENTATION
// ============================================================================

/// Upload client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub endpoint_url: String,
    pub request_timeout: Duration,
}

pub struct HttpEndpoint {
    config: HttpConfig,
    http_client: reqwest::Client,
}

impl HttpEndpoint {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .user_agent(concat!("empathy-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        Ok(Self { config, http_client })
    }

    pub fn url(&self) -> &str {
        &self.config.endpoint_url
    }
}

impl Endpoint for HttpEndpoint {
    async fn deliver(&self, payload: &UploadPayload) -> Result<(), TransportError> {
        let response = self
            .http_client
            .post(&self.config.endpoint_url)
            .json(payload)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            log::debug!("Upload rejected ({}): {}", status, error_text);
            Err(TransportError::Server(status))
        }
    }

    async fn probe(&self) -> Result<(), TransportError> {
        // any HTTP answer means the network path is up
        self.http_client
            .head(&self.config.endpoint_url)
            .send()
            .await
            .map(|_| ())
            .map_err(TransportError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_carries_batch_and_layout() {
        let batch = Batch {
            first_seq: 4,
            last_seq: 5,
            items: vec![
                InferenceResult {
                    tick: 10,
                    captured_at: Utc::now(),
                    label: "calm".to_string(),
                    score: 0.8,
                    confidence: 0.8,
                },
                InferenceResult {
                    tick: 11,
                    captured_at: Utc::now(),
                    label: "stressed".to_string(),
                    score: 0.6,
                    confidence: 0.6,
                },
            ],
        };

        let session = Uuid::new_v4();
        let payload = UploadPayload::new("wrist-01", session, &batch);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["device_id"], "wrist-01");
        assert_eq!(json["session_id"], session.to_string());
        assert_eq!(json["first_seq"], 4);
        assert_eq!(json["last_seq"], 5);
        assert_eq!(json["layout_hash"], layout_hash());
        assert_eq!(json["results"].as_array().unwrap().len(), 2);
        assert_eq!(json["results"][1]["label"], "stressed");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_transport_error() {
        // port 9 on loopback: nothing listens there in test environments
        let endpoint = HttpEndpoint::new(HttpConfig {
            endpoint_url: "http://127.0.0.1:9/results".to_string(),
            request_timeout: Duration::from_millis(500),
        })
        .unwrap();

        assert!(endpoint.probe().await.is_err());
    }
}
