//! Upload Module - getting results off the device
//!
//! - `queue` - bounded FIFO, entries stay until delivery is confirmed
//! - `client` - wire payload, `Endpoint` seam and the HTTP client
//! - `transport` - retry/backoff policy around the endpoint

pub mod client;
pub mod queue;
pub mod transport;

pub use client::{Endpoint, HttpConfig, HttpEndpoint, TransportError, UploadPayload};
pub use queue::{Batch, QueueStatus, UploadQueue};
pub use transport::{RetryPolicy, SendOutcome, Transport, TransportStats};
