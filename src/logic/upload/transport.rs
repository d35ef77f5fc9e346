//! Transport - delivery with exponential backoff
//!
//! One attempt per call at most. A failed attempt schedules the next one
//! `base * 2^(attempt-1)` later (capped); calls before that instant return
//! `Waiting` without touching the network, so the scheduler never sleeps on
//! a backoff. After `ceiling` attempts the batch goes back to the queue and
//! `DeliveryFailed` is reported.
//!
//! Every endpoint call is cut off at `attempt_timeout`, which config keeps
//! below the tick interval, so a dead endpoint never delays the next sample.
//! Attempts are counted per batch: a batch with a different last sequence
//! number (the old one was evicted or confirmed) starts again at attempt 1.

use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use super::client::{Endpoint, TransportError, UploadPayload};
use super::queue::{Batch, UploadQueue};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per batch before giving up
    pub ceiling: u32,
    pub base: Duration,
    pub max: Duration,
    /// Upper bound on one endpoint call
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Wait after the `attempt`-th failure (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing to send
    Idle,
    /// Backing off until the given instant
    Waiting { until: Instant },
    Delivered { count: usize, attempts: u32 },
    Retrying { attempt: u32, next_in: Duration, error: TransportError },
    /// Ceiling reached; the batch is back on the retry path
    DeliveryFailed { attempts: u32, count: usize, error: TransportError },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportStats {
    pub attempts: u64,
    pub delivered_batches: u64,
    pub delivered_records: u64,
    pub delivery_failures: u64,
}

pub struct Transport<E: Endpoint> {
    endpoint: E,
    policy: RetryPolicy,
    device_id: String,
    session_id: Uuid,
    /// Last sequence number of the batch being retried
    current_batch: Option<u64>,
    /// Attempts made on the current batch
    attempt: u32,
    next_attempt_at: Option<Instant>,
    stats: TransportStats,
}

impl<E: Endpoint> Transport<E> {
    pub fn new(endpoint: E, policy: RetryPolicy, device_id: String, session_id: Uuid) -> Self {
        Self {
            endpoint,
            policy,
            device_id,
            session_id,
            current_batch: None,
            attempt: 0,
            next_attempt_at: None,
            stats: TransportStats::default(),
        }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    /// True while a backoff delay is pending at `now`
    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.next_attempt_at.is_some_and(|at| now < at)
    }

    /// At most one delivery attempt for `batch`
    pub async fn send(&mut self, batch: &Batch, now: Instant) -> SendOutcome {
        if batch.is_empty() {
            self.current_batch = None;
            self.attempt = 0;
            return SendOutcome::Idle;
        }
        if let Some(until) = self.next_attempt_at.filter(|&at| now < at) {
            return SendOutcome::Waiting { until };
        }

        if self.current_batch != Some(batch.last_seq) {
            if self.attempt > 0 {
                log::debug!(
                    "Batch ending at seq {:?} left the queue after {} attempt(s)",
                    self.current_batch,
                    self.attempt
                );
            }
            self.current_batch = Some(batch.last_seq);
            self.attempt = 0;
        }

        self.attempt += 1;
        self.stats.attempts += 1;

        let payload = UploadPayload::new(&self.device_id, self.session_id, batch);

        let delivery = tokio::time::timeout(self.policy.attempt_timeout, self.endpoint.deliver(&payload));

        match delivery.await.unwrap_or(Err(TransportError::Timeout)) {
            Ok(()) => {
                let attempts = self.attempt;
                self.current_batch = None;
                self.attempt = 0;
                self.next_attempt_at = None;
                self.stats.delivered_batches += 1;
                self.stats.delivered_records += batch.len() as u64;

                log::debug!(
                    "Delivered {} results (seq {}..={}) after {} attempt(s)",
                    batch.len(),
                    batch.first_seq,
                    batch.last_seq,
                    attempts
                );
                SendOutcome::Delivered {
                    count: batch.len(),
                    attempts,
                }
            }
            Err(error) if self.attempt >= self.policy.ceiling => {
                let attempts = self.attempt;
                self.attempt = 0;
                self.next_attempt_at = Some(now + self.policy.max);
                self.stats.delivery_failures += 1;

                log::warn!(
                    "Delivery failed after {} attempts ({} results kept): {}",
                    attempts,
                    batch.len(),
                    error
                );
                SendOutcome::DeliveryFailed {
                    attempts,
                    count: batch.len(),
                    error,
                }
            }
            Err(error) => {
                let next_in = self.policy.backoff(self.attempt);
                self.next_attempt_at = Some(now + next_in);

                log::debug!("Upload attempt {} failed ({}), retry in {:?}", self.attempt, error, next_in);
                SendOutcome::Retrying {
                    attempt: self.attempt,
                    next_in,
                    error,
                }
            }
        }
    }

    /// Drain the queue's front window and try to deliver it
    pub async fn pump(&mut self, queue: &mut UploadQueue, max_items: usize, now: Instant) -> SendOutcome {
        if let Some(until) = self.next_attempt_at.filter(|&at| now < at) {
            return SendOutcome::Waiting { until };
        }

        let batch = queue.drain(max_items);
        let outcome = self.send(&batch, now).await;

        match &outcome {
            SendOutcome::Delivered { .. } => {
                queue.confirm(&batch);
            }
            SendOutcome::DeliveryFailed { .. } => queue.release(&batch),
            _ => {}
        }

        outcome
    }

    /// Probe the endpoint with backoff until it answers or `wait` runs out
    pub async fn acquire_connectivity(&self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let probe = tokio::time::timeout(self.policy.attempt_timeout, self.endpoint.probe());
            match probe.await.unwrap_or(Err(TransportError::Timeout)) {
                Ok(()) => {
                    log::info!("Connectivity acquired after {} probe(s)", attempt);
                    return true;
                }
                Err(e) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        log::warn!("No connectivity after {} probe(s): {}", attempt, e);
                        return false;
                    }
                    let pause = self.policy.backoff(attempt).min(deadline - now);
                    log::info!("Waiting for network ({}), next probe in {:?}", e, pause);
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::model::InferenceResult;
    use chrono::Utc;
    use std::cell::{Cell, RefCell};

    /// Never answers within any reasonable timeout
    struct HangingEndpoint;

    impl Endpoint for HangingEndpoint {
        async fn deliver(&self, _payload: &UploadPayload) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        async fn probe(&self) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    /// Fails the first `failures` calls, then succeeds
    struct FlakyEndpoint {
        failures: Cell<u32>,
        calls: Cell<u32>,
        delivered: RefCell<Vec<UploadPayload>>,
    }

    impl FlakyEndpoint {
        fn failing(failures: u32) -> Self {
            Self {
                failures: Cell::new(failures),
                calls: Cell::new(0),
                delivered: RefCell::new(Vec::new()),
            }
        }

        fn take_failure(&self) -> bool {
            self.calls.set(self.calls.get() + 1);
            let left = self.failures.get();
            if left > 0 {
                self.failures.set(left - 1);
                true
            } else {
                false
            }
        }
    }

    impl Endpoint for FlakyEndpoint {
        async fn deliver(&self, payload: &UploadPayload) -> Result<(), TransportError> {
            if self.take_failure() {
                return Err(TransportError::Network("connection refused".to_string()));
            }
            self.delivered.borrow_mut().push(payload.clone());
            Ok(())
        }

        async fn probe(&self) -> Result<(), TransportError> {
            if self.take_failure() {
                Err(TransportError::Timeout)
            } else {
                Ok(())
            }
        }
    }

    fn policy(ceiling: u32) -> RetryPolicy {
        RetryPolicy {
            ceiling,
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn transport(endpoint: FlakyEndpoint, ceiling: u32) -> Transport<FlakyEndpoint> {
        Transport::new(endpoint, policy(ceiling), "wrist-01".to_string(), Uuid::new_v4())
    }

    fn result(tick: u64) -> InferenceResult {
        InferenceResult {
            tick,
            captured_at: Utc::now(),
            label: "calm".to_string(),
            score: 0.5,
            confidence: 0.5,
        }
    }

    fn queue_with(ticks: std::ops::RangeInclusive<u64>) -> UploadQueue {
        let mut queue = UploadQueue::new(16);
        for tick in ticks {
            queue.enqueue(result(tick));
        }
        queue
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let p = policy(10);
        let waits: Vec<u64> = (1..=6).map(|a| p.backoff(a).as_millis() as u64).collect();
        assert_eq!(waits, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(p.backoff(200), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_delivery_confirms_queue() {
        let mut transport = transport(FlakyEndpoint::failing(0), 3);
        let mut queue = queue_with(1..=5);

        let outcome = transport.pump(&mut queue, 3, Instant::now()).await;
        assert_eq!(outcome, SendOutcome::Delivered { count: 3, attempts: 1 });
        assert_eq!(queue.len(), 2);

        let sent = transport.endpoint().delivered.borrow();
        let ticks: Vec<u64> = sent[0].results.iter().map(|r| r.tick).collect();
        assert_eq!(ticks, vec![1, 2, 3]);
        assert_eq!(sent[0].first_seq, 0);
        assert_eq!(sent[0].last_seq, 2);
    }

    #[tokio::test]
    async fn test_ceiling_returns_batch_to_queue() {
        let mut transport = transport(FlakyEndpoint::failing(3), 3);
        let mut queue = queue_with(1..=4);
        let t0 = Instant::now();

        let first = transport.pump(&mut queue, 4, t0).await;
        assert!(matches!(first, SendOutcome::Retrying { attempt: 1, next_in, .. } if next_in == Duration::from_millis(100)));

        // inside the backoff window nothing is sent
        let early = transport.pump(&mut queue, 4, t0 + Duration::from_millis(50)).await;
        assert!(matches!(early, SendOutcome::Waiting { .. }));
        assert_eq!(transport.endpoint().calls.get(), 1);

        let second = transport.pump(&mut queue, 4, t0 + Duration::from_millis(100)).await;
        assert!(matches!(second, SendOutcome::Retrying { attempt: 2, .. }));

        let third = transport.pump(&mut queue, 4, t0 + Duration::from_millis(300)).await;
        assert!(matches!(third, SendOutcome::DeliveryFailed { attempts: 3, count: 4, .. }));

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(transport.stats().delivery_failures, 1);
        assert_eq!(transport.stats().attempts, 3);
    }

    #[tokio::test]
    async fn test_recovers_after_failed_cycle() {
        let mut transport = transport(FlakyEndpoint::failing(2), 2);
        let mut queue = queue_with(1..=2);
        let t0 = Instant::now();

        transport.pump(&mut queue, 8, t0).await;
        let failed = transport.pump(&mut queue, 8, t0 + Duration::from_millis(100)).await;
        assert!(matches!(failed, SendOutcome::DeliveryFailed { .. }));

        // next cycle waits for the cap, then starts again from attempt 1
        let t1 = t0 + Duration::from_millis(100);
        assert!(transport.is_backing_off(t1 + Duration::from_millis(999)));
        let delivered = transport.pump(&mut queue, 8, t1 + Duration::from_secs(1)).await;
        assert_eq!(delivered, SendOutcome::Delivered { count: 2, attempts: 1 });
        assert!(queue.is_empty());
        assert_eq!(transport.stats().delivered_records, 2);
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let mut transport = transport(FlakyEndpoint::failing(0), 3);
        let mut queue = UploadQueue::new(4);

        assert_eq!(transport.pump(&mut queue, 4, Instant::now()).await, SendOutcome::Idle);
        assert_eq!(transport.endpoint().calls.get(), 0);
    }

    #[tokio::test]
    async fn test_acquire_connectivity_retries_probe() {
        let endpoint = FlakyEndpoint::failing(2);
        let transport = Transport::new(
            endpoint,
            RetryPolicy {
                ceiling: 3,
                base: Duration::from_millis(1),
                max: Duration::from_millis(5),
                attempt_timeout: Duration::from_millis(200),
            },
            "wrist-01".to_string(),
            Uuid::new_v4(),
        );

        assert!(transport.acquire_connectivity(Duration::from_secs(5)).await);
        assert_eq!(transport.endpoint().calls.get(), 3);
    }

    #[tokio::test]
    async fn test_acquire_connectivity_gives_up() {
        let transport = Transport::new(
            FlakyEndpoint::failing(u32::MAX),
            RetryPolicy {
                ceiling: 3,
                base: Duration::from_millis(5),
                max: Duration::from_millis(10),
                attempt_timeout: Duration::from_millis(200),
            },
            "wrist-01".to_string(),
            Uuid::new_v4(),
        );

        assert!(!transport.acquire_connectivity(Duration::from_millis(40)).await);
        assert!(transport.endpoint().calls.get() >= 2);
    }

    #[tokio::test]
    async fn test_evicted_batch_does_not_pass_on_its_attempts() {
        let mut transport = transport(FlakyEndpoint::failing(u32::MAX), 3);
        let mut queue = UploadQueue::new(2);
        queue.enqueue(result(1));
        queue.enqueue(result(2));
        let t0 = Instant::now();

        let first = transport.pump(&mut queue, 2, t0).await;
        assert!(matches!(first, SendOutcome::Retrying { attempt: 1, .. }));

        // both held entries are pushed out before the retry is due
        queue.enqueue(result(3));
        queue.enqueue(result(4));

        let t1 = t0 + Duration::from_millis(100);
        let fresh = transport.pump(&mut queue, 2, t1).await;
        assert!(matches!(fresh, SendOutcome::Retrying { attempt: 1, .. }));

        let second = transport.pump(&mut queue, 2, t1 + Duration::from_millis(100)).await;
        assert!(matches!(second, SendOutcome::Retrying { attempt: 2, .. }));

        let third = transport.pump(&mut queue, 2, t1 + Duration::from_millis(300)).await;
        assert!(matches!(third, SendOutcome::DeliveryFailed { attempts: 3, count: 2, .. }));

        // one call on [1, 2], three on [3, 4]
        assert_eq!(transport.endpoint().calls.get(), 4);
        let sent = transport.endpoint().delivered.borrow();
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_batch_resets_attempts_for_the_next() {
        let mut transport = transport(FlakyEndpoint::failing(1), 3);
        let mut queue = queue_with(1..=4);
        let t0 = Instant::now();

        transport.pump(&mut queue, 2, t0).await;
        let delivered = transport.pump(&mut queue, 2, t0 + Duration::from_millis(100)).await;
        assert_eq!(delivered, SendOutcome::Delivered { count: 2, attempts: 2 });

        let next = transport.pump(&mut queue, 2, t0 + Duration::from_millis(200)).await;
        assert_eq!(next, SendOutcome::Delivered { count: 2, attempts: 1 });
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_slow_endpoint_is_cut_off() {
        let policy = RetryPolicy {
            ceiling: 3,
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
            attempt_timeout: Duration::from_millis(20),
        };
        let mut transport = Transport::new(HangingEndpoint, policy, "wrist-01".to_string(), Uuid::new_v4());
        let mut queue = queue_with(1..=2);

        let started = Instant::now();
        let outcome = transport.pump(&mut queue, 2, started).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            outcome,
            SendOutcome::Retrying { attempt: 1, error: TransportError::Timeout, .. }
        ));
        assert_eq!(queue.len(), 2);

        assert!(!transport.acquire_connectivity(Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
