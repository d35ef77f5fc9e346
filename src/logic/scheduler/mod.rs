//! Scheduler - the device's single cooperative loop
//!
//! Each tick: sample -> push -> (window full, stride due) infer -> enqueue
//! -> one transport step. A tick runs to completion before the next one
//! starts, and nothing in it waits on backoff. The buffer and the queue are
//! owned here and have no other mutator.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::logic::config::DeviceConfig;
use crate::logic::model::{InferenceEngine, InferenceError, InferenceResult};
use crate::logic::sampling::{Sample, SampleBuffer, SensorError, SensorSource};
use crate::logic::telemetry::{DeviceEvent, Metrics, Recorder};
use crate::logic::upload::{Endpoint, SendOutcome, Transport, UploadQueue};

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub buffer_capacity: usize,
    pub window_size: usize,
    pub inference_stride: u64,
    pub queue_capacity: usize,
    pub batch_size: usize,
    /// Ticks between status lines, 0 disables them
    pub status_interval_ticks: u64,
}

impl From<&DeviceConfig> for SchedulerSettings {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            buffer_capacity: config.buffer_capacity,
            window_size: config.window_size,
            inference_stride: config.inference_stride,
            queue_capacity: config.queue_capacity,
            batch_size: config.batch_size,
            status_interval_ticks: config.status_interval_ticks,
        }
    }
}

/// What happened during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub sampled: bool,
    pub sensor_error: Option<SensorError>,
    pub result: Option<InferenceResult>,
    pub inference_error: Option<InferenceError>,
    /// Result pushed out of a full queue by this tick's enqueue
    pub evicted: Option<InferenceResult>,
    pub transport: SendOutcome,
}

pub struct Scheduler<E: Endpoint> {
    settings: SchedulerSettings,
    session_id: Uuid,
    sensor: Box<dyn SensorSource>,
    buffer: SampleBuffer,
    /// `None` when the model failed to load; everything else keeps running
    engine: Option<InferenceEngine>,
    queue: UploadQueue,
    transport: Transport<E>,
    metrics: Metrics,
    recorder: Option<Recorder>,
    next_tick: u64,
    last_inference_tick: Option<u64>,
}

impl<E: Endpoint> Scheduler<E> {
    pub fn new(
        settings: SchedulerSettings,
        session_id: Uuid,
        sensor: Box<dyn SensorSource>,
        engine: Option<InferenceEngine>,
        transport: Transport<E>,
        recorder: Option<Recorder>,
    ) -> Self {
        if engine.is_none() {
            log::warn!("Scheduler starting without a model: sampling and upload only");
        }

        Self {
            buffer: SampleBuffer::new(settings.buffer_capacity),
            queue: UploadQueue::new(settings.queue_capacity),
            settings,
            session_id,
            sensor,
            engine,
            transport,
            metrics: Metrics::new(),
            recorder,
            next_tick: 0,
            last_inference_tick: None,
        }
    }

    /// Tick forever at the configured interval
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        // a slow tick pushes the schedule back instead of bunching ticks up
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        log::info!(
            "Scheduler loop started (tick={:?}, window={}, stride={})",
            self.settings.tick_interval,
            self.window_size(),
            self.settings.inference_stride
        );

        loop {
            interval.tick().await;
            self.tick(Instant::now()).await;
        }
    }

    /// One full pass of the pipeline; `now` drives the transport's backoff
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        let tick = self.next_tick;
        self.next_tick += 1;
        self.metrics.ticks += 1;

        let mut report = TickReport {
            tick,
            sampled: false,
            sensor_error: None,
            result: None,
            inference_error: None,
            evicted: None,
            transport: SendOutcome::Idle,
        };

        // 1. Sample
        match self.sensor.read(tick) {
            Ok(readings) => {
                self.buffer.push(Sample::new(tick, readings));
                self.metrics.samples += 1;
                report.sampled = true;
            }
            Err(e) => {
                log::warn!("Tick {}: sensor read failed: {}", tick, e);
                self.metrics.sensor_faults += 1;
                self.record(DeviceEvent::sensor_fault(self.session_id, tick, &e));
                report.sensor_error = Some(e);
            }
        }

        // 2. Infer + enqueue (only on a fresh sample)
        if report.sampled && self.inference_due(tick) {
            self.run_inference(tick, &mut report);
        }

        // 3. Transport
        report.transport = self
            .transport
            .pump(&mut self.queue, self.settings.batch_size, now)
            .await;
        self.account_transport(tick, &report.transport);

        if self.settings.status_interval_ticks > 0 && (tick + 1) % self.settings.status_interval_ticks == 0 {
            log::info!("Status: {}", self.status_summary());
        }

        report
    }

    fn inference_due(&self, tick: u64) -> bool {
        if self.engine.is_none() || !self.buffer.is_ready(self.window_size()) {
            return false;
        }
        match self.last_inference_tick {
            Some(last) => tick - last >= self.settings.inference_stride,
            None => true,
        }
    }

    fn run_inference(&mut self, tick: u64, report: &mut TickReport) {
        let window_size = self.window_size();
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        let window = match self.buffer.snapshot(window_size) {
            Ok(window) => window,
            Err(e) => {
                log::debug!("Tick {}: {}", tick, e);
                return;
            }
        };

        self.last_inference_tick = Some(tick);

        match engine.infer(&window) {
            Ok(result) => {
                self.metrics.inferences += 1;
                log::debug!(
                    "Tick {}: {} (score={:.3}, confidence={:.3})",
                    tick,
                    result.label,
                    result.score,
                    result.confidence
                );

                if let Some(evicted) = self.queue.enqueue(result.clone()) {
                    self.metrics.evictions += 1;
                    log::warn!(
                        "Upload queue full ({}), evicted result from tick {}",
                        self.queue.capacity(),
                        evicted.tick
                    );
                    self.record(DeviceEvent::queue_eviction(self.session_id, tick, &evicted));
                    report.evicted = Some(evicted);
                }
                self.metrics.enqueued += 1;
                report.result = Some(result);
            }
            Err(InferenceError::Timeout { elapsed, deadline }) => {
                self.metrics.inference_timeouts += 1;
                log::warn!("Tick {}: inference took {:?} (deadline {:?}), dropped", tick, elapsed, deadline);
                self.record(DeviceEvent::inference_timeout(self.session_id, tick, elapsed, deadline));
                report.inference_error = Some(InferenceError::Timeout { elapsed, deadline });
            }
            Err(e) => {
                self.metrics.inference_errors += 1;
                log::warn!("Tick {}: inference failed: {}", tick, e);
                report.inference_error = Some(e);
            }
        }
    }

    fn account_transport(&mut self, tick: u64, outcome: &SendOutcome) {
        self.metrics.delivery_attempts = self.transport.stats().attempts;

        match outcome {
            SendOutcome::Delivered { count, .. } => {
                self.metrics.delivered += *count as u64;
            }
            SendOutcome::DeliveryFailed { attempts, count, error } => {
                self.metrics.delivery_failures += 1;
                self.record(DeviceEvent::delivery_failed(self.session_id, tick, *attempts, *count, error));
            }
            SendOutcome::Idle | SendOutcome::Waiting { .. } | SendOutcome::Retrying { .. } => {}
        }
    }

    fn record(&mut self, event: DeviceEvent) {
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record(&event) {
                log::error!("Failed to record {} event: {}", event.event_type.as_str(), e);
            }
        }
    }

    /// Window the engine consumes, or the configured one without a model
    pub fn window_size(&self) -> usize {
        self.engine
            .as_ref()
            .map(|e| e.window_size())
            .unwrap_or(self.settings.window_size)
    }

    pub fn has_inference(&self) -> bool {
        self.engine.is_some()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Session counters plus model latency, for status lines
    pub fn status_summary(&self) -> String {
        let line = self.metrics.status_line(self.queue.len());
        match self.engine.as_ref().map(|e| e.stats()) {
            Some(stats) => format!(
                "{} avg_latency_us={} max_latency_us={}",
                line, stats.avg_latency_us, stats.max_latency_us
            ),
            None => format!("{} inference=off", line),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    pub fn transport(&self) -> &Transport<E> {
        &self.transport
    }

    pub fn recorder(&self) -> Option<&Recorder> {
        self.recorder.as_ref()
    }
}
