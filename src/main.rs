//! Empathy Device Core - Main Entry Point
//!
//! Boot: logging -> config -> telemetry -> model -> connectivity -> loop.
//! Only a bad configuration stops the boot; a missing model or network
//! degrades the device instead.

mod constants;
mod logic;

use std::time::Instant;

use anyhow::Context;
use uuid::Uuid;

use constants::{APP_NAME, APP_VERSION};
use logic::config::DeviceConfig;
use logic::model::{load_model, EngineSettings, InferenceEngine, ModelLoadError};
use logic::sampling::{LayoutInfo, SimulatedSensor};
use logic::scheduler::{Scheduler, SchedulerSettings};
use logic::telemetry::{list_log_files, DeviceEvent, Recorder};
use logic::upload::{HttpConfig, HttpEndpoint, Transport};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}...", APP_NAME, APP_VERSION);

    let config = DeviceConfig::from_env().context("invalid device configuration")?;
    let session_id = Uuid::new_v4();
    let layout = LayoutInfo::current();

    log::info!(
        "Device {} (session {}), endpoint {}",
        config.device_id,
        session_id,
        config.endpoint_url
    );
    log::info!(
        "Channel layout v{} ({:08x}): {}",
        layout.version,
        layout.hash,
        layout.channel_names.join(", ")
    );

    let mut recorder = init_recorder(&config);
    record(&mut recorder, DeviceEvent::boot(session_id, &config.device_id, APP_VERSION));

    let engine = match load_engine(&config) {
        Ok(engine) => {
            record(&mut recorder, DeviceEvent::model_loaded(session_id, engine.info()));
            Some(engine)
        }
        Err(e) => {
            log::error!("Model unavailable, inference disabled: {}", e);
            record(&mut recorder, DeviceEvent::model_load_failed(session_id, &e));
            None
        }
    };

    // single logical thread: the loop never runs on more than one worker
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(run(config, session_id, engine, recorder))
}

async fn run(
    config: DeviceConfig,
    session_id: Uuid,
    engine: Option<InferenceEngine>,
    mut recorder: Option<Recorder>,
) -> anyhow::Result<()> {
    let endpoint = HttpEndpoint::new(HttpConfig {
        endpoint_url: config.endpoint_url.clone(),
        request_timeout: config.request_timeout(),
    })
    .context("failed to create upload client")?;

    let transport = Transport::new(endpoint, config.retry_policy(), config.device_id.clone(), session_id);

    log::info!("Waiting up to {:?} for {}", config.boot_connect_wait(), transport.endpoint().url());
    let started = Instant::now();
    let connected = transport.acquire_connectivity(config.boot_connect_wait()).await;
    record(&mut recorder, DeviceEvent::connectivity(session_id, connected, started.elapsed()));
    if !connected {
        log::warn!("Starting offline; results will queue until the endpoint answers");
    }

    let mut scheduler = Scheduler::new(
        SchedulerSettings::from(&config),
        session_id,
        Box::new(SimulatedSensor::new(config.sensor_seed)),
        engine,
        transport,
        recorder,
    );
    log::info!(
        "Loop starting for session {} (inference {})",
        scheduler.session_id(),
        if scheduler.has_inference() { "on" } else { "off" }
    );

    tokio::select! {
        _ = scheduler.run() => {}
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => log::info!("Interrupted"),
            Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
        },
    }

    log::info!("Stopped after {} ticks: {}", scheduler.metrics().ticks, scheduler.status_summary());
    log::info!("Buffer: {:?}", scheduler.buffer().status());
    log::info!("Queue: {:?}", scheduler.queue().status());
    if let Some(recorder) = scheduler.recorder() {
        log::info!("Events recorded: {}", recorder.events_recorded());
        log::debug!("Recorder: {:?}", recorder.stats());
    }

    Ok(())
}

fn load_engine(config: &DeviceConfig) -> Result<InferenceEngine, ModelLoadError> {
    let backend = load_model(&config.model_path, config.model_sha256.as_deref(), config.window_size)?;

    InferenceEngine::new(
        backend,
        EngineSettings {
            labels: config.labels.clone(),
            score_threshold: config.score_threshold,
            deadline: config.inference_deadline(),
        },
    )
}

fn init_recorder(config: &DeviceConfig) -> Option<Recorder> {
    let dir = config.telemetry_dir.as_ref()?;

    if let Ok(files) = list_log_files(dir) {
        log::debug!("{} earlier event log(s) in {:?}", files.len(), dir);
    }

    match Recorder::new(dir.clone()) {
        Ok(recorder) => {
            log::info!("Telemetry system initialized");
            Some(recorder)
        }
        Err(e) => {
            log::warn!("Telemetry init failed: {} - events will not be recorded", e);
            None
        }
    }
}

fn record(recorder: &mut Option<Recorder>, event: DeviceEvent) {
    if let Some(recorder) = recorder.as_mut() {
        if let Err(e) = recorder.record(&event) {
            log::error!("Failed to record {} event: {}", event.event_type.as_str(), e);
        }
    }
}
