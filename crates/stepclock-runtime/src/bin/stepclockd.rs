//! stepclockd - impulse slave clock daemon
//!
//! Usage: `stepclockd [config.json]`

use std::path::PathBuf;

use thiserror::Error;

use stepclock_core::{StepClockError, SystemMonotonic};
use stepclock_drive::{Bridge, DryRunBridge, PulseDriver, SysfsBridge};
use stepclock_runtime::{http, logging, ApiState, CatchUpEngine, ClockConfig, Controller};
use stepclock_state::{FileStore, PersistedPosition};
use stepclock_time::{FileBackedClock, SntpClient, SystemHostClock, TimeDevices, TimeSource};

const DEFAULT_CONFIG: &str = "config.json";
const COMMAND_QUEUE: usize = 16;

#[derive(Error, Debug)]
enum DaemonError {
    #[error(transparent)]
    Clock(#[from] StepClockError),

    #[error("http listener: {0}")]
    Io(#[from] std::io::Error),
}

fn open_bridge(config: &ClockConfig) -> Box<dyn Bridge> {
    let Some(lines) = config.bridge else {
        tracing::warn!("no bridge lines configured, pulses are only logged");
        return Box::new(DryRunBridge::new());
    };
    match SysfsBridge::open(lines.gpio_in1, lines.gpio_in2) {
        Ok(bridge) => Box::new(bridge),
        Err(e) => {
            tracing::error!(error = %e, "bridge unavailable, pulses are only logged");
            Box::new(DryRunBridge::new())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), DaemonError> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    // The log format comes from the config, so it is read before logging is up
    let config = ClockConfig::load_or_default(&path);
    logging::init(config.log_json);
    if !path.exists() {
        tracing::warn!(config = %path.display(), "config file missing, running on defaults");
    }
    tracing::info!(config = %path.display(), mode = %config.mode, "stepclockd starting");

    let devices = TimeDevices {
        host: Box::new(SystemHostClock::new()),
        chip: Box::new(FileBackedClock::new(&config.rtc_path)),
        network: Box::new(SntpClient::new()),
    };
    let time = TimeSource::initialize(config.time_source_config()?, devices)?;
    let position = PersistedPosition::new(Box::new(FileStore::new(&config.state_path)));

    let clock = SystemMonotonic::new();
    let driver = PulseDriver::new(open_bridge(&config), Box::new(clock), config.pulse_timing());
    let engine = CatchUpEngine::boot(time, position, driver, Box::new(clock), config.engine_config());
    let (mut controller, handle) = Controller::new(engine, COMMAND_QUEUE);

    if let Some(addr) = config.http_listen {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let state = ApiState::new(handle, config.web_edit_enabled);
        tokio::spawn(async move {
            if let Err(e) = http::serve(listener, state).await {
                tracing::error!(error = %e, "http control surface stopped");
            }
        });
    }

    let poll_interval = config.poll_interval();
    tracing::info!(poll = %humantime::format_duration(poll_interval), "control loop running");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
        }
    };
    let passes = controller.run(poll_interval, shutdown).await;
    tracing::info!(passes, position = %controller.engine().persisted(), "shutting down");
    Ok(())
}
