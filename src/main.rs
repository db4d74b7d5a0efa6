pub mod chord;
pub mod config;
pub mod device;
pub mod event;
pub mod gyro;
pub mod lifecycle;
pub mod pipeline;
pub mod profile;

use crate::chord::{ChordMatcher, PatternTable};
use crate::config::HandyconConfig;
use crate::device::{AcquiredDevices, DeviceAcquirer};
use crate::gyro::{GyroFusion, GyroToggle, IioGyro};
use crate::lifecycle::Supervisor;
use crate::pipeline::{EventEmitter, KeyboardCapture, PassthroughRouter};
use color_eyre::Result;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

const LOG_ENV: &str = "HANDYCON_LOG";
/// Controller events waiting for the fusion task
const FUSION_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = HandyconConfig::load()?;
    let profile = profile::detect_profile()?;

    let devices = DeviceAcquirer::new(profile)
        .acquire(&config.button_map)
        .await?;
    let nodes = devices.hidden_nodes();
    let AcquiredDevices {
        keyboard,
        controller,
        virtual_device,
    } = devices;
    let emitter = EventEmitter::new(virtual_device);

    let gyro = match IioGyro::open() {
        Ok(gyro) => Some(gyro),
        Err(e) => {
            warn!("Gyro aim unavailable: {}", e);
            None
        }
    };
    let toggle = GyroToggle::new(config.gyro_enabled, gyro.is_some());

    let mut supervisor = Supervisor::start(nodes);
    let cancel = supervisor.cancel_token();

    let matcher = ChordMatcher::new(
        PatternTable::for_profile(profile),
        config.button_map.clone(),
    );
    let keyboard_capture = KeyboardCapture::new(
        keyboard.device.into_event_stream()?,
        matcher,
        emitter.clone(),
        toggle.clone(),
    );
    supervisor.spawn("keyboard capture", keyboard_capture.run(cancel.clone()));

    // With a sensor, every controller event passes through the fusion task
    let (buffer_tx, fusion) = match gyro {
        Some(gyro) => {
            let (buffer_tx, buffer_rx) = mpsc::channel(FUSION_BUFFER);
            let fusion = GyroFusion::new(
                gyro,
                config.gyro_sensitivity,
                buffer_rx,
                emitter.clone(),
                toggle,
            );
            (Some(buffer_tx), Some(fusion))
        }
        None => (None, None),
    };

    let router = PassthroughRouter::new(
        controller.device.into_event_stream()?,
        emitter,
        buffer_tx,
    );
    supervisor.spawn("controller passthrough", router.run(cancel.clone()));

    if let Some(fusion) = fusion {
        supervisor.spawn("gyro fusion", fusion.run(cancel));
    }

    let stopped = supervisor.wait_for_shutdown().await?.drain().await;
    stopped.into_result()?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|value| Level::from_str(value.trim()).ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
