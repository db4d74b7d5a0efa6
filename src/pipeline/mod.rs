//! Event pipeline between the physical devices and the virtual device
//!
//! Two capture tasks read the grabbed devices independently:
//!
//! - [`keyboard::KeyboardCapture`] feeds the chord matcher and emits the
//!   synthetic gamepad presses and releases
//! - [`passthrough::PassthroughRouter`] forwards native controller events,
//!   through the gyro fusion task whenever a sensor is present
//!
//! Everything that reaches the virtual device goes through the shared
//! [`emitter::EventEmitter`].

pub mod emitter;
pub mod keyboard;
pub mod passthrough;

use crate::device::DeviceRole;
use crate::event::RawEvent;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use emitter::{EmitError, EventEmitter, EventSink};
pub use keyboard::KeyboardCapture;
pub use passthrough::PassthroughRouter;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to read from {role} device: {source}")]
    Read {
        role: DeviceRole,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} device disconnected")]
    Disconnected(DeviceRole),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Source of hardware events for a capture task
///
/// `Ok(None)` means the stream ended and no more events will arrive.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> std::io::Result<Option<RawEvent>>;
}

/// errno reported once the device is unplugged
const ENODEV: i32 = 19;

#[async_trait]
impl EventSource for evdev::EventStream {
    async fn next_event(&mut self) -> std::io::Result<Option<RawEvent>> {
        match evdev::EventStream::next_event(self).await {
            Ok(event) => Ok(Some(RawEvent::from(event))),
            Err(e) if e.raw_os_error() == Some(ENODEV) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl EventSource for mpsc::Receiver<RawEvent> {
    async fn next_event(&mut self) -> std::io::Result<Option<RawEvent>> {
        Ok(self.recv().await)
    }
}
