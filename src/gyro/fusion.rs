use super::{AngularVelocity, GyroSensor, GyroToggle};
use crate::event::RawEvent;
use crate::pipeline::{EventEmitter, PipelineError};
use evdev::{AbsoluteAxisType, EventType, InputEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const AXIS_MIN: i32 = -32767;
pub const AXIS_MAX: i32 = 32767;

/// Poll interval while gyro aim is on
pub const ACTIVE_INTERVAL: Duration = Duration::from_millis(10);
/// Longest wait between checks while gyro aim is off
pub const IDLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Adds the scaled angular velocity to an axis value and clamps to stick range
pub fn fuse_axis(velocity: f64, sensitivity: f64, base: i32) -> i32 {
    let delta = (velocity * sensitivity).trunc() as i64;
    delta
        .saturating_add(i64::from(base))
        .clamp(i64::from(AXIS_MIN), i64::from(AXIS_MAX)) as i32
}

/// Right stick values held between ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GyroState {
    pub last_x: i32,
    pub last_y: i32,
}

/// Merges gyro motion into the right stick
///
/// Consumes every controller event the passthrough router receives while a
/// sensor is present, so one path keeps them in arrival order. While gyro aim
/// is off they are forwarded unchanged as they arrive. While it is on, RX/RY
/// events get the current angular velocity added and every other event is
/// emitted unchanged. A tick without controller input emits a
/// synthetic RX/RY pair from the held values so motion continues while the
/// stick rests.
pub struct GyroFusion<G> {
    sensor: G,
    sensitivity: f64,
    state: GyroState,
    buffer: mpsc::Receiver<RawEvent>,
    emitter: EventEmitter,
    toggle: GyroToggle,
}

impl<G: GyroSensor> GyroFusion<G> {
    pub fn new(
        sensor: G,
        sensitivity: f64,
        buffer: mpsc::Receiver<RawEvent>,
        emitter: EventEmitter,
        toggle: GyroToggle,
    ) -> Self {
        Self {
            sensor,
            sensitivity,
            state: GyroState::default(),
            buffer,
            emitter,
            toggle,
        }
    }

    pub fn with_state(mut self, state: GyroState) -> Self {
        self.state = state;
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        info!("Gyro fusion started, sensitivity {}", self.sensitivity);
        let mut toggle_changes = self.toggle.subscribe();

        loop {
            if self.toggle.fusion_active() {
                self.tick()?;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACTIVE_INTERVAL) => {}
                }
            } else {
                // Whatever the router buffered before the switch goes out as is
                self.flush()?;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_INTERVAL) => {}
                    _ = toggle_changes.changed() => {}
                    event = self.buffer.recv() => match event {
                        Some(event) => self.emitter.emit(&[event.to_input_event()])?,
                        None => {
                            // Router gone, nothing left to forward
                            cancel.cancelled().await;
                            break;
                        }
                    },
                }
            }
        }

        info!("Gyro fusion stopped");
        Ok(())
    }

    fn tick(&mut self) -> Result<(), PipelineError> {
        let velocity = match self.sensor.sample() {
            Ok(velocity) => velocity,
            Err(e) => {
                warn!("Gyro read failed, disabling gyro aim: {}", e);
                self.toggle.mark_unavailable();
                return self.flush();
            }
        };

        let mut consumed = false;
        while let Ok(event) = self.buffer.try_recv() {
            consumed = true;
            let event = self.fuse_event(event, velocity);
            self.emitter.emit(&[event.to_input_event()])?;
        }

        if !consumed {
            let batch = self.synthetic_axes(velocity);
            debug!("Gyro events: RX {} RY {}", batch[0].value(), batch[1].value());
            self.emitter.emit(&batch)?;
        }
        Ok(())
    }

    fn fuse_event(&mut self, event: RawEvent, velocity: AngularVelocity) -> RawEvent {
        if event.event_type != EventType::ABSOLUTE {
            return event;
        }
        if event.code == AbsoluteAxisType::ABS_RX.0 {
            self.state.last_x = fuse_axis(velocity.x, self.sensitivity, event.value);
            debug!("RX {} -> {}", event.value, self.state.last_x);
            return event.with_value(self.state.last_x);
        }
        if event.code == AbsoluteAxisType::ABS_RY.0 {
            self.state.last_y = fuse_axis(velocity.y, self.sensitivity, event.value);
            debug!("RY {} -> {}", event.value, self.state.last_y);
            return event.with_value(self.state.last_y);
        }
        event
    }

    fn synthetic_axes(&self, velocity: AngularVelocity) -> [InputEvent; 2] {
        [
            InputEvent::new(
                EventType::ABSOLUTE,
                AbsoluteAxisType::ABS_RX.0,
                fuse_axis(velocity.x, self.sensitivity, self.state.last_x),
            ),
            InputEvent::new(
                EventType::ABSOLUTE,
                AbsoluteAxisType::ABS_RY.0,
                fuse_axis(velocity.y, self.sensitivity, self.state.last_y),
            ),
        ]
    }

    fn flush(&mut self) -> Result<(), PipelineError> {
        while let Ok(event) = self.buffer.try_recv() {
            self.emitter.emit(&[event.to_input_event()])?;
        }
        Ok(())
    }
}
