use super::{EventEmitter, EventSource, PipelineError};
use crate::device::DeviceRole;
use crate::event::RawEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Forwards native controller events to the virtual device
///
/// When a gyro sensor is present every event goes to the fusion task, which
/// adjusts the right stick while gyro aim is on and emits everything itself.
/// Without a sensor the router emits directly.
pub struct PassthroughRouter<S> {
    source: S,
    emitter: EventEmitter,
    fusion_buffer: Option<mpsc::Sender<RawEvent>>,
}

impl<S: EventSource> PassthroughRouter<S> {
    pub fn new(
        source: S,
        emitter: EventEmitter,
        fusion_buffer: Option<mpsc::Sender<RawEvent>>,
    ) -> Self {
        Self {
            source,
            emitter,
            fusion_buffer,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        info!("Controller passthrough started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Controller passthrough stopped");
                    return Ok(());
                }

                event = self.source.next_event() => {
                    let event = event.map_err(|source| PipelineError::Read {
                        role: DeviceRole::Controller,
                        source,
                    })?;
                    match event {
                        Some(event) => self.route(event).await?,
                        None => return Err(PipelineError::Disconnected(DeviceRole::Controller)),
                    }
                }
            }
        }
    }

    async fn route(&mut self, event: RawEvent) -> Result<(), PipelineError> {
        // The emitter frames every batch itself
        if event.is_sync() {
            return Ok(());
        }

        let event = match &self.fusion_buffer {
            // A full buffer holds the controller back rather than reordering it
            Some(buffer) => match buffer.send(event).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(event)) => {
                    debug!("Fusion task gone, forwarding directly");
                    self.fusion_buffer = None;
                    event
                }
            },
            None => event,
        };

        self.emitter.emit(&[event.to_input_event()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gyro::{AngularVelocity, GyroFusion, GyroSensor, GyroToggle, SensorError};
    use crate::pipeline::emitter::testing::RecordingSink;
    use evdev::{AbsoluteAxisType, EventType, Key};
    use std::time::Duration;

    struct StillGyro;

    impl GyroSensor for StillGyro {
        fn sample(&mut self) -> Result<AngularVelocity, SensorError> {
            Ok(AngularVelocity::default())
        }
    }

    const RX: u16 = AbsoluteAxisType::ABS_RX.0;

    fn abs(axis: AbsoluteAxisType, value: i32) -> RawEvent {
        RawEvent::new(EventType::ABSOLUTE, axis.0, value)
    }

    fn sync() -> RawEvent {
        RawEvent::new(EventType::SYNCHRONIZATION, 0, 0)
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_each_event_as_its_own_frame() {
        let (tx, rx) = mpsc::channel(16);
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let router = PassthroughRouter::new(rx, EventEmitter::new(sink.clone()), None);
        let task = tokio::spawn(router.run(cancel.clone()));

        tx.send(RawEvent::key(Key::BTN_SOUTH.code(), 1)).await.unwrap();
        tx.send(abs(AbsoluteAxisType::ABS_X, 1200)).await.unwrap();
        tx.send(sync()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            sink.frames(),
            vec![
                vec![(EventType::KEY, Key::BTN_SOUTH.code(), 1)],
                vec![(EventType::ABSOLUTE, AbsoluteAxisType::ABS_X.0, 1200)],
            ]
        );

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_present_routes_everything_through_fusion() {
        let (tx, rx) = mpsc::channel(16);
        let (buffer_tx, mut buffer_rx) = mpsc::channel(16);
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let router =
            PassthroughRouter::new(rx, EventEmitter::new(sink.clone()), Some(buffer_tx));
        let task = tokio::spawn(router.run(cancel.clone()));

        tx.send(abs(AbsoluteAxisType::ABS_RX, 500)).await.unwrap();
        tx.send(sync()).await.unwrap();
        tx.send(RawEvent::key(Key::BTN_SOUTH.code(), 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(sink.events().is_empty());
        assert_eq!(buffer_rx.try_recv().unwrap().value, 500);
        assert_eq!(buffer_rx.try_recv().unwrap().code, Key::BTN_SOUTH.code());
        assert!(buffer_rx.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_holds_events_back_in_order() {
        let (tx, rx) = mpsc::channel(16);
        let (buffer_tx, mut buffer_rx) = mpsc::channel(1);
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let router =
            PassthroughRouter::new(rx, EventEmitter::new(sink.clone()), Some(buffer_tx));
        let task = tokio::spawn(router.run(cancel.clone()));

        for value in [100, 200, 300] {
            tx.send(abs(AbsoluteAxisType::ABS_RX, value)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sink.events().is_empty());

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(buffer_rx.recv().await.unwrap().value);
        }
        assert_eq!(seen, vec![100, 200, 300]);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn switching_gyro_off_keeps_axis_order() {
        let (tx, rx) = mpsc::channel(16);
        let (buffer_tx, buffer_rx) = mpsc::channel(16);
        let sink = RecordingSink::default();
        let emitter = EventEmitter::new(sink.clone());
        let toggle = GyroToggle::new(true, true);
        let cancel = CancellationToken::new();

        let fusion = GyroFusion::new(
            StillGyro,
            30.0,
            buffer_rx,
            emitter.clone(),
            toggle.clone(),
        );
        let router = PassthroughRouter::new(rx, emitter, Some(buffer_tx));
        let fusion_task = tokio::spawn(fusion.run(cancel.clone()));
        let router_task = tokio::spawn(router.run(cancel.clone()));

        // Let the first tick pass so the next event waits in the buffer
        tokio::time::sleep(Duration::from_millis(1)).await;
        tx.send(abs(AbsoluteAxisType::ABS_RX, 5000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        toggle.toggle();
        tx.send(abs(AbsoluteAxisType::ABS_RX, 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        router_task.await.unwrap().unwrap();
        fusion_task.await.unwrap().unwrap();

        let rx_values: Vec<i32> = sink
            .events()
            .into_iter()
            .filter(|(kind, code, _)| *kind == EventType::ABSOLUTE && *code == RX)
            .map(|(_, _, value)| value)
            .collect();
        let newest = rx_values.iter().rposition(|value| *value == 0);
        let stale = rx_values.iter().rposition(|value| *value == 5000);
        assert!(stale.is_some());
        assert!(stale < newest, "RX emitted as {:?}", rx_values);
        assert_eq!(rx_values.last(), Some(&0));
    }
}
