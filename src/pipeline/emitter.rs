use evdev::uinput::VirtualDevice;
use evdev::InputEvent;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("Failed to write to virtual device: {0}")]
    Write(#[source] std::io::Error),

    #[error("Virtual device lock poisoned")]
    Poisoned,
}

/// Destination for framed event batches
///
/// One call writes the batch in order followed by a single synchronization
/// marker.
pub trait EventSink: Send {
    fn write_batch(&mut self, events: &[InputEvent]) -> std::io::Result<()>;
}

impl EventSink for VirtualDevice {
    fn write_batch(&mut self, events: &[InputEvent]) -> std::io::Result<()> {
        // uinput appends SYN_REPORT after the batch
        self.emit(events)
    }
}

/// Shared handle to the virtual device
///
/// Cloned into every emitting task. Each batch is written under the lock, so
/// batches from different tasks never interleave.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<Mutex<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new<S: EventSink + 'static>(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Writes `batch` as one frame. An empty batch writes nothing, not even
    /// the synchronization marker.
    pub fn emit(&self, batch: &[InputEvent]) -> Result<(), EmitError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut sink = self.sink.lock().map_err(|_| EmitError::Poisoned)?;
        sink.write_batch(batch).map_err(EmitError::Write)?;
        debug!("Emitted batch of {} event(s)", batch.len());
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{BrokenSink, RecordingSink};
    use super::*;
    use evdev::{EventType, Key};

    #[test]
    fn batch_is_written_in_order_then_synced_once() {
        let sink = RecordingSink::default();
        let emitter = EventEmitter::new(sink.clone());

        emitter
            .emit(&[
                InputEvent::new(EventType::KEY, Key::KEY_LEFTCTRL.code(), 1),
                InputEvent::new(EventType::KEY, Key::KEY_2.code(), 1),
            ])
            .unwrap();

        assert_eq!(
            sink.events(),
            vec![
                (EventType::KEY, Key::KEY_LEFTCTRL.code(), 1),
                (EventType::KEY, Key::KEY_2.code(), 1),
                (EventType::SYNCHRONIZATION, 0, 0),
            ]
        );
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let sink = RecordingSink::default();
        let emitter = EventEmitter::new(sink.clone());
        emitter.emit(&[]).unwrap();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn clones_share_one_device() {
        let sink = RecordingSink::default();
        let first = EventEmitter::new(sink.clone());
        let second = first.clone();

        first
            .emit(&[InputEvent::new(EventType::KEY, Key::BTN_MODE.code(), 1)])
            .unwrap();
        second
            .emit(&[InputEvent::new(EventType::KEY, Key::BTN_MODE.code(), 0)])
            .unwrap();

        assert_eq!(sink.frames().len(), 2);
    }

    #[test]
    fn write_failures_surface() {
        let emitter = EventEmitter::new(BrokenSink);
        let err = emitter
            .emit(&[InputEvent::new(EventType::KEY, Key::BTN_MODE.code(), 1)])
            .unwrap_err();
        assert!(matches!(err, EmitError::Write(_)));
    }
}
