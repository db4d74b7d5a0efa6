use super::{EventEmitter, EventSource, PipelineError};
use crate::chord::{ChordAction, ChordMatcher, LogicalButton};
use crate::device::DeviceRole;
use crate::event::RawEvent;
use crate::gyro::GyroToggle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

/// Delay between a release trigger and the release batch
pub const RELEASE_DEBOUNCE: Duration = Duration::from_millis(150);

/// Reads the grabbed keyboard and turns its chords into gamepad presses
///
/// Debounced releases sit in a delay queue so a release waiting out its
/// delay never holds up the rest of the device's events.
pub struct KeyboardCapture<S> {
    source: S,
    matcher: ChordMatcher,
    emitter: EventEmitter,
    toggle: GyroToggle,
    releases: DelayQueue<LogicalButton>,
}

impl<S: EventSource> KeyboardCapture<S> {
    pub fn new(source: S, matcher: ChordMatcher, emitter: EventEmitter, toggle: GyroToggle) -> Self {
        Self {
            source,
            matcher,
            emitter,
            toggle,
            releases: DelayQueue::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        info!("Keyboard capture started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let pending = self.matcher.pending_count();
                    if pending > 0 {
                        warn!("Discarding {} pending chord(s) on shutdown", pending);
                    }
                    info!("Keyboard capture stopped");
                    return Ok(());
                }

                event = self.source.next_event() => {
                    let event = event.map_err(|source| PipelineError::Read {
                        role: DeviceRole::Keyboard,
                        source,
                    })?;
                    match event {
                        Some(event) => self.handle_event(&event)?,
                        None => return Err(PipelineError::Disconnected(DeviceRole::Keyboard)),
                    }
                }

                Some(expired) = std::future::poll_fn(|cx| self.releases.poll_expired(cx)),
                    if !self.releases.is_empty() =>
                {
                    self.finish_release(expired.into_inner())?;
                }
            }
        }
    }

    fn handle_event(&mut self, event: &RawEvent) -> Result<(), PipelineError> {
        match self.matcher.on_event(event) {
            Some(ChordAction::Press { button, chord }) => {
                info!("{} pressed, sending {}", button, chord);
                self.emitter.emit(&chord.press_events())?;
            }
            Some(ChordAction::ScheduleRelease { button }) => {
                debug!("{} release in {:?}", button, RELEASE_DEBOUNCE);
                self.releases.insert(button, RELEASE_DEBOUNCE);
            }
            Some(ChordAction::ToggleGyro { button }) => {
                let enabled = self.toggle.toggle();
                info!(
                    "{} held, gyro aim {}",
                    button,
                    if enabled { "enabled" } else { "disabled" }
                );
            }
            None => {}
        }
        Ok(())
    }

    fn finish_release(&mut self, button: LogicalButton) -> Result<(), PipelineError> {
        if let Some(chord) = self.matcher.complete_release(button) {
            info!("{} released, sending {}", button, chord);
            self.emitter.emit(&chord.release_events())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::PatternTable;
    use crate::config::ButtonMap;
    use crate::pipeline::emitter::testing::RecordingSink;
    use crate::profile::SystemProfile;
    use evdev::{EventType, Key};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    struct Harness {
        tx: mpsc::Sender<RawEvent>,
        sink: RecordingSink,
        toggle: GyroToggle,
        cancel: CancellationToken,
        task: JoinHandle<Result<(), PipelineError>>,
    }

    fn start(profile: SystemProfile) -> Harness {
        let (tx, rx) = mpsc::channel(32);
        let sink = RecordingSink::default();
        let toggle = GyroToggle::new(false, true);
        let cancel = CancellationToken::new();
        let matcher = ChordMatcher::new(PatternTable::for_profile(profile), ButtonMap::default());
        let capture =
            KeyboardCapture::new(rx, matcher, EventEmitter::new(sink.clone()), toggle.clone());
        let task = tokio::spawn(capture.run(cancel.clone()));
        Harness {
            tx,
            sink,
            toggle,
            cancel,
            task,
        }
    }

    async fn send(tx: &mpsc::Sender<RawEvent>, events: &[(u16, i32)]) {
        for &(code, value) in events {
            tx.send(RawEvent::key(code, value)).await.unwrap();
        }
    }

    fn keys(keys: &[Key], value: i32) -> Vec<(EventType, u16, i32)> {
        keys.iter()
            .map(|key| (EventType::KEY, key.code(), value))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn qam_chord_releases_after_debounce() {
        let h = start(SystemProfile::AyaGen2);

        send(&h.tx, &[(97, 1), (100, 1), (111, 1)]).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            h.sink.frames(),
            vec![keys(&[Key::KEY_LEFTCTRL, Key::KEY_2], 1)]
        );

        send(&h.tx, &[(111, 0), (100, 0), (97, 0)]).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.sink.frames().len(), 1, "release must wait for the debounce");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            h.sink.frames(),
            vec![
                keys(&[Key::KEY_LEFTCTRL, Key::KEY_2], 1),
                keys(&[Key::KEY_LEFTCTRL, Key::KEY_2], 0),
            ]
        );

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pending_release_does_not_block_other_chords() {
        let h = start(SystemProfile::AyaGen2);

        // Screenshot press and release, then home while screenshot debounces
        send(&h.tx, &[(99, 1), (125, 1), (99, 0), (125, 0)]).await;
        send(&h.tx, &[(34, 1), (125, 1)]).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            h.sink.frames(),
            vec![
                keys(&[Key::BTN_MODE, Key::BTN_TR], 1),
                keys(&[Key::BTN_MODE], 1),
            ]
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            h.sink.frames().last(),
            Some(&keys(&[Key::BTN_MODE, Key::BTN_TR], 0))
        );

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn esc_hold_toggles_gyro() {
        let h = start(SystemProfile::AyaGen2);
        assert!(!h.toggle.is_enabled());

        send(&h.tx, &[(1, 1), (1, 2), (1, 0)]).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(h.toggle.is_enabled());
        // Press only; the held edge drops the pending chord
        assert_eq!(h.sink.frames().len(), 1);

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_pending_chords() {
        let h = start(SystemProfile::AyaGen2);
        send(&h.tx, &[(40, 1), (133, 1), (40, 0)]).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.sink.frames().len(), 1);
    }

    #[tokio::test]
    async fn closed_source_is_a_disconnect() {
        let h = start(SystemProfile::AyaGen2);
        drop(h.tx);
        let result = h.task.await.unwrap();
        assert!(matches!(
            result,
            Err(PipelineError::Disconnected(DeviceRole::Keyboard))
        ));
    }
}
