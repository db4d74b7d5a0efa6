use super::table::PatternTable;
use super::types::{
    ActiveKeySet, ChordAction, LogicalButton, OutputChord, PendingChord, BUTTON_COUNT,
};
use crate::config::ButtonMap;
use crate::event::RawEvent;
use chrono::Local;
use tracing::{debug, info};

// Per-button resolution state
#[derive(Debug, Clone, PartialEq, Default)]
enum Slot {
    #[default]
    Idle,
    // Press batch emitted, waiting for the release trigger
    Armed(PendingChord),
    // Release trigger seen, release batch goes out after the debounce delay
    Releasing(PendingChord),
}

/// Chord state machine for one physical keyboard
///
/// Owns the device's live [`ActiveKeySet`] and one pending slot per logical
/// button. The matcher never touches a device; it returns a [`ChordAction`] and
/// the capture task carries it out.
#[derive(Debug)]
pub struct ChordMatcher {
    table: PatternTable,
    button_map: ButtonMap,
    active: ActiveKeySet,
    slots: [Slot; BUTTON_COUNT],
}

impl ChordMatcher {
    pub fn new(table: PatternTable, button_map: ButtonMap) -> Self {
        info!(
            "Chord matcher ready for profile {} with {} patterns",
            table.profile(),
            table.patterns().len()
        );
        Self {
            table,
            button_map,
            active: ActiveKeySet::new(),
            slots: Default::default(),
        }
    }

    /// Folds one keyboard event into the active set and evaluates the table.
    ///
    /// Rules are checked in declared order and the first matching rule wins,
    /// so at most one action results from any event.
    pub fn on_event(&mut self, seed: &RawEvent) -> Option<ChordAction> {
        if !seed.is_key() {
            return None;
        }
        self.active.apply(seed);

        debug!(
            "Active keys {:?}, seed code {} value {} at {}",
            self.active.codes().collect::<Vec<_>>(),
            seed.code,
            seed.value,
            seed.timestamp.format("%H:%M:%S.%3f")
        );

        for pattern in self.table.patterns() {
            let button = pattern.button;
            let slot = &mut self.slots[button.index()];

            match slot {
                Slot::Idle => {
                    if pattern.entry.matches(&self.active, seed) {
                        let chord = self.button_map.chord(button).clone();
                        *slot = Slot::Armed(PendingChord {
                            button,
                            chord: chord.clone(),
                            armed_at: seed.timestamp,
                        });
                        debug!("{} armed with {}", button, chord);
                        return Some(ChordAction::Press { button, chord });
                    }
                }
                Slot::Armed(_) => {
                    if pattern.release.matches(&self.active, seed) {
                        if let Slot::Armed(pending) = std::mem::take(slot) {
                            *slot = Slot::Releasing(pending);
                        }
                        debug!("{} release triggered by code {}", button, seed.code);
                        return Some(ChordAction::ScheduleRelease { button });
                    }
                    if pattern
                        .secondary
                        .is_some_and(|secondary| secondary.matches(seed))
                    {
                        // Dropped without a release; the consumer sees the press only.
                        *slot = Slot::Idle;
                        debug!("{} secondary edge, pending chord discarded", button);
                        return Some(ChordAction::ToggleGyro { button });
                    }
                }
                Slot::Releasing(_) => {}
            }
        }

        None
    }

    /// Finishes a debounced release and frees the button's slot.
    ///
    /// Returns the chord whose release batch must be emitted, or `None` if the
    /// button was not waiting for one.
    pub fn complete_release(&mut self, button: LogicalButton) -> Option<OutputChord> {
        let slot = &mut self.slots[button.index()];
        match std::mem::take(slot) {
            Slot::Releasing(pending) => {
                debug!(
                    "{} released after {} ms",
                    button,
                    (Local::now() - pending.armed_at).num_milliseconds()
                );
                Some(pending.chord)
            }
            other => {
                *slot = other;
                None
            }
        }
    }

    pub fn pending(&self, button: LogicalButton) -> Option<&PendingChord> {
        match &self.slots[button.index()] {
            Slot::Armed(pending) | Slot::Releasing(pending) => Some(pending),
            Slot::Idle => None,
        }
    }

    pub fn pending_count(&self) -> usize {
        LogicalButton::ALL
            .iter()
            .filter(|button| self.pending(**button).is_some())
            .count()
    }
}
