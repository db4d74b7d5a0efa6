//! Declarative chord pattern tables, one per hardware profile
//!
//! Every generation sends the extra buttons as keyboard scan-code chords. The
//! tables below describe which fingerprints arm a logical button and what ends
//! it; the matcher walks them in declared order and the first hit wins.

use super::types::{ActiveKeySet, LogicalButton};
use crate::event::{Edge, RawEvent};
use crate::profile::SystemProfile;

/// How a logical button gets armed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTrigger {
    /// Accepted active-key fingerprints
    pub fingerprints: Vec<&'static [u16]>,
    /// Seed codes that arm the button on their own
    pub seed_codes: &'static [u16],
}

impl EntryTrigger {
    pub fn matches(&self, active: &ActiveKeySet, seed: &RawEvent) -> bool {
        seed.edge() == Some(Edge::Press)
            && (self.fingerprints.iter().any(|fp| active.matches(fp))
                || self.seed_codes.contains(&seed.code))
    }
}

/// How an armed logical button gets released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTrigger {
    /// Every key is up and the releasing key is one of these
    EmptyWithSeed(&'static [u16]),
    /// Every key is up, or one of these keys was just released
    EmptyOrSeed(&'static [u16]),
    /// The remaining active set equals this fingerprint
    Fingerprint(&'static [u16]),
    /// One of these keys was just released
    Seed(&'static [u16]),
}

impl ReleaseTrigger {
    pub fn matches(&self, active: &ActiveKeySet, seed: &RawEvent) -> bool {
        if seed.edge() != Some(Edge::Release) {
            return false;
        }
        match self {
            ReleaseTrigger::EmptyWithSeed(codes) => active.is_empty() && codes.contains(&seed.code),
            ReleaseTrigger::EmptyOrSeed(codes) => active.is_empty() || codes.contains(&seed.code),
            ReleaseTrigger::Fingerprint(fp) => active.matches(fp),
            ReleaseTrigger::Seed(codes) => codes.contains(&seed.code),
        }
    }
}

/// Alternate edge on an armed button that toggles gyro fusion instead of releasing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondaryTrigger {
    pub seed_code: u16,
    pub edge: Edge,
}

impl SecondaryTrigger {
    pub fn matches(&self, seed: &RawEvent) -> bool {
        seed.code == self.seed_code && seed.edge() == Some(self.edge)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordPattern {
    pub button: LogicalButton,
    pub entry: EntryTrigger,
    pub release: ReleaseTrigger,
    pub secondary: Option<SecondaryTrigger>,
}

/// Immutable, profile-selected list of chord patterns in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTable {
    profile: SystemProfile,
    patterns: Vec<ChordPattern>,
}

// Scan codes shared by every generation
const SCREENSHOT_CHORD: &[u16] = &[99, 125];
const SCREENSHOT_CHORD_GEN1: &[u16] = &[125];
const QAM_CHORDS: [&[u16]; 3] = [&[97, 100, 111], &[40, 133], &[32, 125]];
const ESC_CHORD: &[u16] = &[97, 100, 111];
const OSK_CHORD: &[u16] = &[24, 97, 125];
const HOME_CHORDS: [&[u16]; 3] = [&[96, 105, 133], &[88, 97, 125], &[34, 125]];

const KEY_ESC: u16 = 1;

impl PatternTable {
    pub fn for_profile(profile: SystemProfile) -> Self {
        let mut screenshot = vec![SCREENSHOT_CHORD];
        // First generation sends the screenshot button as a bare META
        if profile == SystemProfile::AyaGen1 {
            screenshot.insert(0, SCREENSHOT_CHORD_GEN1);
        }

        let patterns = vec![
            ChordPattern {
                button: LogicalButton::Button1,
                entry: EntryTrigger {
                    fingerprints: screenshot,
                    seed_codes: &[],
                },
                release: ReleaseTrigger::EmptyWithSeed(&[99, 125]),
                secondary: None,
            },
            ChordPattern {
                button: LogicalButton::Button2,
                entry: EntryTrigger {
                    fingerprints: QAM_CHORDS.to_vec(),
                    seed_codes: &[],
                },
                release: ReleaseTrigger::EmptyOrSeed(&[32, 40, 100, 111]),
                secondary: None,
            },
            ChordPattern {
                button: LogicalButton::Button3,
                entry: EntryTrigger {
                    fingerprints: vec![ESC_CHORD],
                    seed_codes: &[KEY_ESC],
                },
                release: ReleaseTrigger::EmptyWithSeed(&[KEY_ESC, 100]),
                secondary: Some(SecondaryTrigger {
                    seed_code: KEY_ESC,
                    edge: Edge::Held,
                }),
            },
            ChordPattern {
                button: LogicalButton::Button4,
                entry: EntryTrigger {
                    fingerprints: vec![OSK_CHORD],
                    seed_codes: &[],
                },
                release: ReleaseTrigger::Fingerprint(&[97]),
                secondary: None,
            },
            ChordPattern {
                button: LogicalButton::Button5,
                entry: EntryTrigger {
                    fingerprints: HOME_CHORDS.to_vec(),
                    seed_codes: &[],
                },
                release: ReleaseTrigger::Seed(&[88, 96, 105, 34]),
                secondary: None,
            },
        ];

        Self { profile, patterns }
    }

    pub fn profile(&self) -> SystemProfile {
        self.profile
    }

    pub fn patterns(&self) -> &[ChordPattern] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_in_priority_order() {
        let table = PatternTable::for_profile(SystemProfile::AyaGen2);
        let order: Vec<LogicalButton> = table.patterns().iter().map(|p| p.button).collect();
        assert_eq!(order, LogicalButton::ALL.to_vec());
    }

    #[test]
    fn only_first_generation_accepts_bare_meta() {
        let bare_meta: ActiveKeySet = [125].into_iter().collect();
        let seed = RawEvent::key(125, 1);

        let gen1 = PatternTable::for_profile(SystemProfile::AyaGen1);
        let gen2 = PatternTable::for_profile(SystemProfile::AyaGen2);
        assert!(gen1.patterns()[0].entry.matches(&bare_meta, &seed));
        assert!(!gen2.patterns()[0].entry.matches(&bare_meta, &seed));
    }

    #[test]
    fn release_triggers_need_release_edge() {
        let empty = ActiveKeySet::new();
        let trigger = ReleaseTrigger::EmptyOrSeed(&[100]);
        assert!(trigger.matches(&empty, &RawEvent::key(100, 0)));
        assert!(!trigger.matches(&empty, &RawEvent::key(100, 1)));
        assert!(!trigger.matches(&empty, &RawEvent::key(100, 2)));
    }

    #[test]
    fn seed_release_ignores_remaining_keys() {
        let still_held: ActiveKeySet = [97, 125].into_iter().collect();
        let trigger = ReleaseTrigger::Seed(&[88]);
        assert!(trigger.matches(&still_held, &RawEvent::key(88, 0)));
        assert!(!trigger.matches(&still_held, &RawEvent::key(97, 0)));
    }
}
