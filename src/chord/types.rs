use crate::event::{Edge, RawEvent};
use chrono::{DateTime, Local};
use evdev::{EventType, InputEvent, Key, MiscType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::str::FromStr;

/// Number of remappable logical buttons
pub const BUTTON_COUNT: usize = 5;

/// Logical extra button on the handheld, independent of the scan codes it sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalButton {
    Button1,
    Button2,
    Button3,
    Button4,
    Button5,
}

impl LogicalButton {
    /// All buttons in declared priority order
    pub const ALL: [LogicalButton; BUTTON_COUNT] = [
        LogicalButton::Button1,
        LogicalButton::Button2,
        LogicalButton::Button3,
        LogicalButton::Button4,
        LogicalButton::Button5,
    ];

    /// Slot index into per-button tables
    pub fn index(self) -> usize {
        match self {
            LogicalButton::Button1 => 0,
            LogicalButton::Button2 => 1,
            LogicalButton::Button3 => 2,
            LogicalButton::Button4 => 3,
            LogicalButton::Button5 => 4,
        }
    }
}

impl Display for LogicalButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "button{}", self.index() + 1)
    }
}

/// Codes currently held down on one physical device
///
/// Membership only: two sets holding the same codes are the same fingerprint
/// regardless of the order the keys went down in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveKeySet {
    codes: BTreeSet<u16>,
}

impl ActiveKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the set. Only EV_KEY press/release edges change it;
    /// autorepeat leaves the set as is.
    pub fn apply(&mut self, event: &RawEvent) {
        if !event.is_key() {
            return;
        }
        match event.edge() {
            Some(Edge::Press) => {
                self.codes.insert(event.code);
            }
            Some(Edge::Release) => {
                self.codes.remove(&event.code);
            }
            Some(Edge::Held) | None => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Exact fingerprint comparison against a declared pattern
    pub fn matches(&self, pattern: &[u16]) -> bool {
        self.codes.len() == pattern.iter().collect::<BTreeSet<_>>().len()
            && pattern.iter().all(|code| self.codes.contains(code))
    }

    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.codes.iter().copied()
    }
}

impl FromIterator<u16> for ActiveKeySet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self {
            codes: iter.into_iter().collect(),
        }
    }
}

/// One `(event_type, code)` entry of an output chord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChordInput {
    Key(Key),
    Misc(MiscType),
}

impl ChordInput {
    pub fn event_type(&self) -> EventType {
        match self {
            ChordInput::Key(_) => EventType::KEY,
            ChordInput::Misc(_) => EventType::MISC,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ChordInput::Key(key) => key.code(),
            ChordInput::Misc(misc) => misc.0,
        }
    }

    fn event(&self, value: i32) -> InputEvent {
        InputEvent::new(self.event_type(), self.code(), value)
    }
}

impl FromStr for ChordInput {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let upper = name.trim().to_ascii_uppercase();
        if upper == "MSC_SCAN" {
            return Ok(ChordInput::Misc(MiscType::MSC_SCAN));
        }
        Key::from_str(&upper)
            .map(ChordInput::Key)
            .map_err(|_| format!("unknown input code name: {}", name))
    }
}

impl TryFrom<String> for ChordInput {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<ChordInput> for String {
    fn from(input: ChordInput) -> Self {
        match input {
            ChordInput::Key(key) => format!("{:?}", key),
            ChordInput::Misc(misc) => format!("{:?}", misc),
        }
    }
}

/// Ordered sequence of codes emitted as one synthetic button press
///
/// The press batch carries value 1 for every entry, the release batch mirrors
/// it in the same order with value 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputChord(Vec<ChordInput>);

impl OutputChord {
    pub fn new(inputs: Vec<ChordInput>) -> Self {
        Self(inputs)
    }

    pub fn keys(keys: &[Key]) -> Self {
        Self(keys.iter().copied().map(ChordInput::Key).collect())
    }

    pub fn inputs(&self) -> &[ChordInput] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn press_events(&self) -> Vec<InputEvent> {
        self.0.iter().map(|input| input.event(1)).collect()
    }

    pub fn release_events(&self) -> Vec<InputEvent> {
        self.0.iter().map(|input| input.event(0)).collect()
    }
}

impl Display for OutputChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(|input| String::from(*input)).collect();
        write!(f, "{}", names.join("+"))
    }
}

/// A logical button armed and waiting for its release trigger
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChord {
    pub button: LogicalButton,
    pub chord: OutputChord,
    pub armed_at: DateTime<Local>,
}

/// What the matcher wants the capture task to do with the last event
#[derive(Debug, Clone, PartialEq)]
pub enum ChordAction {
    /// Emit the press batch of `chord` now
    Press {
        button: LogicalButton,
        chord: OutputChord,
    },
    /// Release trigger seen; resolve the button after the debounce delay
    ScheduleRelease { button: LogicalButton },
    /// Secondary edge on a button that carries one: flip the gyro flag.
    /// The pending chord is already discarded without a release.
    ToggleGyro { button: LogicalButton },
}
