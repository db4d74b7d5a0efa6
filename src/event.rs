use chrono::{DateTime, Local};
use evdev::{EventType, InputEvent};

// A single hardware event with a chrono timestamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawEvent {
    pub event_type: EventType,
    pub code: u16,
    pub value: i32,
    pub timestamp: DateTime<Local>,
}

impl RawEvent {
    pub fn new(event_type: EventType, code: u16, value: i32) -> Self {
        Self {
            event_type,
            code,
            value,
            timestamp: Local::now(),
        }
    }

    // Shorthand for EV_KEY events, mostly used by the matcher
    pub fn key(code: u16, value: i32) -> Self {
        Self::new(EventType::KEY, code, value)
    }

    pub fn edge(&self) -> Option<Edge> {
        Edge::from_value(self.value)
    }

    pub fn is_key(&self) -> bool {
        self.event_type == EventType::KEY
    }

    pub fn is_sync(&self) -> bool {
        self.event_type == EventType::SYNCHRONIZATION
    }

    pub fn to_input_event(&self) -> InputEvent {
        InputEvent::new(self.event_type, self.code, self.value)
    }

    // Same event with a different value, keeping type, code and timestamp
    pub fn with_value(&self, value: i32) -> Self {
        Self { value, ..*self }
    }
}

impl From<InputEvent> for RawEvent {
    fn from(event: InputEvent) -> Self {
        Self {
            event_type: event.event_type(),
            code: event.code(),
            value: event.value(),
            timestamp: DateTime::<Local>::from(event.timestamp()),
        }
    }
}

// Key transition carried in the value of an EV_KEY event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Release,
    Press,
    Held,
}

impl Edge {
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Edge::Release),
            1 => Some(Edge::Press),
            2 => Some(Edge::Held),
            _ => None,
        }
    }
}
