//! Chord matching for the handheld's extra buttons
//!
//! The firmware reports the extra buttons as keyboard scan-code chords. This
//! subsystem turns those chords back into logical buttons:
//!
//! 1. [`types`] - active key sets, output chords and pending state
//! 2. [`table`] - per-profile pattern tables in priority order
//! 3. [`matcher`] - the per-button state machine
//!
//! # State machine (per logical button)
//!
//! ```text
//!        entry fingerprint + press edge        release trigger + release edge
//! Idle ─────────────────────────────────► Armed ──────────────────────────────► Releasing
//!  ▲          (emit press batch)            │                                      │
//!  │                                        │ secondary edge (ESC held)            │ 150 ms debounce
//!  └────────────────────────────────────────┴──────────────────────────────────────┘
//!                     (toggle gyro, no release)             (emit release batch)
//! ```

pub mod matcher;
pub mod table;
pub mod types;

pub use matcher::ChordMatcher;
pub use table::PatternTable;
pub use types::{ActiveKeySet, ChordAction, ChordInput, LogicalButton, OutputChord, PendingChord};
