//! Physical device acquisition
//!
//! Finds the handheld's built-in keyboard and controller, takes them over
//! exclusively and hides their nodes, then exposes a single merged virtual
//! device in their place. Hidden nodes are handed to the supervisor, which
//! moves them back on shutdown.

pub mod acquirer;
pub mod hidden;

pub use acquirer::{AcquireError, AcquiredDevices, DeviceAcquirer, DeviceHandle, DeviceRole};
pub use hidden::{HiddenNode, RestoreOutcome};
