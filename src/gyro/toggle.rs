use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Runtime gyro aim switch shared by the capture and fusion tasks
///
/// `enabled` follows the user's toggle; `available` drops to false for the
/// rest of the run once the sensor is missing or fails. Fusion only runs while
/// both hold.
#[derive(Clone, Debug)]
pub struct GyroToggle {
    enabled: Arc<watch::Sender<bool>>,
    available: Arc<AtomicBool>,
}

impl GyroToggle {
    pub fn new(enabled: bool, available: bool) -> Self {
        let (sender, _) = watch::channel(enabled);
        Self {
            enabled: Arc::new(sender),
            available: Arc::new(AtomicBool::new(available)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn fusion_active(&self) -> bool {
        self.is_available() && self.is_enabled()
    }

    /// Flips the enable flag and returns the new value
    pub fn toggle(&self) -> bool {
        let mut enabled = false;
        self.enabled.send_modify(|flag| {
            *flag = !*flag;
            enabled = *flag;
        });
        if enabled && !self.is_available() {
            info!("Gyro aim enabled, but no gyro sensor is available");
        }
        enabled
    }

    pub fn mark_unavailable(&self) {
        if self.available.swap(false, Ordering::AcqRel) {
            warn!("Gyro sensor marked unavailable for the rest of this run");
            // Wake anyone waiting on a toggle change
            self.enabled.send_modify(|_| {});
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.enabled.subscribe()
    }
}
