//! Hiding raw device nodes from other consumers
//!
//! A grabbed evdev node still shows up in `/dev/input`, and some consumers
//! (Steam among them) will happily open it anyway. Moving the node into a dot
//! directory keeps it out of their scans; moving it back on shutdown leaves the
//! system as it was found.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const INPUT_DIR: &str = "/dev/input";
pub const HIDE_DIR: &str = "/dev/input/.hidden";

/// Result of a restore attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    /// Someone already restored this node; nothing was touched
    AlreadyRestored,
    /// The hidden node was gone, e.g. the device was unplugged
    NoOp,
    Failed,
}

/// A device node moved into the hide directory
///
/// Restoration happens at most once per node, no matter how many tasks race
/// to trigger it. Dropping the last reference restores the node too, so an
/// early return never leaves a device hidden.
#[derive(Debug)]
pub struct HiddenNode {
    original: PathBuf,
    hidden: PathBuf,
    restored: AtomicBool,
}

impl HiddenNode {
    /// Moves `original` into `hide_dir`, keeping its file name.
    ///
    /// Skips the move if the node is already sitting in the hide directory.
    pub fn hide(original: &Path, hide_dir: &Path) -> io::Result<Arc<Self>> {
        let file_name = original.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", original.display()),
            )
        })?;
        std::fs::create_dir_all(hide_dir)?;
        let hidden = hide_dir.join(file_name);

        if original.exists() {
            std::fs::rename(original, &hidden)?;
            info!("Hid {} at {}", original.display(), hidden.display());
        } else if hidden.exists() {
            debug!("{} already hidden", original.display());
        } else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", original.display()),
            ));
        }

        Ok(Arc::new(Self {
            original: original.to_path_buf(),
            hidden,
            restored: AtomicBool::new(false),
        }))
    }

    pub fn original(&self) -> &Path {
        &self.original
    }

    pub fn hidden(&self) -> &Path {
        &self.hidden
    }

    /// Moves the node back to its original path. Safe to call repeatedly and
    /// concurrently; only the first caller touches the filesystem.
    pub fn restore(&self) -> RestoreOutcome {
        if self.restored.swap(true, Ordering::AcqRel) {
            return RestoreOutcome::AlreadyRestored;
        }

        match std::fs::rename(&self.hidden, &self.original) {
            Ok(()) => {
                info!("Restored {}", self.original.display());
                RestoreOutcome::Restored
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} was already gone", self.hidden.display());
                RestoreOutcome::NoOp
            }
            Err(e) => {
                warn!(
                    "Failed to restore {} to {}: {}",
                    self.hidden.display(),
                    self.original.display(),
                    e
                );
                RestoreOutcome::Failed
            }
        }
    }
}

impl Drop for HiddenNode {
    fn drop(&mut self) {
        self.restore();
    }
}

/// errno from `EVIOCGRAB` while another process holds the grab
const EBUSY: i32 = 16;

/// Moves nodes a crashed run left in `hide_dir` back into `input_dir`.
///
/// Nodes whose original path is taken again are left alone, and so are nodes
/// another process still holds grabbed, such as a second instance that is
/// still running.
pub fn recover_stale(hide_dir: &Path, input_dir: &Path) -> io::Result<usize> {
    recover_stale_unless(hide_dir, input_dir, is_grabbed)
}

fn recover_stale_unless<F>(hide_dir: &Path, input_dir: &Path, in_use: F) -> io::Result<usize>
where
    F: Fn(&Path) -> bool,
{
    let entries = match std::fs::read_dir(hide_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut recovered = 0;
    for entry in entries {
        let entry = entry?;
        let target = input_dir.join(entry.file_name());
        if target.exists() {
            debug!("Leaving stale {} hidden, {} exists", entry.path().display(), target.display());
            continue;
        }
        if in_use(&entry.path()) {
            warn!(
                "Leaving {} hidden, another process still holds it grabbed",
                entry.path().display()
            );
            continue;
        }
        std::fs::rename(entry.path(), &target)?;
        warn!("Recovered {} left hidden by a previous run", target.display());
        recovered += 1;
    }
    Ok(recovered)
}

/// Checks for a live exclusive grab by trying to take one
fn is_grabbed(path: &Path) -> bool {
    let Ok(mut device) = evdev::Device::open(path) else {
        return false;
    };
    match device.grab() {
        Ok(()) => {
            if let Err(e) = device.ungrab() {
                debug!("Failed to release test grab on {}: {}", path.display(), e);
            }
            false
        }
        Err(e) => e.raw_os_error() == Some(EBUSY),
    }
}
