use super::hidden::{recover_stale, HiddenNode, HIDE_DIR, INPUT_DIR};
use crate::chord::{ChordInput, LogicalButton};
use crate::config::ButtonMap;
use crate::profile::SystemProfile;
use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AbsInfo, AttributeSet, BusType, Device, InputId, Key, MiscType, RelativeAxisType,
    SwitchType, UinputAbsSetup,
};
use std::fmt::{self, Display};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const VIRTUAL_DEVICE_NAME: &str = "Handheld Controller";
const VIRTUAL_VENDOR: u16 = 0x045e;
const VIRTUAL_PRODUCT: u16 = 0x028e;
const VIRTUAL_VERSION: u16 = 110;

const ENUMERATION_ATTEMPTS: u32 = 3;
const ENUMERATION_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Required {0} device not found after {1} attempts")]
    DeviceNotFound(DeviceRole, u32),

    #[error("Failed to grab {path}: {source}")]
    Grab {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to hide {path}: {source}")]
    Hide {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to recover stale hidden devices: {0}")]
    Recover(#[source] std::io::Error),

    #[error("Failed to build virtual device: {0}")]
    VirtualDevice(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Keyboard,
    Controller,
}

impl Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Keyboard => write!(f, "keyboard"),
            DeviceRole::Controller => write!(f, "controller"),
        }
    }
}

/// Name and physical-path pairs identifying one physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSignature {
    pub role: DeviceRole,
    pub names: &'static [&'static str],
    pub phys: &'static [&'static str],
}

impl DeviceSignature {
    pub fn matches(&self, name: &str, phys: &str) -> bool {
        self.names.contains(&name) && self.phys.contains(&phys)
    }
}

const KEYBOARD_SIGNATURE: DeviceSignature = DeviceSignature {
    role: DeviceRole::Keyboard,
    names: &["AT Translated Set 2 keyboard"],
    phys: &["isa0060/serio0/input0"],
};

const CONTROLLER_SIGNATURE: DeviceSignature = DeviceSignature {
    role: DeviceRole::Controller,
    names: &["Microsoft X-Box 360 pad", "Generic X-Box pad"],
    phys: &["usb-0000:03:00.3-4/input0", "usb-0000:00:14.0-9/input0"],
};

/// Signatures for the keyboard and controller of a profile.
///
/// Every supported generation wires the same internal devices; the profile
/// only changes the chord table.
pub fn signatures_for(_profile: SystemProfile) -> [DeviceSignature; 2] {
    [KEYBOARD_SIGNATURE, CONTROLLER_SIGNATURE]
}

pub fn classify(signatures: &[DeviceSignature], name: &str, phys: &str) -> Option<DeviceRole> {
    signatures
        .iter()
        .find(|signature| signature.matches(name, phys))
        .map(|signature| signature.role)
}

/// Runs `probe` up to `attempts` times, sleeping `backoff` between failures.
pub async fn retry<T, F, Fut>(attempts: u32, backoff: Duration, mut probe: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=attempts {
        if let Some(found) = probe(attempt).await {
            return Some(found);
        }
        if attempt < attempts {
            warn!(
                "Attempt {}/{} failed, retrying in {:?}",
                attempt, attempts, backoff
            );
            tokio::time::sleep(backoff).await;
        }
    }
    None
}

/// Runs `lookup` under [`retry`] until it yields both devices.
///
/// On failure the error names the role missing on the last attempt.
pub async fn locate<K, C, F>(
    attempts: u32,
    backoff: Duration,
    mut lookup: F,
) -> Result<(K, C), AcquireError>
where
    F: FnMut() -> (Option<K>, Option<C>),
{
    let mut missing = DeviceRole::Keyboard;
    let found = retry(attempts, backoff, |attempt| {
        debug!("Enumerating input devices, attempt {}", attempt);
        let (keyboard, controller) = lookup();
        missing = if keyboard.is_none() {
            DeviceRole::Keyboard
        } else {
            DeviceRole::Controller
        };
        async move { keyboard.zip(controller) }
    })
    .await;

    found.ok_or(AcquireError::DeviceNotFound(missing, attempts))
}

/// An exclusively grabbed physical device and its hidden node
pub struct DeviceHandle {
    pub role: DeviceRole,
    pub path: PathBuf,
    pub device: Device,
    pub node: Arc<HiddenNode>,
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("role", &self.role)
            .field("path", &self.path)
            .field("name", &self.device.name())
            .finish()
    }
}

pub struct AcquiredDevices {
    pub keyboard: DeviceHandle,
    pub controller: DeviceHandle,
    pub virtual_device: VirtualDevice,
}

impl AcquiredDevices {
    pub fn hidden_nodes(&self) -> Vec<Arc<HiddenNode>> {
        vec![
            Arc::clone(&self.keyboard.node),
            Arc::clone(&self.controller.node),
        ]
    }
}

pub struct DeviceAcquirer {
    profile: SystemProfile,
    input_dir: PathBuf,
    hide_dir: PathBuf,
    attempts: u32,
    backoff: Duration,
}

impl DeviceAcquirer {
    pub fn new(profile: SystemProfile) -> Self {
        Self {
            profile,
            input_dir: PathBuf::from(INPUT_DIR),
            hide_dir: PathBuf::from(HIDE_DIR),
            attempts: ENUMERATION_ATTEMPTS,
            backoff: ENUMERATION_BACKOFF,
        }
    }

    /// Finds, grabs and hides both physical devices, then builds the merged
    /// virtual device. `button_map` contributes the output codes the
    /// virtual device must be able to send.
    pub async fn acquire(&self, button_map: &ButtonMap) -> Result<AcquiredDevices, AcquireError> {
        let recovered =
            recover_stale(&self.hide_dir, &self.input_dir).map_err(AcquireError::Recover)?;
        if recovered > 0 {
            info!("Recovered {} device node(s) from a previous run", recovered);
        }

        let signatures = signatures_for(self.profile);
        let ((keyboard_path, keyboard), (controller_path, controller)) =
            locate(self.attempts, self.backoff, || find_devices(&signatures)).await?;

        let virtual_device = build_virtual_device(&[&keyboard, &controller], button_map)
            .map_err(AcquireError::VirtualDevice)?;
        info!("Created virtual device {}", VIRTUAL_DEVICE_NAME);

        let keyboard = self.take(DeviceRole::Keyboard, keyboard_path, keyboard)?;
        let controller = self.take(DeviceRole::Controller, controller_path, controller)?;

        Ok(AcquiredDevices {
            keyboard,
            controller,
            virtual_device,
        })
    }

    fn take(
        &self,
        role: DeviceRole,
        path: PathBuf,
        mut device: Device,
    ) -> Result<DeviceHandle, AcquireError> {
        device.grab().map_err(|source| AcquireError::Grab {
            path: path.clone(),
            source,
        })?;
        info!("Grabbed {} at {}", role, path.display());

        let node = HiddenNode::hide(&path, &self.hide_dir).map_err(|source| AcquireError::Hide {
            path: path.clone(),
            source,
        })?;

        Ok(DeviceHandle {
            role,
            path,
            device,
            node,
        })
    }
}

type Found = Option<(PathBuf, Device)>;

fn find_devices(signatures: &[DeviceSignature]) -> (Found, Found) {
    let mut keyboard = None;
    let mut controller = None;

    for (path, device) in evdev::enumerate() {
        let name = device.name().unwrap_or_default();
        let phys = device.physical_path().unwrap_or_default();
        match classify(signatures, name, phys) {
            Some(DeviceRole::Keyboard) if keyboard.is_none() => {
                debug!("Found keyboard {} at {}", name, path.display());
                keyboard = Some((path, device));
            }
            Some(DeviceRole::Controller) if controller.is_none() => {
                debug!("Found controller {} at {}", name, path.display());
                controller = Some((path, device));
            }
            _ => {}
        }
    }

    (keyboard, controller)
}

/// Union of what the source devices and the output chords can send
#[derive(Default)]
struct Capabilities {
    keys: AttributeSet<Key>,
    relative_axes: AttributeSet<RelativeAxisType>,
    switches: AttributeSet<SwitchType>,
    misc: AttributeSet<MiscType>,
    absolute_axes: Vec<UinputAbsSetup>,
}

impl Capabilities {
    fn add_device(&mut self, device: &Device) -> std::io::Result<()> {
        if let Some(supported) = device.supported_keys() {
            for key in supported.iter() {
                self.keys.insert(key);
            }
        }
        if let Some(supported) = device.supported_relative_axes() {
            for axis in supported.iter() {
                self.relative_axes.insert(axis);
            }
        }
        if let Some(supported) = device.supported_switches() {
            for switch in supported.iter() {
                self.switches.insert(switch);
            }
        }
        if let Some(supported) = device.misc_properties() {
            for misc in supported.iter() {
                self.misc.insert(misc);
            }
        }
        if let Some(supported) = device.supported_absolute_axes() {
            let state = device.get_abs_state()?;
            for axis in supported.iter() {
                let info = state[axis.0 as usize];
                self.absolute_axes.push(UinputAbsSetup::new(
                    axis,
                    AbsInfo::new(
                        info.value,
                        info.minimum,
                        info.maximum,
                        info.fuzz,
                        info.flat,
                        info.resolution,
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Output chords may name codes neither source advertises
    fn add_output_chords(&mut self, button_map: &ButtonMap) {
        for button in LogicalButton::ALL {
            for input in button_map.chord(button).inputs() {
                match *input {
                    ChordInput::Key(key) => self.keys.insert(key),
                    ChordInput::Misc(misc) => self.misc.insert(misc),
                }
            }
        }
    }

    fn build(&self) -> std::io::Result<VirtualDevice> {
        let mut builder = VirtualDeviceBuilder::new()?
            .name(VIRTUAL_DEVICE_NAME)
            .input_id(InputId::new(
                BusType::BUS_USB,
                VIRTUAL_VENDOR,
                VIRTUAL_PRODUCT,
                VIRTUAL_VERSION,
            ))
            .with_keys(&self.keys)?;

        if self.relative_axes.iter().next().is_some() {
            builder = builder.with_relative_axes(&self.relative_axes)?;
        }
        if self.switches.iter().next().is_some() {
            builder = builder.with_switches(&self.switches)?;
        }
        if self.misc.iter().next().is_some() {
            builder = builder.with_msc(&self.misc)?;
        }
        for setup in &self.absolute_axes {
            builder = builder.with_absolute_axis(setup)?;
        }

        builder.build()
    }
}

fn build_virtual_device(
    sources: &[&Device],
    button_map: &ButtonMap,
) -> std::io::Result<VirtualDevice> {
    let mut capabilities = Capabilities::default();
    for device in sources {
        capabilities.add_device(device)?;
    }
    capabilities.add_output_chords(button_map);
    capabilities.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn classify_identifies_keyboard_and_controller() {
        let signatures = signatures_for(SystemProfile::AyaGen2);
        assert_eq!(
            classify(&signatures, "AT Translated Set 2 keyboard", "isa0060/serio0/input0"),
            Some(DeviceRole::Keyboard)
        );
        assert_eq!(
            classify(&signatures, "Microsoft X-Box 360 pad", "usb-0000:03:00.3-4/input0"),
            Some(DeviceRole::Controller)
        );
        assert_eq!(
            classify(&signatures, "Generic X-Box pad", "usb-0000:00:14.0-9/input0"),
            Some(DeviceRole::Controller)
        );
    }

    #[test]
    fn classify_requires_both_name_and_phys() {
        let signatures = signatures_for(SystemProfile::OxpAmd);
        // External keyboard with the same name on another bus
        assert_eq!(
            classify(&signatures, "AT Translated Set 2 keyboard", "usb-0000:00:14.0-1/input0"),
            None
        );
        assert_eq!(
            classify(&signatures, "Microsoft X-Box 360 pad", "isa0060/serio0/input0"),
            None
        );
        assert_eq!(classify(&signatures, "", ""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_three_spaced_attempts() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let found: Option<()> = retry(ENUMERATION_ATTEMPTS, ENUMERATION_BACKOFF, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;

        assert!(found.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_at_first_success() {
        let start = Instant::now();
        let found = retry(3, Duration::from_secs(1), |attempt| async move {
            (attempt == 2).then_some(attempt)
        })
        .await;

        assert_eq!(found, Some(2));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_controller_is_reported_after_every_attempt() {
        let start = Instant::now();
        let calls = AtomicU32::new(0);

        let result: Result<((), ()), _> = locate(3, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            (Some(()), None)
        })
        .await;

        assert!(matches!(
            result,
            Err(AcquireError::DeviceNotFound(DeviceRole::Controller, 3))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_keyboard_takes_precedence() {
        let result: Result<((), ()), _> =
            locate(2, Duration::from_secs(1), || (None, None)).await;
        assert!(matches!(
            result,
            Err(AcquireError::DeviceNotFound(DeviceRole::Keyboard, 2))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn late_controller_is_still_found() {
        let calls = AtomicU32::new(0);
        let found = locate(3, Duration::from_secs(1), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            (Some("keyboard"), (attempt >= 2).then_some("controller"))
        })
        .await
        .unwrap();

        assert_eq!(found, ("keyboard", "controller"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn output_chords_extend_keys_and_misc() {
        let mut capabilities = Capabilities::default();
        capabilities.add_output_chords(&ButtonMap::default());

        assert!(capabilities.misc.contains(MiscType::MSC_SCAN));
        assert!(capabilities.keys.contains(Key::KEY_ESC));
        assert!(capabilities.keys.contains(Key::BTN_MODE));
        assert!(capabilities.keys.contains(Key::KEY_LEFTCTRL));
        assert!(!capabilities.keys.contains(Key::KEY_A));
    }

    #[tokio::test]
    #[ignore = "requires the handheld's keyboard and controller plus root"]
    async fn acquires_real_devices() {
        let acquirer = DeviceAcquirer::new(SystemProfile::AyaGen2);
        let devices = acquirer.acquire(&ButtonMap::default()).await.unwrap();
        assert!(devices.keyboard.node.hidden().starts_with(HIDE_DIR));
        for node in devices.hidden_nodes() {
            node.restore();
        }
    }
}
