use super::{AngularVelocity, GyroSensor, SensorError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const IIO_DEVICES: &str = "/sys/bus/iio/devices";

/// IMU drivers whose angular velocity channels we know how to scale
const SUPPORTED_DRIVERS: [&str; 2] = ["bmi160", "bmi160_i2c"];

/// Gyroscope read through the kernel IIO sysfs interface
#[derive(Debug, Clone)]
pub struct IioGyro {
    x_raw: PathBuf,
    y_raw: PathBuf,
}

impl IioGyro {
    pub fn open() -> Result<Self, SensorError> {
        Self::open_in(Path::new(IIO_DEVICES))
    }

    /// Looks for a supported IMU among the `iio:device*` entries of `root`
    pub fn open_in(root: &Path) -> Result<Self, SensorError> {
        let entries = std::fs::read_dir(root).map_err(|_| SensorError::SensorUnavailable)?;

        for entry in entries.flatten() {
            let dir = entry.path();
            let is_iio_device = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with("iio:device"));
            if !is_iio_device {
                continue;
            }

            let Ok(name) = std::fs::read_to_string(dir.join("name")) else {
                continue;
            };
            let name = name.trim();
            if !SUPPORTED_DRIVERS.contains(&name) {
                debug!("Skipping IIO device {} ({})", dir.display(), name);
                continue;
            }

            let gyro = Self {
                x_raw: dir.join("in_anglvel_x_raw"),
                y_raw: dir.join("in_anglvel_y_raw"),
            };
            if gyro.x_raw.exists() && gyro.y_raw.exists() {
                info!("Using {} gyro at {}", name, dir.display());
                return Ok(gyro);
            }
        }

        Err(SensorError::SensorUnavailable)
    }
}

fn read_raw(path: &Path) -> Result<i32, SensorError> {
    let text = std::fs::read_to_string(path).map_err(|source| SensorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    text.trim().parse().map_err(|_| SensorError::Parse {
        path: path.to_path_buf(),
        value: text.trim().to_string(),
    })
}

impl GyroSensor for IioGyro {
    fn sample(&mut self) -> Result<AngularVelocity, SensorError> {
        let x = read_raw(&self.x_raw)?;
        let y = read_raw(&self.y_raw)?;
        Ok(AngularVelocity::from_raw(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn fake_sysfs() -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "handycon-iio-{}-{}",
            std::process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn add_device(root: &Path, index: u32, name: &str, x: &str, y: &str) -> PathBuf {
        let dir = root.join(format!("iio:device{}", index));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("name"), format!("{}\n", name)).unwrap();
        std::fs::write(dir.join("in_anglvel_x_raw"), x).unwrap();
        std::fs::write(dir.join("in_anglvel_y_raw"), y).unwrap();
        dir
    }

    #[test]
    fn finds_supported_imu_and_scales_samples() {
        let root = fake_sysfs();
        add_device(&root, 0, "als", "0", "0");
        add_device(&root, 1, "bmi160", "16384\n", "-8192\n");

        let mut gyro = IioGyro::open_in(&root).unwrap();
        let velocity = gyro.sample().unwrap();
        assert_eq!(velocity.x, 1000.0);
        assert_eq!(velocity.y, -500.0);
    }

    #[test]
    fn missing_sensor_is_unavailable() {
        let root = fake_sysfs();
        add_device(&root, 0, "als", "0", "0");
        assert!(matches!(
            IioGyro::open_in(&root),
            Err(SensorError::SensorUnavailable)
        ));
        assert!(matches!(
            IioGyro::open_in(&root.join("absent")),
            Err(SensorError::SensorUnavailable)
        ));
    }

    #[test]
    fn garbage_reading_is_a_parse_error() {
        let root = fake_sysfs();
        add_device(&root, 2, "bmi160", "not-a-number", "0");
        let mut gyro = IioGyro::open_in(&root).unwrap();
        assert!(matches!(gyro.sample(), Err(SensorError::Parse { .. })));
    }

    #[test]
    fn vanished_channel_is_a_read_error() {
        let root = fake_sysfs();
        let dir = add_device(&root, 3, "bmi160", "0", "0");
        let mut gyro = IioGyro::open_in(&root).unwrap();
        std::fs::remove_file(dir.join("in_anglvel_y_raw")).unwrap();
        assert!(matches!(gyro.sample(), Err(SensorError::Read { .. })));
    }
}
