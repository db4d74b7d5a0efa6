//! Gyro aim
//!
//! The IMU is optional. When it is present, [`fusion::GyroFusion`] adds its
//! angular velocity to the right stick so the handheld can be aimed by tilting
//! it. When it is missing, the rest of the pipeline runs without it.

pub mod fusion;
pub mod iio;
pub mod toggle;

use std::path::PathBuf;
use thiserror::Error;

pub use fusion::{fuse_axis, GyroFusion, GyroState};
pub use iio::IioGyro;
pub use toggle::GyroToggle;

/// Full-scale range of the sensor in deg/s
const FULL_SCALE_DPS: f64 = 2000.0;
const RAW_SCALE: f64 = 32768.0;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("No supported gyro sensor found")]
    SensorUnavailable,

    #[error("Failed to read gyro value from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected gyro value {value:?} in {path}")]
    Parse { path: PathBuf, value: String },
}

/// Angular velocity in deg/s around the stick's two axes
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AngularVelocity {
    pub x: f64,
    pub y: f64,
}

impl AngularVelocity {
    /// Converts raw 16-bit sensor counts to deg/s
    pub fn from_raw(x: i32, y: i32) -> Self {
        Self {
            x: f64::from(x) / RAW_SCALE * FULL_SCALE_DPS,
            y: f64::from(y) / RAW_SCALE * FULL_SCALE_DPS,
        }
    }
}

/// Polling interface to a gyroscope
pub trait GyroSensor: Send {
    fn sample(&mut self) -> Result<AngularVelocity, SensorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_counts_scale_to_full_range() {
        let velocity = AngularVelocity::from_raw(16384, -32768);
        assert_eq!(velocity.x, 1000.0);
        assert_eq!(velocity.y, -2000.0);
        assert_eq!(AngularVelocity::from_raw(0, 0), AngularVelocity::default());
    }
}
