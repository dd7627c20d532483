//! Sensor consumers
//!
//! Key types for consumer implementers:
//! - [`SensorDriver`]: the buffered-sampling interface a per-type consumer
//!   exposes to upper layers
//! - [`SENSOR_MATCHES`]: the table mapping firmware type names to a kind and
//!   an optional driver constructor
//! - [`Sample`]: one three-axis reading with its timestamp

pub mod accel;

use crate::error::Result;
use crate::smgr::registry::SensorRuntime;
use crate::smgr::ClientInner;
use std::sync::Arc;

/// Sensor types the firmware is known to expose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Accel,
    Gyro,
    Mag,
    ProxLight,
    Pressure,
    HallEffect,
    Unknown,
}

impl SensorKind {
    /// Stable lowercase label, used for device naming and stream tagging
    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::Accel => "accel",
            SensorKind::Gyro => "gyro",
            SensorKind::Mag => "mag",
            SensorKind::ProxLight => "prox-light",
            SensorKind::Pressure => "pressure",
            SensorKind::HallEffect => "hall-effect",
            SensorKind::Unknown => "unknown",
        }
    }
}

/// One buffered reading: three axes plus firmware timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub data: [i32; 3],
    pub timestamp: u64,
}

/// Channel property selector for raw reads/writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelInfo {
    SampleFrequency,
    Scale,
}

/// A raw channel-property value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawReading {
    Int(i64),
    Fractional { numerator: i64, denominator: i64 },
}

/// Available range for a writable property: min, step, max
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailRange {
    pub min: i64,
    pub step: i64,
    pub max: i64,
}

/// Buffered-sampling interface exposed by per-type consumers
pub trait SensorDriver: Send + Sync {
    fn kind(&self) -> SensorKind;

    fn sensor_id(&self) -> u8;

    /// Read a channel property
    fn read_raw(&self, info: ChannelInfo) -> Result<RawReading>;

    /// Write a channel property
    fn write_raw(&self, info: ChannelInfo, value: i64) -> Result<()>;

    /// Valid range for a writable property
    fn read_avail(&self, info: ChannelInfo) -> Result<AvailRange>;

    /// Sensor orientation relative to the device chassis
    fn mount_matrix(&self) -> &'static [[f32; 3]; 3];

    /// Start streaming into the ring buffer
    fn buffer_enable(&self) -> Result<()>;

    /// Stop streaming
    fn buffer_disable(&self) -> Result<()>;

    /// Pop the oldest buffered sample, if any
    fn poll_sample(&self) -> Option<Sample>;
}

pub(crate) type DriverBuild =
    fn(Arc<ClientInner>, Arc<SensorRuntime>) -> Arc<dyn SensorDriver>;

/// One row of the type-name match table
pub(crate) struct SensorMatch {
    pub name: &'static str,
    pub kind: SensorKind,
    pub build: Option<DriverBuild>,
}

/// Firmware type names and their consumers. Kinds without a `build` are
/// registered for demux but expose no driver yet.
pub(crate) static SENSOR_MATCHES: &[SensorMatch] = &[
    SensorMatch {
        name: "ACCEL",
        kind: SensorKind::Accel,
        build: Some(accel::build),
    },
    SensorMatch {
        name: "GYRO",
        kind: SensorKind::Gyro,
        build: None,
    },
    SensorMatch {
        name: "MAG",
        kind: SensorKind::Mag,
        build: None,
    },
    SensorMatch {
        name: "PROX_LIGHT",
        kind: SensorKind::ProxLight,
        build: None,
    },
    SensorMatch {
        name: "PRESSURE",
        kind: SensorKind::Pressure,
        build: None,
    },
    SensorMatch {
        name: "HALL_EFFECT",
        kind: SensorKind::HallEffect,
        build: None,
    },
];

/// Resolve a firmware type name. Names carry an optional vendor suffix
/// ("ACCEL_BMI160"); the match is on the leading tag.
pub(crate) fn match_sensor(name: &str) -> (SensorKind, Option<DriverBuild>) {
    let upper = name.to_ascii_uppercase();
    for entry in SENSOR_MATCHES {
        if upper.starts_with(entry.name) {
            return (entry.kind, entry.build);
        }
    }
    (SensorKind::Unknown, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_exact_and_suffixed() {
        let (kind, build) = match_sensor("ACCEL");
        assert_eq!(kind, SensorKind::Accel);
        assert!(build.is_some());

        let (kind, _) = match_sensor("accel_bmi160");
        assert_eq!(kind, SensorKind::Accel);

        let (kind, build) = match_sensor("GYRO_MPU6050");
        assert_eq!(kind, SensorKind::Gyro);
        assert!(build.is_none());
    }

    #[test]
    fn test_match_unknown() {
        let (kind, build) = match_sensor("THERMOPILE");
        assert_eq!(kind, SensorKind::Unknown);
        assert!(build.is_none());
    }
}
