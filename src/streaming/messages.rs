//! Message types for sample streaming
//!
//! Outbound datagrams for local consumers (odometry, sensor fusion, or a
//! desktop visualizer during bring-up).

use serde::{Deserialize, Serialize};

/// Top-level stream message
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// One buffered sensor sample
    Sample(SampleUpdate),
    /// Periodic health summary (~1 Hz)
    ServiceStatus(ServiceStatus),
}

/// One sample from a sensor's ring buffer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SampleUpdate {
    /// Host timestamp in microseconds since epoch
    pub timestamp_us: u64,
    /// Firmware timestamp, in DSP ticks
    pub device_timestamp: u64,
    pub sensor_id: u8,
    /// Sensor kind label ("accel", "gyro", ...)
    pub kind: String,
    /// Raw three-axis values (Q16 for inertial sensors)
    pub data: [i32; 3],
}

/// Client health summary
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    /// Host timestamp in microseconds since epoch
    pub timestamp_us: u64,
    /// Sensors the discovery pass registered
    pub sensors: usize,
    /// Sensors currently streaming
    pub streaming: usize,
}

/// Current time in microseconds since epoch
pub fn timestamp_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
