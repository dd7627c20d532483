//! Sensor registry
//!
//! One registry per client instance, created at client construction and
//! dropped with it. Sensor records are appended by the discovery worker and
//! immutable afterward, except for the per-channel rate and the streaming
//! flag, which are atomics so consumer writes never race indication-path
//! reads.

use crate::sensors::{Sample, SensorDriver, SensorKind};
use crate::smgr::messages::{BufferingInd, DataTypeInfo};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

/// Buffered samples held per sensor before the consumer drains them.
/// Indications beyond this are dropped, oldest-unread first.
const SAMPLE_QUEUE_CAPACITY: usize = 1024;

/// One reporting channel of a sensor
#[derive(Debug)]
pub struct DataTypeItem {
    pub name: String,
    pub vendor: String,
    pub max_sample_rate: u16,
    current_rate: AtomicU16,
    // Vendor-opaque blocks, round-tripped but not interpreted
    pub version: u32,
    pub idle_power: u32,
    pub max_power: u32,
    pub max_range: u32,
}

impl DataTypeItem {
    /// Current rate defaults to the channel's maximum
    pub fn from_info(info: DataTypeInfo) -> Self {
        Self {
            name: info.name,
            vendor: info.vendor,
            max_sample_rate: info.max_sample_rate,
            current_rate: AtomicU16::new(info.max_sample_rate),
            version: info.version,
            idle_power: info.idle_power,
            max_power: info.max_power,
            max_range: info.max_range,
        }
    }

    pub fn current_rate(&self) -> u16 {
        self.current_rate.load(Ordering::Relaxed)
    }

    pub fn set_current_rate(&self, rate: u16) {
        self.current_rate.store(rate, Ordering::Relaxed);
    }
}

/// Runtime record of one discovered sensor
pub struct SensorRuntime {
    /// Firmware-assigned id; doubles as the streaming report id
    pub id: u8,
    pub kind: SensorKind,
    pub data_types: Vec<DataTypeItem>,
    streaming: AtomicBool,
    queue: ArrayQueue<Sample>,
}

impl SensorRuntime {
    pub fn new(id: u8, kind: SensorKind, data_types: Vec<DataTypeItem>) -> Self {
        Self {
            id,
            kind,
            data_types,
            streaming: AtomicBool::new(false),
            queue: ArrayQueue::new(SAMPLE_QUEUE_CAPACITY),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    pub fn set_streaming(&self, on: bool) {
        self.streaming.store(on, Ordering::Relaxed);
    }

    /// Primary reporting channel (the firmware lists it first)
    pub fn primary(&self) -> Option<&DataTypeItem> {
        self.data_types.first()
    }

    /// Pop the oldest buffered sample
    pub fn pop_sample(&self) -> Option<Sample> {
        self.queue.pop()
    }

    /// Push every sample of an indication, timestamped from the first
    /// sample's base plus accumulated offsets
    pub fn push_indication(&self, ind: &BufferingInd) {
        let base = ind
            .indices
            .first()
            .map(|idx| idx.first_sample_timestamp as u64)
            .unwrap_or(0);
        let mut elapsed: u64 = 0;
        for sample in &ind.samples {
            elapsed += sample.time_offset as u64;
            let sample = Sample {
                data: sample.data,
                timestamp: base + elapsed,
            };
            if self.queue.push(sample).is_err() {
                // Consumer is behind; samples are best-effort
                log::trace!("Sensor {} queue full, dropped sample", self.id);
            }
        }
    }
}

/// Registry of discovered sensors and their consumer drivers
pub struct SensorRegistry {
    sensors: Mutex<Vec<Arc<SensorRuntime>>>,
    drivers: Mutex<Vec<Arc<dyn SensorDriver>>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self {
            sensors: Mutex::new(Vec::new()),
            drivers: Mutex::new(Vec::new()),
        }
    }

    pub fn contains(&self, id: u8) -> bool {
        self.sensors.lock().iter().any(|s| s.id == id)
    }

    pub fn insert(&self, sensor: Arc<SensorRuntime>) {
        self.sensors.lock().push(sensor);
    }

    pub fn add_driver(&self, driver: Arc<dyn SensorDriver>) {
        self.drivers.lock().push(driver);
    }

    pub fn sensors(&self) -> Vec<Arc<SensorRuntime>> {
        self.sensors.lock().clone()
    }

    pub fn drivers(&self) -> Vec<Arc<dyn SensorDriver>> {
        self.drivers.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sensors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.lock().is_empty()
    }

    /// Route an indication to the sensor owning its report id
    ///
    /// The registered list is small and bounded, so a linear scan is fine.
    /// An unmatched report id is dropped without error.
    pub fn dispatch_indication(&self, ind: &BufferingInd) {
        let sensors = self.sensors.lock();
        match sensors.iter().find(|s| s.id == ind.report_id) {
            Some(sensor) => sensor.push_indication(ind),
            None => {
                log::debug!(
                    "Dropping indication for unknown report id {}",
                    ind.report_id
                );
            }
        }
    }
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
