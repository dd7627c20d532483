//! Sensor discovery worker
//!
//! Runs one pass per service-present transition: enumerate the sensors the
//! firmware exposes, fetch detail for each, and register a consumer driver
//! where one exists for the type. A failing sensor is skipped; a failing
//! enumeration aborts the pass. There is no retry - the next NEW_SERVER
//! event triggers the next pass.

use super::registry::{DataTypeItem, SensorRuntime};
use super::{ClientInner, messages::SensorIdInfo};
use crate::error::{Error, Result};
use crate::sensors::{self, SensorKind};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Discovery loop - waits for service-present wake-ups
///
/// Strictly sequential with itself: one pass finishes before the next
/// trigger is looked at, so a service bounce cannot interleave two passes.
pub(super) fn discovery_loop(inner: Arc<ClientInner>, trigger: Receiver<()>) {
    log::debug!("Discovery thread started");

    while !inner.shutdown.load(Ordering::Relaxed) {
        match trigger.recv_timeout(Duration::from_millis(100)) {
            Ok(()) => run_pass(&inner),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::debug!("Discovery thread exiting");
}

fn run_pass(inner: &Arc<ClientInner>) {
    log::info!("Sensor discovery started");

    let infos = match inner.enumerate_sensors() {
        Ok(infos) => infos,
        Err(e) => {
            log::error!("Sensor enumeration failed: {}", e);
            inner.finish_discovery();
            return;
        }
    };
    log::info!("Firmware reports {} sensors", infos.len());

    for info in &infos {
        // A service bounce re-triggers discovery; keep existing records
        if inner.registry.contains(info.sensor_id) {
            log::debug!("Sensor {} already registered", info.sensor_id);
            continue;
        }
        match register_sensor(inner, info) {
            Ok(kind) => {
                log::info!(
                    "Registered sensor {} ({}) as {}",
                    info.sensor_id,
                    info.name,
                    kind.label()
                );
            }
            Err(e) => {
                log::warn!(
                    "Skipping sensor {} ({}): {}",
                    info.sensor_id,
                    info.name,
                    e
                );
            }
        }
    }

    inner.finish_discovery();
    log::info!(
        "Sensor discovery complete: {} sensors registered",
        inner.registry.len()
    );
}

/// Fetch detail for one sensor and register it with its consumer driver
fn register_sensor(inner: &Arc<ClientInner>, info: &SensorIdInfo) -> Result<SensorKind> {
    let details = inner.sensor_detail(info.sensor_id)?;
    if details.is_empty() {
        return Err(Error::BadPayload("no reporting channels".to_string()));
    }

    let (kind, build) = sensors::match_sensor(&info.name);
    let data_types = details.into_iter().map(DataTypeItem::from_info).collect();
    let runtime = Arc::new(SensorRuntime::new(info.sensor_id, kind, data_types));

    inner.registry.insert(Arc::clone(&runtime));
    match build {
        Some(build) => {
            inner
                .registry
                .add_driver(build(Arc::clone(inner), runtime));
        }
        None => {
            log::debug!(
                "No consumer driver for {} sensor {}",
                kind.label(),
                info.sensor_id
            );
        }
    }
    Ok(kind)
}
