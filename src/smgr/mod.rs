//! Sensor Manager (SMGR) QMI client
//!
//! This module manages communication with the sensor-manager service running
//! on the DSP, reached through the QRTR router.
//!
//! # Architecture
//!
//! The client uses a multi-threaded design mirroring the rest of our I/O
//! daemons:
//!
//! ## Thread Model
//!
//! 1. **Receive Thread** (`smgr-rx`, continuous):
//!    - Polls the transport with a short timeout so shutdown is observed
//!    - Completes pending transactions when their response arrives
//!    - Routes buffering indications to the owning sensor's ring buffer
//!    - Drives the service-availability state machine from lookup events
//!
//! 2. **Discovery Thread** (`smgr-discovery`, event-driven):
//!    - Woken once per service-present transition
//!    - Enumerates sensors, fetches per-sensor detail, registers consumers
//!
//! ## Service Availability State Machine
//!
//! ```text
//! ┌──────────┐ NEW_SERVER  ┌─────────────┐ pass done ┌─────────┐
//! │ Unbound  │────────────▶│ Discovering │──────────▶│ Ready   │
//! │          │◀────────────│             │           │         │
//! └──────────┘ DEL_SERVER  └─────────────┘           └─────────┘
//!      ▲                                  DEL_SERVER      │
//!      └──────────────────────────────────────────────────┘
//! ```
//!
//! The state and the service address live behind one mutex; requests read
//! the address, never the state. When the service disappears, every pending
//! transaction is completed immediately with `ServiceLost` rather than
//! letting callers sit out the full deadline.
//!
//! ## Blocking RPCs
//!
//! `enumerate_sensors`, `sensor_detail` and `set_buffering` block their
//! calling thread until the response arrives or the configured deadline
//! (default 5 s) elapses. There is no retry at this layer.

mod discovery;
pub mod messages;
pub mod registry;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::qmi;
use crate::qmi::MessageType;
use crate::sensors::SensorDriver;
use crate::transport::{ServiceAddr, Transport, TransportEvent};
use crossbeam_channel::{bounded, Sender};
use messages::{
    BufferingItem, BufferingReq, DataTypeInfo, SensorIdInfo, ACTION_ADD, ACTION_DELETE,
    CALIBRATION_FULL, DECIMATION_RECENT_SAMPLE, SNS_SMGR_ALL_SENSOR_INFO, SNS_SMGR_BUFFERING,
    SNS_SMGR_BUFFERING_IND, SNS_SMGR_SINGLE_SENSOR_INFO,
};
use parking_lot::Mutex;
use registry::{SensorRegistry, SensorRuntime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Transport poll slice; bounds how long the receive thread holds the
/// transport lock and how late it sees the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Service availability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unbound,
    Discovering,
    Ready,
}

struct ServiceShared {
    state: ServiceState,
    addr: Option<ServiceAddr>,
}

type TxnSender = Sender<Result<Vec<u8>>>;

struct TxnTable {
    next_id: u16,
    pending: HashMap<u16, TxnSender>,
}

impl TxnTable {
    /// Allocate a transaction id. Ids wrap, skip 0, and skip any id still
    /// in flight, so a handle is never reused before completion.
    fn alloc(&mut self) -> Result<u16> {
        for _ in 0..u16::MAX {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id == 0 {
                continue;
            }
            if !self.pending.contains_key(&self.next_id) {
                return Ok(self.next_id);
            }
        }
        Err(Error::Other("transaction ids exhausted".to_string()))
    }
}

/// Client state shared between the public API, the receive thread, the
/// discovery thread and consumer drivers.
pub(crate) struct ClientInner {
    transport: Mutex<Box<dyn Transport>>,
    txns: Mutex<TxnTable>,
    shared: Mutex<ServiceShared>,
    pub(crate) registry: Arc<SensorRegistry>,
    timeout: Duration,
    shutdown: AtomicBool,
}

impl ClientInner {
    fn service_addr(&self) -> Result<ServiceAddr> {
        self.shared.lock().addr.ok_or(Error::NotReady)
    }

    pub(crate) fn state(&self) -> ServiceState {
        self.shared.lock().state
    }

    /// Mark the discovery pass finished. A concurrent DEL_SERVER wins:
    /// `Unbound` is never overwritten with `Ready`.
    fn finish_discovery(&self) {
        let mut shared = self.shared.lock();
        if shared.state == ServiceState::Discovering {
            shared.state = ServiceState::Ready;
        }
    }

    /// Issue one request and block until its response or the deadline
    pub(crate) fn request(&self, msg_id: u16, payload: &[u8]) -> Result<Vec<u8>> {
        let addr = self.service_addr()?;

        let (tx, rx) = bounded(1);
        let txn_id = {
            let mut txns = self.txns.lock();
            let id = txns.alloc()?;
            txns.pending.insert(id, tx);
            id
        };

        let frame = qmi::encode_message(MessageType::Request, txn_id, msg_id, payload)?;
        if let Err(e) = self.transport.lock().send(addr, &frame) {
            self.txns.lock().pending.remove(&txn_id);
            return Err(e);
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(_) => {
                self.txns.lock().pending.remove(&txn_id);
                Err(Error::Timeout)
            }
        }
    }

    pub(crate) fn enumerate_sensors(&self) -> Result<Vec<SensorIdInfo>> {
        let payload = messages::encode_all_sensor_info_req()?;
        let resp = self.request(SNS_SMGR_ALL_SENSOR_INFO, &payload)?;
        messages::decode_all_sensor_info_resp(&resp)
    }

    pub(crate) fn sensor_detail(&self, sensor_id: u8) -> Result<Vec<DataTypeInfo>> {
        let payload = messages::encode_single_sensor_info_req(sensor_id)?;
        let resp = self.request(SNS_SMGR_SINGLE_SENSOR_INFO, &payload)?;
        messages::decode_single_sensor_info_resp(&resp)
    }

    /// Enable or disable buffered streaming for one sensor
    ///
    /// The sensor id doubles as the report id: the firmware allows any id
    /// here, and reusing the sensor's spares us a second allocator.
    pub(crate) fn set_buffering(&self, sensor: &SensorRuntime, enable: bool) -> Result<()> {
        let req = if enable {
            let primary = sensor
                .primary()
                .ok_or(Error::NotSupported("sensor has no reporting channels"))?;
            BufferingReq {
                report_id: sensor.id,
                action: ACTION_ADD,
                report_rate: primary.current_rate() as u32,
                items: (0..sensor.data_types.len())
                    .map(|data_type| BufferingItem {
                        sensor_id: sensor.id,
                        data_type: data_type as u8,
                        decimation: DECIMATION_RECENT_SAMPLE,
                        calibration: CALIBRATION_FULL,
                    })
                    .collect(),
            }
        } else {
            BufferingReq {
                report_id: sensor.id,
                action: ACTION_DELETE,
                report_rate: 0,
                items: Vec::new(),
            }
        };

        let payload = messages::encode_buffering_req(&req)?;
        let resp = self.request(SNS_SMGR_BUFFERING, &payload)?;
        messages::decode_buffering_resp(&resp)?;

        sensor.set_streaming(enable);
        Ok(())
    }

    /// Complete every pending transaction with `ServiceLost`
    fn fail_pending(&self) {
        let mut txns = self.txns.lock();
        for (txn_id, tx) in txns.pending.drain() {
            log::debug!("Failing in-flight transaction {}", txn_id);
            let _ = tx.send(Err(Error::ServiceLost));
        }
    }

    /// Handle one data frame from the transport
    fn handle_frame(&self, data: &[u8]) {
        let (header, payload) = match qmi::decode_message(data) {
            Ok(parts) => parts,
            Err(e) => {
                log::warn!("Undecodable frame ({} bytes): {}", data.len(), e);
                return;
            }
        };

        match header.msg_type {
            MessageType::Response => {
                let tx = self.txns.lock().pending.remove(&header.txn_id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Ok(payload.to_vec()));
                    }
                    None => {
                        // Caller timed out, or the service replied twice
                        log::debug!(
                            "Response for unknown transaction {} (msg {:#06x})",
                            header.txn_id,
                            header.msg_id
                        );
                    }
                }
            }
            MessageType::Indication => match header.msg_id {
                SNS_SMGR_BUFFERING_IND => match messages::decode_buffering_ind(payload) {
                    Ok(ind) => self.registry.dispatch_indication(&ind),
                    Err(e) => log::warn!("Bad buffering indication: {}", e),
                },
                other => log::debug!("Ignoring indication {:#06x}", other),
            },
            MessageType::Request => {
                log::debug!("Ignoring inbound request {:#06x}", header.msg_id);
            }
        }
    }
}

/// Receive loop - polls the transport and routes everything that arrives
fn rx_loop(inner: Arc<ClientInner>, discovery_tx: Sender<()>) {
    while !inner.shutdown.load(Ordering::Relaxed) {
        let event = inner.transport.lock().poll(POLL_INTERVAL);
        match event {
            Ok(Some(TransportEvent::Message { data, .. })) => inner.handle_frame(&data),
            Ok(Some(TransportEvent::NewServer(addr))) => {
                log::info!(
                    "Sensor service up at node {} port {}",
                    addr.node,
                    addr.port
                );
                {
                    let mut shared = inner.shared.lock();
                    shared.addr = Some(addr);
                    shared.state = ServiceState::Discovering;
                }
                let _ = discovery_tx.send(());
            }
            Ok(Some(TransportEvent::DelServer(_))) => {
                log::info!("Sensor service gone");
                {
                    let mut shared = inner.shared.lock();
                    shared.addr = None;
                    shared.state = ServiceState::Unbound;
                }
                inner.fail_pending();
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Transport poll error: {}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
        // Release the transport lock so request senders get a turn
        thread::sleep(Duration::from_millis(1));
    }
    log::info!("Receive thread exiting");
}

/// Sensor manager client with receive and discovery threads.
pub struct SmgrClient {
    inner: Arc<ClientInner>,
    rx_handle: Option<JoinHandle<()>>,
    discovery_handle: Option<JoinHandle<()>>,
}

impl SmgrClient {
    /// Create a client and register the service lookup
    pub fn new(mut transport: Box<dyn Transport>, config: &Config) -> Result<Self> {
        transport.lookup(config.service.service_id, config.service.instance)?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport: Mutex::new(transport),
                txns: Mutex::new(TxnTable {
                    next_id: 0,
                    pending: HashMap::new(),
                }),
                shared: Mutex::new(ServiceShared {
                    state: ServiceState::Unbound,
                    addr: None,
                }),
                registry: Arc::new(SensorRegistry::new()),
                timeout: Duration::from_millis(config.service.request_timeout_ms),
                shutdown: AtomicBool::new(false),
            }),
            rx_handle: None,
            discovery_handle: None,
        })
    }

    /// Start receive and discovery threads
    pub fn start(&mut self) -> Result<()> {
        let (discovery_tx, discovery_rx) = crossbeam_channel::unbounded();

        let rx_inner = Arc::clone(&self.inner);
        self.rx_handle = Some(
            thread::Builder::new()
                .name("smgr-rx".to_string())
                .spawn(move || rx_loop(rx_inner, discovery_tx))
                .map_err(|e| Error::Other(format!("Failed to spawn receive thread: {}", e)))?,
        );

        let discovery_inner = Arc::clone(&self.inner);
        self.discovery_handle = Some(
            thread::Builder::new()
                .name("smgr-discovery".to_string())
                .spawn(move || discovery::discovery_loop(discovery_inner, discovery_rx))
                .map_err(|e| {
                    Error::Other(format!("Failed to spawn discovery thread: {}", e))
                })?,
        );

        log::info!("SMGR client started");
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        self.inner.state()
    }

    /// Shared registry handle, for the streaming publisher
    pub fn registry(&self) -> Arc<SensorRegistry> {
        Arc::clone(&self.inner.registry)
    }

    /// All discovered sensors
    pub fn sensors(&self) -> Vec<Arc<SensorRuntime>> {
        self.inner.registry.sensors()
    }

    /// All registered consumer drivers
    pub fn drivers(&self) -> Vec<Arc<dyn SensorDriver>> {
        self.inner.registry.drivers()
    }

    /// Enumerate sensors directly (diagnostics; discovery does this itself)
    pub fn enumerate_sensors(&self) -> Result<Vec<SensorIdInfo>> {
        self.inner.enumerate_sensors()
    }

    /// Fetch detail for one sensor directly
    pub fn sensor_detail(&self, sensor_id: u8) -> Result<Vec<DataTypeInfo>> {
        self.inner.sensor_detail(sensor_id)
    }

    /// Shutdown the client
    pub fn shutdown(&mut self) -> Result<()> {
        log::info!("Shutting down SMGR client...");

        // Best-effort: stop streaming while the service is still addressable
        for sensor in self.inner.registry.sensors() {
            if sensor.is_streaming() {
                if let Err(e) = self.inner.set_buffering(&sensor, false) {
                    log::warn!("Could not stop streaming on sensor {}: {}", sensor.id, e);
                }
            }
        }

        self.inner.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.rx_handle.take() {
            handle
                .join()
                .map_err(|_| Error::Other("receive thread panicked".to_string()))?;
        }
        if let Some(handle) = self.discovery_handle.take() {
            handle
                .join()
                .map_err(|_| Error::Other("discovery thread panicked".to_string()))?;
        }

        log::info!("SMGR client shutdown complete");
        Ok(())
    }
}

impl Drop for SmgrClient {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::messages::testsupport::*;
    use super::*;
    use crate::qmi::codec::decode_tlvs;
    use crate::sensors::SensorKind;
    use crate::transport::MockTransport;
    use std::time::Instant;

    const SVC: ServiceAddr = ServiceAddr { node: 3, port: 77 };

    fn test_config(timeout_ms: u64) -> Config {
        let mut config = Config::msm8226_defaults();
        config.service.request_timeout_ms = timeout_ms;
        config
    }

    fn response_for(frame: &[u8], payload: Vec<u8>) -> TransportEvent {
        let (header, _) = qmi::decode_message(frame).unwrap();
        let data =
            qmi::encode_message(MessageType::Response, header.txn_id, header.msg_id, &payload)
                .unwrap();
        TransportEvent::Message { from: SVC, data }
    }

    /// Scripted firmware: an accelerometer (id 1) and a gyro (id 2)
    fn install_firmware(mock: &MockTransport) {
        mock.set_responder(|_, frame| {
            let (header, payload) = qmi::decode_message(frame).unwrap();
            let reply = match header.msg_id {
                SNS_SMGR_ALL_SENSOR_INFO => {
                    encode_all_sensor_info_resp(0, 0, &[(1, "ACCEL_BMI160"), (2, "GYRO_BMI160")])
                }
                SNS_SMGR_SINGLE_SENSOR_INFO => {
                    let slots =
                        decode_tlvs(messages::SINGLE_SENSOR_INFO_REQ, payload).unwrap();
                    let id = slots[0].as_ref().unwrap().as_u8().unwrap();
                    let name = if id == 1 { "ACCEL" } else { "GYRO" };
                    encode_single_sensor_info_resp(
                        0,
                        0,
                        &[messages::DataTypeInfo {
                            name: name.to_string(),
                            vendor: "BOSCH".to_string(),
                            version: 1,
                            max_sample_rate: 200,
                            idle_power: 0,
                            max_power: 0,
                            max_range: 0,
                        }],
                    )
                }
                SNS_SMGR_BUFFERING => encode_buffering_resp(0, 0, Some(0)),
                other => panic!("firmware got unexpected msg {:#06x}", other),
            };
            vec![response_for(frame, reply)]
        });
    }

    fn wait_until<F: Fn() -> bool>(cond: F, ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(ms);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn started_client(mock: &MockTransport, timeout_ms: u64) -> SmgrClient {
        let mut client =
            SmgrClient::new(Box::new(mock.clone()), &test_config(timeout_ms)).unwrap();
        client.start().unwrap();
        client
    }

    #[test]
    fn test_lookup_issued_on_new() {
        let mock = MockTransport::new();
        let _client = SmgrClient::new(Box::new(mock.clone()), &test_config(100)).unwrap();
        assert_eq!(mock.lookups(), vec![(0x100, 0)]);
    }

    #[test]
    fn test_request_unbound_fails_fast() {
        let mock = MockTransport::new();
        let client = started_client(&mock, 5000);

        let start = Instant::now();
        let err = client.enumerate_sensors().unwrap_err();
        assert!(matches!(err, Error::NotReady));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(mock.sent_frames().is_empty());
    }

    #[test]
    fn test_discovery_registers_sensors() {
        let mock = MockTransport::new();
        install_firmware(&mock);
        let client = started_client(&mock, 2000);

        mock.inject(TransportEvent::NewServer(SVC));
        assert!(wait_until(|| client.state() == ServiceState::Ready, 2000));

        let sensors = client.sensors();
        assert_eq!(sensors.len(), 2);
        for sensor in &sensors {
            assert!(!sensor.data_types.is_empty());
            // Default policy: current rate equals the channel maximum
            let dt = sensor.primary().unwrap();
            assert_eq!(dt.current_rate(), dt.max_sample_rate);
        }
        assert_eq!(sensors[0].kind, SensorKind::Accel);
        assert_eq!(sensors[1].kind, SensorKind::Gyro);

        // Only the accelerometer has a consumer driver
        let drivers = client.drivers();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].kind(), SensorKind::Accel);
        assert_eq!(drivers[0].sensor_id(), 1);
    }

    #[test]
    fn test_enumerate_timeout_leaves_no_sensors() {
        let mock = MockTransport::new();
        // No responder: every request times out
        let client = started_client(&mock, 100);

        mock.inject(TransportEvent::NewServer(SVC));
        assert!(wait_until(|| client.state() == ServiceState::Ready, 2000));
        assert!(client.sensors().is_empty());

        let err = client.enumerate_sensors().unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn test_del_server_fails_pending_fast() {
        let mock = MockTransport::new();
        // Responder stays silent; requests would ride out the full deadline
        let client = started_client(&mock, 3000);

        mock.inject(TransportEvent::NewServer(SVC));
        assert!(wait_until(|| client.state() == ServiceState::Discovering, 1000));

        // Pull the service away while the request is in flight
        let injector_mock = mock.clone();
        let injector = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            injector_mock.inject(TransportEvent::DelServer(SVC));
        });

        let start = Instant::now();
        let err = client.enumerate_sensors().unwrap_err();
        // Fail-fast: ServiceLost if the request was in flight, NotReady if
        // the teardown won the race. Never the full 3 s deadline.
        assert!(
            matches!(err, Error::ServiceLost | Error::NotReady),
            "got {:?}",
            err
        );
        assert!(start.elapsed() < Duration::from_secs(1));

        injector.join().unwrap();
        assert!(wait_until(|| client.state() == ServiceState::Unbound, 1000));
        assert!(matches!(
            client.enumerate_sensors().unwrap_err(),
            Error::NotReady
        ));
    }

    #[test]
    fn test_indication_demux() {
        let mock = MockTransport::new();
        install_firmware(&mock);
        let client = started_client(&mock, 2000);
        mock.inject(TransportEvent::NewServer(SVC));
        assert!(wait_until(|| client.state() == ServiceState::Ready, 2000));

        let accel = client
            .sensors()
            .into_iter()
            .find(|s| s.id == 1)
            .unwrap();
        let gyro = client
            .sensors()
            .into_iter()
            .find(|s| s.id == 2)
            .unwrap();

        // Unknown report id: dropped without error
        let stray = qmi::encode_message(
            MessageType::Indication,
            0,
            SNS_SMGR_BUFFERING_IND,
            &encode_buffering_ind(99, 0, &[([7, 7, 7], 0)]),
        )
        .unwrap();
        mock.inject(TransportEvent::Message {
            from: SVC,
            data: stray,
        });

        // Matching report id: delivered to exactly that sensor
        let ind = qmi::encode_message(
            MessageType::Indication,
            0,
            SNS_SMGR_BUFFERING_IND,
            &encode_buffering_ind(1, 4000, &[([10, 20, 30], 0), ([11, 21, 31], 5)]),
        )
        .unwrap();
        mock.inject(TransportEvent::Message { from: SVC, data: ind });

        assert!(wait_until(|| accel.pop_sample().is_some(), 1000));
        // Both samples of the indication were delivered
        let second = accel.pop_sample().unwrap();
        assert_eq!(second.data, [11, 21, 31]);
        assert_eq!(second.timestamp, 4005);
        assert!(gyro.pop_sample().is_none());
    }

    #[test]
    fn test_set_buffering_request_shape() {
        let mock = MockTransport::new();
        install_firmware(&mock);
        let client = started_client(&mock, 2000);
        mock.inject(TransportEvent::NewServer(SVC));
        assert!(wait_until(|| client.state() == ServiceState::Ready, 2000));

        let accel = client
            .sensors()
            .into_iter()
            .find(|s| s.id == 1)
            .unwrap();
        mock.clear_sent();

        client.inner.set_buffering(&accel, true).unwrap();
        assert!(accel.is_streaming());

        let frames = mock.sent_frames();
        assert_eq!(frames.len(), 1);
        let (header, payload) = qmi::decode_message(&frames[0].1).unwrap();
        assert_eq!(header.msg_id, SNS_SMGR_BUFFERING);

        let slots = decode_tlvs(messages::BUFFERING_REQ, payload).unwrap();
        assert_eq!(slots[0].as_ref().unwrap().as_u8().unwrap(), 1); // report id == sensor id
        assert_eq!(slots[1].as_ref().unwrap().as_u8().unwrap(), ACTION_ADD);
        assert_eq!(slots[2].as_ref().unwrap().as_u32().unwrap(), 200);

        mock.clear_sent();
        client.inner.set_buffering(&accel, false).unwrap();
        assert!(!accel.is_streaming());

        let frames = mock.sent_frames();
        let (_, payload) = qmi::decode_message(&frames[0].1).unwrap();
        let slots = decode_tlvs(messages::BUFFERING_REQ, payload).unwrap();
        assert_eq!(slots[1].as_ref().unwrap().as_u8().unwrap(), ACTION_DELETE);
    }
}
