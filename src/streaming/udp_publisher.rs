//! UDP publisher thread
//!
//! Drains every registered sensor's ring buffer and sends one datagram per
//! sample to the configured consumer address. Sends are fire-and-forget; a
//! missing consumer just means the datagrams go nowhere.

use super::messages::{timestamp_us, SampleUpdate, ServiceStatus, StreamMessage};
use super::Serializer;
use crate::error::{Error, Result};
use crate::smgr::registry::SensorRegistry;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Idle sleep between empty drain passes
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Health summary interval
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

pub struct UdpPublisher {
    socket: UdpSocket,
    target: SocketAddr,
    serializer: Serializer,
    registry: Arc<SensorRegistry>,
    running: Arc<AtomicBool>,
}

impl UdpPublisher {
    pub fn new(
        target: &str,
        serializer: Serializer,
        registry: Arc<SensorRegistry>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let target: SocketAddr = target
            .parse()
            .map_err(|e| Error::Other(format!("bad stream address {}: {}", target, e)))?;
        // Send-only socket; any local port will do
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            target,
            serializer,
            registry,
            running,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        log::info!("UDP publisher streaming to {}", self.target);
        let mut last_status = Instant::now();
        let mut sent: u64 = 0;

        while self.running.load(Ordering::Relaxed) {
            let mut idle = true;

            for sensor in self.registry.sensors() {
                while let Some(sample) = sensor.pop_sample() {
                    idle = false;
                    let msg = StreamMessage::Sample(SampleUpdate {
                        timestamp_us: timestamp_us(),
                        device_timestamp: sample.timestamp,
                        sensor_id: sensor.id,
                        kind: sensor.kind.label().to_string(),
                        data: sample.data,
                    });
                    if self.publish(&msg) {
                        sent += 1;
                    }
                }
            }

            if last_status.elapsed() >= STATUS_INTERVAL {
                let sensors = self.registry.sensors();
                let streaming = sensors.iter().filter(|s| s.is_streaming()).count();
                let msg = StreamMessage::ServiceStatus(ServiceStatus {
                    timestamp_us: timestamp_us(),
                    sensors: sensors.len(),
                    streaming,
                });
                self.publish(&msg);
                log::debug!("Streamed {} samples so far", sent);
                last_status = Instant::now();
            }

            if idle {
                thread::sleep(IDLE_SLEEP);
            }
        }

        log::info!("UDP publisher exiting ({} samples streamed)", sent);
        Ok(())
    }

    fn publish(&self, msg: &StreamMessage) -> bool {
        let bytes = match self.serializer.serialize(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Serialize failed: {}", e);
                return false;
            }
        };
        match self.socket.send_to(&bytes, self.target) {
            Ok(_) => true,
            Err(e) => {
                // Best-effort; a full socket buffer is not worth more noise
                log::debug!("UDP send failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorKind;
    use crate::smgr::messages::{BufferingInd, IndIndex, IndSample};
    use crate::smgr::registry::SensorRuntime;
    use crate::streaming::WireFormat;

    #[test]
    fn test_samples_reach_consumer() {
        let consumer = UdpSocket::bind("127.0.0.1:0").unwrap();
        consumer
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = consumer.local_addr().unwrap().to_string();

        let registry = Arc::new(SensorRegistry::new());
        let sensor = Arc::new(SensorRuntime::new(7, SensorKind::Accel, Vec::new()));
        registry.insert(Arc::clone(&sensor));

        sensor.push_indication(&BufferingInd {
            report_id: 7,
            indices: vec![IndIndex {
                first_sample_idx: 0,
                sample_count: 1,
                first_sample_timestamp: 123,
            }],
            samples: vec![IndSample {
                data: [1, 2, 3],
                time_offset: 0,
                flags: 0,
                quality: 0,
            }],
        });

        let running = Arc::new(AtomicBool::new(true));
        let mut publisher = UdpPublisher::new(
            &target,
            Serializer::new(WireFormat::Json),
            Arc::clone(&registry),
            Arc::clone(&running),
        )
        .unwrap();
        let handle = thread::spawn(move || publisher.run());

        let mut buf = [0u8; 2048];
        let n = consumer.recv(&mut buf).unwrap();
        let msg = Serializer::new(WireFormat::Json)
            .deserialize(&buf[..n])
            .unwrap();
        match msg {
            StreamMessage::Sample(update) => {
                assert_eq!(update.sensor_id, 7);
                assert_eq!(update.kind, "accel");
                assert_eq!(update.data, [1, 2, 3]);
                assert_eq!(update.device_timestamp, 123);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap().unwrap();
    }
}
