//! Accelerometer consumer
//!
//! Adapts the generic buffered-sampling interface onto the SMGR client:
//! frequency reads/writes go to the primary reporting channel, buffer
//! enable/disable maps onto the buffering request, and samples land in the
//! sensor's ring buffer via the client's indication path.

use crate::error::{Error, Result};
use crate::sensors::{AvailRange, ChannelInfo, RawReading, Sample, SensorDriver, SensorKind};
use crate::smgr::registry::{DataTypeItem, SensorRuntime};
use crate::smgr::ClientInner;
use std::sync::Arc;

/// Scale from raw sample units to m/s^2. The firmware streams Q16
/// fixed-point values, so 1/65536 is a close approximation; it is not a
/// per-device calibration constant.
const SCALE_NUMERATOR: i64 = 1;
const SCALE_DENOMINATOR: i64 = 65536;

/// Sensor orientation on the reference board. Per-platform constant; the
/// firmware has no way to report it.
static MOUNT_MATRIX: [[f32; 3]; 3] = [
    [0.0, -1.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0],
];

pub struct AccelDriver {
    client: Arc<ClientInner>,
    runtime: Arc<SensorRuntime>,
}

pub(crate) fn build(
    client: Arc<ClientInner>,
    runtime: Arc<SensorRuntime>,
) -> Arc<dyn SensorDriver> {
    Arc::new(AccelDriver { client, runtime })
}

impl AccelDriver {
    fn primary(&self) -> Result<&DataTypeItem> {
        self.runtime
            .primary()
            .ok_or(Error::NotSupported("sensor has no reporting channels"))
    }
}

impl SensorDriver for AccelDriver {
    fn kind(&self) -> SensorKind {
        SensorKind::Accel
    }

    fn sensor_id(&self) -> u8 {
        self.runtime.id
    }

    fn read_raw(&self, info: ChannelInfo) -> Result<RawReading> {
        match info {
            ChannelInfo::SampleFrequency => {
                Ok(RawReading::Int(self.primary()?.current_rate() as i64))
            }
            ChannelInfo::Scale => Ok(RawReading::Fractional {
                numerator: SCALE_NUMERATOR,
                denominator: SCALE_DENOMINATOR,
            }),
        }
    }

    fn write_raw(&self, info: ChannelInfo, value: i64) -> Result<()> {
        match info {
            ChannelInfo::SampleFrequency => {
                let primary = self.primary()?;
                let rate = value.clamp(1, primary.max_sample_rate as i64) as u16;
                primary.set_current_rate(rate);

                // A live stream picks the new rate up through one fresh
                // enable request; no disable/enable cycle needed.
                if self.runtime.is_streaming() {
                    self.client.set_buffering(&self.runtime, true)?;
                }
                Ok(())
            }
            ChannelInfo::Scale => Err(Error::NotSupported("scale is fixed")),
        }
    }

    fn read_avail(&self, info: ChannelInfo) -> Result<AvailRange> {
        match info {
            ChannelInfo::SampleFrequency => Ok(AvailRange {
                min: 1,
                step: 1,
                max: self.primary()?.max_sample_rate as i64,
            }),
            ChannelInfo::Scale => Err(Error::NotSupported("scale is fixed")),
        }
    }

    fn mount_matrix(&self) -> &'static [[f32; 3]; 3] {
        &MOUNT_MATRIX
    }

    fn buffer_enable(&self) -> Result<()> {
        self.client.set_buffering(&self.runtime, true)
    }

    fn buffer_disable(&self) -> Result<()> {
        self.client.set_buffering(&self.runtime, false)
    }

    fn poll_sample(&self) -> Option<Sample> {
        self.runtime.pop_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::qmi::{self, codec::decode_tlvs, MessageType};
    use crate::smgr::messages::{self, testsupport::*};
    use crate::smgr::{ServiceState, SmgrClient};
    use crate::transport::{MockTransport, ServiceAddr, TransportEvent};
    use std::thread;
    use std::time::{Duration, Instant};

    const SVC: ServiceAddr = ServiceAddr { node: 3, port: 77 };
    const MAX_RATE: u16 = 200;

    /// Firmware with a single accelerometer, sensor id 4
    fn accel_firmware(mock: &MockTransport) {
        mock.set_responder(|_, frame| {
            let (header, _) = qmi::decode_message(frame).unwrap();
            let reply = match header.msg_id {
                messages::SNS_SMGR_ALL_SENSOR_INFO => {
                    encode_all_sensor_info_resp(0, 0, &[(4, "ACCEL_BMA250")])
                }
                messages::SNS_SMGR_SINGLE_SENSOR_INFO => encode_single_sensor_info_resp(
                    0,
                    0,
                    &[messages::DataTypeInfo {
                        name: "ACCEL".to_string(),
                        vendor: "BOSCH".to_string(),
                        version: 2,
                        max_sample_rate: MAX_RATE,
                        idle_power: 0,
                        max_power: 0,
                        max_range: 0,
                    }],
                ),
                messages::SNS_SMGR_BUFFERING => encode_buffering_resp(0, 0, Some(0)),
                other => panic!("firmware got unexpected msg {:#06x}", other),
            };
            let data = qmi::encode_message(
                MessageType::Response,
                header.txn_id,
                header.msg_id,
                &reply,
            )
            .unwrap();
            vec![TransportEvent::Message { from: SVC, data }]
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

    fn ready_driver(mock: &MockTransport) -> (SmgrClient, Arc<dyn SensorDriver>) {
        accel_firmware(mock);
        let mut config = Config::msm8226_defaults();
        config.service.request_timeout_ms = 2000;
        let mut client = SmgrClient::new(Box::new(mock.clone()), &config).unwrap();
        client.start().unwrap();
        mock.inject(TransportEvent::NewServer(SVC));
        assert!(wait_until(|| client.state() == ServiceState::Ready, 2000));
        let driver = client.drivers().into_iter().next().unwrap();
        (client, driver)
    }

    #[test]
    fn test_rate_round_trip() {
        let mock = MockTransport::new();
        let (_client, driver) = ready_driver(&mock);

        assert_eq!(
            driver.read_raw(ChannelInfo::SampleFrequency).unwrap(),
            RawReading::Int(MAX_RATE as i64)
        );

        driver.write_raw(ChannelInfo::SampleFrequency, 50).unwrap();
        assert_eq!(
            driver.read_raw(ChannelInfo::SampleFrequency).unwrap(),
            RawReading::Int(50)
        );
    }

    #[test]
    fn test_rate_clamped_to_range() {
        let mock = MockTransport::new();
        let (_client, driver) = ready_driver(&mock);

        driver.write_raw(ChannelInfo::SampleFrequency, 0).unwrap();
        assert_eq!(
            driver.read_raw(ChannelInfo::SampleFrequency).unwrap(),
            RawReading::Int(1)
        );

        driver
            .write_raw(ChannelInfo::SampleFrequency, 100_000)
            .unwrap();
        assert_eq!(
            driver.read_raw(ChannelInfo::SampleFrequency).unwrap(),
            RawReading::Int(MAX_RATE as i64)
        );
    }

    #[test]
    fn test_rate_write_idle_sends_nothing() {
        let mock = MockTransport::new();
        let (_client, driver) = ready_driver(&mock);
        mock.clear_sent();

        driver.write_raw(ChannelInfo::SampleFrequency, 25).unwrap();
        assert!(mock.sent_frames().is_empty());
    }

    #[test]
    fn test_rate_write_while_streaming_reissues_enable() {
        let mock = MockTransport::new();
        let (_client, driver) = ready_driver(&mock);

        driver.buffer_enable().unwrap();
        mock.clear_sent();

        driver.write_raw(ChannelInfo::SampleFrequency, 50).unwrap();

        // Exactly one fresh enable, report_rate tracking the new rate
        let frames = mock.sent_frames();
        assert_eq!(frames.len(), 1);
        let (header, payload) = qmi::decode_message(&frames[0].1).unwrap();
        assert_eq!(header.msg_id, messages::SNS_SMGR_BUFFERING);
        let slots = decode_tlvs(messages::BUFFERING_REQ, payload).unwrap();
        assert_eq!(
            slots[1].as_ref().unwrap().as_u8().unwrap(),
            messages::ACTION_ADD
        );
        assert_eq!(slots[2].as_ref().unwrap().as_u32().unwrap(), 50);
    }

    #[test]
    fn test_buffer_enable_disable() {
        let mock = MockTransport::new();
        let (client, driver) = ready_driver(&mock);
        let sensor = client.sensors().into_iter().next().unwrap();

        assert!(!sensor.is_streaming());
        driver.buffer_enable().unwrap();
        assert!(sensor.is_streaming());
        driver.buffer_disable().unwrap();
        assert!(!sensor.is_streaming());
    }

    #[test]
    fn test_scale_avail_and_matrix() {
        let mock = MockTransport::new();
        let (_client, driver) = ready_driver(&mock);

        assert_eq!(
            driver.read_raw(ChannelInfo::Scale).unwrap(),
            RawReading::Fractional {
                numerator: 1,
                denominator: 65536
            }
        );
        assert!(matches!(
            driver.write_raw(ChannelInfo::Scale, 2),
            Err(Error::NotSupported(_))
        ));
        assert_eq!(
            driver.read_avail(ChannelInfo::SampleFrequency).unwrap(),
            AvailRange {
                min: 1,
                step: 1,
                max: MAX_RATE as i64
            }
        );
        assert_eq!(driver.mount_matrix(), &MOUNT_MATRIX);
    }
}
