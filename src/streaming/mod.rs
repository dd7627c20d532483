//! Sample streaming
//!
//! Fans buffered samples out to local consumers over UDP unicast. Datagrams
//! carry one serialized [`StreamMessage`] each; delivery is fire-and-forget,
//! matching the lossy ring buffers upstream.
//!
//! Two wire formats are supported:
//! - **JSON** (default): human-readable, easy to tap with tcpdump/netcat
//! - **Postcard**: compact binary for production streaming

pub mod messages;
mod udp_publisher;

pub use messages::{SampleUpdate, ServiceStatus, StreamMessage};
pub use udp_publisher::UdpPublisher;

use crate::error::{Error, Result};

/// Supported wire formats
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum WireFormat {
    /// Binary format using postcard - fast and compact
    Postcard,
    /// JSON format - human-readable for debugging
    #[default]
    Json,
}

impl WireFormat {
    /// Parse the config string ("json" or "postcard")
    pub fn from_config(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "postcard" => Ok(WireFormat::Postcard),
            other => Err(Error::Other(format!("unknown wire format: {}", other))),
        }
    }
}

/// Serializer that can handle both formats
#[derive(Clone)]
pub struct Serializer {
    format: WireFormat,
}

impl Serializer {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// Serialize a message to bytes
    pub fn serialize(&self, msg: &StreamMessage) -> Result<Vec<u8>> {
        match self.format {
            WireFormat::Postcard => {
                postcard::to_allocvec(msg).map_err(|e| Error::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::to_vec(msg).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }

    /// Deserialize bytes to a message
    pub fn deserialize(&self, bytes: &[u8]) -> Result<StreamMessage> {
        match self.format {
            WireFormat::Postcard => {
                postcard::from_bytes(bytes).map_err(|e| Error::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StreamMessage {
        StreamMessage::Sample(SampleUpdate {
            timestamp_us: 1_000_000,
            device_timestamp: 42,
            sensor_id: 4,
            kind: "accel".to_string(),
            data: [100, -200, 65536],
        })
    }

    #[test]
    fn test_json_round_trip() {
        let s = Serializer::new(WireFormat::Json);
        let bytes = s.serialize(&sample()).unwrap();
        assert_eq!(s.deserialize(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_postcard_round_trip() {
        let s = Serializer::new(WireFormat::Postcard);
        let bytes = s.serialize(&sample()).unwrap();
        assert_eq!(s.deserialize(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_format_from_config() {
        assert_eq!(WireFormat::from_config("json").unwrap(), WireFormat::Json);
        assert_eq!(
            WireFormat::from_config("Postcard").unwrap(),
            WireFormat::Postcard
        );
        assert!(WireFormat::from_config("msgpack").is_err());
    }
}
