//! Error types for IndriyaIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// IndriyaIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request deadline elapsed with no response
    #[error("Request timed out")]
    Timeout,

    /// No service address known (service not yet discovered, or gone)
    #[error("Sensor service not reachable")]
    NotReady,

    /// Service disappeared while a request was in flight
    #[error("Sensor service lost")]
    ServiceLost,

    /// Non-zero result code in a QMI response
    #[error("Remote error: result={result:#06x} error={error:#06x}")]
    Remote { result: u16, error: u16 },

    /// Negative acknowledgement to a buffering request
    #[error("Negative acknowledgement: {0:#04x}")]
    Nak(u8),

    /// Malformed or truncated wire payload
    #[error("Bad payload: {0}")]
    BadPayload(String),

    /// Schema/value mismatch. Indicates a bug in a message table, not a
    /// runtime condition.
    #[error("Schema violation: {0}")]
    Schema(&'static str),

    /// Operation not supported
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file could not be written
    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Wire serialization error (streaming layer)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
