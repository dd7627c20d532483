//! Configuration for the IndriyaIO daemon
//!
//! Loads configuration from a TOML file with the minimal parameters needed
//! to reach the sensor firmware service and stream its samples.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub streaming: StreamingConfig,
    pub logging: LoggingConfig,
}

/// QMI service identity and request behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// QMI service id of the sensor manager on the DSP (SNS_SMGR)
    pub service_id: u32,
    /// Service instance (0 on every target seen so far)
    pub instance: u32,
    /// Deadline for a request/response transaction, in milliseconds
    pub request_timeout_ms: u64,
}

/// Sample streaming configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// UDP destination for sample datagrams
    ///
    /// Examples:
    /// - `127.0.0.1:5580` - local consumer
    /// - `192.168.1.20:5580` - remote visualizer
    pub udp_address: String,

    /// Wire format: "json" (debuggable) or "postcard" (compact)
    pub wire_format: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output (stdout, stderr, or file path)
    pub output: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Default configuration for MSM8226-class targets
    ///
    /// Suitable for testing and development. Production deployments
    /// should use a proper TOML configuration file.
    pub fn msm8226_defaults() -> Self {
        Self {
            service: ServiceConfig {
                service_id: 0x100, // SNS_SMGR
                instance: 0,
                request_timeout_ms: 5000,
            },
            streaming: StreamingConfig {
                udp_address: "127.0.0.1:5580".to_string(),
                wire_format: "json".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                output: "stdout".to_string(),
            },
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::msm8226_defaults()
    }
}
