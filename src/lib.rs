//! IndriyaIO - Sensor-manager QMI client for Qualcomm MSM-class targets
//!
//! This library provides the core components for talking to the SMGR
//! sensor service on the DSP and streaming its samples to local consumers.

pub mod config;
pub mod error;
pub mod qmi;
pub mod sensors;
pub mod smgr;
pub mod streaming;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use smgr::SmgrClient;
