//! Transport layer for QRTR I/O abstraction

use crate::error::Result;
use std::time::Duration;

mod mock;
mod qrtr;
pub use mock::MockTransport;
pub use qrtr::QrtrSocket;

/// Dynamic (node, port) address of a remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceAddr {
    pub node: u32,
    pub port: u32,
}

/// Events delivered by the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A data message from a remote endpoint
    Message { from: ServiceAddr, data: Vec<u8> },
    /// The looked-up service became reachable at this address
    NewServer(ServiceAddr),
    /// The service at this address disappeared
    DelServer(ServiceAddr),
}

/// Transport trait for service communication
///
/// Implementations deliver point-to-point datagrams and surface the
/// lookup-service notifications for one watched service. `poll` must
/// return within roughly `timeout` so callers can observe shutdown flags.
pub trait Transport: Send {
    /// Register interest in a service; NewServer/DelServer events follow
    fn lookup(&mut self, service: u32, instance: u32) -> Result<()>;

    /// Send one datagram to the given address
    fn send(&mut self, to: ServiceAddr, data: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for the next event
    fn poll(&mut self, timeout: Duration) -> Result<Option<TransportEvent>>;
}
