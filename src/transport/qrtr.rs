//! QRTR socket transport
//!
//! Talks to the kernel's IPC router via an `AF_QIPCRTR` datagram socket.
//! Service discovery works through the router's control port: after a
//! NEW_LOOKUP registration, the router answers with one NEW_SERVER packet
//! per matching service (and DEL_SERVER when one goes away). Data messages
//! arrive on the same socket from the service's (node, port).

use super::{ServiceAddr, Transport, TransportEvent};
use crate::error::{Error, Result};
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::time::Duration;

const AF_QIPCRTR: libc::c_int = 42;

/// The router's control port, fixed by the kernel ABI
const QRTR_PORT_CTRL: u32 = 0xffff_fffe;

// Control packet commands (subset this client reacts to)
const QRTR_TYPE_NEW_SERVER: u32 = 4;
const QRTR_TYPE_DEL_SERVER: u32 = 5;
const QRTR_TYPE_NEW_LOOKUP: u32 = 10;

/// Control packet: cmd + server description, all little-endian
const CTRL_PKT_LEN: usize = 20;

#[repr(C)]
struct SockaddrQrtr {
    sq_family: libc::sa_family_t,
    sq_node: u32,
    sq_port: u32,
}

/// `AF_QIPCRTR` datagram socket with timed receives
pub struct QrtrSocket {
    fd: RawFd,
    local_node: u32,
    /// Service id the lookup watches; control packets for other services
    /// are dropped
    service: u32,
    recv_timeout: Option<Duration>,
}

impl QrtrSocket {
    /// Open a router socket and learn the local node id
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::socket(AF_QIPCRTR, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        // The port is autobound on first send; getsockname still reports
        // the local node, which is what lookup packets are addressed to.
        let mut addr = SockaddrQrtr {
            sq_family: AF_QIPCRTR as libc::sa_family_t,
            sq_node: 0,
            sq_port: 0,
        };
        let mut addr_len = mem::size_of::<SockaddrQrtr>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(
                fd,
                &mut addr as *mut SockaddrQrtr as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        Ok(Self {
            fd,
            local_node: addr.sq_node,
            service: 0,
            recv_timeout: None,
        })
    }

    fn sendto(&self, node: u32, port: u32, data: &[u8]) -> Result<()> {
        let addr = SockaddrQrtr {
            sq_family: AF_QIPCRTR as libc::sa_family_t,
            sq_node: node,
            sq_port: port,
        };
        let rc = unsafe {
            libc::sendto(
                self.fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                0,
                &addr as *const SockaddrQrtr as *const libc::sockaddr,
                mem::size_of::<SockaddrQrtr>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn set_recv_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.recv_timeout == Some(timeout) {
            return Ok(());
        }
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        self.recv_timeout = Some(timeout);
        Ok(())
    }

    /// Parse a control-port packet into a transport event
    fn parse_ctrl(&self, data: &[u8]) -> Option<TransportEvent> {
        if data.len() < CTRL_PKT_LEN {
            log::debug!("Runt control packet: {} bytes", data.len());
            return None;
        }
        let word = |i: usize| {
            u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]])
        };
        let cmd = word(0);
        let service = word(4);
        let addr = ServiceAddr {
            node: word(12),
            port: word(16),
        };
        if service != self.service {
            return None;
        }
        match cmd {
            QRTR_TYPE_NEW_SERVER => Some(TransportEvent::NewServer(addr)),
            QRTR_TYPE_DEL_SERVER => Some(TransportEvent::DelServer(addr)),
            _ => None,
        }
    }
}

impl Transport for QrtrSocket {
    fn lookup(&mut self, service: u32, instance: u32) -> Result<()> {
        self.service = service;

        let mut pkt = [0u8; CTRL_PKT_LEN];
        pkt[0..4].copy_from_slice(&QRTR_TYPE_NEW_LOOKUP.to_le_bytes());
        pkt[4..8].copy_from_slice(&service.to_le_bytes());
        pkt[8..12].copy_from_slice(&instance.to_le_bytes());
        // node/port stay zero in a lookup

        log::info!(
            "QRTR lookup: service {:#06x} instance {} (local node {})",
            service,
            instance,
            self.local_node
        );
        self.sendto(self.local_node, QRTR_PORT_CTRL, &pkt)
    }

    fn send(&mut self, to: ServiceAddr, data: &[u8]) -> Result<()> {
        self.sendto(to.node, to.port, data)
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
        self.set_recv_timeout(timeout)?;

        let mut buf = [0u8; 8192];
        let mut addr = SockaddrQrtr {
            sq_family: 0,
            sq_node: 0,
            sq_port: 0,
        };
        let mut addr_len = mem::size_of::<SockaddrQrtr>() as libc::socklen_t;
        let rc = unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut addr as *mut SockaddrQrtr as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Ok(None),
                io::ErrorKind::Interrupted => Ok(None),
                _ => Err(Error::Io(err)),
            };
        }
        let data = &buf[..rc as usize];

        if addr.sq_port == QRTR_PORT_CTRL {
            return Ok(self.parse_ctrl(data));
        }
        Ok(Some(TransportEvent::Message {
            from: ServiceAddr {
                node: addr.sq_node,
                port: addr.sq_port,
            },
            data: data.to_vec(),
        }))
    }
}

impl Drop for QrtrSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
