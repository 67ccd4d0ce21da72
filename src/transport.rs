//! UDP transport: one bound socket per listen address, a blocking receive
//! loop, and the reply destination selection rules.
//!
//! The orchestrator is thread-per-socket rather than a single async
//! reactor, so this is a thin wrapper over `std::net::UdpSocket` with
//! broadcast permissions enabled on bind.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use crate::error::ConfigError;
use crate::wire::DhcpMessage;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

/// A bound listening socket plus the logical interface name it answers
/// requests on, the unit the orchestrator's per-socket receive thread reads
/// from.
pub struct Listener {
    pub interface: String,
    socket: UdpSocket,
}

impl Listener {
    /// Binds `addr` and configures the broadcast permissions a DHCP server
    /// needs to answer clients that have no address yet.
    pub fn bind(interface: impl Into<String>, addr: SocketAddrV4) -> Result<Self, ConfigError> {
        let socket = UdpSocket::bind(addr).map_err(|e| ConfigError::BindFailed {
            addr: addr.to_string(),
            source: e,
        })?;
        socket.set_broadcast(true).map_err(|e| ConfigError::BindFailed {
            addr: addr.to_string(),
            source: e,
        })?;

        Ok(Self {
            interface: interface.into(),
            socket,
        })
    }

    /// Blocks until a datagram arrives, returning the raw bytes and the
    /// sender's address. The caller is responsible for parsing and for
    /// handling a zero-length or malformed read.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    /// Bounds how long the receive thread blocks before re-checking the
    /// shutdown flag.
    pub fn set_read_timeout(&self, timeout: std::time::Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }

    /// Sends a reply datagram, choosing the destination as follows:
    /// - relayed request (`giaddr` set): unicast to the relay at port 67.
    /// - client already has an address and did not ask for broadcast:
    ///   unicast to `yiaddr` at port 68.
    /// - otherwise: broadcast to 255.255.255.255:68.
    pub fn send_reply(&self, reply: &DhcpMessage) -> io::Result<usize> {
        let bytes = reply
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let dest = self.select_destination(reply);
        self.socket.send_to(&bytes, dest)
    }

    fn select_destination(&self, reply: &DhcpMessage) -> SocketAddrV4 {
        if reply.giaddr != Ipv4Addr::UNSPECIFIED {
            return SocketAddrV4::new(reply.giaddr, SERVER_PORT);
        }
        if !reply.is_broadcast() && reply.yiaddr != Ipv4Addr::UNSPECIFIED {
            return SocketAddrV4::new(reply.yiaddr, CLIENT_PORT);
        }
        SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT)
    }
}
