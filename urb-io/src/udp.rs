//! UDP transport
//!
//! One socket per process, bound to its configured address. Peer addresses
//! come from the static hosts map.

use crate::transport::{Transport, TransportError};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::debug;
use urb_protocol::ProcessId;

/// Default receive timeout until the link configures its own
const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(10);

/// UDP datagram transport
pub struct UdpTransport {
    socket: UdpSocket,
    peers: HashMap<ProcessId, SocketAddr>,
}

impl UdpTransport {
    /// Bind a socket to `addr` and register the peer address map
    ///
    /// The map may include the local process itself.
    pub fn bind(
        addr: SocketAddr,
        peers: impl IntoIterator<Item = (ProcessId, SocketAddr)>,
    ) -> Result<Self, TransportError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(DEFAULT_RECV_TIMEOUT))?;

        let socket: UdpSocket = socket.into();
        let peers: HashMap<_, _> = peers.into_iter().collect();

        debug!(addr = %addr, peers = peers.len(), "UDP transport bound");
        Ok(UdpTransport { socket, peers })
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Address registered for a peer
    pub fn peer_addr(&self, id: ProcessId) -> Option<SocketAddr> {
        self.peers.get(&id).copied()
    }

    /// Register (or replace) a peer address
    pub fn add_peer(&mut self, id: ProcessId, addr: SocketAddr) {
        self.peers.insert(id, addr);
    }

    /// Set the kernel send buffer size
    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), TransportError> {
        SockRef::from(&self.socket).set_send_buffer_size(size)?;
        debug!(size, "UDP send buffer resized");
        Ok(())
    }

    /// Set the kernel receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), TransportError> {
        SockRef::from(&self.socket).set_recv_buffer_size(size)?;
        debug!(size, "UDP receive buffer resized");
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, destination: ProcessId, datagram: &[u8]) -> Result<(), TransportError> {
        let addr = self
            .peers
            .get(&destination)
            .ok_or(TransportError::UnknownPeer(destination))?;
        self.socket.send_to(datagram, addr)?;
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        match self.socket.recv_from(buf) {
            Ok((n, _from)) => Ok(Some(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            // ICMP port unreachable from an earlier send surfaces here on some platforms
            Err(e) if e.kind() == ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn set_recv_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        // A zero timeout means "block forever" to the OS
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;
        Ok(())
    }
}
