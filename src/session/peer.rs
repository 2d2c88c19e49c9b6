//! Peer address value type

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Validated peer address.
///
/// Built once from the accepted connection; the data channel address is the
/// same IP with the port announced in the client's handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    ip: IpAddr,
    port: u16,
}

impl PeerAddr {
    /// Returns `None` for an unspecified IP or port 0.
    ///
    /// IPv4-mapped IPv6 addresses are normalised to IPv4.
    pub fn new(ip: IpAddr, port: u16) -> Option<Self> {
        let ip = ip.to_canonical();
        if ip.is_unspecified() || port == 0 {
            return None;
        }
        Some(Self { ip, port })
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        Self::new(addr.ip(), addr.port())
    }

    /// Same IP, different port
    pub fn with_port(self, port: u16) -> Option<Self> {
        Self::new(self.ip, port)
    }

    #[inline]
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}
