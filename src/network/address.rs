//! Peer addressing.
//!
//! A peer is identified by the host string it was reached at (or that it was
//! gossiped under) plus its declared listening port. Hosts are compared as
//! plain strings; no DNS resolution happens here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// `(host, port)` identity of a mesh node. Serialized as a two-element
/// JSON array so gossiped peer lists stay compact: `["10.0.0.5", 9001]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, u16)", into = "(String, u16)")]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse `"host:port"`. IPv6 hosts must be bracketed (`"[::1]:9001"`).
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.rsplit_once(':')?;
        let port = port.parse().ok()?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }

    /// Loopback or unspecified hosts all refer to this machine.
    pub fn is_local_host(&self) -> bool {
        if self.host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        match self.host.parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
            Err(_) => false,
        }
    }
}

impl From<(String, u16)> for PeerAddress {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl From<PeerAddress> for (String, u16) {
    fn from(addr: PeerAddress) -> Self {
        (addr.host, addr.port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The address this node listens on, used to keep ourselves out of the registry.
#[derive(Clone, Debug)]
pub struct LocalAddress {
    addr: PeerAddress,
}

impl LocalAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            addr: PeerAddress::new(host, port),
        }
    }

    pub fn addr(&self) -> &PeerAddress {
        &self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port
    }

    /// True for our own advertised address, and for any loopback/unspecified
    /// host paired with our listening port.
    pub fn matches(&self, other: &PeerAddress) -> bool {
        if *other == self.addr {
            return true;
        }
        other.port == self.addr.port && other.is_local_host()
    }
}

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_exact() {
        assert_eq!(
            PeerAddress::new("10.0.0.1", 9001),
            PeerAddress::new("10.0.0.1", 9001)
        );
        assert_ne!(
            PeerAddress::new("10.0.0.1", 9001),
            PeerAddress::new("10.0.0.1", 9002)
        );
        // No normalization between names and IPs
        assert_ne!(
            PeerAddress::new("localhost", 9001),
            PeerAddress::new("127.0.0.1", 9001)
        );
    }

    #[test]
    fn test_serializes_as_pair() {
        let addr = PeerAddress::new("192.168.1.4", 9001);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, r#"["192.168.1.4",9001]"#);

        let back: PeerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            PeerAddress::parse("10.1.2.3:7000"),
            Some(PeerAddress::new("10.1.2.3", 7000))
        );
        assert_eq!(
            PeerAddress::parse("[::1]:7000"),
            Some(PeerAddress::new("::1", 7000))
        );
        assert_eq!(PeerAddress::parse("10.1.2.3"), None);
        assert_eq!(PeerAddress::parse(":7000"), None);
        assert_eq!(PeerAddress::parse("host:notaport"), None);
    }

    #[test]
    fn test_local_matches_loopback_on_same_port() {
        let local = LocalAddress::new("192.168.1.10", 9001);

        assert!(local.matches(&PeerAddress::new("192.168.1.10", 9001)));
        assert!(local.matches(&PeerAddress::new("127.0.0.1", 9001)));
        assert!(local.matches(&PeerAddress::new("localhost", 9001)));
        assert!(local.matches(&PeerAddress::new("0.0.0.0", 9001)));

        assert!(!local.matches(&PeerAddress::new("127.0.0.1", 9002)));
        assert!(!local.matches(&PeerAddress::new("192.168.1.11", 9001)));
    }
}
