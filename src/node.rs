use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
};

use primitive_types::H160;
use sha1::{Digest as _, Sha1};

use crate::error::ErrorKind;

/// 160-bit SHA-1 output. Ordering is byte-wise, i.e. big-endian numeric.
pub type Digest = H160;

pub fn digest(data: impl AsRef<[u8]>) -> Digest {
    H160(Sha1::digest(data.as_ref()).into())
}

/// One position on the ring: a replica slot of a physical server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub ip: String,
    pub port: u16,
    pub replica_id: usize,
    pub addr: SocketAddr,
    /// `SHA1("<ip> <port> <replica_id>")`, orders the ring.
    pub placement: Digest,
    /// `SHA1("<ip> <port> 0")`, shared by all replicas of one server.
    pub identity: Digest,
}

pub fn parse_ip(ip: &str) -> Option<Ipv4Addr> {
    // `Ipv4Addr` parsing is strict dotted quad: four decimal groups, no
    // leading zeros, each at most 255
    ip.parse().ok()
}

impl Node {
    pub fn new(ip: &str, port: u16, replica_id: usize) -> crate::Result<Self> {
        let Some(parsed) = parse_ip(ip) else {
            return Err(ErrorKind::BadAddress.with(format!("cannot resolve {ip}:{port}")));
        };
        Ok(Self {
            ip: ip.into(),
            port,
            replica_id,
            addr: SocketAddr::from((parsed, port)),
            placement: digest(format!("{ip} {port} {replica_id}")),
            identity: digest(format!("{ip} {port} 0")),
        })
    }

    /// `ip:port` text, the key that collapses replicas onto their server.
    pub fn server_key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Hex identity digest, the key of per-server status tables.
    pub fn identity_key(&self) -> String {
        format!("{:x}", self.identity)
    }

    /// Orders by server address first, then by placement.
    pub fn cmp_server_addr(&self, other: &Self) -> std::cmp::Ordering {
        (&self.ip, self.port, self.placement).cmp(&(&other.ip, other.port, other.placement))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({:x})", self.ip, self.port, self.placement)
    }
}
