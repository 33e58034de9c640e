use std::{path::PathBuf, time::Duration};

use crate::{error::ErrorKind, Ring};

/// Process-wide knobs, passed explicitly to ring loading, client and server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub servers_list: PathBuf,
    /// Upper bound for a single key or value.
    pub max_elem_size: usize,
    pub max_datagram_size: usize,
    /// Read timeout of every client receive. An unresponsive replica costs at
    /// most this much per outstanding reply.
    pub recv_timeout: Duration,
    pub table_buckets: usize,
}

pub const UDP_PAYLOAD_MAX: usize = 65507;

impl Default for Config {
    fn default() -> Self {
        Self {
            servers_list: "servers.txt".into(),
            max_elem_size: 32_000,
            max_datagram_size: UDP_PAYLOAD_MAX,
            recv_timeout: Duration::from_secs(1),
            table_buckets: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quorum {
    pub n: usize,
    pub r: usize,
    pub w: usize,
}

impl Default for Quorum {
    fn default() -> Self {
        Self { n: 3, r: 2, w: 2 }
    }
}

impl Quorum {
    /// Normalizes and checks the quorum against the ring it will run on.
    ///
    /// `n == 1` forces both thresholds to 1 before any check.
    pub fn validate(mut self, ring: &Ring) -> crate::Result<Self> {
        if self.n == 1 {
            self.r = 1;
            self.w = 1
        }
        let servers = ring.server_count();
        if self.n == 0
            || self.r == 0
            || self.w == 0
            || self.n > servers
            || self.r > self.n
            || self.w > self.n
        {
            return Err(ErrorKind::BadParameter.with(format!(
                "invalid quorum S: {servers} N: {} R: {} W: {}",
                self.n, self.r, self.w
            )));
        }
        Ok(self)
    }
}
