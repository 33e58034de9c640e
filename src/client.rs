//! Quorum client.
//!
//! Every operation binds its own ephemeral socket, fires all requests before
//! reading any reply, then reads replies one by one. Each receive waits at
//! most `Config::recv_timeout`; a timeout is treated as "no more replies".

use std::net::SocketAddr;

use derive_more::Display;
use tokio::{net::UdpSocket, time::timeout};
use tracing::{debug, warn};

use crate::{
    config::UDP_PAYLOAD_MAX,
    error::ErrorKind,
    wire::{dump_count, is_absent, normalize_field, Request, DUMP_HEADER_LEN, NUL},
    Config, HashTable, Node, Quorum, Ring,
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    #[display(fmt = "OK")]
    Ok,
    #[display(fmt = "FAIL")]
    Fail,
}

/// Growth step of the dump reassembly buffer.
pub const DUMP_CHUNK: usize = UDP_PAYLOAD_MAX;

#[derive(Debug, Clone)]
pub struct Client {
    pub config: Config,
    pub ring: Ring,
    pub quorum: Quorum,
}

impl Client {
    pub fn new(config: Config, ring: Ring, quorum: Quorum) -> crate::Result<Self> {
        let quorum = quorum.validate(&ring)?;
        Ok(Self {
            config,
            ring,
            quorum,
        })
    }

    async fn socket(&self) -> crate::Result<UdpSocket> {
        UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))
            .await
            .map_err(|err| ErrorKind::Network.with(format!("bind client socket: {err}")))
    }

    async fn send_to(&self, socket: &UdpSocket, node: &Node, payload: &[u8]) -> bool {
        match socket.send_to(payload, node.addr).await {
            Ok(_) => true,
            Err(err) => {
                warn!(%err, addr = %node.addr, "send failed");
                false
            }
        }
    }

    async fn send_all(&self, socket: &UdpSocket, nodes: &[Node], payload: &[u8]) -> usize {
        let mut sent = 0;
        for node in nodes {
            if self.send_to(socket, node, payload).await {
                sent += 1
            }
        }
        sent
    }

    /// Next datagram from anyone, or `None` once the transport has nothing
    /// more to offer within the read timeout.
    async fn recv(&self, socket: &UdpSocket, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        match timeout(self.config.recv_timeout, socket.recv_from(buf)).await {
            Ok(Ok(received)) => Some(received),
            Ok(Err(err)) => {
                warn!(%err, "receive failed");
                None
            }
            Err(_) => {
                debug!("receive timed out");
                None
            }
        }
    }

    fn check_len(&self, what: &str, field: &str) -> crate::Result<()> {
        if field.len() > self.config.max_elem_size {
            return Err(ErrorKind::BadParameter.with(format!(
                "{what} of {} bytes exceeds {}",
                field.len(),
                self.config.max_elem_size
            )));
        }
        Ok(())
    }

    /// Quorum read.
    ///
    /// Returns as soon as R replicas agree on the exact same value. Replicas
    /// disagreeing with each other are never reconciled: if the N replies run
    /// out without any value reaching R the read fails with `Network`, or
    /// with `NotFound` when at least R replicas reported the key unset.
    pub async fn get(&self, key: &str) -> crate::Result<String> {
        self.check_len("key", key)?;
        let key = normalize_field(key);
        if key.is_empty() {
            return Err(ErrorKind::BadParameter.with("empty key is reserved for dump requests"));
        }
        let Quorum { n, r, .. } = self.quorum;
        let sublist = self.ring.nodes_for_key(n, key)?;
        let socket = self.socket().await?;
        let request = Request::Get(key.into()).encode();
        let sent = self.send_all(&socket, &sublist, &request).await;
        debug!(key, sent, n, r, "get fanned out");

        let mut tally = HashTable::<usize>::new(n)?;
        let mut absent = 0;
        let mut buf = vec![0; self.config.max_datagram_size];
        for _ in 0..n {
            let Some((len, remote)) = self.recv(&socket, &mut buf).await else {
                break;
            };
            if !sublist.iter().any(|node| node.addr == remote) {
                warn!(%remote, "reply from outside the placement");
                continue;
            }
            let reply = &buf[..len];
            if is_absent(reply) {
                absent += 1;
                continue;
            }
            let value = String::from_utf8_lossy(reply).into_owned();
            if r == 1 {
                return Ok(value);
            }
            let count = tally.lookup(&value).unwrap_or(0) + 1;
            if count >= r {
                return Ok(value);
            }
            tally.insert(&value, count)?
        }
        if absent >= r {
            Err(ErrorKind::NotFound.with(format!("{key}: unset on {absent} replicas")))
        } else {
            Err(ErrorKind::Network.with(format!(
                "{key}: no value confirmed by {r} replicas ({} distinct seen)",
                tally.len()
            )))
        }
    }

    /// Quorum write, a single attempt with no retry.
    pub async fn put(&self, key: &str, value: &str) -> crate::Result<()> {
        self.check_len("key", key)?;
        self.check_len("value", value)?;
        let (key, value) = (normalize_field(key), normalize_field(value));
        if key.is_empty() {
            return Err(ErrorKind::BadParameter.with("empty key"));
        }
        let request = Request::Put(key.into(), value.into()).encode();
        if request.len() > self.config.max_datagram_size {
            return Err(ErrorKind::BadParameter.with(format!(
                "put of {} bytes does not fit a datagram",
                request.len()
            )));
        }
        let Quorum { n, w, .. } = self.quorum;
        let sublist = self.ring.nodes_for_key(n, key)?;
        let socket = self.socket().await?;
        let sent = self.send_all(&socket, &sublist, &request).await;
        debug!(key, sent, n, w, "put fanned out");

        let mut acked = HashTable::<()>::new(n)?;
        let mut buf = vec![0; self.config.max_datagram_size];
        for _ in 0..n {
            let Some((len, remote)) = self.recv(&socket, &mut buf).await else {
                break;
            };
            if self.ring.position_of(remote).is_none() {
                warn!(%remote, "reply from outside the ring");
                continue;
            }
            if len != 0 {
                debug!(%remote, "replica refused the write");
                continue;
            }
            acked.insert(&remote.to_string(), ())?;
            if acked.len() >= w {
                return Ok(());
            }
        }
        Err(ErrorKind::Network.with(format!(
            "{key}: {} of {w} acknowledgements",
            acked.len()
        )))
    }

    /// Liveness probe of every ring position.
    ///
    /// `status` ends up with exactly one entry per physical server, keyed by
    /// [`Node::identity_key`].
    pub async fn list_nodes(&self, status: &mut HashTable<Status>) -> crate::Result<()> {
        for node in self.ring.nodes() {
            status.insert(&node.identity_key(), Status::Fail)?
        }
        let socket = self.socket().await?;
        let mut accounted = HashTable::<()>::new(self.ring.len().max(1))?;
        let request = Request::Probe.encode();
        for node in self.ring.nodes() {
            if !self.send_to(&socket, node, &request).await {
                status.insert(&node.identity_key(), Status::Fail)?;
                accounted.insert(&node.identity_key(), ())?
            }
        }
        let mut buf = vec![0; self.config.max_datagram_size];
        while accounted.len() < self.ring.server_count() {
            let Some((_, remote)) = self.recv(&socket, &mut buf).await else {
                break;
            };
            let Some(node) = self.ring.position_of(remote) else {
                continue;
            };
            status.insert(&node.identity_key(), Status::Ok)?;
            accounted.insert(&node.identity_key(), ())?
        }
        debug!(
            servers = self.ring.server_count(),
            accounted = accounted.len(),
            "probe finished"
        );
        Ok(())
    }

    async fn recv_from_node(
        &self,
        socket: &UdpSocket,
        node: &Node,
        buf: &mut [u8],
    ) -> crate::Result<usize> {
        loop {
            let Some((len, remote)) = self.recv(socket, buf).await else {
                return Err(ErrorKind::Network.with(format!("dump from {} interrupted", node.addr)));
            };
            if remote == node.addr {
                break Ok(len);
            }
            warn!(%remote, "dropping datagram from outside the dump")
        }
    }

    /// Fetches the whole table of one server.
    ///
    /// The result is the reassembled stream: 4-byte big-endian pair count,
    /// then `key NUL value NUL` for every pair, see
    /// [`decode_dump`](crate::wire::decode_dump).
    pub async fn dump(&self, node: &Node) -> crate::Result<Vec<u8>> {
        let socket = self.socket().await?;
        if let Err(err) = socket.send_to(&Request::Dump.encode(), node.addr).await {
            return Err(ErrorKind::Network.with(format!("dump request to {}: {err}", node.addr)));
        }
        let mut buf = vec![0; self.config.max_datagram_size];
        let len = self.recv_from_node(&socket, node, &mut buf).await?;
        let Some(expected) = dump_count(&buf[..len]) else {
            return Err(ErrorKind::Network.with(format!("dump header of {len} bytes")));
        };
        if expected == 0 {
            return Ok(buf[..DUMP_HEADER_LEN].to_vec());
        }

        let mut dump = Vec::new();
        append_chunked(&mut dump, &buf[..len])?;
        let mut nul_count = count_nul(&buf[DUMP_HEADER_LEN..len]);
        // every pair carries exactly two NULs and never straddles datagrams
        while nul_count / 2 < expected {
            let len = self.recv_from_node(&socket, node, &mut buf).await?;
            append_chunked(&mut dump, &buf[..len])?;
            nul_count += count_nul(&buf[..len])
        }
        debug!(addr = %node.addr, pairs = expected, bytes = dump.len(), "dump reassembled");
        Ok(dump)
    }
}

fn count_nul(buf: &[u8]) -> usize {
    buf.iter().filter(|&&byte| byte == NUL).count()
}

/// Appends `data`, growing capacity in whole `DUMP_CHUNK` steps.
fn append_chunked(buf: &mut Vec<u8>, data: &[u8]) -> crate::Result<()> {
    let needed = buf.len() + data.len();
    if needed > buf.capacity() {
        let capacity = needed.div_ceil(DUMP_CHUNK) * DUMP_CHUNK;
        buf.try_reserve_exact(capacity - buf.len())
            .map_err(|err| ErrorKind::OutOfMemory.with(err))?
    }
    buf.extend_from_slice(data);
    Ok(())
}
