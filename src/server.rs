use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::{
    error::ErrorKind,
    wire::{encode_dump, Request, NUL},
    Config, HashTable,
};

/// Request handling of one storage node, independent of the socket.
#[derive(Debug)]
pub struct Store {
    table: HashTable<String>,
    max_elem_size: usize,
    max_datagram_size: usize,
}

impl Store {
    pub fn new(config: &Config) -> crate::Result<Self> {
        Ok(Self {
            table: HashTable::new(config.table_buckets)?,
            max_elem_size: config.max_elem_size,
            max_datagram_size: config.max_datagram_size,
        })
    }

    pub fn table(&self) -> &HashTable<String> {
        &self.table
    }

    /// Applies `request` and returns the reply datagrams, in sending order.
    pub fn handle(&mut self, request: Request) -> Vec<Vec<u8>> {
        match request {
            Request::Probe => vec![Vec::new()],
            Request::Get(key) => match self.table.lookup(&key) {
                Some(value) => vec![value.into_bytes()],
                None => vec![vec![NUL]],
            },
            Request::Put(key, value)
                if key.len() > self.max_elem_size || value.len() > self.max_elem_size =>
            {
                // every stored pair fits one dump datagram
                warn!(key_len = key.len(), value_len = value.len(), "oversize put refused");
                vec![vec![NUL]]
            }
            Request::Put(key, value) => match self.table.insert(&key, value) {
                Ok(()) => vec![Vec::new()],
                Err(err) => {
                    warn!(%err, %key, "insert failed");
                    vec![vec![NUL]]
                }
            },
            Request::Dump => match encode_dump(&self.table.snapshot(), self.max_datagram_size) {
                Ok(datagrams) => datagrams,
                Err(err) => {
                    // shorter than a dump header, the client fails the dump
                    warn!(%err, "dump failed");
                    vec![vec![NUL]]
                }
            },
        }
    }
}

#[derive(Debug)]
pub struct Server {
    socket: UdpSocket,
    store: Store,
    max_datagram_size: usize,
}

impl Server {
    pub async fn bind(config: &Config, addr: SocketAddr) -> crate::Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|err| ErrorKind::Network.with(format!("bind {addr}: {err}")))?;
        Ok(Self {
            socket,
            store: Store::new(config)?,
            max_datagram_size: config.max_datagram_size,
        })
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serves requests one at a time until the task is dropped. The table is
    /// owned by this loop, no locking involved.
    pub async fn run(mut self) -> crate::Result<()> {
        info!(addr = %self.local_addr()?, "serving");
        let mut buf = vec![0; self.max_datagram_size];
        loop {
            let (len, remote) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    warn!(%err, "receive failed");
                    continue;
                }
            };
            let request = Request::decode(&buf[..len]);
            debug!(%remote, ?request, "request");
            for reply in self.store.handle(request) {
                if let Err(err) = self.socket.send_to(&reply, remote).await {
                    warn!(%err, %remote, "reply failed")
                }
            }
        }
    }
}
