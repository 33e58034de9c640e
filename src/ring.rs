use std::{
    fs::File,
    io::{BufRead, BufReader},
    net::SocketAddr,
};

use tracing::debug;

use crate::{
    error::ErrorKind,
    node::{digest, parse_ip},
    Config, HashTable, Node,
};

/// One line of the server list: a physical server and how many ring
/// positions it occupies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerEntry {
    pub ip: String,
    pub port: u16,
    pub replicas: usize,
}

impl ServerEntry {
    pub fn new(ip: impl Into<String>, port: u16, replicas: usize) -> Self {
        Self {
            ip: ip.into(),
            port,
            replicas,
        }
    }

    fn parse(line: &str) -> crate::Result<Self> {
        let bad_line = || ErrorKind::BadParameter.with(format!("malformed server line {line:?}"));
        let mut fields = line.split_whitespace();
        let (Some(ip), Some(port), Some(replicas), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(bad_line());
        };
        if parse_ip(ip).is_none() {
            return Err(bad_line());
        }
        let port = port.parse::<u16>().map_err(|_| bad_line())?;
        if port == 0 {
            return Err(bad_line());
        }
        let replicas = replicas.parse().map_err(|_| bad_line())?;
        Ok(Self::new(ip, port, replicas))
    }
}

/// Reads `<ip> <port> <replicas>` lines, skipping blank ones.
pub fn parse_servers(reader: impl BufRead) -> crate::Result<Vec<ServerEntry>> {
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|err| ErrorKind::Io.with(err))?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(ServerEntry::parse(&line)?)
    }
    Ok(entries)
}

/// Consistent-hashing ring, sorted ascending by placement digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring {
    nodes: Vec<Node>,
    server_count: usize,
}

impl Ring {
    pub fn load(config: &Config) -> crate::Result<Self> {
        let path = &config.servers_list;
        let file = File::open(path)
            .map_err(|err| ErrorKind::Io.with(format!("{}: {err}", path.display())))?;
        Self::build(parse_servers(BufReader::new(file))?)
    }

    pub fn build(entries: impl IntoIterator<Item = ServerEntry>) -> crate::Result<Self> {
        let mut nodes = Vec::new();
        for entry in entries {
            for replica_id in 1..=entry.replicas {
                nodes.push(Node::new(&entry.ip, entry.port, replica_id)?)
            }
        }
        Self::from_nodes(nodes)
    }

    /// Ring holding exactly one node, e.g. the target of a dump.
    pub fn single(node: Node) -> Self {
        Self {
            nodes: vec![node],
            server_count: 1,
        }
    }

    fn from_nodes(mut nodes: Vec<Node>) -> crate::Result<Self> {
        nodes.sort_by_key(|node| node.placement);
        let mut servers = HashTable::new(nodes.len().max(1))?;
        for node in &nodes {
            servers.insert(&node.server_key(), ())?
        }
        debug!(nodes = nodes.len(), servers = servers.len(), "ring built");
        Ok(Self {
            server_count: servers.len(),
            nodes,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of distinct physical servers (`ip:port`).
    pub fn server_count(&self) -> usize {
        self.server_count
    }

    /// Ring member whose transport address equals `addr`.
    pub fn position_of(&self, addr: SocketAddr) -> Option<&Node> {
        self.nodes.iter().find(|node| node.addr == addr)
    }

    /// The `n` distinct servers responsible for `key`, in ring order.
    ///
    /// Scanning starts at the first node whose placement is >= the key's
    /// digest (index 0 if every placement is smaller) and walks forward with
    /// wraparound, skipping replicas of servers already picked.
    pub fn nodes_for_key(&self, n: usize, key: &str) -> crate::Result<Vec<Node>> {
        if n > self.server_count {
            return Err(ErrorKind::BadParameter.with(format!(
                "{n} servers wanted but the ring has {}",
                self.server_count
            )));
        }
        let target = digest(key);
        let mut index = self
            .nodes
            .iter()
            .position(|node| node.placement >= target)
            .unwrap_or(0);
        let mut seen = HashTable::new(n.max(1))?;
        let mut picked = Vec::with_capacity(n);
        while picked.len() < n {
            let node = &self.nodes[index];
            let server = node.server_key();
            if !seen.contains(&server) {
                seen.insert(&server, ())?;
                picked.push(node.clone())
            }
            index = (index + 1) % self.nodes.len()
        }
        Ok(picked)
    }
}
