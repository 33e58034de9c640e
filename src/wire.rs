//! Datagram encoding shared by client and server.
//!
//! | request         | bytes               | reply                              |
//! |-----------------|---------------------|------------------------------------|
//! | probe           | empty               | empty                              |
//! | dump            | single NUL          | dump stream, see [`encode_dump`]   |
//! | get `key`       | key, no NUL         | value, or a single NUL when absent |
//! | put `key value` | `key NUL value`     | empty on success, single NUL else  |
//!
//! There is no length prefix, framing relies on datagram boundaries.

use crate::error::ErrorKind;

pub const NUL: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    Probe,
    Dump,
    Get(String),
    Put(String, String),
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Probe => Vec::new(),
            Self::Dump => vec![NUL],
            Self::Get(key) => key.as_bytes().to_vec(),
            Self::Put(key, value) => {
                let mut buf = Vec::with_capacity(key.len() + 1 + value.len());
                buf.extend_from_slice(key.as_bytes());
                buf.push(NUL);
                buf.extend_from_slice(value.as_bytes());
                buf
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Self {
        match buf.iter().position(|&byte| byte == NUL) {
            None if buf.is_empty() => Self::Probe,
            None => Self::Get(String::from_utf8_lossy(buf).into_owned()),
            Some(_) if buf == [NUL] => Self::Dump,
            Some(split) => Self::Put(
                String::from_utf8_lossy(&buf[..split]).into_owned(),
                String::from_utf8_lossy(&buf[split + 1..]).into_owned(),
            ),
        }
    }
}

/// Cuts `field` at its first NUL or newline, neither may travel inside a
/// key or a value.
pub fn normalize_field(field: &str) -> &str {
    match field.find(|c| c == '\0' || c == '\n') {
        Some(end) => &field[..end],
        None => field,
    }
}

/// A GET reply carrying no value: empty, or the single NUL of an unset key.
pub fn is_absent(reply: &[u8]) -> bool {
    reply.is_empty() || reply == [NUL]
}

pub const DUMP_HEADER_LEN: usize = 4;

/// Splits a table snapshot into dump datagrams.
///
/// The first datagram starts with the big-endian pair count; after it every
/// pair is `key NUL value NUL`. A pair never straddles two datagrams, a new
/// one is started when the next pair would not fit into `max_datagram` bytes.
pub fn encode_dump(
    pairs: &[(String, String)],
    max_datagram: usize,
) -> crate::Result<Vec<Vec<u8>>> {
    let mut datagrams = Vec::new();
    let mut current = dump_header(pairs.len())?.to_vec();
    for (key, value) in pairs {
        let pair_len = key.len() + value.len() + 2;
        if current.len() + pair_len > max_datagram && !current.is_empty() {
            datagrams.push(std::mem::take(&mut current))
        }
        current.extend_from_slice(key.as_bytes());
        current.push(NUL);
        current.extend_from_slice(value.as_bytes());
        current.push(NUL)
    }
    if !current.is_empty() {
        datagrams.push(current)
    }
    Ok(datagrams)
}

/// Big-endian pair count opening a dump stream.
pub fn dump_header(count: usize) -> crate::Result<[u8; DUMP_HEADER_LEN]> {
    let count = u32::try_from(count).map_err(|_| {
        ErrorKind::BadParameter.with(format!("{count} pairs overflow the dump header"))
    })?;
    Ok(count.to_be_bytes())
}

pub fn dump_count(header: &[u8]) -> Option<usize> {
    let bytes = header.get(..DUMP_HEADER_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes) as usize)
}

/// Parses a reassembled dump buffer back into its pairs.
pub fn decode_dump(buf: &[u8]) -> crate::Result<Vec<(String, String)>> {
    let Some(expected) = dump_count(buf) else {
        return Err(ErrorKind::BadParameter.with("dump shorter than its header"));
    };
    let mut fields = buf[DUMP_HEADER_LEN..].split(|&byte| byte == NUL);
    let mut pairs = Vec::with_capacity(expected);
    while pairs.len() < expected {
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            return Err(ErrorKind::BadParameter.with(format!(
                "dump announced {expected} pairs but holds {}",
                pairs.len()
            )));
        };
        pairs.push((
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ))
    }
    Ok(pairs)
}
