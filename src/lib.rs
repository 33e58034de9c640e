pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod ring;
pub mod server;
pub mod table;
pub mod wire;

pub use anyhow::{anyhow as err, bail, Error, Result};

pub use crate::client::{Client, Status};
pub use crate::config::{Config, Quorum};
pub use crate::error::ErrorKind;
pub use crate::node::{Digest, Node};
pub use crate::ring::{Ring, ServerEntry};
pub use crate::server::Server;
pub use crate::table::HashTable;
