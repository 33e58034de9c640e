use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use dynkv::{
    error::ErrorKind,
    node::parse_ip,
    wire::decode_dump,
    Client, Config, HashTable, Node, Quorum, Ring,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Client of a dynkv ring. Prints `OK ...` or `FAIL` on stdout.
#[derive(Debug, Parser)]
struct Cli {
    /// Server list, one `<ip> <port> <replicas>` line per server
    #[arg(long, global = true, default_value = "servers.txt")]
    servers: PathBuf,
    #[arg(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,
    /// Replicas contacted per operation
    #[arg(short, global = true, default_value_t = 3)]
    n: usize,
    /// Matching replies required by a read
    #[arg(short, global = true, default_value_t = 2)]
    r: usize,
    /// Acknowledgements required by a write
    #[arg(short, global = true, default_value_t = 2)]
    w: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Get {
        key: String,
    },
    Put {
        key: String,
        value: String,
    },
    /// Stores the concatenation of the values of all keys but the last one
    /// under the last one
    Cat {
        #[arg(required = true, num_args = 2..)]
        keys: Vec<String>,
    },
    /// Byte offset of the second value inside the first one, -1 if absent
    Find {
        haystack: String,
        needle: String,
    },
    /// Stores a slice of a value; a negative position counts from the end
    Substr {
        key: String,
        #[arg(allow_negative_numbers = true)]
        position: i64,
        length: usize,
        destination: String,
    },
    ListNodes,
    DumpNode {
        ip: String,
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(lines) => {
            for line in lines {
                println!("{line}")
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            warn!("{err:#}");
            println!("FAIL");
            ExitCode::FAILURE
        }
    }
}

fn config(cli: &Cli) -> Config {
    Config {
        servers_list: cli.servers.clone(),
        recv_timeout: Duration::from_millis(cli.timeout_ms),
        ..Default::default()
    }
}

fn client(cli: &Cli, quorum: Quorum) -> dynkv::Result<Client> {
    let config = config(cli);
    let ring = Ring::load(&config)?;
    Client::new(config, ring, quorum)
}

async fn run(cli: Cli) -> dynkv::Result<Vec<String>> {
    let quorum = Quorum {
        n: cli.n,
        r: cli.r,
        w: cli.w,
    };
    match &cli.command {
        Command::Get { key } => {
            let client = client(&cli, Quorum { w: 1, ..quorum })?;
            Ok(vec![format!("OK {}", client.get(key).await?)])
        }
        Command::Put { key, value } => {
            let client = client(&cli, Quorum { r: 1, ..quorum })?;
            client.put(key, value).await?;
            Ok(vec!["OK".into()])
        }
        Command::Cat { keys } => {
            let client = client(&cli, quorum)?;
            let Some((destination, sources)) = keys.split_last() else {
                dynkv::bail!(ErrorKind::BadParameter)
            };
            let mut joined = String::new();
            for key in sources {
                joined.push_str(&client.get(key).await?);
                if joined.len() > client.config.max_elem_size {
                    return Err(ErrorKind::BadParameter.with("concatenation too long"));
                }
            }
            client.put(destination, &joined).await?;
            Ok(vec!["OK".into()])
        }
        Command::Find { haystack, needle } => {
            let client = client(&cli, quorum)?;
            let haystack = client.get(haystack).await?;
            let needle = client.get(needle).await?;
            let index = haystack.find(&needle).map(|i| i as i64).unwrap_or(-1);
            Ok(vec![format!("OK {index}")])
        }
        Command::Substr {
            key,
            position,
            length,
            destination,
        } => {
            let client = client(&cli, quorum)?;
            let value = client.get(key).await?;
            let Some(slice) = substring(&value, *position, *length) else {
                return Err(ErrorKind::BadParameter.with(format!(
                    "slice {position}+{length} out of a {}-byte value",
                    value.len()
                )));
            };
            client.put(destination, slice).await?;
            Ok(vec!["OK".into()])
        }
        Command::ListNodes => {
            let client = client(&cli, Quorum { n: 1, r: 1, w: 1 })?;
            let mut status = HashTable::new(client.ring.len().max(1))?;
            client.list_nodes(&mut status).await?;
            let mut nodes = client.ring.nodes().to_vec();
            nodes.sort_by(Node::cmp_server_addr);
            nodes
                .iter()
                .map(|node| {
                    let Some(status) = status.lookup(&node.identity_key()) else {
                        dynkv::bail!("no status recorded for {}", node.server_key())
                    };
                    Ok(format!("{node} {status}"))
                })
                .collect()
        }
        Command::DumpNode { ip, port } => {
            if parse_ip(ip).is_none() || *port == 0 {
                return Err(ErrorKind::BadParameter.with(format!("invalid server {ip} {port}")));
            }
            let node = Node::new(ip, *port, 0)?;
            let client = Client::new(
                config(&cli),
                Ring::single(node.clone()),
                Quorum { n: 1, r: 1, w: 1 },
            )?;
            let dump = client.dump(&node).await?;
            Ok(decode_dump(&dump)?
                .into_iter()
                .map(|(key, value)| format!("{key} = {value}"))
                .collect())
        }
    }
}

/// `length` bytes of `value` starting at `position`, which counts from the
/// end when negative. `None` when the slice leaves the value or splits a
/// character.
fn substring(value: &str, position: i64, length: usize) -> Option<&str> {
    let start = if position >= 0 {
        let start = usize::try_from(position).ok()?;
        if start >= value.len() {
            return None;
        }
        start
    } else {
        let back = usize::try_from(position.unsigned_abs()).ok()?;
        if back > value.len() || length > back {
            return None;
        }
        value.len() - back
    };
    value.get(start..start.checked_add(length)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_bounds() {
        assert_eq!(substring("hello", 1, 3), Some("ell"));
        assert_eq!(substring("hello", -3, 2), Some("ll"));
        assert_eq!(substring("hello", -5, 5), Some("hello"));
        assert_eq!(substring("hello", 0, 0), Some(""));
        assert_eq!(substring("hello", 5, 0), None);
        assert_eq!(substring("hello", 3, 3), None);
        assert_eq!(substring("hello", -6, 1), None);
        assert_eq!(substring("hello", -2, 3), None);
    }

    #[test]
    fn cli_parses_quorum_flags() {
        let cli = Cli::parse_from(["dynkv", "-n", "2", "-r", "1", "get", "key"]);
        assert_eq!((cli.n, cli.r, cli.w), (2, 1, 2));
        assert!(matches!(cli.command, Command::Get { key } if key == "key"));

        let cli = Cli::parse_from(["dynkv", "substr", "k", "-2", "1", "d"]);
        assert!(matches!(cli.command, Command::Substr { position: -2, .. }));

        assert!(Cli::try_parse_from(["dynkv", "cat", "only"]).is_err());
    }
}
