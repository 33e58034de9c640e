use std::net::SocketAddr;

use clap::Parser;
use dynkv::{error::ErrorKind, node::parse_ip, Config, Server};
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Storage node of a dynkv ring.
#[derive(Debug, Parser)]
struct Cli {
    /// Address to listen on, asked for on stdin when omitted
    ip: Option<String>,
    port: Option<u16>,
    #[arg(long, default_value_t = 256)]
    buckets: usize,
}

async fn prompt() -> dynkv::Result<(String, u16)> {
    let mut out = stdout();
    out.write_all(b"IP port? ").await?;
    out.flush().await?;
    let mut line = String::new();
    BufReader::new(stdin()).read_line(&mut line).await?;
    let mut fields = line.split_whitespace();
    let (Some(ip), Some(port)) = (fields.next(), fields.next()) else {
        return Err(ErrorKind::BadParameter.with(format!("expected `IP port`, got {line:?}")));
    };
    let port = port
        .parse()
        .map_err(|err| ErrorKind::BadParameter.with(format!("port {port}: {err}")))?;
    Ok((ip.into(), port))
}

#[tokio::main]
async fn main() -> dynkv::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let (ip, port) = match (cli.ip, cli.port) {
        (Some(ip), Some(port)) => (ip, port),
        (None, None) => prompt().await?,
        _ => dynkv::bail!(ErrorKind::BadParameter),
    };
    let Some(parsed) = parse_ip(&ip) else {
        return Err(ErrorKind::BadAddress.with(format!("cannot resolve {ip}")));
    };
    if port == 0 {
        return Err(ErrorKind::BadParameter.with("port 0"));
    }
    let config = Config {
        table_buckets: cli.buckets,
        ..Default::default()
    };
    let server = Server::bind(&config, SocketAddr::from((parsed, port))).await?;
    tokio::select! {
        result = server.run() => result?,
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupted")
        }
    }
    Ok(())
}
