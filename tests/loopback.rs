use std::{net::SocketAddr, time::Duration};

use dynkv::{
    error::{kind, ErrorKind},
    wire::decode_dump,
    Client, Config, HashTable, Quorum, Ring, Server, ServerEntry, Status,
};
use tokio::{net::UdpSocket, spawn};

fn config() -> Config {
    Config {
        recv_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

/// Replica that answers every request with `reply`, or stays silent.
async fn scripted(reply: Option<&'static [u8]>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    spawn(async move {
        let mut buf = vec![0; 65536];
        loop {
            let (_, remote) = socket.recv_from(&mut buf).await.unwrap();
            if let Some(reply) = reply {
                socket.send_to(reply, remote).await.unwrap();
            }
        }
    });
    addr
}

/// Replica that answers every request with the same burst of datagrams.
async fn scripted_stream(datagrams: Vec<Vec<u8>>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    spawn(async move {
        let mut buf = vec![0; 65536];
        loop {
            let (_, remote) = socket.recv_from(&mut buf).await.unwrap();
            for datagram in &datagrams {
                socket.send_to(datagram, remote).await.unwrap();
            }
        }
    });
    addr
}

async fn serve(config: &Config) -> SocketAddr {
    let server = Server::bind(config, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    spawn(server.run());
    addr
}

fn ring(addrs: &[SocketAddr], replicas: usize) -> Ring {
    Ring::build(
        addrs
            .iter()
            .map(|addr| ServerEntry::new(addr.ip().to_string(), addr.port(), replicas))
            .collect::<Vec<_>>(),
    )
    .unwrap()
}

async fn scripted_ring(replies: [Option<&'static [u8]>; 3]) -> Ring {
    let mut addrs = Vec::new();
    for reply in replies {
        addrs.push(scripted(reply).await)
    }
    ring(&addrs, 1)
}

#[tokio::test]
async fn get_majority_value() {
    let ring = scripted_ring([Some(b"x"), Some(b"x"), Some(b"y")]).await;
    let client = Client::new(config(), ring, Quorum { n: 3, r: 2, w: 1 }).unwrap();
    assert_eq!(client.get("key").await.unwrap(), "x");
}

#[tokio::test]
async fn get_without_agreement() {
    let ring = scripted_ring([Some(b"x"), Some(b"y"), Some(b"z")]).await;
    let client = Client::new(config(), ring, Quorum { n: 3, r: 2, w: 1 }).unwrap();
    let err = client.get("key").await.unwrap_err();
    assert_eq!(kind(&err), Some(ErrorKind::Network));
}

#[tokio::test]
async fn get_with_silent_replica() {
    let ring = scripted_ring([Some(b"x"), None, Some(b"x")]).await;
    let client = Client::new(config(), ring, Quorum { n: 3, r: 2, w: 1 }).unwrap();
    assert_eq!(client.get("key").await.unwrap(), "x");
}

#[tokio::test]
async fn single_replica_takes_first_reply() {
    let addrs = [scripted(Some(b"a")).await, scripted(Some(b"b")).await];
    let ring = ring(&addrs, 2);
    let placed = ring.nodes_for_key(1, "key").unwrap()[0].addr;
    let expected = if placed == addrs[0] { "a" } else { "b" };
    // R is forced down to 1
    let client = Client::new(config(), ring, Quorum { n: 1, r: 2, w: 2 }).unwrap();
    assert_eq!(client.get("key").await.unwrap(), expected);
}

#[tokio::test]
async fn put_write_quorum() {
    let ring = scripted_ring([Some(b""), Some(b""), Some(b"\0")]).await;
    let client = Client::new(config(), ring, Quorum { n: 3, r: 1, w: 2 }).unwrap();
    client.put("key", "value").await.unwrap();

    let ring = scripted_ring([Some(b""), Some(b"\0"), None]).await;
    let client = Client::new(config(), ring, Quorum { n: 3, r: 1, w: 2 }).unwrap();
    let err = client.put("key", "value").await.unwrap_err();
    assert_eq!(kind(&err), Some(ErrorKind::Network));
}

#[tokio::test]
async fn probe_marks_silent_server() {
    let live = [scripted(Some(b"")).await, scripted(Some(b"")).await];
    let dead = scripted(None).await;
    let ring = ring(&[live[0], live[1], dead], 2);
    let client = Client::new(config(), ring, Quorum { n: 1, r: 1, w: 1 }).unwrap();
    let mut status = HashTable::new(8).unwrap();
    client.list_nodes(&mut status).await.unwrap();
    assert_eq!(status.len(), 3);
    for node in client.ring.nodes() {
        let expected = if node.addr == dead {
            Status::Fail
        } else {
            Status::Ok
        };
        assert_eq!(status.lookup(&node.identity_key()), Some(expected));
    }
}

#[tokio::test]
async fn dump_reassembly() {
    // small datagrams spread the dump over several of them
    let server_config = Config {
        max_datagram_size: 8,
        ..config()
    };
    let addr = serve(&server_config).await;
    let ring = ring(&[addr], 1);
    let node = ring.nodes()[0].clone();
    let client = Client::new(config(), ring, Quorum { n: 1, r: 1, w: 1 }).unwrap();

    assert_eq!(client.dump(&node).await.unwrap(), [0, 0, 0, 0]);

    for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
        client.put(key, value).await.unwrap()
    }
    let mut pairs = decode_dump(&client.dump(&node).await.unwrap()).unwrap();
    pairs.sort();
    assert_eq!(
        pairs,
        [("a", "1"), ("b", "2"), ("c", "3")].map(|(k, v)| (k.to_string(), v.to_string()))
    );
}

#[tokio::test]
async fn replicated_put_get() {
    let config = config();
    let addrs = [
        serve(&config).await,
        serve(&config).await,
        serve(&config).await,
    ];
    let client = Client::new(config, ring(&addrs, 2), Quorum::default()).unwrap();

    let err = client.get("missing").await.unwrap_err();
    assert_eq!(kind(&err), Some(ErrorKind::NotFound));

    client.put("key", "value").await.unwrap();
    assert_eq!(client.get("key").await.unwrap(), "value");
    client.put("key", "other\nignored").await.unwrap();
    assert_eq!(client.get("key").await.unwrap(), "other");
}

async fn dump_from(datagrams: Vec<Vec<u8>>) -> dynkv::Result<Vec<u8>> {
    let ring = ring(&[scripted_stream(datagrams).await], 1);
    let node = ring.nodes()[0].clone();
    let client = Client::new(config(), ring, Quorum { n: 1, r: 1, w: 1 }).unwrap();
    client.dump(&node).await
}

#[tokio::test]
async fn dump_stream_cut_short() {
    // two pairs announced, only one ever arrives
    let err = dump_from(vec![b"\0\0\0\x02a\x001\0".to_vec()])
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some(ErrorKind::Network));

    let err = dump_from(vec![vec![0, 0]]).await.unwrap_err();
    assert_eq!(kind(&err), Some(ErrorKind::Network));

    let dump = dump_from(vec![b"\0\0\0\x02a\x001\0".to_vec(), b"b\x002\0".to_vec()])
        .await
        .unwrap();
    assert_eq!(decode_dump(&dump).unwrap().len(), 2);
}
