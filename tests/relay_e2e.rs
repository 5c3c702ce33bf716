//! End-to-end tests: SOCKS5 client → local relay → server relay → target.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ssrelay::protocol::Address;
use ssrelay::server::ServerMetrics;
use ssrelay::{CipherKind, Config, Server};

const WAIT: Duration = Duration::from_secs(5);

fn loopback() -> Address {
    Address::Socket("127.0.0.1:0".parse().unwrap())
}

async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

struct Running {
    addr: SocketAddr,
    metrics: std::sync::Arc<ServerMetrics>,
    handle: JoinHandle<ssrelay::Result<()>>,
}

async fn start(config: Config, shutdown: &CancellationToken) -> Running {
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let metrics = server.metrics();
    let handle = tokio::spawn(server.run(shutdown.clone()));
    Running { addr, metrics, handle }
}

/// Start a server relay and a local relay pointed at it.
async fn start_pair(
    kind: CipherKind,
    server_password: &str,
    local_password: &str,
    shutdown: &CancellationToken,
) -> (Running, Running) {
    let server = start(Config::server(loopback(), kind, server_password), shutdown).await;
    let local = start(
        Config::local(loopback(), Address::Socket(server.addr), kind, local_password),
        shutdown,
    )
    .await;
    (server, local)
}

/// Open a SOCKS5 CONNECT to `target` through the local relay.
async fn socks_connect(local: SocketAddr, target: &Address) -> TcpStream {
    let mut stream = TcpStream::connect(local).await.unwrap();

    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00];
    request.extend_from_slice(&target.to_bytes().unwrap());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[..2], [0x05, 0x00]);
    stream
}

#[tokio::test]
async fn test_round_trip_through_both_relays() {
    let echo = spawn_echo().await;
    let shutdown = CancellationToken::new();

    for kind in CipherKind::ALL {
        let (server, local) = start_pair(kind, "e2e-password", "e2e-password", &shutdown).await;

        let mut client = socks_connect(local.addr, &Address::Socket(echo)).await;
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        // Either side closing ends the whole session, so read exactly what was sent
        let (mut r, mut w) = client.split();
        let write = async {
            w.write_all(&payload).await.unwrap();
        };
        let read = async {
            let mut echoed = vec![0u8; payload.len()];
            r.read_exact(&mut echoed).await.unwrap();
            echoed
        };
        let (_, echoed) = tokio::time::timeout(WAIT, async { tokio::join!(write, read) })
            .await
            .unwrap();
        assert_eq!(echoed, payload, "{}", kind);

        drop(client);
        drop(server);
        drop(local);
    }

    shutdown.cancel();
}

#[tokio::test]
async fn test_domain_target_is_resolved_by_server() {
    let echo = spawn_echo().await;
    let shutdown = CancellationToken::new();
    let (_server, local) = start_pair(CipherKind::ChaCha20Poly1305, "pw", "pw", &shutdown).await;

    let target = Address::Domain("localhost".into(), echo.port());
    let mut client = socks_connect(local.addr, &target).await;

    client.write_all(b"hello by name").await.unwrap();
    let mut echoed = [0u8; 13];
    tokio::time::timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"hello by name");

    shutdown.cancel();
}

#[tokio::test]
async fn test_password_mismatch_closes_connection() {
    let echo = spawn_echo().await;
    let shutdown = CancellationToken::new();
    let (server, local) = start_pair(CipherKind::Aes256Gcm, "right", "wrong", &shutdown).await;

    let mut client = socks_connect(local.addr, &Address::Socket(echo)).await;
    client.write_all(b"never arrives").await.unwrap();

    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(WAIT, client.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.metrics.snapshot().protocol_errors, 1);

    shutdown.cancel();
    local.handle.await.unwrap().unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_sessions() {
    let echo = spawn_echo().await;
    let shutdown = CancellationToken::new();
    let (server, local) = start_pair(CipherKind::ChaCha20Poly1305, "pw", "pw", &shutdown).await;

    let mut client = socks_connect(local.addr, &Address::Socket(echo)).await;
    client.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(local.metrics.active_sessions(), 1);

    shutdown.cancel();
    tokio::time::timeout(WAIT, local.handle).await.unwrap().unwrap().unwrap();
    tokio::time::timeout(WAIT, server.handle).await.unwrap().unwrap().unwrap();

    assert_eq!(local.metrics.active_sessions(), 0);
    let mut buf = [0u8; 8];
    let n = client.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_socks_bind_command_rejected() {
    let shutdown = CancellationToken::new();
    let (_server, local) = start_pair(CipherKind::ChaCha20Poly1305, "pw", "pw", &shutdown).await;

    let mut stream = TcpStream::connect(local.addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();

    stream
        .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x1f, 0x90])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x07);

    shutdown.cancel();
}
