use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use burrow::crypto::Fernet;
use burrow::frame::Framing;
use burrow::socks5::{AUTH_REPLY, SUCCESS_REPLY};
use burrow::{server, session, SessionConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::oneshot;

fn session_config(key: &str, idle: Duration, framing: Framing) -> Arc<SessionConfig> {
    let cipher = Fernet::new(key).unwrap();
    Arc::new(SessionConfig::new(cipher).with_idle_timeout(idle).with_framing(framing))
}

/// Destination that echoes everything back, upper-cased. `seen` records what
/// it received in plaintext, `closed` gets one message per connection the
/// gateway released.
struct Destination {
    addr: SocketAddr,
    seen: UnboundedReceiver<Vec<u8>>,
    closed: UnboundedReceiver<()>,
}

async fn spawn_destination() -> Destination {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen) = unbounded_channel();
    let (closed_tx, closed) = unbounded_channel();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let seen_tx = seen_tx.clone();
            let closed_tx = closed_tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    let _ = seen_tx.send(buf[..n].to_vec());
                    if socket.write_all(&buf[..n].to_ascii_uppercase()).await.is_err() {
                        break;
                    }
                }
                let _ = closed_tx.send(());
            });
        }
    });

    Destination { addr, seen, closed }
}

/// Destination that streams `chunks` chunks of 100 bytes, one every `every`,
/// then closes, without reading anything.
async fn spawn_download(chunks: usize, every: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        for i in 0..chunks {
            socket.write_all(&[b'a' + (i % 26) as u8; 100]).await.unwrap();
            tokio::time::sleep(every).await;
        }
        socket.shutdown().await.unwrap();
    });

    addr
}

async fn spawn_gateway(config: Arc<SessionConfig>) -> SocketAddr {
    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, None, std::future::pending(), move |socket, peer| {
        session::handle_gateway(socket, peer, config.clone())
    }));
    addr
}

async fn spawn_client(config: Arc<SessionConfig>, gateway: SocketAddr) -> SocketAddr {
    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gateway: Arc<str> = gateway.to_string().into();
    tokio::spawn(server::serve(listener, None, std::future::pending(), move |socket, peer| {
        session::handle_client(socket, peer, config.clone(), gateway.clone())
    }));
    addr
}

/// Connect to the front door and run the SOCKS5 handshake for an IPv4 target.
async fn socks_connect(front_door: SocketAddr, target: SocketAddr) -> TcpStream {
    let SocketAddr::V4(target) = target else {
        panic!("ipv4 target expected");
    };
    let mut stream = TcpStream::connect(front_door).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, AUTH_REPLY);

    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&target.ip().octets());
    request.extend_from_slice(&target.port().to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, SUCCESS_REPLY);
    stream
}

async fn round_trip(stream: &mut TcpStream, msg: &[u8]) -> Vec<u8> {
    stream.write_all(msg).await.unwrap();
    let mut reply = vec![0u8; msg.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut reply))
        .await
        .expect("reply in time")
        .unwrap();
    reply
}

/// True once the peer has closed `stream` (EOF or reset).
async fn closed_within(stream: &mut TcpStream, within: Duration) -> bool {
    let mut buf = [0u8; 64];
    matches!(
        tokio::time::timeout(within, stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

#[tokio::test]
async fn end_to_end_relay() {
    for framing in [Framing::LengthPrefixed, Framing::Implicit] {
        let key = Fernet::generate_key();
        let Destination { addr: destination, mut seen, .. } = spawn_destination().await;
        let gateway = spawn_gateway(session_config(&key, Duration::from_secs(10), framing)).await;
        let front_door =
            spawn_client(session_config(&key, Duration::from_secs(10), framing), gateway).await;

        let mut stream = socks_connect(front_door, destination).await;
        if framing == Framing::Implicit {
            // implicit framing cannot split the destination token from a data
            // token sent right behind it
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(round_trip(&mut stream, b"GET / HTTP/1.0\r\n\r\n").await, b"GET / HTTP/1.0\r\n\r\n");
        assert_eq!(round_trip(&mut stream, b"hello tunnel").await, b"HELLO TUNNEL");

        // the destination saw the plaintext, in order
        let mut received = Vec::new();
        while received.len() < 30 {
            received.extend(seen.recv().await.unwrap());
        }
        assert_eq!(received, b"GET / HTTP/1.0\r\n\r\nhello tunnel");
    }
}

#[tokio::test]
async fn large_transfer_keeps_order() {
    let key = Fernet::generate_key();
    let destination = spawn_destination().await.addr;
    let gateway =
        spawn_gateway(session_config(&key, Duration::from_secs(10), Framing::LengthPrefixed)).await;
    let front_door = spawn_client(
        session_config(&key, Duration::from_secs(10), Framing::LengthPrefixed),
        gateway,
    )
    .await;

    let mut stream = socks_connect(front_door, destination).await;
    let payload: Vec<u8> = (0..200_000u32).map(|i| b'a' + (i % 26) as u8).collect();

    let (mut reader, mut writer) = stream.split();
    let send = async {
        writer.write_all(&payload).await.unwrap();
    };
    let recv = async {
        let mut echoed = vec![0u8; payload.len()];
        reader.read_exact(&mut echoed).await.unwrap();
        echoed
    };
    let (_, echoed) = tokio::time::timeout(Duration::from_secs(20), async { tokio::join!(send, recv) })
        .await
        .unwrap();
    assert_eq!(echoed, payload.to_ascii_uppercase());
}

#[tokio::test]
async fn mismatched_keys_drop_the_session() {
    let Destination { addr: destination, mut seen, .. } = spawn_destination().await;
    let gateway = spawn_gateway(session_config(
        &Fernet::generate_key(),
        Duration::from_secs(10),
        Framing::LengthPrefixed,
    ))
    .await;
    let front_door = spawn_client(
        session_config(&Fernet::generate_key(), Duration::from_secs(10), Framing::LengthPrefixed),
        gateway,
    )
    .await;

    let mut stream = socks_connect(front_door, destination).await;
    let _ = stream.write_all(b"anyone there?").await;
    assert!(closed_within(&mut stream, Duration::from_secs(5)).await);
    assert!(seen.try_recv().is_err());
}

#[tokio::test]
async fn unsupported_request_is_dropped_without_reply() {
    let key = Fernet::generate_key();
    let gateway =
        spawn_gateway(session_config(&key, Duration::from_secs(10), Framing::LengthPrefixed)).await;
    let front_door =
        spawn_client(session_config(&key, Duration::from_secs(10), Framing::LengthPrefixed), gateway)
            .await;

    // SOCKS4 greeting
    let mut stream = TcpStream::connect(front_door).await.unwrap();
    stream.write_all(&[0x04, 0x01, 0x00, 0x50, 127, 0, 0, 1, 0]).await.unwrap();
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
    assert!(buf.is_empty());

    // UDP ASSOCIATE
    let mut stream = TcpStream::connect(front_door).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    stream
        .write_all(&[0x05, 0x03, 0x00, 0x01, 127, 0, 0, 1, 0, 53])
        .await
        .unwrap();
    assert!(closed_within(&mut stream, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn idle_sessions_are_closed() {
    let key = Fernet::generate_key();
    let idle = Duration::from_millis(200);
    let mut destination = spawn_destination().await;
    let gateway = spawn_gateway(session_config(&key, idle, Framing::LengthPrefixed)).await;
    let front_door = spawn_client(session_config(&key, idle, Framing::LengthPrefixed), gateway).await;

    for _ in 0..20 {
        let mut stream = socks_connect(front_door, destination.addr).await;
        assert_eq!(round_trip(&mut stream, b"ping").await, b"PING");
        assert!(closed_within(&mut stream, Duration::from_secs(3)).await);
    }

    // the gateway released every destination socket as well
    for _ in 0..20 {
        tokio::time::timeout(Duration::from_secs(3), destination.closed.recv())
            .await
            .expect("destination socket closed")
            .unwrap();
    }
}

#[tokio::test]
async fn one_way_download_outlasts_the_idle_timeout() {
    let key = Fernet::generate_key();
    let idle = Duration::from_millis(300);
    // 40 chunks, 50 ms apart: about two seconds of download, nothing uploaded
    let destination = spawn_download(40, Duration::from_millis(50)).await;
    let gateway = spawn_gateway(session_config(&key, idle, Framing::LengthPrefixed)).await;
    let front_door = spawn_client(session_config(&key, idle, Framing::LengthPrefixed), gateway).await;

    let mut stream = socks_connect(front_door, destination).await;
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut received))
        .await
        .expect("download finished in time")
        .unwrap();
    assert_eq!(received.len(), 4000);
}

#[tokio::test]
async fn shutdown_drains_running_sessions() {
    let key = Fernet::generate_key();
    let destination = spawn_destination().await.addr;
    let gateway =
        spawn_gateway(session_config(&key, Duration::from_secs(10), Framing::LengthPrefixed)).await;

    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let front_door = listener.local_addr().unwrap();
    let config = session_config(&key, Duration::from_secs(10), Framing::LengthPrefixed);
    let gateway: Arc<str> = gateway.to_string().into();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(server::serve(
        listener,
        None,
        async move {
            let _ = stop_rx.await;
        },
        move |socket, peer| session::handle_client(socket, peer, config.clone(), gateway.clone()),
    ));

    let mut stream = socks_connect(front_door, destination).await;
    assert_eq!(round_trip(&mut stream, b"before").await, b"BEFORE");

    stop_tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // no new sessions, but serve has not returned while one is still relaying
    assert!(TcpStream::connect(front_door).await.is_err());
    assert!(!server.is_finished());
    assert_eq!(round_trip(&mut stream, b"after").await, b"AFTER");

    drop(stream);
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("serve returns once the last session closed")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn concurrent_sessions_are_isolated() {
    let key = Fernet::generate_key();
    let destination = spawn_destination().await.addr;
    let gateway =
        spawn_gateway(session_config(&key, Duration::from_secs(10), Framing::LengthPrefixed)).await;
    let front_door =
        spawn_client(session_config(&key, Duration::from_secs(10), Framing::LengthPrefixed), gateway)
            .await;

    let mut streams = Vec::new();
    for _ in 0..8 {
        streams.push(socks_connect(front_door, destination).await);
    }

    // close one session mid-flight
    let dropped = streams.remove(3);
    drop(dropped);

    let tasks: Vec<_> = streams
        .into_iter()
        .enumerate()
        .map(|(i, mut stream)| {
            tokio::spawn(async move {
                for round in 0..10 {
                    let msg = format!("session {i} round {round}");
                    let reply = round_trip(&mut stream, msg.as_bytes()).await;
                    assert_eq!(reply, msg.to_ascii_uppercase().as_bytes());
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
}
