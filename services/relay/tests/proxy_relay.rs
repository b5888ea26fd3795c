
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use harness::{eventually, spawn_proxy, Backend};
use liveline_relay::proxy::heartbeat_frame;
use liveline_relay::RelayPolicy;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn policy(idle_ms: u64, heartbeat_ms: Option<u64>) -> RelayPolicy {
    RelayPolicy {
        idle_timeout: Duration::from_millis(idle_ms),
        heartbeat_interval: heartbeat_ms.map(Duration::from_millis),
        ..RelayPolicy::default()
    }
}

/// Read until the peer closes, failing after `limit`.
async fn read_until_closed(stream: &mut TcpStream, limit: Duration) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    timeout(limit, async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
    })
    .await
    .expect("connection was not closed in time");
    received
}

#[tokio::test]
async fn relays_bytes_unchanged_in_both_directions() {
    let backend = Backend::echo().await.unwrap();
    let proxy = spawn_proxy(backend.addr, policy(5_000, None)).await.unwrap();

    let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i * 7 % 256) as u8).collect();
    let stream = TcpStream::connect(proxy.listen_addr).await.unwrap();
    let (mut read_half, mut write_half) = stream.into_split();

    let to_send = payload.clone();
    let writer = tokio::spawn(async move {
        write_half.write_all(&to_send).await.unwrap();
        write_half
    });

    let mut echoed = vec![0u8; payload.len()];
    timeout(Duration::from_secs(5), read_half.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, payload);

    drop(writer.await.unwrap());
    drop(read_half);

    let stats = proxy.handler().stats();
    assert!(
        eventually(Duration::from_secs(2), || {
            stats.sessions_relayed.load(Ordering::Relaxed) == 1
        })
        .await
    );
    assert_eq!(stats.bytes_to_server.load(Ordering::Relaxed), payload.len() as u64);
    assert_eq!(stats.bytes_to_client.load(Ordering::Relaxed), payload.len() as u64);
    assert_eq!(backend.connection_count(), 1);
    assert_eq!(
        backend.bytes_received.load(Ordering::Relaxed),
        payload.len() as u64
    );
}

#[tokio::test]
async fn unreachable_target_closes_client() {
    let dead_addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let proxy = spawn_proxy(dead_addr, policy(1_000, Some(100))).await.unwrap();

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    let received = read_until_closed(&mut client, Duration::from_secs(3)).await;

    assert!(received.is_empty(), "no heartbeat before the target connects");
    let stats = proxy.handler().stats();
    assert!(
        eventually(Duration::from_secs(1), || {
            stats.connect_failures.load(Ordering::Relaxed) == 1
        })
        .await
    );
    assert_eq!(stats.sessions_relayed.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn silent_connection_is_closed_after_idle_timeout() {
    let backend = Backend::silent().await.unwrap();
    let proxy = spawn_proxy(backend.addr, policy(300, None)).await.unwrap();

    let started = Instant::now();
    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    let received = read_until_closed(&mut client, Duration::from_secs(5)).await;

    assert!(received.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(300));

    let stats = proxy.handler().stats();
    assert!(
        eventually(Duration::from_secs(1), || {
            stats.idle_closes.load(Ordering::Relaxed) == 1
        })
        .await
    );
}

#[tokio::test]
async fn steady_client_traffic_keeps_connection_open() {
    let backend = Backend::echo().await.unwrap();
    let proxy = spawn_proxy(backend.addr, policy(400, None)).await.unwrap();
    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();

    // Well past the idle timeout in total, never idle for a full period.
    for round in 0..8u8 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.write_all(&[round; 4]).await.unwrap();
        let mut echoed = [0u8; 4];
        timeout(Duration::from_secs(1), client.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, [round; 4]);
    }

    assert_eq!(proxy.handler().stats().idle_closes.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn silent_target_produces_numbered_heartbeats() {
    let backend = Backend::scripted(vec![(Duration::from_millis(700), b"hello".to_vec())])
        .await
        .unwrap();
    let proxy = spawn_proxy(backend.addr, policy(5_000, Some(200))).await.unwrap();
    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    timeout(Duration::from_secs(3), async {
        while !received.ends_with(b"hello") {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed early");
            received.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .unwrap();

    // Consecutive frames counting from 1, then the data.
    let mut expected = Vec::new();
    let mut count = 0;
    while expected.len() + b"hello".len() < received.len() {
        count += 1;
        expected.extend_from_slice(&heartbeat_frame(count));
    }
    expected.extend_from_slice(b"hello");
    assert_eq!(received, expected);
    assert!(count >= 2, "expected at least two heartbeats, got {count}");

    // Silence again restarts the count.
    let frame = heartbeat_frame(1);
    let mut next = vec![0u8; frame.len()];
    timeout(Duration::from_secs(1), client.read_exact(&mut next))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next, frame);
}

#[tokio::test]
async fn connections_over_the_limit_are_dropped() {
    let backend = Backend::echo().await.unwrap();
    let proxy = harness::ServerHandle::spawn(
        liveline_relay::ProxyHandler::new(backend.addr, policy(5_000, None)),
        1,
    )
    .await
    .unwrap();

    let mut first = TcpStream::connect(proxy.listen_addr).await.unwrap();
    first.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    timeout(Duration::from_secs(1), first.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();

    let mut second = TcpStream::connect(proxy.listen_addr).await.unwrap();
    let received = read_until_closed(&mut second, Duration::from_secs(2)).await;
    assert!(received.is_empty());

    let stats = proxy.listener.stats();
    assert_eq!(stats.connections_rejected.load(Ordering::Relaxed), 1);
    assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn listener_shutdown_closes_active_relays() {
    let backend = Backend::echo().await.unwrap();
    let proxy = spawn_proxy(backend.addr, policy(60_000, None)).await.unwrap();

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();

    proxy.listener.shutdown();
    let received = read_until_closed(&mut client, Duration::from_secs(2)).await;
    assert!(received.is_empty());

    timeout(Duration::from_secs(2), proxy.listener.wait_idle())
        .await
        .unwrap();
}
