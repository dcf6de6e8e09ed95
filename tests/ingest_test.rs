//! End-to-end ingestion tests: real UDP datagrams through the full
//! socket -> framer -> decoder -> router -> worker pipeline.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::sleep;

use metricd::{Config, Diagnostics, Server};

async fn start_server() -> (Server, Diagnostics, UdpSocket) {
    let diagnostics = Diagnostics::new();
    let server = Server::start(&Config::test(), diagnostics.clone()).unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(server.local_addr()).await.unwrap();
    (server, diagnostics, client)
}

/// Datagram delivery is async; poll the routed-sample counter instead of
/// sleeping a fixed amount.
async fn wait_for_samples(diagnostics: &Diagnostics, expected: u64) {
    for _ in 0..200 {
        if diagnostics.snapshot().samples_routed >= expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for {} samples, got {:?}",
        expected,
        diagnostics.snapshot()
    );
}

#[tokio::test]
async fn test_udp_samples_aggregate_and_flush() {
    let (server, diagnostics, client) = start_server().await;

    client.send(b"requests:1|c").await.unwrap();
    client.send(b"requests:1|c").await.unwrap();
    client.send(b"cpu:0.75|g").await.unwrap();
    wait_for_samples(&diagnostics, 3).await;

    let mut points = server.flush(Duration::from_secs(1)).await;
    points.sort_by(|a, b| a.name.cmp(&b.name));

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].name, "cpu");
    assert_eq!(points[0].value, 0.75);
    assert_eq!(points[1].name, "requests");
    assert_eq!(points[1].value, 2.0);

    assert!(server.flush(Duration::from_secs(1)).await.is_empty());
}

#[tokio::test]
async fn test_multi_sample_datagram_is_framed() {
    let (server, diagnostics, client) = start_server().await;

    // several samples joined by newlines in one datagram, with the
    // spurious trailing newline statsd forbids
    client.send(b"a:1|c\nb:2|c\nc:3|c\n").await.unwrap();
    wait_for_samples(&diagnostics, 3).await;

    let points = server.flush(Duration::from_secs(1)).await;
    assert_eq!(points.len(), 3);

    let snap = diagnostics.snapshot();
    assert_eq!(snap.packets_read, 1);
    assert_eq!(snap.samples_routed, 3);
    assert_eq!(snap.empty_chunks, 1, "trailing newline must be rejected");
}

#[tokio::test]
async fn test_malformed_samples_do_not_stop_ingestion() {
    let (server, diagnostics, client) = start_server().await;

    client.send(b"good:1|c\ntotal garbage\nalso.good:1|c").await.unwrap();
    wait_for_samples(&diagnostics, 2).await;

    let points = server.flush(Duration::from_secs(1)).await;
    assert_eq!(points.len(), 2);
    assert_eq!(diagnostics.snapshot().parse_errors, 1);
}

#[tokio::test]
async fn test_same_metric_from_many_packets_reaches_one_accumulator() {
    let (server, diagnostics, client) = start_server().await;

    // more samples than fit one buffer's worth of batching, across many
    // datagrams; the router must land every one on the same shard
    for _ in 0..50 {
        client.send(b"hot.metric:1|c").await.unwrap();
    }
    wait_for_samples(&diagnostics, 50).await;

    let points = server.flush(Duration::from_secs(1)).await;
    assert_eq!(points.len(), 1, "one accumulator despite {} workers", server.num_workers());
    assert_eq!(points[0].value, 50.0);
}
