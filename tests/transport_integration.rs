//! End-to-end transport integration tests.
//!
//! Covers the pipeline properties that only show up with real sockets:
//! echo round-trips, multi-message datagrams, registration ordering,
//! multi-channel dispatch, failure isolation, plugin filtering, and
//! shutdown behavior.

use std::sync::Arc;
use std::time::Duration;

use packetbus_core::{TransportConfig, TransportError, TransportEvent};
use packetbus_transport::{UdpChannel, Worker};

use packetbus_integration_tests::{
    CountingMonitor, EchoHandler, LineCodec, PrefixFilter, recv_datagram, wait_until,
};

fn test_config() -> TransportConfig {
    let mut config = TransportConfig::default();
    config.workers = 2;
    config.page_count = 2;
    config.slots_per_page = 64;
    config
}

#[tokio::test]
async fn test_echo_ping_pong() {
    let config = test_config();
    let server = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    let server_addr = server.local_addr();

    let handler = EchoHandler::shared();
    let worker = Worker::builder(config.clone(), LineCodec, Arc::clone(&handler))
        .start()
        .unwrap();
    worker.register(server).unwrap();

    let client = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    client.send_to(b"PING\n", server_addr).await.unwrap();

    let (reply, from) = recv_datagram(&client, Duration::from_secs(2)).await;
    assert_eq!(reply, b"PONG\n");
    assert_eq!(from, server_addr);
    assert_eq!(handler.processed(), 1);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_multiple_messages_in_one_datagram() {
    let config = test_config();
    let server = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    let server_addr = server.local_addr();

    let handler = EchoHandler::shared();
    let worker = Worker::builder(config.clone(), LineCodec, Arc::clone(&handler))
        .start()
        .unwrap();
    worker.register(server).unwrap();

    let client = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    client.send_to(b"alpha\nbeta\ngamma\n", server_addr).await.unwrap();

    // All three replies are flushed as one datagram
    let (reply, _) = recv_datagram(&client, Duration::from_secs(2)).await;
    assert_eq!(reply, b"alpha\nbeta\ngamma\n");
    assert_eq!(handler.processed(), 3);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_immediately_after_register() {
    let config = test_config();
    let server = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    let server_addr = server.local_addr();

    let handler = EchoHandler::shared();
    let worker = Worker::builder(config.clone(), LineCodec, Arc::clone(&handler))
        .start()
        .unwrap();

    // No sleeps or readiness games: a datagram sent the moment register
    // returns must be observed
    worker.register(server).unwrap();
    let client = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    client.send_to(b"PING\n", server_addr).await.unwrap();

    let (reply, _) = recv_datagram(&client, Duration::from_secs(2)).await;
    assert_eq!(reply, b"PONG\n");

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_two_channels_share_one_worker() {
    let config = test_config();
    let first = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    let second = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    let first_addr = first.local_addr();
    let second_addr = second.local_addr();

    let handler = EchoHandler::shared();
    let worker = Worker::builder(config.clone(), LineCodec, Arc::clone(&handler))
        .start()
        .unwrap();
    worker.register(first).unwrap();
    worker.register(second).unwrap();

    let client = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    client.send_to(b"one\n", first_addr).await.unwrap();
    let (reply, from) = recv_datagram(&client, Duration::from_secs(2)).await;
    assert_eq!(reply, b"one\n");
    assert_eq!(from, first_addr);

    client.send_to(b"two\n", second_addr).await.unwrap();
    let (reply, from) = recv_datagram(&client, Duration::from_secs(2)).await;
    assert_eq!(reply, b"two\n");
    assert_eq!(from, second_addr);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_decode_failure_does_not_poison_channel() {
    let config = test_config();
    let server = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    let server_addr = server.local_addr();

    let handler = EchoHandler::shared();
    let worker = Worker::builder(config.clone(), LineCodec, Arc::clone(&handler))
        .start()
        .unwrap();
    worker.register(server).unwrap();

    let client = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    // No trailing newline: undecodable as a self-contained datagram
    client.send_to(b"garbage-without-newline", server_addr).await.unwrap();
    client.send_to(b"PING\n", server_addr).await.unwrap();

    let (reply, _) = recv_datagram(&client, Duration::from_secs(2)).await;
    assert_eq!(reply, b"PONG\n");

    assert!(
        wait_until(Duration::from_secs(2), || {
            handler.event_count(TransportEvent::DecodeFailure) == 1
        })
        .await
    );
    assert_eq!(worker.stats().decode_failures(), 1);
    assert_eq!(handler.processed(), 1);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_plugin_filters_without_events() {
    let config = test_config();
    let server = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    let server_addr = server.local_addr();

    let handler = EchoHandler::shared();
    let filter = PrefixFilter::new("DROP");
    let worker = Worker::builder(config.clone(), LineCodec, Arc::clone(&handler))
        .plugin(filter.clone())
        .start()
        .unwrap();
    worker.register(server).unwrap();

    let client = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    client.send_to(b"DROP this\nkeep\n", server_addr).await.unwrap();

    let (reply, _) = recv_datagram(&client, Duration::from_secs(2)).await;
    assert_eq!(reply, b"keep\n");
    assert_eq!(handler.processed(), 1);
    assert_eq!(filter.dropped.load(std::sync::atomic::Ordering::Relaxed), 1);
    // A plugin drop is the plugin's contract, not a failure
    assert_eq!(handler.event_count(TransportEvent::DecodeFailure), 0);
    assert_eq!(handler.event_count(TransportEvent::ProcessFailure), 0);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_monitor_sees_every_datagram() {
    let config = test_config();
    let server = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    let server_addr = server.local_addr();

    let handler = EchoHandler::shared();
    let monitor = Arc::new(CountingMonitor::default());
    let worker = Worker::builder(config.clone(), LineCodec, Arc::clone(&handler))
        .monitor(monitor.clone())
        .start()
        .unwrap();
    worker.register(server).unwrap();

    let client = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    for _ in 0..5 {
        client.send_to(b"PING\n", server_addr).await.unwrap();
        let _ = recv_datagram(&client, Duration::from_secs(2)).await;
    }

    use std::sync::atomic::Ordering;
    assert_eq!(monitor.before.load(Ordering::Relaxed), 5);
    assert_eq!(monitor.after.load(Ordering::Relaxed), 5);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_then_register_fails() {
    let config = test_config();
    let handler = EchoHandler::shared();
    let worker = Worker::builder(config.clone(), LineCodec, handler)
        .start()
        .unwrap();

    worker.shutdown().await.unwrap();
    worker.shutdown().await.unwrap();
    assert!(worker.is_closed());

    let channel = UdpChannel::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    assert!(matches!(
        worker.register(channel),
        Err(TransportError::Closed)
    ));
}
