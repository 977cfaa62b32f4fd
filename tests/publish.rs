//! Publish Client Integration Tests
//!
//! Failover across endpoints, bounded retries and request validation,
//! driven through an in-memory transport.

mod common;

use std::time::Duration;

use common::MockBackend;
use mailsieve::domain::{ResultRecord, Results};
use mailsieve::publish::{PublishClient, PublishConfig, PublishError};
use tokio_test::{assert_err, assert_ok};

fn config(hosts: &[&str], max_retry: u32) -> PublishConfig {
    PublishConfig {
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        shuffle_hosts: false,
        max_retry,
        reconnect_interval: 0.0,
        ..PublishConfig::default()
    }
}

fn record(name: &str) -> ResultRecord {
    let mut results = Results::new();
    results.insert("spamassassin".to_string(), serde_json::json!({"score": 1.5}));
    ResultRecord::new(name, results, false)
}

#[tokio::test]
async fn test_fails_over_to_reachable_host() {
    let backend = MockBackend::with_up(&["c"]);
    let mut client =
        PublishClient::with_connector(config(&["a", "b", "c"], 0), backend.connector()).unwrap();

    let sent = assert_ok!(client.publish("mails", &[record("/drop/1.eml")]).await);

    assert_eq!(sent, 1);
    assert_eq!(backend.attempts(), vec!["a", "b", "c"]);
    assert_eq!(client.current_endpoint().map(|e| e.host.as_str()), Some("c"));

    let delivered = backend.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "c");
    assert_eq!(delivered[0].1, "mails");
    assert!(delivered[0].2.contains("/drop/1.eml"));
}

#[tokio::test]
async fn test_connection_is_reused() {
    let backend = MockBackend::with_up(&["a"]);
    let mut client =
        PublishClient::with_connector(config(&["a"], 0), backend.connector()).unwrap();

    assert_ok!(client.publish("mails", &[record("one")]).await);
    assert_ok!(client.publish("mails", &[record("two")]).await);

    assert_eq!(backend.attempts().len(), 1);
    assert_eq!(backend.delivered().len(), 2);
}

#[tokio::test]
async fn test_push_failure_reconnects_to_next_host() {
    let backend = MockBackend::with_up(&["a", "b"]);
    let mut client =
        PublishClient::with_connector(config(&["a", "b"], 3), backend.connector()).unwrap();

    client.connect().await.unwrap();
    assert_eq!(client.current_endpoint().map(|e| e.host.as_str()), Some("a"));

    // "a" drops out mid-stream
    backend.set_up("a", false);
    let sent = assert_ok!(client.publish("mails", &[record("x")]).await);

    assert_eq!(sent, 1);
    assert_eq!(client.current_endpoint().map(|e| e.host.as_str()), Some("b"));

    // Delivered exactly once, on the surviving host
    let delivered = backend.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "b");
}

#[tokio::test]
async fn test_rotation_tries_failed_host_last() {
    let backend = MockBackend::with_up(&["a", "b", "c"]);
    let mut client =
        PublishClient::with_connector(config(&["a", "b", "c"], 2), backend.connector()).unwrap();

    client.connect().await.unwrap();
    backend.fail_next_pushes(1);

    assert_ok!(client.publish("mails", &[record("x")]).await);

    // Initial bind on "a", then the sweep starts after it
    assert_eq!(backend.attempts(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_max_retry_zero_fails_after_one_sweep() {
    let backend = MockBackend::default();
    let mut client =
        PublishClient::with_connector(config(&["a", "b"], 0), backend.connector()).unwrap();

    let err = assert_err!(client.publish("mails", &[record("x")]).await);

    assert!(matches!(err, PublishError::ConnectionFailed { attempts: 1, .. }));
    assert_eq!(backend.attempts(), vec!["a", "b"]);
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_outage_retries_are_bounded() {
    let backend = MockBackend::default();
    let mut options = config(&["a", "b"], 2);
    options.reconnect_interval = 10.0;
    let mut client = PublishClient::with_connector(options, backend.connector()).unwrap();

    let started = tokio::time::Instant::now();
    let err = assert_err!(client.publish("mails", &[record("x")]).await);

    assert!(matches!(err, PublishError::ConnectionFailed { attempts: 3, .. }));
    assert_eq!(backend.attempts().len(), 6);
    // Two waits between three sweeps
    assert!(started.elapsed() >= Duration::from_secs(20));
}

#[tokio::test]
async fn test_persistent_push_failures_are_bounded() {
    let backend = MockBackend::with_up(&["a"]);
    let mut client =
        PublishClient::with_connector(config(&["a"], 2), backend.connector()).unwrap();

    backend.fail_next_pushes(usize::MAX);
    let err = assert_err!(client.publish("mails", &[record("x")]).await);

    assert!(matches!(err, PublishError::ConnectionFailed { .. }));
    assert!(backend.delivered().is_empty());
    assert_eq!(backend.attempts().len(), 3);
}

#[tokio::test]
async fn test_empty_destination_is_invalid() {
    let backend = MockBackend::with_up(&["a"]);
    let mut client =
        PublishClient::with_connector(config(&["a"], 0), backend.connector()).unwrap();

    let err = assert_err!(client.publish("", &[record("x")]).await);
    assert!(matches!(err, PublishError::InvalidRequest(_)));

    let err = assert_err!(client.publish("  ", &[]).await);
    assert!(matches!(err, PublishError::InvalidRequest(_)));

    assert!(backend.attempts().is_empty());
}

#[tokio::test]
async fn test_empty_records_is_noop() {
    let backend = MockBackend::default();
    let mut client =
        PublishClient::with_connector(config(&["a"], 0), backend.connector()).unwrap();

    assert_eq!(assert_ok!(client.publish("mails", &[]).await), 0);
    assert!(backend.attempts().is_empty());
}

#[test]
fn test_scalar_hosts_rejected_at_construction() {
    let err = PublishClient::from_yaml("hosts: 1").err().expect("scalar hosts accepted");
    assert!(matches!(err, PublishError::Config(msg) if msg.contains("list")));

    let err = PublishClient::from_yaml("hosts: 127.0.0.1").err().expect("scalar hosts accepted");
    assert!(matches!(err, PublishError::Config(_)));
}

#[test]
fn test_oversized_intervals_rejected_at_construction() {
    for yaml in ["connect_timeout: 1.0e300", "reconnect_interval: 1.0e300"] {
        let err = PublishClient::from_yaml(yaml).err().expect("oversized interval accepted");
        assert!(matches!(err, PublishError::Config(_)), "{}", yaml);
    }

    let backend = MockBackend::default();
    let mut options = config(&["a"], 0);
    options.max_reconnect_interval = 1e300;
    let err = PublishClient::with_connector(options, backend.connector())
        .err()
        .expect("oversized interval accepted");
    assert!(matches!(err, PublishError::Config(_)));
}

#[tokio::test]
async fn test_unreachable_redis_fails_fast() {
    let options = PublishConfig::from_yaml(
        "hosts: ['127.0.0.1:1']\nmax_retry: 0\nconnect_timeout: 2\nshuffle_hosts: false\n",
    )
    .unwrap();
    let mut client = PublishClient::new(options).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), client.connect())
        .await
        .expect("connect should give up on its own");

    assert!(matches!(
        outcome,
        Err(PublishError::ConnectionFailed { attempts: 1, .. })
    ));
}
