//! Low-level partition consumer against the mock broker

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{spawn_broker, spawn_dead_broker, topic_data, Behavior};
use trifecta::kafka::consumer::PartitionConsumer;
use trifecta::{Broker, ClientConfig, CorrelationSource, TopicAndPartition, TrifectaError};

fn client_config() -> Arc<ClientConfig> {
    ClientConfig::new("trifecta-test", Duration::from_secs(5))
}

async fn connect(tap: TopicAndPartition, seeds: &[Broker]) -> trifecta::Result<PartitionConsumer> {
    PartitionConsumer::connect(tap, seeds, client_config(), CorrelationSource::new()).await
}

#[tokio::test]
async fn fetch_returns_messages_with_watermarks() {
    let broker = spawn_broker(
        topic_data("events", &[&[("k0", "a"), ("k1", "b"), ("k2", "c")]]),
        Behavior::default(),
    )
    .await;

    let mut consumer = connect(
        TopicAndPartition::new("events", 0),
        &[Broker::new(broker.host(), broker.port())],
    )
    .await
    .expect("connect");

    let messages = consumer.fetch_one(1).await.expect("fetch");
    assert_eq!(messages.len(), 2);
    let first = &messages[0];
    assert_eq!(first.offset, 1);
    assert_eq!(first.next_offset, 2);
    assert_eq!(first.last_offset, 2); // high-water mark is 3
    assert_eq!(first.key, b"k1");
    assert_eq!(first.value, b"b");
    consumer.close().await;
}

#[tokio::test]
async fn offset_queries_cover_both_ends() {
    let broker = spawn_broker(
        topic_data("events", &[&[("", "a"), ("", "b"), ("", "c")]]),
        Behavior::default(),
    )
    .await;

    let mut consumer = connect(
        TopicAndPartition::new("events", 0),
        &[Broker::new(broker.host(), broker.port())],
    )
    .await
    .expect("connect");

    assert_eq!(consumer.get_first_offset().await.expect("first"), 0);
    assert_eq!(consumer.get_last_offset().await.expect("last"), 2);
    assert_eq!(
        consumer.get_latest_offsets().await.expect("latest"),
        vec![3]
    );
    assert_eq!(
        consumer
            .earliest_or_latest_offset(-1, trifecta::kafka::EARLIEST_TIME)
            .await
            .expect("earliest"),
        0
    );
    consumer.close().await;
}

#[tokio::test]
async fn leader_failover_walks_the_seed_list() {
    // B3 actually serves the partition
    let b3 = spawn_broker(
        topic_data("events", &[&[("", "x")]]),
        Behavior::default(),
    )
    .await;
    // B2 answers metadata and names B3 as leader
    let b2 = spawn_broker(
        topic_data("events", &[&[]]),
        Behavior {
            advertised_leader: Some((b3.host(), b3.port(), 0)),
            ..Behavior::default()
        },
    )
    .await;
    // B1 drops every connection
    let b1 = spawn_dead_broker().await;

    let seeds = vec![
        Broker::new(b1.ip().to_string(), b1.port()),
        Broker::new(b2.host(), b2.port()),
        Broker::new(b3.host(), b3.port()),
    ];
    let mut consumer = connect(TopicAndPartition::new("events", 0), &seeds)
        .await
        .expect("connect through failover");
    assert_eq!(consumer.leader().host, b3.host());
    assert_eq!(consumer.leader().port, b3.port());
    consumer.close().await;
}

#[tokio::test]
async fn all_seeds_unreachable_is_leader_unavailable() {
    let a = spawn_dead_broker().await;
    let b = spawn_dead_broker().await;
    let seeds = vec![
        Broker::new(a.ip().to_string(), a.port()),
        Broker::new(b.ip().to_string(), b.port()),
    ];
    let err = connect(TopicAndPartition::new("events", 0), &seeds)
        .await
        .expect_err("no leader");
    assert!(matches!(err, TrifectaError::LeaderUnavailable { .. }));
}

#[tokio::test]
async fn unknown_topic_is_leader_unavailable() {
    let broker = spawn_broker(topic_data("other", &[&[]]), Behavior::default()).await;
    let err = connect(
        TopicAndPartition::new("missing", 0),
        &[Broker::new(broker.host(), broker.port())],
    )
    .await
    .expect_err("no such topic");
    assert!(matches!(err, TrifectaError::LeaderUnavailable { .. }));
}

#[tokio::test]
async fn commit_and_fetch_round_trip() {
    let broker = spawn_broker(
        topic_data("events", &[&[("", "a"), ("", "b")]]),
        Behavior::default(),
    )
    .await;

    let mut consumer = connect(
        TopicAndPartition::new("events", 0),
        &[Broker::new(broker.host(), broker.port())],
    )
    .await
    .expect("connect");

    assert_eq!(consumer.fetch_offset("audit").await.expect("fetch"), Some(-1));
    consumer
        .commit_offsets("audit", 1, "checkpoint")
        .await
        .expect("commit");
    assert_eq!(consumer.fetch_offset("audit").await.expect("fetch"), Some(1));
    consumer.close().await;
}

#[tokio::test]
async fn commit_error_surfaces_and_leaves_state_unchanged() {
    let broker = spawn_broker(
        topic_data("events", &[&[("", "a")]]),
        Behavior {
            commit_error: Some(12), // offset metadata too large
            ..Behavior::default()
        },
    )
    .await;

    let mut consumer = connect(
        TopicAndPartition::new("events", 0),
        &[Broker::new(broker.host(), broker.port())],
    )
    .await
    .expect("connect");

    let err = consumer
        .commit_offsets("audit", 7, "")
        .await
        .expect_err("commit must fail");
    match err {
        TrifectaError::KafkaCode(code) => assert_eq!(code.0, 12),
        other => panic!("unexpected error: {other}"),
    }
    assert!(broker.state.lock().committed.is_empty());
    consumer.close().await;
}

#[tokio::test]
async fn fetch_error_maps_to_kafka_code() {
    let broker = spawn_broker(
        topic_data("events", &[&[("", "a")]]),
        Behavior {
            fetch_error: Some(1), // offset out of range
            ..Behavior::default()
        },
    )
    .await;

    let mut consumer = connect(
        TopicAndPartition::new("events", 0),
        &[Broker::new(broker.host(), broker.port())],
    )
    .await
    .expect("connect");

    let err = consumer.fetch_one(99).await.expect_err("fetch must fail");
    match err {
        TrifectaError::KafkaCode(code) => assert_eq!(code.0, 1),
        other => panic!("unexpected error: {other}"),
    }
    consumer.close().await;
}

#[tokio::test]
async fn publish_appends_and_reads_back() {
    let broker = spawn_broker(
        topic_data("events", &[&[("", "a")]]),
        Behavior::default(),
    )
    .await;

    let mut consumer = connect(
        TopicAndPartition::new("events", 0),
        &[Broker::new(broker.host(), broker.port())],
    )
    .await
    .expect("connect");

    let offset = consumer
        .publish(Some(b"id-1"), b"payload")
        .await
        .expect("publish");
    assert_eq!(offset, 1);

    let messages = consumer.fetch_one(1).await.expect("fetch");
    assert_eq!(messages[0].key, b"id-1");
    assert_eq!(messages[0].value, b"payload");
    consumer.close().await;
}

#[tokio::test]
async fn close_is_idempotent() {
    let broker = spawn_broker(topic_data("events", &[&[]]), Behavior::default()).await;
    let mut consumer = connect(
        TopicAndPartition::new("events", 0),
        &[Broker::new(broker.host(), broker.port())],
    )
    .await
    .expect("connect");
    consumer.close().await;
    consumer.close().await;
}
