//! End-to-end `select` execution against the mock broker

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{spawn_broker, topic_data, Behavior, MockBroker};
use tokio_util::sync::CancellationToken;
use trifecta::kql;
use trifecta::scan::{ScanEngine, StaticTopology, TopologySource};
use trifecta::{Broker, ClientConfig, CorrelationSource};

fn engine(broker: &MockBroker, partitions: Vec<i32>) -> ScanEngine {
    let topology: Arc<dyn TopologySource> = Arc::new(StaticTopology(partitions));
    ScanEngine::new(
        vec![Broker::new(broker.host(), broker.port())],
        topology,
        ClientConfig::new("trifecta-test", Duration::from_secs(5)),
        CorrelationSource::new(),
    )
}

#[tokio::test]
async fn select_filters_projects_and_orders() {
    let broker = spawn_broker(
        topic_data(
            "t",
            &[
                &[("k0", "a"), ("k1", "b"), ("k2", "c")],
                &[("k3", "b"), ("k4", "b")],
            ],
        ),
        Behavior::default(),
    )
    .await;

    let query = kql::parse("select partition,offset,key,value from t where value = 'b' limit 10")
        .expect("parse");
    let result = kql::execute(&engine(&broker, vec![0, 1]), &query, CancellationToken::new())
        .await
        .expect("execute");

    assert_eq!(result.labels, vec!["partition", "offset", "key", "value"]);
    assert_eq!(
        result.rows,
        vec![
            vec!["0", "1", "k1", "b"],
            vec!["1", "0", "k3", "b"],
            vec!["1", "1", "k4", "b"],
        ]
    );
    assert!(result.messages_read >= 5);
}

#[tokio::test]
async fn select_limit_truncates_after_partition_ordering() {
    let broker = spawn_broker(
        topic_data("t", &[&[("", "b"), ("", "b")], &[("", "b")]]),
        Behavior::default(),
    )
    .await;

    let query = kql::parse("select partition,offset from t where value = 'b' limit 2")
        .expect("parse");
    let result = kql::execute(&engine(&broker, vec![0, 1]), &query, CancellationToken::new())
        .await
        .expect("execute");

    assert_eq!(result.rows.len(), 2);
    // rows are sorted by partition before the limit applies
    assert!(result.rows[0][0] <= result.rows[1][0]);
}

#[tokio::test]
async fn select_over_json_documents() {
    let broker = spawn_broker(
        topic_data(
            "metrics",
            &[&[
                ("", r#"{"level": 1, "source": "a"}"#),
                ("", r#"{"level": 7, "source": "b"}"#),
                ("", r#"{"level": 9, "source": "c"}"#),
                ("", "not json"),
            ]],
        ),
        Behavior::default(),
    )
    .await;

    let query = kql::parse("select source,level from metrics where level >= 7").expect("parse");
    let result = kql::execute(&engine(&broker, vec![0]), &query, CancellationToken::new())
        .await
        .expect("execute");

    assert_eq!(
        result.rows,
        vec![vec!["b", "7"], vec!["c", "9"]]
    );
}

#[tokio::test]
async fn select_with_group_restriction_starts_at_the_commit() {
    let broker = spawn_broker(
        topic_data("t", &[&[("", "b"), ("", "b"), ("", "b")]]),
        Behavior::default(),
    )
    .await;
    broker
        .state
        .lock()
        .committed
        .insert(("audit".to_string(), "t".to_string(), 0), 2);

    let query =
        kql::parse("select offset from t where value = 'b' with group audit").expect("parse");
    let result = kql::execute(&engine(&broker, vec![0]), &query, CancellationToken::new())
        .await
        .expect("execute");

    assert_eq!(result.rows, vec![vec!["2"]]);
}
