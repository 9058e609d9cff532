//! ZooKeeper view: typed key access and cluster topology readers
//!
//! The proxy owns the long-lived ZooKeeper handle; it is created at
//! shell start, reconnected on an explicit `zreconnect`, and closed at
//! shutdown. Topology readers translate the broker/topic/consumer
//! layouts under `/brokers` and `/consumers` into typed values.

use std::io::{Read, Write};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use zookeeper::{Acl, CreateMode, Stat, WatchedEvent, Watcher, ZkError, ZooKeeper};

use crate::error::{Result, TrifectaError};
use crate::kafka::{Broker, ConsumerOffset};

/// A broker's registration node under `/brokers/ids/<id>`.
#[derive(Debug, Deserialize)]
struct BrokerRegistration {
    host: String,
    port: u16,
}

/// A partition's state node under
/// `/brokers/topics/<topic>/partitions/<n>/state`.
#[derive(Debug, Deserialize)]
struct PartitionState {
    leader: i64,
    #[serde(default)]
    isr: Vec<i64>,
}

/// Watches session events for the long-lived handle.
struct SessionWatcher;

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        debug!(event = ?event, "zookeeper session event");
    }
}

/// The name Kafka uses for its internal offsets topic.
const CONSUMER_OFFSETS_TOPIC: &str = "__consumer_offsets";

/// An owning proxy over the ZooKeeper handle.
pub struct ZkProxy {
    connect_string: String,
    session_timeout: Duration,
    handle: RwLock<ZooKeeper>,
}

impl ZkProxy {
    /// Connects to the ensemble.
    pub fn connect(connect_string: &str, session_timeout: Duration) -> Result<Self> {
        let handle = ZooKeeper::connect(connect_string, session_timeout, SessionWatcher)
            .map_err(|e| zk_error(connect_string, e))?;
        Ok(Self {
            connect_string: connect_string.to_string(),
            session_timeout,
            handle: RwLock::new(handle),
        })
    }

    pub fn connect_string(&self) -> &str {
        &self.connect_string
    }

    /// Drops the current session and opens a fresh one.
    pub fn reconnect(&self) -> Result<()> {
        let fresh = ZooKeeper::connect(&self.connect_string, self.session_timeout, SessionWatcher)
            .map_err(|e| zk_error(&self.connect_string, e))?;
        let old = std::mem::replace(&mut *self.handle.write(), fresh);
        if let Err(e) = old.close() {
            warn!(error = ?e, "error closing previous zookeeper session");
        }
        Ok(())
    }

    /// The current session id.
    pub fn session_id(&self) -> i64 {
        self.handle.read().get_session_id()
    }

    /// Closes the handle; called once at shutdown.
    pub fn close(&self) {
        if let Err(e) = self.handle.read().close() {
            warn!(error = ?e, "error closing zookeeper session");
        }
    }

    // ── typed key access ──

    pub fn exists(&self, path: &str) -> Result<Option<Stat>> {
        self.handle
            .read()
            .exists(path, false)
            .map_err(|e| zk_error(path, e))
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        match self.handle.read().get_data(path, false) {
            Ok((data, _stat)) => Ok(data),
            Err(ZkError::NoNode) => Err(TrifectaError::ZkNotFound(path.to_string())),
            Err(e) => Err(zk_error(path, e)),
        }
    }

    /// Reads data together with the node's stat.
    pub fn read_with_stat(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        match self.handle.read().get_data(path, false) {
            Ok(pair) => Ok(pair),
            Err(ZkError::NoNode) => Err(TrifectaError::ZkNotFound(path.to_string())),
            Err(e) => Err(zk_error(path, e)),
        }
    }

    pub fn create(&self, path: &str, data: Vec<u8>) -> Result<()> {
        self.handle
            .read()
            .create(path, data, Acl::open_unsafe().clone(), CreateMode::Persistent)
            .map(|_| ())
            .map_err(|e| zk_error(path, e))
    }

    /// Creates every missing ancestor of `path` (but not the node itself).
    pub fn ensure_parents(&self, path: &str) -> Result<()> {
        let mut built = String::new();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() <= 1 {
            return Ok(());
        }
        for segment in &segments[..segments.len() - 1] {
            built.push('/');
            built.push_str(segment);
            match self.handle.read().create(
                &built,
                Vec::new(),
                Acl::open_unsafe().clone(),
                CreateMode::Persistent,
            ) {
                Ok(_) | Err(ZkError::NodeExists) => {}
                Err(e) => return Err(zk_error(&built, e)),
            }
        }
        Ok(())
    }

    /// Creates the node and any missing ancestors.
    pub fn ensure_path(&self, path: &str) -> Result<()> {
        self.ensure_parents(path)?;
        match self.handle.read().create(
            path,
            Vec::new(),
            Acl::open_unsafe().clone(),
            CreateMode::Persistent,
        ) {
            Ok(_) | Err(ZkError::NodeExists) => Ok(()),
            Err(e) => Err(zk_error(path, e)),
        }
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        match self.handle.read().delete(path, None) {
            Ok(()) => Ok(()),
            Err(ZkError::NoNode) => Err(TrifectaError::ZkNotFound(path.to_string())),
            Err(e) => Err(zk_error(path, e)),
        }
    }

    /// Deletes a subtree in post-order. Children that vanish mid-walk are
    /// tolerated; any other failure aborts with the offending path.
    pub fn delete_recursively(&self, path: &str) -> Result<()> {
        let children = match self.handle.read().get_children(path, false) {
            Ok(children) => children,
            Err(ZkError::NoNode) => return Ok(()),
            Err(e) => {
                return Err(TrifectaError::ZkDeleteFailed {
                    path: path.to_string(),
                    reason: format!("{e:?}"),
                })
            }
        };
        for child in children {
            self.delete_recursively(&join_path(path, &child))?;
        }
        match self.handle.read().delete(path, None) {
            Ok(()) | Err(ZkError::NoNode) => Ok(()),
            Err(e) => Err(TrifectaError::ZkDeleteFailed {
                path: path.to_string(),
                reason: format!("{e:?}"),
            }),
        }
    }

    pub fn get_children(&self, path: &str) -> Result<Vec<String>> {
        match self.handle.read().get_children(path, false) {
            Ok(mut children) => {
                children.sort();
                Ok(children)
            }
            Err(ZkError::NoNode) => Err(TrifectaError::ZkNotFound(path.to_string())),
            Err(e) => Err(zk_error(path, e)),
        }
    }

    /// Pre-order path enumeration rooted at `path`.
    pub fn tree(&self, path: &str) -> Result<Vec<String>> {
        let mut paths = vec![path.to_string()];
        let children = match self.handle.read().get_children(path, false) {
            Ok(children) => children,
            Err(ZkError::NoNode) => return Ok(paths),
            Err(e) => return Err(zk_error(path, e)),
        };
        for child in children {
            paths.extend(self.tree(&join_path(path, &child))?);
        }
        Ok(paths)
    }

    // ── topology readers ──

    /// Brokers registered under `/brokers/ids`.
    pub fn get_broker_list(&self) -> Result<Vec<Broker>> {
        let mut brokers = Vec::new();
        for id in self.get_children("/brokers/ids")? {
            let path = format!("/brokers/ids/{id}");
            let registration: BrokerRegistration = serde_json::from_slice(&self.read(&path)?)?;
            let node_id: i32 = id
                .parse()
                .map_err(|_| TrifectaError::protocol("broker registry", "non-numeric broker id"))?;
            brokers.push(Broker::with_id(registration.host, registration.port, node_id));
        }
        Ok(brokers)
    }

    /// Topic names under `/brokers/topics`, excluding the internal
    /// offsets topic.
    pub fn get_broker_topic_names(&self) -> Result<Vec<String>> {
        Ok(self
            .get_children("/brokers/topics")?
            .into_iter()
            .filter(|t| t != CONSUMER_OFFSETS_TOPIC)
            .collect())
    }

    /// Sorted partition ids of one topic.
    pub fn get_broker_topic_partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let path = format!("/brokers/topics/{topic}/partitions");
        let mut partitions: Vec<i32> = self
            .get_children(&path)?
            .into_iter()
            .filter_map(|p| p.parse().ok())
            .collect();
        partitions.sort_unstable();
        Ok(partitions)
    }

    /// Leader/replica details per partition, joining the topic's replica
    /// assignment and the partition state nodes with the broker
    /// registry.
    pub fn get_topic_details(&self, topic: &str) -> Result<Vec<crate::kafka::TopicDetails>> {
        let brokers = self.get_broker_list()?;
        let by_id = |id: i64| brokers.iter().find(|b| b.id == Some(id as i32)).cloned();
        let resolve = |ids: Option<&Value>| -> Vec<Broker> {
            ids.and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_i64)
                        .filter_map(|id| by_id(id))
                        .collect()
                })
                .unwrap_or_default()
        };

        // the topic node carries {"partitions": {"<id>": [replica ids]}}
        let assignment: Value = serde_json::from_slice(&self.read(&format!("/brokers/topics/{topic}"))?)?;

        let mut details = Vec::new();
        for partition in self.get_broker_topic_partitions(topic)? {
            let path = format!("/brokers/topics/{topic}/partitions/{partition}/state");
            let state: PartitionState = serde_json::from_slice(&self.read(&path)?)?;
            details.push(crate::kafka::TopicDetails {
                topic: topic.to_string(),
                partition_id: partition,
                leader: by_id(state.leader),
                replicas: resolve(assignment.pointer(&format!("/partitions/{partition}"))),
                isr: state.isr.iter().copied().filter_map(|id| by_id(id)).collect(),
            });
        }
        Ok(details)
    }

    /// Consumer group names under `/consumers`.
    pub fn get_consumer_groups(&self) -> Result<Vec<String>> {
        match self.get_children("/consumers") {
            Ok(groups) => Ok(groups),
            Err(TrifectaError::ZkNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Partition owners of one group; missing nodes yield an empty list.
    pub fn get_consumer_owners(&self, group_id: &str) -> Result<Vec<ConsumerOwner>> {
        let mut owners = Vec::new();
        let owners_path = format!("/consumers/{group_id}/owners");
        let topics = match self.get_children(&owners_path) {
            Ok(topics) => topics,
            Err(TrifectaError::ZkNotFound(_)) => return Ok(owners),
            Err(e) => return Err(e),
        };
        for topic in topics {
            let topic_path = format!("{owners_path}/{topic}");
            for partition in self.get_children(&topic_path).unwrap_or_default() {
                let path = format!("{topic_path}/{partition}");
                if let (Ok(data), Ok(partition)) = (self.read(&path), partition.parse::<i32>()) {
                    owners.push(ConsumerOwner {
                        group_id: group_id.to_string(),
                        topic: topic.clone(),
                        partition,
                        owner: String::from_utf8_lossy(&data).into_owned(),
                    });
                }
            }
        }
        Ok(owners)
    }

    /// Registered consumer threads of one group; missing nodes yield an
    /// empty list.
    pub fn get_consumer_threads(&self, group_id: &str) -> Result<Vec<ConsumerThread>> {
        let mut threads = Vec::new();
        let ids_path = format!("/consumers/{group_id}/ids");
        let ids = match self.get_children(&ids_path) {
            Ok(ids) => ids,
            Err(TrifectaError::ZkNotFound(_)) => return Ok(threads),
            Err(e) => return Err(e),
        };
        for consumer_id in ids {
            let path = format!("{ids_path}/{consumer_id}");
            let Ok(data) = self.read(&path) else { continue };
            let doc: Value = match serde_json::from_slice(&data) {
                Ok(doc) => doc,
                Err(_) => continue,
            };
            let topics = doc
                .get("subscription")
                .and_then(Value::as_object)
                .map(|sub| sub.keys().cloned().collect())
                .unwrap_or_default();
            threads.push(ConsumerThread {
                group_id: group_id.to_string(),
                consumer_id,
                topics,
                timestamp: doc
                    .get("timestamp")
                    .and_then(|t| match t {
                        Value::String(s) => s.parse().ok(),
                        Value::Number(n) => n.as_i64(),
                        _ => None,
                    }),
                version: doc.get("version").and_then(Value::as_i64),
            });
        }
        Ok(threads)
    }

    /// ZooKeeper-style committed offsets across all groups.
    pub fn get_consumer_details(&self) -> Result<Vec<ConsumerOffset>> {
        let mut details = Vec::new();
        for group in self.get_consumer_groups()? {
            let offsets_path = format!("/consumers/{group}/offsets");
            let topics = match self.get_children(&offsets_path) {
                Ok(topics) => topics,
                Err(TrifectaError::ZkNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            for topic in topics {
                let topic_path = format!("{offsets_path}/{topic}");
                for partition in self.get_children(&topic_path).unwrap_or_default() {
                    let path = format!("{topic_path}/{partition}");
                    let Ok((data, stat)) = self.read_with_stat(&path) else {
                        continue;
                    };
                    let Ok(partition) = partition.parse::<i32>() else {
                        continue;
                    };
                    let offset = String::from_utf8_lossy(&data).trim().parse().unwrap_or(-1);
                    details.push(ConsumerOffset {
                        group_id: group.clone(),
                        topic: topic.clone(),
                        partition,
                        offset,
                        last_modified_time: Some(stat.mtime),
                    });
                }
            }
        }
        Ok(details)
    }

    /// Offsets kept by Storm's partition manager under the configured
    /// root. Nodes that do not parse are skipped.
    pub fn get_consumers_for_storm(&self, storm_root: &str) -> Result<Vec<ConsumerOffset>> {
        let mut details = Vec::new();
        let spouts = match self.get_children(storm_root) {
            Ok(spouts) => spouts,
            Err(TrifectaError::ZkNotFound(_)) => return Ok(details),
            Err(e) => return Err(e),
        };
        for spout in spouts {
            let spout_path = join_path(storm_root, &spout);
            for node in self.get_children(&spout_path).unwrap_or_default() {
                let path = join_path(&spout_path, &node);
                let Ok((data, stat)) = self.read_with_stat(&path) else {
                    continue;
                };
                let Ok(doc) = serde_json::from_slice::<Value>(&data) else {
                    continue;
                };
                let (Some(topic), Some(partition), Some(offset)) = (
                    doc.get("topic").and_then(Value::as_str),
                    doc.get("partition").and_then(Value::as_i64),
                    doc.get("offset").and_then(Value::as_i64),
                ) else {
                    continue;
                };
                let group = doc
                    .pointer("/topology/name")
                    .and_then(Value::as_str)
                    .unwrap_or(&spout);
                details.push(ConsumerOffset {
                    group_id: group.to_string(),
                    topic: topic.to_string(),
                    partition: partition as i32,
                    offset,
                    last_modified_time: Some(stat.mtime),
                });
            }
        }
        Ok(details)
    }

    // ── server probes ──

    /// Issues a four-letter admin command (`ruok`, `stat`, ...) against
    /// the first host of the connect string.
    pub fn four_letter(&self, word: &str) -> Result<String> {
        let endpoint = first_endpoint(&self.connect_string);
        let mut stream = std::net::TcpStream::connect(&endpoint)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.set_write_timeout(Some(Duration::from_secs(5)))?;
        stream.write_all(word.as_bytes())?;
        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        Ok(response)
    }
}

/// The owner of one partition within a consumer group.
#[derive(Debug, Clone)]
pub struct ConsumerOwner {
    pub group_id: String,
    pub topic: String,
    pub partition: i32,
    pub owner: String,
}

/// One registered consumer thread.
#[derive(Debug, Clone)]
pub struct ConsumerThread {
    pub group_id: String,
    pub consumer_id: String,
    pub topics: Vec<String>,
    pub timestamp: Option<i64>,
    pub version: Option<i64>,
}

/// Resolves a relative key against the session's ZooKeeper working
/// directory. A leading `/` is absolute; `..` drops the last segment and
/// never climbs above `/`.
pub fn zk_key_to_path(cwd: &str, key: &str) -> String {
    if key.starts_with('/') {
        return key.to_string();
    }
    if key == ".." {
        return parent_path(cwd);
    }
    join_path(cwd, key)
}

/// The parent of a path; the root is its own parent.
pub fn parent_path(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Joins a child name under a parent with exactly one separator.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{}/{child}", parent.trim_end_matches('/'))
    }
}

fn first_endpoint(connect_string: &str) -> String {
    connect_string
        .split(',')
        .next()
        .unwrap_or(connect_string)
        .split('/')
        .next()
        .unwrap_or(connect_string)
        .to_string()
}

fn zk_error(path: &str, e: ZkError) -> TrifectaError {
    match e {
        ZkError::ConnectionLoss | ZkError::SessionExpired => TrifectaError::ZkConnectionLost,
        ZkError::OperationTimeout => TrifectaError::Timeout(0),
        ZkError::NoNode => TrifectaError::ZkNotFound(path.to_string()),
        other => TrifectaError::Zk(format!("{other:?} at {path}")),
    }
}
