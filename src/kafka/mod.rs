//! Low-level Kafka client: wire codec, broker connections, and the
//! per-partition consumer.

pub mod connection;
pub mod consumer;
pub mod wire;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TrifectaError};

/// Pseudo-time selecting the earliest available offset
pub const EARLIEST_TIME: i64 = -2;

/// Pseudo-time selecting the next offset to be written
pub const LATEST_TIME: i64 = -1;

/// Default fetch size per partition request
pub const DEFAULT_FETCH_SIZE: i32 = 1024 * 1024;

/// A Kafka server endpoint.
///
/// Seed brokers are compared by `(host, port)`; the broker id is only
/// known once metadata has been received.
#[derive(Debug, Clone, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
    pub id: Option<i32>,
}

impl Broker {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            id: None,
        }
    }

    pub fn with_id(host: impl Into<String>, port: u16, id: i32) -> Self {
        Self {
            host: host.into(),
            port,
            id: Some(id),
        }
    }

    /// Parses a `host:port` endpoint.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| TrifectaError::Config(format!("'{endpoint}' is not host:port")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| TrifectaError::Config(format!("'{endpoint}' has an invalid port")))?;
        if host.is_empty() {
            return Err(TrifectaError::Config(format!("'{endpoint}' has no host")));
        }
        Ok(Self::new(host, port))
    }

    /// Parses a comma-separated seed list.
    pub fn parse_list(endpoints: &str) -> Result<Vec<Self>> {
        endpoints
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl PartialEq for Broker {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl std::hash::Hash for Broker {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl std::fmt::Display for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The canonical scan unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicAndPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicAndPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicAndPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// Transient partition metadata assembled from a metadata response.
#[derive(Debug, Clone)]
pub struct PartitionMetadata {
    pub leader: Option<Broker>,
    pub replicas: Vec<Broker>,
    pub isr: Vec<Broker>,
    pub error_code: i16,
}

/// One topic partition as shown by `kls`/`kstats`.
#[derive(Debug, Clone)]
pub struct TopicDetails {
    pub topic: String,
    pub partition_id: i32,
    pub leader: Option<Broker>,
    pub replicas: Vec<Broker>,
    pub isr: Vec<Broker>,
}

/// A fetched message.
///
/// `offset < next_offset <= last_offset + 1`; `last_offset` is the
/// high-water mark seen at fetch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    pub partition: i32,
    pub offset: i64,
    pub next_offset: i64,
    pub last_offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A consumer group's committed position for one partition.
#[derive(Debug, Clone)]
pub struct ConsumerOffset {
    pub group_id: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub last_modified_time: Option<i64>,
}

/// Shared client settings for broker connections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub socket_timeout: Duration,
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>, socket_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            client_id: client_id.into(),
            socket_timeout,
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "trifecta".to_string(),
            socket_timeout: Duration::from_millis(crate::config::DEFAULT_SOCKET_TIMEOUT_MS),
        }
    }
}

/// Process-wide correlation-id source.
///
/// Ids only need to be unique within a client session; a single shared
/// counter keeps them unique across the whole process.
#[derive(Debug, Default)]
pub struct CorrelationSource(AtomicI32);

impl CorrelationSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicI32::new(0)))
    }

    pub fn next(&self) -> i32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brokers_equal_by_host_and_port() {
        let seed = Broker::new("kafka1", 9092);
        let from_metadata = Broker::with_id("kafka1", 9092, 7);
        assert_eq!(seed, from_metadata);
    }

    #[test]
    fn broker_list_parsing() {
        let brokers = Broker::parse_list("a:9092, b:9093").expect("parse");
        assert_eq!(brokers.len(), 2);
        assert_eq!(brokers[1].host, "b");
        assert_eq!(brokers[1].port, 9093);
        assert!(Broker::parse("no-port").is_err());
        assert!(Broker::parse(":9092").is_err());
    }

    #[test]
    fn correlation_ids_are_monotone() {
        let source = CorrelationSource::new();
        let a = source.next();
        let b = source.next();
        assert!(b > a);
    }
}
