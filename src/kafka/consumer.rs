//! The low-level partition consumer
//!
//! Bound to one `(topic, partition)` plus a seed-broker list at
//! construction. Leader discovery walks the seeds in input order; the
//! first broker that answers the metadata request decides the leader.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, warn};

use super::connection::BrokerConnection;
use super::wire;
use super::{
    Broker, ClientConfig, CorrelationSource, MessageData, PartitionMetadata, TopicAndPartition,
    DEFAULT_FETCH_SIZE, EARLIEST_TIME, LATEST_TIME,
};
use crate::error::{Result, TrifectaError};

const FETCH_MAX_WAIT_MS: i32 = 100;
const FETCH_MIN_BYTES: i32 = 1;
const PRODUCE_TIMEOUT_MS: i32 = 5000;

/// A low-level client for a single topic partition.
pub struct PartitionConsumer {
    tap: TopicAndPartition,
    leader: Broker,
    replicas: Vec<Broker>,
    conn: Option<BrokerConnection>,
    config: Arc<ClientConfig>,
    correlation: Arc<CorrelationSource>,
}

impl PartitionConsumer {
    /// Discovers the partition leader through the seed list and opens a
    /// persistent connection to it.
    ///
    /// Transport errors during discovery are swallowed and the next seed
    /// is tried; a seed that answers but names no leader fails with
    /// `LeaderUnavailable`.
    pub async fn connect(
        tap: TopicAndPartition,
        seeds: &[Broker],
        config: Arc<ClientConfig>,
        correlation: Arc<CorrelationSource>,
    ) -> Result<Self> {
        let metadata =
            Self::partition_metadata(&tap, seeds, &config, &correlation).await?;
        let leader = metadata.leader.ok_or_else(|| TrifectaError::LeaderUnavailable {
            topic: tap.topic.clone(),
            partition: tap.partition,
        })?;

        let conn = BrokerConnection::connect(&leader, config.socket_timeout).await?;
        debug!(topic = %tap.topic, partition = tap.partition, leader = %leader, "leader resolved");
        Ok(Self {
            tap,
            leader,
            replicas: metadata.replicas,
            conn: Some(conn),
            config,
            correlation,
        })
    }

    /// Issues a metadata request through the seed list and extracts the
    /// partition's entry. One metadata call serves both the leader pick
    /// and the replica details.
    pub async fn partition_metadata(
        tap: &TopicAndPartition,
        seeds: &[Broker],
        config: &ClientConfig,
        correlation: &CorrelationSource,
    ) -> Result<PartitionMetadata> {
        let response = Self::fetch_metadata(&tap.topic, seeds, config, correlation)
            .await
            .ok_or_else(|| TrifectaError::LeaderUnavailable {
                topic: tap.topic.clone(),
                partition: tap.partition,
            })?;

        let by_id = |id: i32| -> Option<Broker> {
            response
                .brokers
                .iter()
                .find(|b| b.node_id == id)
                .map(|b| Broker::with_id(b.host.clone(), b.port as u16, b.node_id))
        };

        let partition = response
            .topics
            .iter()
            .find(|t| t.topic == tap.topic)
            .and_then(|t| t.partitions.iter().find(|p| p.partition == tap.partition))
            .ok_or_else(|| TrifectaError::LeaderUnavailable {
                topic: tap.topic.clone(),
                partition: tap.partition,
            })?;

        Ok(PartitionMetadata {
            leader: if partition.leader >= 0 {
                by_id(partition.leader)
            } else {
                None
            },
            replicas: partition.replicas.iter().filter_map(|id| by_id(*id)).collect(),
            isr: partition.isr.iter().filter_map(|id| by_id(*id)).collect(),
            error_code: partition.error_code,
        })
    }

    /// Walks the seed brokers in input order; the first one to answer a
    /// metadata request without a transport error wins.
    async fn fetch_metadata(
        topic: &str,
        seeds: &[Broker],
        config: &ClientConfig,
        correlation: &CorrelationSource,
    ) -> Option<wire::MetadataResponse> {
        for seed in seeds {
            let mut conn = match BrokerConnection::connect(seed, config.socket_timeout).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(broker = %seed, error = %e, "seed broker unreachable");
                    continue;
                }
            };
            let body = wire::metadata_request(&[topic]);
            let response = match conn
                .send_request(
                    wire::API_METADATA,
                    0,
                    correlation.next(),
                    &config.client_id,
                    &body,
                )
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(broker = %seed, error = %e, "metadata request failed");
                    conn.shutdown().await;
                    continue;
                }
            };
            conn.shutdown().await;
            match wire::parse_metadata_response(response) {
                Ok(parsed) => return Some(parsed),
                Err(e) => {
                    warn!(broker = %seed, error = %e, "metadata response unreadable");
                    continue;
                }
            }
        }
        None
    }

    pub fn topic_and_partition(&self) -> &TopicAndPartition {
        &self.tap
    }

    pub fn leader(&self) -> &Broker {
        &self.leader
    }

    pub fn replicas(&self) -> &[Broker] {
        &self.replicas
    }

    fn conn(&mut self) -> Result<&mut BrokerConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| TrifectaError::internal("consumer already closed"))
    }

    async fn request(&mut self, api_key: i16, body: &BytesMut) -> Result<bytes::Bytes> {
        let correlation_id = self.correlation.next();
        let client_id = self.config.client_id.clone();
        self.conn()?
            .send_request(api_key, 0, correlation_id, &client_id, body)
            .await
    }

    /// Fetches messages at each requested offset.
    ///
    /// The returned sequence preserves server order. A wire-level error
    /// code fails with `KafkaCode`.
    pub async fn fetch(&mut self, offsets: &[i64], fetch_size: i32) -> Result<Vec<MessageData>> {
        let entries: Vec<(i32, i64, i32)> = offsets
            .iter()
            .map(|offset| (self.tap.partition, *offset, fetch_size))
            .collect();
        let body = wire::fetch_request(&self.tap.topic, &entries, FETCH_MAX_WAIT_MS, FETCH_MIN_BYTES);
        let response = self.request(wire::API_FETCH, &body).await?;
        let partitions = wire::parse_fetch_response(response)?;

        let mut messages = Vec::new();
        for part in partitions {
            if part.partition != self.tap.partition {
                continue;
            }
            if part.error_code != 0 {
                return Err(TrifectaError::kafka_code(part.error_code));
            }
            let last_offset = part.high_watermark - 1;
            for msg in part.messages {
                messages.push(MessageData {
                    partition: self.tap.partition,
                    offset: msg.offset,
                    next_offset: msg.offset + 1,
                    last_offset,
                    key: msg.key.unwrap_or_default(),
                    value: msg.value.unwrap_or_default(),
                });
            }
        }
        Ok(messages)
    }

    /// Convenience fetch of a single offset with the default fetch size.
    pub async fn fetch_one(&mut self, offset: i64) -> Result<Vec<MessageData>> {
        self.fetch(&[offset], DEFAULT_FETCH_SIZE).await
    }

    /// Returns the broker's offset list before the given time
    /// (`EARLIEST_TIME`/`LATEST_TIME` pseudo-times included).
    pub async fn get_offsets_before(&mut self, time_millis: i64) -> Result<Vec<i64>> {
        self.offsets_with_replica_id(time_millis, -1).await
    }

    /// Leader-side earliest-or-latest lookup issued on behalf of a
    /// consumer id.
    pub async fn earliest_or_latest_offset(
        &mut self,
        consumer_id: i32,
        time_millis: i64,
    ) -> Result<i64> {
        let offsets = self.offsets_with_replica_id(time_millis, consumer_id).await?;
        offsets
            .first()
            .copied()
            .ok_or_else(|| TrifectaError::protocol("offsets response", "empty offset list"))
    }

    async fn offsets_with_replica_id(
        &mut self,
        time_millis: i64,
        replica_id: i32,
    ) -> Result<Vec<i64>> {
        let body = wire::offsets_request(&self.tap.topic, self.tap.partition, time_millis, 1, replica_id);
        let response = self.request(wire::API_OFFSETS, &body).await?;
        let partitions = wire::parse_offsets_response(response)?;
        let part = partitions
            .into_iter()
            .find(|p| p.partition == self.tap.partition)
            .ok_or_else(|| {
                TrifectaError::protocol("offsets response", "partition missing from response")
            })?;
        if part.error_code != 0 {
            return Err(TrifectaError::kafka_code(part.error_code));
        }
        Ok(part.offsets)
    }

    /// The earliest available offset.
    pub async fn get_first_offset(&mut self) -> Result<i64> {
        let offsets = self.get_offsets_before(EARLIEST_TIME).await?;
        offsets
            .first()
            .copied()
            .ok_or_else(|| TrifectaError::protocol("offsets response", "empty offset list"))
    }

    /// The last consumable offset; -1 when the partition is empty.
    pub async fn get_last_offset(&mut self) -> Result<i64> {
        let offsets = self.get_offsets_before(LATEST_TIME).await?;
        let next = offsets
            .first()
            .copied()
            .ok_or_else(|| TrifectaError::protocol("offsets response", "empty offset list"))?;
        Ok(next - 1)
    }

    /// The raw latest-offset list as returned by the leader.
    pub async fn get_latest_offsets(&mut self) -> Result<Vec<i64>> {
        self.get_offsets_before(LATEST_TIME).await
    }

    /// Reads the committed offset for this partition under `group_id`.
    ///
    /// Returns the stored value verbatim, including the broker's `-1`
    /// sentinel for "nothing committed"; `None` means the group/topic is
    /// unknown to the broker.
    pub async fn fetch_offset(&mut self, group_id: &str) -> Result<Option<i64>> {
        let body = wire::offset_fetch_request(group_id, &self.tap.topic, &[self.tap.partition]);
        let response = self.request(wire::API_OFFSET_FETCH, &body).await?;
        let partitions = wire::parse_offset_fetch_response(response)?;
        let part = match partitions
            .into_iter()
            .find(|p| p.partition == self.tap.partition)
        {
            Some(part) => part,
            None => return Ok(None),
        };
        match part.error_code {
            0 => Ok(Some(part.offset)),
            3 => Ok(None), // unknown topic or partition: nothing stored
            code => Err(TrifectaError::kafka_code(code)),
        }
    }

    /// Commits an offset for this partition under `group_id`; a non-zero
    /// status in the response fails with `KafkaCode`.
    pub async fn commit_offsets(
        &mut self,
        group_id: &str,
        offset: i64,
        metadata: &str,
    ) -> Result<()> {
        let meta = if metadata.is_empty() {
            None
        } else {
            Some(metadata)
        };
        let body = wire::offset_commit_request(
            group_id,
            &self.tap.topic,
            &[(self.tap.partition, offset, meta)],
        );
        let response = self.request(wire::API_OFFSET_COMMIT, &body).await?;
        let partitions = wire::parse_offset_commit_response(response)?;
        for part in partitions {
            if part.partition == self.tap.partition && part.error_code != 0 {
                return Err(TrifectaError::kafka_code(part.error_code));
            }
        }
        Ok(())
    }

    /// Publishes one message to this partition (acks=1) and returns its
    /// assigned offset.
    pub async fn publish(&mut self, key: Option<&[u8]>, value: &[u8]) -> Result<i64> {
        let mut message_set = BytesMut::new();
        wire::append_message_v0(&mut message_set, 0, key, value);
        let body = wire::produce_request(
            &self.tap.topic,
            self.tap.partition,
            &message_set,
            1,
            PRODUCE_TIMEOUT_MS,
        );
        let response = self.request(wire::API_PRODUCE, &body).await?;
        let partitions = wire::parse_produce_response(response)?;
        let part = partitions
            .into_iter()
            .find(|p| p.partition == self.tap.partition)
            .ok_or_else(|| {
                TrifectaError::protocol("produce response", "partition missing from response")
            })?;
        if part.error_code != 0 {
            return Err(TrifectaError::kafka_code(part.error_code));
        }
        Ok(part.base_offset)
    }

    /// Closes the persistent connection. Idempotent; transport errors
    /// are swallowed.
    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.shutdown().await;
        }
    }
}
