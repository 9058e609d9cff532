//! Kafka wire codec for the pre-coordinator request family
//!
//! Covers Produce (0), Fetch (1), Offsets (2), Metadata (3),
//! OffsetCommit (8) and OffsetFetch (9), all at api_version 0. Requests
//! and responses are length-prefixed frames; all values are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TrifectaError};

pub const API_PRODUCE: i16 = 0;
pub const API_FETCH: i16 = 1;
pub const API_OFFSETS: i16 = 2;
pub const API_METADATA: i16 = 3;
pub const API_OFFSET_COMMIT: i16 = 8;
pub const API_OFFSET_FETCH: i16 = 9;

/// Message magic without a timestamp field
pub const MAGIC_V0: i8 = 0;
/// Message magic carrying a millisecond timestamp
pub const MAGIC_V1: i8 = 1;

const COMPRESSION_MASK: i8 = 0x07;

// ── primitive helpers ──

/// Writes a length-prefixed (i16) string.
pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i16(s.len() as i16);
    buf.put_slice(s.as_bytes());
}

/// Writes a nullable length-prefixed string; `None` encodes as -1.
pub fn put_nullable_string(buf: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => put_string(buf, s),
        None => buf.put_i16(-1),
    }
}

/// Writes a length-prefixed (i32) byte array; `None` encodes as -1.
pub fn put_bytes(buf: &mut BytesMut, data: Option<&[u8]>) {
    match data {
        Some(data) => {
            buf.put_i32(data.len() as i32);
            buf.put_slice(data);
        }
        None => buf.put_i32(-1),
    }
}

fn need(buf: &Bytes, n: usize, operation: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(TrifectaError::protocol(
            operation,
            format!("short read: need {n} bytes, have {}", buf.remaining()),
        ));
    }
    Ok(())
}

/// Reads a non-nullable length-prefixed string.
pub fn get_string(buf: &mut Bytes, operation: &str) -> Result<String> {
    match get_nullable_string(buf, operation)? {
        Some(s) => Ok(s),
        None => Err(TrifectaError::protocol(operation, "unexpected null string")),
    }
}

/// Reads a nullable length-prefixed string.
pub fn get_nullable_string(buf: &mut Bytes, operation: &str) -> Result<Option<String>> {
    need(buf, 2, operation)?;
    let len = buf.get_i16();
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(TrifectaError::protocol(
            operation,
            format!("invalid string length {len}"),
        ));
    }
    need(buf, len as usize, operation)?;
    let raw = buf.copy_to_bytes(len as usize);
    let s = std::str::from_utf8(&raw)
        .map_err(|_| TrifectaError::protocol(operation, "string is not valid UTF-8"))?;
    Ok(Some(s.to_string()))
}

/// Reads a nullable length-prefixed byte array.
pub fn get_bytes(buf: &mut Bytes, operation: &str) -> Result<Option<Vec<u8>>> {
    need(buf, 4, operation)?;
    let len = buf.get_i32();
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(TrifectaError::protocol(
            operation,
            format!("invalid bytes length {len}"),
        ));
    }
    need(buf, len as usize, operation)?;
    Ok(Some(buf.copy_to_bytes(len as usize).to_vec()))
}

fn get_array_len(buf: &mut Bytes, operation: &str) -> Result<usize> {
    need(buf, 4, operation)?;
    let len = buf.get_i32();
    if len < 0 {
        return Ok(0);
    }
    Ok(len as usize)
}

fn get_i32_array(buf: &mut Bytes, operation: &str) -> Result<Vec<i32>> {
    let len = get_array_len(buf, operation)?;
    need(buf, len * 4, operation)?;
    Ok((0..len).map(|_| buf.get_i32()).collect())
}

// ── framing ──

/// Builds a complete request frame: size, header and body.
pub fn frame_request(
    api_key: i16,
    api_version: i16,
    correlation_id: i32,
    client_id: &str,
    body: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + client_id.len() + 14);
    buf.put_i32(0); // placeholder for the frame size
    buf.put_i16(api_key);
    buf.put_i16(api_version);
    buf.put_i32(correlation_id);
    put_string(&mut buf, client_id);
    buf.put_slice(body);
    let frame_len = (buf.len() - 4) as i32;
    buf[0..4].copy_from_slice(&frame_len.to_be_bytes());
    buf.freeze()
}

// ── request bodies ──

/// TopicMetadataRequest body.
pub fn metadata_request(topics: &[&str]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_i32(topics.len() as i32);
    for topic in topics {
        put_string(&mut buf, topic);
    }
    buf
}

/// FetchRequest body; one entry per `(partition, offset, max_bytes)`.
pub fn fetch_request(
    topic: &str,
    entries: &[(i32, i64, i32)],
    max_wait_ms: i32,
    min_bytes: i32,
) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_i32(-1); // replica_id: ordinary consumer
    buf.put_i32(max_wait_ms);
    buf.put_i32(min_bytes);
    buf.put_i32(1); // one topic
    put_string(&mut buf, topic);
    buf.put_i32(entries.len() as i32);
    for (partition, offset, max_bytes) in entries {
        buf.put_i32(*partition);
        buf.put_i64(*offset);
        buf.put_i32(*max_bytes);
    }
    buf
}

/// OffsetRequest body for a single partition.
pub fn offsets_request(
    topic: &str,
    partition: i32,
    time: i64,
    max_offsets: i32,
    replica_id: i32,
) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_i32(replica_id);
    buf.put_i32(1);
    put_string(&mut buf, topic);
    buf.put_i32(1);
    buf.put_i32(partition);
    buf.put_i64(time);
    buf.put_i32(max_offsets);
    buf
}

/// OffsetCommitRequest body (v0, ZooKeeper-backed storage).
pub fn offset_commit_request(
    group: &str,
    topic: &str,
    entries: &[(i32, i64, Option<&str>)],
) -> BytesMut {
    let mut buf = BytesMut::new();
    put_string(&mut buf, group);
    buf.put_i32(1);
    put_string(&mut buf, topic);
    buf.put_i32(entries.len() as i32);
    for (partition, offset, metadata) in entries {
        buf.put_i32(*partition);
        buf.put_i64(*offset);
        put_nullable_string(&mut buf, *metadata);
    }
    buf
}

/// OffsetFetchRequest body (v0).
pub fn offset_fetch_request(group: &str, topic: &str, partitions: &[i32]) -> BytesMut {
    let mut buf = BytesMut::new();
    put_string(&mut buf, group);
    buf.put_i32(1);
    put_string(&mut buf, topic);
    buf.put_i32(partitions.len() as i32);
    for partition in partitions {
        buf.put_i32(*partition);
    }
    buf
}

/// ProduceRequest body for a single partition message set.
pub fn produce_request(
    topic: &str,
    partition: i32,
    message_set: &[u8],
    required_acks: i16,
    timeout_ms: i32,
) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_i16(required_acks);
    buf.put_i32(timeout_ms);
    buf.put_i32(1);
    put_string(&mut buf, topic);
    buf.put_i32(1);
    buf.put_i32(partition);
    buf.put_i32(message_set.len() as i32);
    buf.put_slice(message_set);
    buf
}

// ── message sets ──

/// Appends a single v0 message (offset, size, crc, magic, attributes,
/// key, value) to a message set under construction.
pub fn append_message_v0(buf: &mut BytesMut, offset: i64, key: Option<&[u8]>, value: &[u8]) {
    let mut message = BytesMut::new();
    message.put_i8(MAGIC_V0);
    message.put_i8(0); // attributes: no compression
    put_bytes(&mut message, key);
    put_bytes(&mut message, Some(value));

    buf.put_i64(offset);
    buf.put_i32((message.len() + 4) as i32);
    buf.put_u32(crc32(&message));
    buf.put_slice(&message);
}

/// One message decoded from a fetched message set.
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

/// Decodes a message set, skipping the truncated trailing message a
/// bounded fetch may produce.
pub fn parse_message_set(mut buf: Bytes) -> Result<Vec<WireMessage>> {
    const OP: &str = "message set";
    let mut messages = Vec::new();
    while buf.remaining() >= 12 {
        let offset = buf.get_i64();
        let size = buf.get_i32();
        if size < 0 {
            return Err(TrifectaError::protocol(OP, format!("invalid message size {size}")));
        }
        if buf.remaining() < size as usize {
            // truncated trailing message
            break;
        }
        let mut message = buf.copy_to_bytes(size as usize);
        need(&message, 6, OP)?;
        let _crc = message.get_u32();
        let magic = message.get_i8();
        let attributes = message.get_i8();
        if attributes & COMPRESSION_MASK != 0 {
            return Err(TrifectaError::protocol(
                OP,
                format!("compressed message sets are not supported (attributes {attributes:#x})"),
            ));
        }
        if magic >= MAGIC_V1 {
            need(&message, 8, OP)?;
            let _timestamp = message.get_i64();
        }
        let key = get_bytes(&mut message, OP)?;
        let value = get_bytes(&mut message, OP)?;
        messages.push(WireMessage { offset, key, value });
    }
    Ok(messages)
}

// ── response bodies ──

/// A broker as described by a metadata response.
#[derive(Debug, Clone)]
pub struct BrokerMetadata {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

/// One partition's metadata.
#[derive(Debug, Clone)]
pub struct PartitionMetadataWire {
    pub error_code: i16,
    pub partition: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

/// One topic's metadata.
#[derive(Debug, Clone)]
pub struct TopicMetadataWire {
    pub error_code: i16,
    pub topic: String,
    pub partitions: Vec<PartitionMetadataWire>,
}

/// A decoded TopicMetadataResponse.
#[derive(Debug, Clone)]
pub struct MetadataResponse {
    pub brokers: Vec<BrokerMetadata>,
    pub topics: Vec<TopicMetadataWire>,
}

pub fn parse_metadata_response(mut buf: Bytes) -> Result<MetadataResponse> {
    const OP: &str = "metadata response";
    let broker_count = get_array_len(&mut buf, OP)?;
    let mut brokers = Vec::with_capacity(broker_count);
    for _ in 0..broker_count {
        need(&buf, 4, OP)?;
        let node_id = buf.get_i32();
        let host = get_string(&mut buf, OP)?;
        need(&buf, 4, OP)?;
        let port = buf.get_i32();
        brokers.push(BrokerMetadata { node_id, host, port });
    }
    let topic_count = get_array_len(&mut buf, OP)?;
    let mut topics = Vec::with_capacity(topic_count);
    for _ in 0..topic_count {
        need(&buf, 2, OP)?;
        let error_code = buf.get_i16();
        let topic = get_string(&mut buf, OP)?;
        let partition_count = get_array_len(&mut buf, OP)?;
        let mut partitions = Vec::with_capacity(partition_count);
        for _ in 0..partition_count {
            need(&buf, 10, OP)?;
            let part_error = buf.get_i16();
            let partition = buf.get_i32();
            let leader = buf.get_i32();
            let replicas = get_i32_array(&mut buf, OP)?;
            let isr = get_i32_array(&mut buf, OP)?;
            partitions.push(PartitionMetadataWire {
                error_code: part_error,
                partition,
                leader,
                replicas,
                isr,
            });
        }
        topics.push(TopicMetadataWire {
            error_code,
            topic,
            partitions,
        });
    }
    Ok(MetadataResponse { brokers, topics })
}

/// One partition's slice of a fetch response.
#[derive(Debug, Clone)]
pub struct FetchedPartition {
    pub topic: String,
    pub partition: i32,
    pub error_code: i16,
    pub high_watermark: i64,
    pub messages: Vec<WireMessage>,
}

pub fn parse_fetch_response(mut buf: Bytes) -> Result<Vec<FetchedPartition>> {
    const OP: &str = "fetch response";
    let topic_count = get_array_len(&mut buf, OP)?;
    let mut partitions = Vec::new();
    for _ in 0..topic_count {
        let topic = get_string(&mut buf, OP)?;
        let partition_count = get_array_len(&mut buf, OP)?;
        for _ in 0..partition_count {
            need(&buf, 18, OP)?;
            let partition = buf.get_i32();
            let error_code = buf.get_i16();
            let high_watermark = buf.get_i64();
            let set_size = buf.get_i32();
            if set_size < 0 {
                return Err(TrifectaError::protocol(
                    OP,
                    format!("invalid message set size {set_size}"),
                ));
            }
            need(&buf, set_size as usize, OP)?;
            let message_set = buf.copy_to_bytes(set_size as usize);
            let messages = if error_code == 0 {
                parse_message_set(message_set)?
            } else {
                Vec::new()
            };
            partitions.push(FetchedPartition {
                topic: topic.clone(),
                partition,
                error_code,
                high_watermark,
                messages,
            });
        }
    }
    Ok(partitions)
}

/// One partition's slice of an offsets response.
#[derive(Debug, Clone)]
pub struct OffsetsPartition {
    pub topic: String,
    pub partition: i32,
    pub error_code: i16,
    pub offsets: Vec<i64>,
}

pub fn parse_offsets_response(mut buf: Bytes) -> Result<Vec<OffsetsPartition>> {
    const OP: &str = "offsets response";
    let topic_count = get_array_len(&mut buf, OP)?;
    let mut partitions = Vec::new();
    for _ in 0..topic_count {
        let topic = get_string(&mut buf, OP)?;
        let partition_count = get_array_len(&mut buf, OP)?;
        for _ in 0..partition_count {
            need(&buf, 6, OP)?;
            let partition = buf.get_i32();
            let error_code = buf.get_i16();
            let count = get_array_len(&mut buf, OP)?;
            need(&buf, count * 8, OP)?;
            let offsets = (0..count).map(|_| buf.get_i64()).collect();
            partitions.push(OffsetsPartition {
                topic: topic.clone(),
                partition,
                error_code,
                offsets,
            });
        }
    }
    Ok(partitions)
}

/// Per-partition status of an offset commit.
#[derive(Debug, Clone)]
pub struct CommitPartition {
    pub topic: String,
    pub partition: i32,
    pub error_code: i16,
}

pub fn parse_offset_commit_response(mut buf: Bytes) -> Result<Vec<CommitPartition>> {
    const OP: &str = "offset commit response";
    let topic_count = get_array_len(&mut buf, OP)?;
    let mut partitions = Vec::new();
    for _ in 0..topic_count {
        let topic = get_string(&mut buf, OP)?;
        let partition_count = get_array_len(&mut buf, OP)?;
        for _ in 0..partition_count {
            need(&buf, 6, OP)?;
            let partition = buf.get_i32();
            let error_code = buf.get_i16();
            partitions.push(CommitPartition {
                topic: topic.clone(),
                partition,
                error_code,
            });
        }
    }
    Ok(partitions)
}

/// Per-partition slice of an offset fetch response.
#[derive(Debug, Clone)]
pub struct OffsetFetchPartition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub metadata: Option<String>,
    pub error_code: i16,
}

pub fn parse_offset_fetch_response(mut buf: Bytes) -> Result<Vec<OffsetFetchPartition>> {
    const OP: &str = "offset fetch response";
    let topic_count = get_array_len(&mut buf, OP)?;
    let mut partitions = Vec::new();
    for _ in 0..topic_count {
        let topic = get_string(&mut buf, OP)?;
        let partition_count = get_array_len(&mut buf, OP)?;
        for _ in 0..partition_count {
            need(&buf, 12, OP)?;
            let partition = buf.get_i32();
            let offset = buf.get_i64();
            let metadata = get_nullable_string(&mut buf, OP)?;
            need(&buf, 2, OP)?;
            let error_code = buf.get_i16();
            partitions.push(OffsetFetchPartition {
                topic: topic.clone(),
                partition,
                offset,
                metadata,
                error_code,
            });
        }
    }
    Ok(partitions)
}

/// Per-partition status of a produce request.
#[derive(Debug, Clone)]
pub struct ProducePartition {
    pub topic: String,
    pub partition: i32,
    pub error_code: i16,
    pub base_offset: i64,
}

pub fn parse_produce_response(mut buf: Bytes) -> Result<Vec<ProducePartition>> {
    const OP: &str = "produce response";
    let topic_count = get_array_len(&mut buf, OP)?;
    let mut partitions = Vec::new();
    for _ in 0..topic_count {
        let topic = get_string(&mut buf, OP)?;
        let partition_count = get_array_len(&mut buf, OP)?;
        for _ in 0..partition_count {
            need(&buf, 14, OP)?;
            let partition = buf.get_i32();
            let error_code = buf.get_i16();
            let base_offset = buf.get_i64();
            partitions.push(ProducePartition {
                topic: topic.clone(),
                partition,
                error_code,
                base_offset,
            });
        }
    }
    Ok(partitions)
}

// ── CRC-32 (IEEE) over message payloads ──

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-32 (IEEE) as carried by v0/v1 messages.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for byte in data {
        let index = ((crc ^ *byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vectors() {
        assert_eq!(crc32(b""), 0x0000_0000);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn string_helpers_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "events");
        put_nullable_string(&mut buf, None);
        let mut bytes = buf.freeze();
        assert_eq!(get_string(&mut bytes, "test").unwrap(), "events");
        assert_eq!(get_nullable_string(&mut bytes, "test").unwrap(), None);
    }

    #[test]
    fn bytes_helper_round_trips_null_and_data() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, Some(b"payload"));
        put_bytes(&mut buf, None);
        let mut bytes = buf.freeze();
        assert_eq!(
            get_bytes(&mut bytes, "test").unwrap(),
            Some(b"payload".to_vec())
        );
        assert_eq!(get_bytes(&mut bytes, "test").unwrap(), None);
    }

    #[test]
    fn message_set_round_trips() {
        let mut buf = BytesMut::new();
        append_message_v0(&mut buf, 5, Some(b"k"), b"hello");
        append_message_v0(&mut buf, 6, None, b"world");
        let messages = parse_message_set(buf.freeze()).expect("parse");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].offset, 5);
        assert_eq!(messages[0].key.as_deref(), Some(b"k".as_slice()));
        assert_eq!(messages[0].value.as_deref(), Some(b"hello".as_slice()));
        assert_eq!(messages[1].offset, 6);
        assert_eq!(messages[1].key, None);
    }

    #[test]
    fn message_set_skips_truncated_tail() {
        let mut buf = BytesMut::new();
        append_message_v0(&mut buf, 0, None, b"whole");
        append_message_v0(&mut buf, 1, None, b"partial");
        let full = buf.freeze();
        let truncated = full.slice(0..full.len() - 3);
        let messages = parse_message_set(truncated).expect("parse");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].offset, 0);
    }

    #[test]
    fn compressed_message_set_is_rejected() {
        let mut message = BytesMut::new();
        message.put_i8(MAGIC_V0);
        message.put_i8(1); // gzip attribute
        put_bytes(&mut message, None);
        put_bytes(&mut message, Some(b"blob"));
        let mut buf = BytesMut::new();
        buf.put_i64(0);
        buf.put_i32((message.len() + 4) as i32);
        buf.put_u32(crc32(&message));
        buf.put_slice(&message);
        let err = parse_message_set(buf.freeze()).unwrap_err();
        assert!(err.to_string().contains("compressed"));
    }

    #[test]
    fn frame_carries_header_and_length() {
        let body = metadata_request(&["events"]);
        let frame = frame_request(API_METADATA, 0, 99, "trifecta", &body);
        let mut bytes = frame.clone();
        let len = bytes.get_i32();
        assert_eq!(len as usize, frame.len() - 4);
        assert_eq!(bytes.get_i16(), API_METADATA);
        assert_eq!(bytes.get_i16(), 0);
        assert_eq!(bytes.get_i32(), 99);
        assert_eq!(get_string(&mut bytes, "test").unwrap(), "trifecta");
    }
}
