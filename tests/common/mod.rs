//! An in-process broker speaking the same wire subset as the client.
//!
//! Tests configure topic contents and fault behavior, then point
//! consumers and scan engines at the listener's address.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use trifecta::kafka::wire;

/// One stored message.
pub type StoredMessage = (Option<Vec<u8>>, Vec<u8>);

/// Mutable broker state shared with the test body.
#[derive(Default)]
pub struct BrokerState {
    /// topic → partitions → messages (offsets are dense from 0)
    pub topics: HashMap<String, Vec<Vec<StoredMessage>>>,
    /// (group, topic, partition) → committed offset
    pub committed: HashMap<(String, String, i32), i64>,
}

/// Fault injection and advertised-identity knobs.
#[derive(Clone)]
pub struct Behavior {
    /// This broker's node id in metadata responses
    pub node_id: i32,
    /// Advertise another endpoint as the partition leader
    pub advertised_leader: Option<(String, u16, i32)>,
    /// Fail every offset commit with this code
    pub commit_error: Option<i16>,
    /// Fail every fetch with this code
    pub fetch_error: Option<i16>,
    /// Offsets whose fetch returns an empty message set
    pub empty_fetch_offsets: Vec<(String, i32, i64)>,
    /// Cap on messages returned per fetch
    pub max_messages_per_fetch: usize,
    /// Artificial latency per fetch
    pub fetch_delay: Option<Duration>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            node_id: 0,
            advertised_leader: None,
            commit_error: None,
            fetch_error: None,
            empty_fetch_offsets: Vec::new(),
            max_messages_per_fetch: 100,
            fetch_delay: None,
        }
    }
}

/// A running mock broker.
pub struct MockBroker {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Builds topic contents from string values: one topic, one vec of
/// partitions, each a list of (key, value) pairs.
pub fn topic_data(topic: &str, partitions: &[&[(&str, &str)]]) -> HashMap<String, Vec<Vec<StoredMessage>>> {
    let mut topics = HashMap::new();
    topics.insert(
        topic.to_string(),
        partitions
            .iter()
            .map(|partition| {
                partition
                    .iter()
                    .map(|(key, value)| {
                        (
                            if key.is_empty() {
                                None
                            } else {
                                Some(key.as_bytes().to_vec())
                            },
                            value.as_bytes().to_vec(),
                        )
                    })
                    .collect()
            })
            .collect(),
    );
    topics
}

/// Spawns a broker serving the given topics with the given behavior.
pub async fn spawn_broker(
    topics: HashMap<String, Vec<Vec<StoredMessage>>>,
    behavior: Behavior,
) -> MockBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let state = Arc::new(Mutex::new(BrokerState {
        topics,
        committed: HashMap::new(),
    }));

    let broker = MockBroker {
        addr,
        state: state.clone(),
    };

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let state = state.clone();
            let behavior = behavior.clone();
            tokio::spawn(async move {
                let _ = serve_connection(stream, state, behavior, addr).await;
            });
        }
    });

    broker
}

/// Spawns a listener that accepts and immediately drops connections,
/// emulating a dead broker.
pub async fn spawn_dead_broker() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            drop(stream);
        }
    });
    addr
}

async fn serve_connection(
    mut stream: TcpStream,
    state: Arc<Mutex<BrokerState>>,
    behavior: Behavior,
    self_addr: SocketAddr,
) -> std::io::Result<()> {
    loop {
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(());
        }
        let frame_len = i32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; frame_len];
        stream.read_exact(&mut payload).await?;

        let mut request = Bytes::from(payload);
        let api_key = request.get_i16();
        let _api_version = request.get_i16();
        let correlation_id = request.get_i32();
        let _client_id = wire::get_string(&mut request, "request header").expect("client id");

        let body = match api_key {
            wire::API_METADATA => handle_metadata(request, &state, &behavior, self_addr),
            wire::API_FETCH => {
                if let Some(delay) = behavior.fetch_delay {
                    tokio::time::sleep(delay).await;
                }
                handle_fetch(request, &state, &behavior)
            }
            wire::API_OFFSETS => handle_offsets(request, &state),
            wire::API_OFFSET_COMMIT => handle_offset_commit(request, &state, &behavior),
            wire::API_OFFSET_FETCH => handle_offset_fetch(request, &state),
            wire::API_PRODUCE => handle_produce(request, &state),
            other => panic!("mock broker: unsupported api key {other}"),
        };

        let mut response = BytesMut::with_capacity(body.len() + 8);
        response.put_i32((body.len() + 4) as i32);
        response.put_i32(correlation_id);
        response.put_slice(&body);
        stream.write_all(&response).await?;
    }
}

fn handle_metadata(
    mut request: Bytes,
    state: &Arc<Mutex<BrokerState>>,
    behavior: &Behavior,
    self_addr: SocketAddr,
) -> BytesMut {
    let topic_count = request.get_i32();
    let mut requested = Vec::new();
    for _ in 0..topic_count {
        requested.push(wire::get_string(&mut request, "metadata request").expect("topic"));
    }

    let (leader_host, leader_port, leader_id) = match &behavior.advertised_leader {
        Some((host, port, id)) => (host.clone(), *port, *id),
        None => (self_addr.ip().to_string(), self_addr.port(), behavior.node_id),
    };

    let state = state.lock();
    let mut body = BytesMut::new();
    // brokers
    body.put_i32(1);
    body.put_i32(leader_id);
    wire::put_string(&mut body, &leader_host);
    body.put_i32(leader_port as i32);
    // topics
    body.put_i32(requested.len() as i32);
    for topic in &requested {
        match state.topics.get(topic) {
            Some(partitions) => {
                body.put_i16(0);
                wire::put_string(&mut body, topic);
                body.put_i32(partitions.len() as i32);
                for (partition, _) in partitions.iter().enumerate() {
                    body.put_i16(0);
                    body.put_i32(partition as i32);
                    body.put_i32(leader_id);
                    body.put_i32(1);
                    body.put_i32(leader_id);
                    body.put_i32(1);
                    body.put_i32(leader_id);
                }
            }
            None => {
                body.put_i16(3); // unknown topic or partition
                wire::put_string(&mut body, topic);
                body.put_i32(0);
            }
        }
    }
    body
}

fn handle_fetch(
    mut request: Bytes,
    state: &Arc<Mutex<BrokerState>>,
    behavior: &Behavior,
) -> BytesMut {
    let _replica_id = request.get_i32();
    let _max_wait = request.get_i32();
    let _min_bytes = request.get_i32();
    let topic_count = request.get_i32();

    let state = state.lock();
    let mut body = BytesMut::new();
    body.put_i32(topic_count);
    for _ in 0..topic_count {
        let topic = wire::get_string(&mut request, "fetch request").expect("topic");
        let partition_count = request.get_i32();
        wire::put_string(&mut body, &topic);
        body.put_i32(partition_count);
        for _ in 0..partition_count {
            let partition = request.get_i32();
            let offset = request.get_i64();
            let _max_bytes = request.get_i32();

            let messages = state
                .topics
                .get(&topic)
                .and_then(|partitions| partitions.get(partition as usize));
            body.put_i32(partition);
            match messages {
                Some(messages) => {
                    let high_watermark = messages.len() as i64;
                    if let Some(code) = behavior.fetch_error {
                        body.put_i16(code);
                        body.put_i64(high_watermark);
                        body.put_i32(0);
                        continue;
                    }
                    body.put_i16(0);
                    body.put_i64(high_watermark);
                    let suppressed = behavior.empty_fetch_offsets.contains(&(
                        topic.clone(),
                        partition,
                        offset,
                    ));
                    let mut set = BytesMut::new();
                    if !suppressed && offset >= 0 {
                        let mut emitted = 0usize;
                        for (idx, (key, value)) in messages.iter().enumerate() {
                            let msg_offset = idx as i64;
                            if msg_offset < offset {
                                continue;
                            }
                            if emitted >= behavior.max_messages_per_fetch {
                                break;
                            }
                            wire::append_message_v0(
                                &mut set,
                                msg_offset,
                                key.as_deref(),
                                value,
                            );
                            emitted += 1;
                        }
                    }
                    body.put_i32(set.len() as i32);
                    body.put_slice(&set);
                }
                None => {
                    body.put_i16(3);
                    body.put_i64(0);
                    body.put_i32(0);
                }
            }
        }
    }
    body
}

fn handle_offsets(mut request: Bytes, state: &Arc<Mutex<BrokerState>>) -> BytesMut {
    let _replica_id = request.get_i32();
    let topic_count = request.get_i32();

    let state = state.lock();
    let mut body = BytesMut::new();
    body.put_i32(topic_count);
    for _ in 0..topic_count {
        let topic = wire::get_string(&mut request, "offsets request").expect("topic");
        let partition_count = request.get_i32();
        wire::put_string(&mut body, &topic);
        body.put_i32(partition_count);
        for _ in 0..partition_count {
            let partition = request.get_i32();
            let time = request.get_i64();
            let _max_offsets = request.get_i32();

            let log_end = state
                .topics
                .get(&topic)
                .and_then(|partitions| partitions.get(partition as usize))
                .map(|messages| messages.len() as i64);
            body.put_i32(partition);
            match log_end {
                Some(log_end) => {
                    body.put_i16(0);
                    body.put_i32(1);
                    if time == -2 {
                        body.put_i64(0);
                    } else {
                        body.put_i64(log_end);
                    }
                }
                None => {
                    body.put_i16(3);
                    body.put_i32(0);
                }
            }
        }
    }
    body
}

fn handle_offset_commit(
    mut request: Bytes,
    state: &Arc<Mutex<BrokerState>>,
    behavior: &Behavior,
) -> BytesMut {
    let group = wire::get_string(&mut request, "commit request").expect("group");
    let topic_count = request.get_i32();

    let mut state = state.lock();
    let mut body = BytesMut::new();
    body.put_i32(topic_count);
    for _ in 0..topic_count {
        let topic = wire::get_string(&mut request, "commit request").expect("topic");
        let partition_count = request.get_i32();
        wire::put_string(&mut body, &topic);
        body.put_i32(partition_count);
        for _ in 0..partition_count {
            let partition = request.get_i32();
            let offset = request.get_i64();
            let _metadata = wire::get_nullable_string(&mut request, "commit request").expect("metadata");

            body.put_i32(partition);
            match behavior.commit_error {
                Some(code) => body.put_i16(code),
                None => {
                    state
                        .committed
                        .insert((group.clone(), topic.clone(), partition), offset);
                    body.put_i16(0);
                }
            }
        }
    }
    body
}

fn handle_offset_fetch(mut request: Bytes, state: &Arc<Mutex<BrokerState>>) -> BytesMut {
    let group = wire::get_string(&mut request, "offset fetch request").expect("group");
    let topic_count = request.get_i32();

    let state = state.lock();
    let mut body = BytesMut::new();
    body.put_i32(topic_count);
    for _ in 0..topic_count {
        let topic = wire::get_string(&mut request, "offset fetch request").expect("topic");
        let partition_count = request.get_i32();
        wire::put_string(&mut body, &topic);
        body.put_i32(partition_count);
        for _ in 0..partition_count {
            let partition = request.get_i32();
            let stored = state
                .committed
                .get(&(group.clone(), topic.clone(), partition))
                .copied();
            body.put_i32(partition);
            body.put_i64(stored.unwrap_or(-1));
            body.put_i16(-1); // null metadata
            body.put_i16(0);
        }
    }
    body
}

fn handle_produce(mut request: Bytes, state: &Arc<Mutex<BrokerState>>) -> BytesMut {
    let _acks = request.get_i16();
    let _timeout = request.get_i32();
    let topic_count = request.get_i32();

    let mut state = state.lock();
    let mut body = BytesMut::new();
    body.put_i32(topic_count);
    for _ in 0..topic_count {
        let topic = wire::get_string(&mut request, "produce request").expect("topic");
        let partition_count = request.get_i32();
        wire::put_string(&mut body, &topic);
        body.put_i32(partition_count);
        for _ in 0..partition_count {
            let partition = request.get_i32();
            let set_size = request.get_i32();
            let set = request.copy_to_bytes(set_size as usize);
            let messages = wire::parse_message_set(set).expect("message set");

            body.put_i32(partition);
            match state
                .topics
                .get_mut(&topic)
                .and_then(|partitions| partitions.get_mut(partition as usize))
            {
                Some(stored) => {
                    let base_offset = stored.len() as i64;
                    for message in messages {
                        stored.push((message.key, message.value.unwrap_or_default()));
                    }
                    body.put_i16(0);
                    body.put_i64(base_offset);
                }
                None => {
                    body.put_i16(3);
                    body.put_i64(-1);
                }
            }
        }
    }
    body
}
