//! Partition-parallel scan engine
//!
//! Every scan resolves the partition list from ZooKeeper, constructs one
//! partition consumer per partition, and walks each partition from its
//! starting offset to the end offset sampled at scan start. Matching is
//! a conjunction of pure predicates over `(value, key)`.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Result, TrifectaError};
use crate::kafka::consumer::PartitionConsumer;
use crate::kafka::{
    Broker, ClientConfig, CorrelationSource, MessageData, TopicAndPartition, DEFAULT_FETCH_SIZE,
};
use crate::zk::ZkProxy;

/// A pure match condition over a message's value and key.
///
/// Implementations must be side-effect free and safe for concurrent
/// evaluation.
pub trait Predicate: Send + Sync {
    fn satisfies(&self, value: &[u8], key: &[u8]) -> bool;
}

/// Where the engine learns a topic's partition list. ZooKeeper in the
/// shell; tests inject a fixed layout.
pub trait TopologySource: Send + Sync {
    fn partition_ids(&self, topic: &str) -> Result<Vec<i32>>;
}

impl TopologySource for ZkProxy {
    fn partition_ids(&self, topic: &str) -> Result<Vec<i32>> {
        self.get_broker_topic_partitions(topic)
    }
}

/// A fixed partition layout.
pub struct StaticTopology(pub Vec<i32>);

impl TopologySource for StaticTopology {
    fn partition_ids(&self, _topic: &str) -> Result<Vec<i32>> {
        Ok(self.0.clone())
    }
}

/// Per-query offset modifiers.
#[derive(Debug, Clone, Default)]
pub struct KqlRestrictions {
    /// Anchor the scan at this consumer group's committed offsets
    pub group_id: Option<String>,
    /// Rewind the starting offset by N per partition, clamped to the
    /// earliest available offset
    pub delta: Option<i64>,
}

/// Shared progress counters updated while batches flow.
#[derive(Debug, Default)]
pub struct ScanCounter {
    read: AtomicI64,
    matched: AtomicI64,
}

impl ScanCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_read(&self, n: usize) {
        self.read.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn add_matched(&self, n: usize) {
        self.matched.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn read(&self) -> i64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn matched(&self) -> i64 {
        self.matched.load(Ordering::Relaxed)
    }
}

/// True when the message satisfies every predicate; an empty list
/// matches everything.
pub fn matches_all(predicates: &[Box<dyn Predicate>], message: &MessageData) -> bool {
    predicates
        .iter()
        .all(|p| p.satisfies(&message.value, &message.key))
}

enum Deliver {
    Continue,
    Stop,
}

/// The partition-parallel scan engine.
pub struct ScanEngine {
    seeds: Vec<Broker>,
    topology: Arc<dyn TopologySource>,
    config: Arc<ClientConfig>,
    correlation: Arc<CorrelationSource>,
    pool_size: usize,
}

impl ScanEngine {
    pub fn new(
        seeds: Vec<Broker>,
        topology: Arc<dyn TopologySource>,
        config: Arc<ClientConfig>,
        correlation: Arc<CorrelationSource>,
    ) -> Self {
        let pool_size = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            seeds,
            topology,
            config,
            correlation,
            pool_size,
        }
    }

    /// Overrides the bounded fan-out width (defaults to the CPU count).
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// Counts messages matching the predicates across all partitions.
    pub async fn count(
        &self,
        topic: &str,
        predicates: Arc<Vec<Box<dyn Predicate>>>,
        restrictions: KqlRestrictions,
        cancel: CancellationToken,
    ) -> Result<i64> {
        let partitions = self.partition_ids(topic).await?;
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks: JoinSet<i64> = JoinSet::new();

        for partition in partitions {
            let tap = TopicAndPartition::new(topic, partition);
            let worker = self.worker(tap, predicates.clone(), restrictions.clone(), cancel.clone());
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let mut total = 0i64;
                worker
                    .run(None, false, |_msg| {
                        total += 1;
                        Deliver::Continue
                    })
                    .await;
                total
            });
        }

        let mut total = 0i64;
        while let Some(joined) = tasks.join_next().await {
            total += joined
                .map_err(|e| TrifectaError::internal(format!("scan task failed: {e}")))?;
        }
        Ok(total)
    }

    /// Returns the first observed match anywhere in the topic.
    ///
    /// Partitions race; whichever match is observed first wins, so the
    /// result is non-deterministic under concurrent load.
    pub async fn find_one(
        &self,
        topic: &str,
        predicates: Arc<Vec<Box<dyn Predicate>>>,
        restrictions: KqlRestrictions,
        cancel: CancellationToken,
    ) -> Result<Option<MessageData>> {
        let partitions = self.partition_ids(topic).await?;
        let winner: Arc<OnceLock<MessageData>> = Arc::new(OnceLock::new());
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for partition in partitions {
            let tap = TopicAndPartition::new(topic, partition);
            let worker = self.worker(tap, predicates.clone(), restrictions.clone(), cancel.clone());
            let winner = winner.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let stop_when = winner.clone();
                worker
                    .run_until(
                        move || stop_when.get().is_some(),
                        None,
                        false,
                        |msg| {
                            let _ = winner.set(msg);
                            Deliver::Stop
                        },
                    )
                    .await;
            });
        }

        while tasks.join_next().await.is_some() {}
        Ok(winner.get().cloned())
    }

    /// Returns the first match within a single partition.
    pub async fn find_next(
        &self,
        tap: TopicAndPartition,
        predicates: Arc<Vec<Box<dyn Predicate>>>,
        restrictions: KqlRestrictions,
        cancel: CancellationToken,
    ) -> Result<Option<MessageData>> {
        let found: Arc<OnceLock<MessageData>> = Arc::new(OnceLock::new());
        let worker = self.worker(tap, predicates, restrictions, cancel);
        let sink = found.clone();
        worker
            .run(None, false, |msg| {
                let _ = sink.set(msg);
                Deliver::Stop
            })
            .await;
        Ok(found.get().cloned())
    }

    /// Collects up to `limit` matches across all partitions. The
    /// combined result is stable-sorted by partition id; within one
    /// partition, messages stay in fetch order.
    pub async fn find_many(
        &self,
        topic: &str,
        predicates: Arc<Vec<Box<dyn Predicate>>>,
        restrictions: KqlRestrictions,
        limit: Option<usize>,
        counter: Arc<ScanCounter>,
        cancel: CancellationToken,
    ) -> Result<Vec<MessageData>> {
        let partitions = self.partition_ids(topic).await?;
        let matched = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks: JoinSet<(i32, Vec<MessageData>)> = JoinSet::new();

        for partition in partitions {
            let tap = TopicAndPartition::new(topic, partition);
            let worker = self.worker(tap, predicates.clone(), restrictions.clone(), cancel.clone());
            let matched = matched.clone();
            let counter = counter.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let mut collected = Vec::new();
                let limit_hit = {
                    let matched = matched.clone();
                    move || limit.is_some_and(|limit| matched.load(Ordering::Relaxed) >= limit)
                };
                worker
                    .run_until(limit_hit, Some(counter.clone()), false, |msg| {
                        collected.push(msg);
                        counter.add_matched(1);
                        let total = matched.fetch_add(1, Ordering::Relaxed) + 1;
                        if limit.is_some_and(|limit| total >= limit) {
                            Deliver::Stop
                        } else {
                            Deliver::Continue
                        }
                    })
                    .await;
                (partition, collected)
            });
        }

        let mut per_partition = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            per_partition.push(
                joined.map_err(|e| TrifectaError::internal(format!("scan task failed: {e}")))?,
            );
        }
        Ok(order_and_limit(per_partition, limit))
    }

    /// Delivers every message to the sink across partitions, bounded by
    /// the end offset sampled at start; the bound is re-sampled once
    /// whenever a partition drains.
    pub async fn observe(
        &self,
        topic: &str,
        sink: Arc<dyn Fn(MessageData) + Send + Sync>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let partitions = self.partition_ids(topic).await?;
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for partition in partitions {
            let tap = TopicAndPartition::new(topic, partition);
            let worker = self.worker(
                tap,
                Arc::new(Vec::new()),
                KqlRestrictions::default(),
                cancel.clone(),
            );
            let sink = sink.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                worker
                    .run(None, true, |msg| {
                        sink(msg);
                        Deliver::Continue
                    })
                    .await;
            });
        }

        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    /// Resolves the topic's partition ids through the topology source
    /// (a synchronous ZooKeeper read in the shell).
    async fn partition_ids(&self, topic: &str) -> Result<Vec<i32>> {
        let topology = self.topology.clone();
        let topic = topic.to_string();
        tokio::task::spawn_blocking(move || topology.partition_ids(&topic))
            .await
            .map_err(|e| TrifectaError::internal(format!("partition lookup failed: {e}")))?
    }

    fn worker(
        &self,
        tap: TopicAndPartition,
        predicates: Arc<Vec<Box<dyn Predicate>>>,
        restrictions: KqlRestrictions,
        cancel: CancellationToken,
    ) -> PartitionWorker {
        PartitionWorker {
            tap,
            seeds: self.seeds.clone(),
            config: self.config.clone(),
            correlation: self.correlation.clone(),
            predicates,
            restrictions,
            cancel,
        }
    }
}

/// One partition's share of a scan.
struct PartitionWorker {
    tap: TopicAndPartition,
    seeds: Vec<Broker>,
    config: Arc<ClientConfig>,
    correlation: Arc<CorrelationSource>,
    predicates: Arc<Vec<Box<dyn Predicate>>>,
    restrictions: KqlRestrictions,
    cancel: CancellationToken,
}

impl PartitionWorker {
    async fn run<F>(self, counter: Option<Arc<ScanCounter>>, refresh_end: bool, deliver: F)
    where
        F: FnMut(MessageData) -> Deliver + Send,
    {
        self.run_until(|| false, counter, refresh_end, deliver).await
    }

    /// Walks the partition from its starting offset to the sampled end.
    ///
    /// A failed consumer construction or a fetch error aborts this
    /// partition only; the rest of the scan is unaffected.
    async fn run_until<S, F>(
        self,
        should_stop: S,
        counter: Option<Arc<ScanCounter>>,
        refresh_end: bool,
        mut deliver: F,
    ) where
        S: Fn() -> bool + Send + Sync,
        F: FnMut(MessageData) -> Deliver + Send,
    {
        let mut consumer = match PartitionConsumer::connect(
            self.tap.clone(),
            &self.seeds,
            self.config.clone(),
            self.correlation.clone(),
        )
        .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!(tap = %self.tap, error = %e, "partition consumer unavailable");
                return;
            }
        };

        if let Err(e) = self
            .scan_loop(&mut consumer, &should_stop, &counter, refresh_end, &mut deliver)
            .await
        {
            error!(tap = %self.tap, error = %e, "partition scan aborted");
        }
        consumer.close().await;
    }

    async fn scan_loop<S, F>(
        &self,
        consumer: &mut PartitionConsumer,
        should_stop: &S,
        counter: &Option<Arc<ScanCounter>>,
        refresh_end: bool,
        deliver: &mut F,
    ) -> Result<()>
    where
        S: Fn() -> bool + Send + Sync,
        F: FnMut(MessageData) -> Deliver + Send,
    {
        let mut offset = starting_offset(consumer, &self.restrictions).await?;
        let mut end = consumer.get_last_offset().await?;
        debug!(tap = %self.tap, offset, end, "partition scan starting");

        loop {
            if self.cancel.is_cancelled() || should_stop() {
                return Ok(());
            }
            if offset > end {
                if !refresh_end {
                    return Ok(());
                }
                match consumer.get_last_offset().await {
                    Ok(new_end) if new_end > end => {
                        end = new_end;
                        continue;
                    }
                    _ => return Ok(()),
                }
            }

            let batch = match consumer.fetch(&[offset], DEFAULT_FETCH_SIZE).await {
                Ok(batch) => batch,
                Err(e) => return Err(e),
            };
            if let Some(counter) = counter {
                counter.add_read(batch.len());
            }
            if batch.is_empty() {
                // compaction or a skipped offset: probe the next one
                offset += 1;
                continue;
            }

            let mut max_offset = offset;
            for message in batch {
                max_offset = max_offset.max(message.offset);
                if message.offset > end {
                    break;
                }
                if self.cancel.is_cancelled() || should_stop() {
                    return Ok(());
                }
                if matches_all(&self.predicates, &message) {
                    if let Deliver::Stop = deliver(message) {
                        return Ok(());
                    }
                }
            }
            offset = max_offset + 1;
        }
    }
}

/// Starting offset per the restriction rules: the group's committed
/// offset when anchored (a `-1` sentinel falls back to the earliest),
/// with `delta` rewinding clamped to the earliest available offset.
async fn starting_offset(
    consumer: &mut PartitionConsumer,
    restrictions: &KqlRestrictions,
) -> Result<i64> {
    let min = consumer.get_first_offset().await?.max(0);
    let mut start = match &restrictions.group_id {
        Some(group_id) => match consumer.fetch_offset(group_id).await? {
            Some(offset) if offset >= 0 => offset,
            _ => min,
        },
        None => min,
    };
    if let Some(delta) = restrictions.delta {
        start = (start - delta).max(min);
    }
    Ok(start)
}

/// Stable-sorts per-partition results by partition id and truncates to
/// the limit.
fn order_and_limit(
    mut per_partition: Vec<(i32, Vec<MessageData>)>,
    limit: Option<usize>,
) -> Vec<MessageData> {
    per_partition.sort_by_key(|(partition, _)| *partition);
    let mut combined: Vec<MessageData> = per_partition
        .into_iter()
        .flat_map(|(_, messages)| messages)
        .collect();
    if let Some(limit) = limit {
        combined.truncate(limit);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(bool);

    impl Predicate for Always {
        fn satisfies(&self, _value: &[u8], _key: &[u8]) -> bool {
            self.0
        }
    }

    fn message(partition: i32, offset: i64) -> MessageData {
        MessageData {
            partition,
            offset,
            next_offset: offset + 1,
            last_offset: 10,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    #[test]
    fn empty_predicate_list_matches_everything() {
        assert!(matches_all(&[], &message(0, 0)));
    }

    #[test]
    fn predicates_are_and_combined() {
        let both: Vec<Box<dyn Predicate>> = vec![Box::new(Always(true)), Box::new(Always(true))];
        let mixed: Vec<Box<dyn Predicate>> = vec![Box::new(Always(true)), Box::new(Always(false))];
        assert!(matches_all(&both, &message(0, 0)));
        assert!(!matches_all(&mixed, &message(0, 0)));
    }

    #[test]
    fn results_sort_by_partition_and_respect_limit() {
        let per_partition = vec![
            (2, vec![message(2, 0), message(2, 1)]),
            (0, vec![message(0, 0), message(0, 1), message(0, 2)]),
            (1, vec![message(1, 0)]),
        ];
        let combined = order_and_limit(per_partition, Some(4));
        let keys: Vec<(i32, i64)> = combined.iter().map(|m| (m.partition, m.offset)).collect();
        assert_eq!(keys, vec![(0, 0), (0, 1), (0, 2), (1, 0)]);
    }

    #[test]
    fn no_limit_keeps_everything() {
        let per_partition = vec![(1, vec![message(1, 0)]), (0, vec![message(0, 0)])];
        assert_eq!(order_and_limit(per_partition, None).len(), 2);
    }

    #[test]
    fn counters_accumulate() {
        let counter = ScanCounter::new();
        counter.add_read(5);
        counter.add_read(2);
        counter.add_matched(3);
        assert_eq!(counter.read(), 7);
        assert_eq!(counter.matched(), 3);
    }
}
