//! # Trifecta
//!
//! An operator's shell and query engine for Kafka clusters and their
//! coordinating ZooKeeper ensemble. Operators use it to inspect topics,
//! partitions, brokers, consumer groups and offsets; to read, search and
//! write messages; to browse and mutate ZooKeeper keys; and to run
//! declarative `select` queries that scan partitions in parallel.
//!
//! ## Architecture
//!
//! - [`codec`]: typed value encoding shared by the Kafka and ZooKeeper
//!   commands
//! - [`zk`]: the ZooKeeper view (typed keys plus cluster topology)
//! - [`kafka`]: the low-level partition consumer and its wire codec
//! - [`scan`]: the partition-parallel scan engine
//! - [`kql`]: the `select` query parser and planner
//! - [`command`]: tokenizer, argument assembly and the module registry
//! - [`jobs`]: background job bookkeeping with cooperative cancellation
//! - [`repl`]: the interactive shell loop
//! - [`context`]: process-wide runtime state
//! - [`config`]: defaults, `~/.trifecta/config.properties` and CLI
//!   merging
//! - [`error`]: the error taxonomy and Kafka wire-code table

pub mod codec;
pub mod command;
pub mod config;
pub mod context;
pub mod display;
pub mod error;
pub mod jobs;
pub mod kafka;
pub mod kql;
pub mod modules;
pub mod repl;
pub mod scan;
pub mod zk;

pub use config::TrifectaConfig;
pub use context::RuntimeContext;
pub use display::DisplayValue;
pub use error::{ErrorHint, KafkaCode, KafkaErrorCode, Result, TrifectaError};
pub use kafka::consumer::PartitionConsumer;
pub use kafka::{
    Broker, ClientConfig, ConsumerOffset, CorrelationSource, MessageData, TopicAndPartition,
};
pub use repl::Shell;
pub use scan::{KqlRestrictions, Predicate, ScanCounter, ScanEngine};
pub use zk::ZkProxy;
