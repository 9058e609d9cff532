//! The runtime context shared by every command handler
//!
//! Owns the configuration, the ZooKeeper handle, session variables, the
//! active module, the job manager, and the correlation-id counter. The
//! context is built first; modules receive it by reference and the
//! registry is installed by the shell afterwards, which keeps the
//! context/registry/module cycle out of the type graph.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::command::registry::CORE_MODULE;
use crate::config::TrifectaConfig;
use crate::error::{Result, TrifectaError};
use crate::kafka::consumer::PartitionConsumer;
use crate::kafka::{Broker, ClientConfig, CorrelationSource, TopicAndPartition};
use crate::scan::ScanEngine;
use crate::zk::ZkProxy;

/// Session variables: a name → value map with typed accessors.
///
/// Mutated only from the REPL thread; reads may happen anywhere.
#[derive(Default)]
pub struct SessionVariables {
    vars: RwLock<HashMap<String, String>>,
}

impl SessionVariables {
    pub fn get(&self, name: &str) -> Option<String> {
        self.vars.read().get(name).cloned()
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).map(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.write().insert(name.into(), value.into());
    }

    /// All variables, sorted by name.
    pub fn all(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .vars
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort();
        entries
    }
}

/// Process-wide runtime state behind every command.
pub struct RuntimeContext {
    pub config: TrifectaConfig,
    pub zk: Arc<ZkProxy>,
    pub session: SessionVariables,
    pub jobs: crate::jobs::JobManager,
    zk_cwd: RwLock<String>,
    active_module: RwLock<String>,
    debug: AtomicBool,
    /// Per-topic message cursors for `knext`/`kprev`
    cursors: RwLock<HashMap<String, (i32, i64)>>,
    correlation: Arc<CorrelationSource>,
    client_config: Arc<ClientConfig>,
    runtime: Handle,
}

impl RuntimeContext {
    pub fn new(config: TrifectaConfig, zk: Arc<ZkProxy>, runtime: Handle) -> Self {
        let client_config = ClientConfig::new(config.client_id.clone(), config.socket_timeout);
        let session = SessionVariables::default();
        session.set("columns", config.columns.to_string());
        session.set("encoding", config.encoding.clone());
        Self {
            debug: AtomicBool::new(config.debug),
            config,
            zk,
            session,
            jobs: crate::jobs::JobManager::new(),
            zk_cwd: RwLock::new("/".to_string()),
            active_module: RwLock::new(CORE_MODULE.to_string()),
            cursors: RwLock::new(HashMap::new()),
            correlation: CorrelationSource::new(),
            client_config,
            runtime,
        }
    }

    // ── session state ──

    pub fn zk_cwd(&self) -> String {
        self.zk_cwd.read().clone()
    }

    pub fn set_zk_cwd(&self, path: impl Into<String>) {
        *self.zk_cwd.write() = path.into();
    }

    pub fn active_module(&self) -> String {
        self.active_module.read().clone()
    }

    pub fn set_active_module(&self, name: impl Into<String>) {
        *self.active_module.write() = name.into();
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    /// Hex-dump width, overridable through the `columns` session
    /// variable.
    pub fn columns(&self) -> usize {
        self.session
            .get_i64("columns")
            .map(|n| n.max(1) as usize)
            .unwrap_or(self.config.columns)
    }

    /// Remembers the message cursor for a topic.
    pub fn set_cursor(&self, tap: TopicAndPartition, offset: i64) {
        self.cursors
            .write()
            .insert(tap.topic, (tap.partition, offset));
    }

    pub fn cursor(&self, topic: &str) -> Option<(TopicAndPartition, i64)> {
        let (partition, offset) = *self.cursors.read().get(topic)?;
        Some((TopicAndPartition::new(topic, partition), offset))
    }

    /// Some remembered cursor, when the topic is not named.
    pub fn any_cursor(&self) -> Option<(TopicAndPartition, i64)> {
        let cursors = self.cursors.read();
        let (topic, (partition, offset)) = cursors.iter().next()?;
        Some((TopicAndPartition::new(topic.clone(), *partition), *offset))
    }

    // ── client plumbing ──

    pub fn correlation(&self) -> Arc<CorrelationSource> {
        self.correlation.clone()
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Runs a future to completion from the (synchronous) REPL thread.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Seed brokers: an explicit override from the configuration, else
    /// the broker registry in ZooKeeper.
    pub fn brokers(&self) -> Result<Vec<Broker>> {
        if let Some(list) = &self.config.kafka_brokers {
            return Broker::parse_list(list);
        }
        let brokers = self.zk.get_broker_list()?;
        if brokers.is_empty() {
            return Err(TrifectaError::Config(
                "no brokers registered in ZooKeeper and no --brokers override given".to_string(),
            ));
        }
        Ok(brokers)
    }

    /// A scan engine over the current broker topology.
    pub fn scan_engine(&self) -> Result<ScanEngine> {
        Ok(ScanEngine::new(
            self.brokers()?,
            self.zk.clone(),
            self.client_config.clone(),
            self.correlation.clone(),
        ))
    }

    /// A partition consumer bound to `tap`.
    pub async fn consumer(&self, tap: TopicAndPartition) -> Result<PartitionConsumer> {
        let seeds = self.brokers()?;
        PartitionConsumer::connect(tap, &seeds, self.client_config.clone(), self.correlation())
            .await
    }
}
