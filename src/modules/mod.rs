//! Shell modules: core housekeeping, Kafka, and ZooKeeper

mod core;
mod kafka;
mod zookeeper;

use std::sync::Arc;

use crate::command::registry::ShellModule;

pub use self::core::CoreModule;
pub use self::kafka::KafkaModule;
pub use self::zookeeper::ZookeeperModule;

/// Every module the shell boots with.
pub fn all() -> Vec<Arc<dyn ShellModule>> {
    vec![
        Arc::new(CoreModule),
        Arc::new(KafkaModule),
        Arc::new(ZookeeperModule),
    ]
}
