//! Configuration for the Trifecta shell
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. `$HOME/.trifecta/config.properties`
//! 3. Default values
//!
//! The properties file uses Java-style `key=value` lines; `#` starts a
//! comment.

use crate::error::{Result, TrifectaError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default ZooKeeper endpoint
pub const DEFAULT_ZK_CONNECT: &str = "localhost:2181";

/// Default socket timeout on the low-level Kafka client
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 63356;

/// Default byte-dump width for message rendering
pub const DEFAULT_COLUMNS: usize = 25;

/// Runtime configuration assembled from defaults, the properties file, and
/// command-line arguments.
#[derive(Debug, Clone)]
pub struct TrifectaConfig {
    /// ZooKeeper connection string (`host:port[,host:port]`)
    pub zk_connect: String,

    /// Explicit Kafka seed brokers; when unset the broker list is read
    /// from ZooKeeper
    pub kafka_brokers: Option<String>,

    /// Socket timeout for the low-level Kafka client
    pub socket_timeout: Duration,

    /// Client id presented to brokers
    pub client_id: String,

    /// Byte-dump width for message rendering
    pub columns: usize,

    /// Print Debug representations of errors
    pub debug: bool,

    /// ZooKeeper root of the Storm partition-manager layout
    pub storm_root: String,

    /// Text encoding label reported by `vars`
    pub encoding: String,
}

impl Default for TrifectaConfig {
    fn default() -> Self {
        Self {
            zk_connect: DEFAULT_ZK_CONNECT.to_string(),
            kafka_brokers: None,
            socket_timeout: Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS),
            client_id: "trifecta".to_string(),
            columns: DEFAULT_COLUMNS,
            debug: false,
            storm_root: "/storm".to_string(),
            encoding: "UTF-8".to_string(),
        }
    }
}

impl TrifectaConfig {
    /// Loads defaults overlaid with `$HOME/.trifecta/config.properties`
    /// when the file exists. A missing file is not an error.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        let path = config_file();
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            config.apply_properties(&parse_properties(&text))?;
        }
        Ok(config)
    }

    /// Applies recognized keys from a parsed properties map.
    pub fn apply_properties(&mut self, props: &HashMap<String, String>) -> Result<()> {
        if let Some(host) = props.get("trifecta.zookeeper.host") {
            self.zk_connect = host.clone();
        }
        if let Some(brokers) = props.get("trifecta.kafka.brokers") {
            self.kafka_brokers = Some(brokers.clone());
        }
        if let Some(ms) = props.get("trifecta.kafka.socket.timeout.ms") {
            let ms: u64 = ms.parse().map_err(|_| {
                TrifectaError::Config(format!(
                    "trifecta.kafka.socket.timeout.ms: '{ms}' is not a number"
                ))
            })?;
            self.socket_timeout = Duration::from_millis(ms);
        }
        if let Some(debug) = props.get("trifecta.common.debug.enabled") {
            self.debug = debug.eq_ignore_ascii_case("true");
        }
        if let Some(columns) = props.get("trifecta.common.columns") {
            self.columns = columns.parse().map_err(|_| {
                TrifectaError::Config(format!(
                    "trifecta.common.columns: '{columns}' is not a number"
                ))
            })?;
        }
        if let Some(encoding) = props.get("trifecta.common.encoding") {
            self.encoding = encoding.clone();
        }
        if let Some(root) = props.get("trifecta.storm.zookeeper.root") {
            self.storm_root = root.clone();
        }
        Ok(())
    }
}

/// `$HOME/.trifecta`
pub fn config_dir() -> PathBuf {
    home_dir().join(".trifecta")
}

/// `$HOME/.trifecta/config.properties`
pub fn config_file() -> PathBuf {
    config_dir().join("config.properties")
}

/// `$HOME/.trifecta/history`
pub fn history_file() -> PathBuf {
    config_dir().join("history")
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else if path == "~" {
        home_dir()
    } else {
        PathBuf::from(path)
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Parses Java-style properties text into a key/value map.
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            props.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    props
}

/// Ensures the `.trifecta` directory exists; used before writing history.
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
