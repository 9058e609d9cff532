//! Trifecta, an operator's shell for Kafka and ZooKeeper

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use trifecta::{RuntimeContext, Shell, TrifectaConfig, ZkProxy};

/// Operator's shell and query engine for Kafka clusters and their
/// ZooKeeper ensemble.
#[derive(Parser, Debug)]
#[command(name = "trifecta")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator's shell and query engine for Kafka + ZooKeeper")]
struct Args {
    /// ZooKeeper connection string (host:port[,host:port][/chroot])
    #[arg(short = 'z', long = "zookeeper")]
    zookeeper: Option<String>,

    /// Kafka seed brokers (host:port[,host:port]); defaults to the
    /// broker registry in ZooKeeper
    #[arg(long)]
    brokers: Option<String>,

    /// Properties file overriding ~/.trifecta/config.properties
    #[arg(long)]
    config: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Byte-dump width for message rendering
    #[arg(long)]
    columns: Option<usize>,

    /// Print Debug representations of errors
    #[arg(long)]
    debug: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// A single command to run instead of the interactive shell
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("trifecta: {e}");
            ExitCode::from(1)
        }
    }
}

fn run() -> trifecta::Result<()> {
    let args = Args::parse();

    if args.no_color {
        colored::control::set_override(false);
    }

    // Logs go to stderr so the shell's stdout stays clean.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = TrifectaConfig::load()?;
    if let Some(path) = &args.config {
        let path = trifecta::config::expand_tilde(path);
        let text = std::fs::read_to_string(&path)?;
        config.apply_properties(&trifecta::config::parse_properties(&text))?;
    }
    if let Some(zookeeper) = args.zookeeper {
        config.zk_connect = zookeeper;
    }
    if let Some(brokers) = args.brokers {
        config.kafka_brokers = Some(brokers);
    }
    if let Some(columns) = args.columns {
        config.columns = columns;
    }
    if args.debug {
        config.debug = true;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            trifecta::TrifectaError::Internal(format!("failed to create runtime: {e}"))
        })?;

    let zk = Arc::new(
        ZkProxy::connect(&config.zk_connect, config.socket_timeout).inspect_err(
            |e| error!(zookeeper = %config.zk_connect, error = %e, "zookeeper connection failed"),
        )?,
    );

    let ctx = Arc::new(RuntimeContext::new(config, zk, runtime.handle().clone()));
    let shell = Shell::new(ctx)?;

    if args.command.is_empty() {
        shell.run()
    } else {
        shell.run_once(&args.command.join(" "))
    }
}
