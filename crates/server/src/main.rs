//! `raftsql-server`: one node of a replicated SQL cluster.
//!
//! Starts a raft node for the cluster, rebuilds the local engine from the
//! replicated log, and serves the HTTP shim until interrupted or until the
//! consensus layer fails.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use database::{ReplicatedStore, StoreConfig, Termination};
use raft::{MemoryLog, NodeConfig, RaftPipe};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CLUSTER: &str = "http://127.0.0.1:9021";
const DEFAULT_PORT: u16 = 9121;

#[derive(Parser, Debug)]
#[command(name = "raftsql-server", version, about = "Replicated SQL server node")]
struct Args {
    /// Comma separated raft peer URLs, in node-id order
    #[arg(long, default_value = DEFAULT_CLUSTER)]
    cluster: String,

    /// This node's id (1-based position in --cluster)
    #[arg(long, default_value_t = 1)]
    id: u64,

    /// Port for the SQL shim
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory holding the engine file and the raft log
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Order statements with an in-process log instead of a raft cluster
    #[arg(long)]
    in_memory_log: bool,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let engine_path = args.data_dir.join(format!("raftsql-{}.db", args.id));
    let (node, pipe) = if args.in_memory_log {
        info!("ordering statements with an in-process log");
        (None, MemoryLog::new().join())
    } else {
        let cluster: Vec<String> = args
            .cluster
            .split(',')
            .map(str::trim)
            .filter(|peer| !peer.is_empty())
            .map(String::from)
            .collect();
        let raft_dir = args.data_dir.join(format!("raft-{}", args.id));
        let config = NodeConfig::from_cluster(args.id, raft_dir, &cluster).with_context(|| {
            format!("node id {} is not in a cluster of {}", args.id, cluster.len())
        })?;
        let (node, pipe) = RaftPipe::start(config)
            .await
            .context("failed to start raft node")?;
        (Some(node), pipe)
    };

    let store = ReplicatedStore::open(StoreConfig::new(&engine_path), pipe)
        .await
        .with_context(|| format!("failed to open store at {}", engine_path.display()))?;
    info!(id = args.id, stats = ?store.stats(), "replay complete");

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind sql port {}", args.port))?;
    let (stop_http, http_stopped) = oneshot::channel::<()>();
    let http = tokio::spawn(server::serve(listener, store.clone(), async move {
        let _ = http_stopped.await;
    }));

    let termination = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
            store.shutdown().await
        }
        termination = store.terminated() => termination,
    };

    let _ = stop_http.send(());
    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "sql shim failed"),
        Err(e) => error!(error = %e, "sql shim task panicked"),
    }
    if let Some(node) = node {
        node.shutdown().await.context("failed to stop raft node")?;
    }

    match termination {
        Termination::Stopped => {
            info!("server stopped");
            Ok(())
        }
        Termination::Failed(err) => Err(anyhow!(err).context("consensus layer failed")),
    }
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        filter = filter.add_directive(level.parse()?);
    }

    // Always silence noisy crates
    const SILENCE: &[&str] = &["openraft=warn", "hyper=warn", "h2=warn"];
    for directive in SILENCE {
        filter = filter.add_directive(directive.parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}
