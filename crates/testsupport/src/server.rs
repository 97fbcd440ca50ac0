//! Helpers for spinning up the HTTP shim backed by a temporary store.
//!
//! The [`TestServer`] struct runs the shim in-process over a single-node
//! [`MemoryLog`] so integration tests can exercise the public HTTP surface
//! without a raft cluster. Each server owns an isolated temporary directory
//! and shuts itself down when dropped.

use crate::cluster::TestNode;
use anyhow::Result;
use database::ReplicatedStore;
use raft::MemoryLog;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// In-process HTTP shim for end-to-end tests.
pub struct TestServer {
    address: String,
    node: TestNode,
    log: MemoryLog,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Start a new server bound to `127.0.0.1` on a random port.
    pub async fn start() -> Result<Self> {
        let log = MemoryLog::new();
        let node = TestNode::join(&log).await?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();

        let (shutdown, stopped) = oneshot::channel::<()>();
        let store = node.store().clone();
        let task = tokio::spawn(async move {
            let stopped = async move {
                let _ = stopped.await;
            };
            if let Err(e) = ::server::serve(listener, store, stopped).await {
                eprintln!("test server error: {e:?}");
            }
        });

        Ok(Self {
            address,
            node,
            log,
            shutdown: Some(shutdown),
            task,
        })
    }

    /// Return the socket address clients should dial.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Base URL of the shim.
    pub fn url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// The store behind the shim.
    pub fn store(&self) -> &ReplicatedStore {
        self.node.store()
    }

    /// The log the store is joined to.
    pub fn log(&self) -> &MemoryLog {
        &self.log
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.abort();
    }
}
