//! Stores joined to one in-process log.
//!
//! Each [`TestNode`] owns its engine file inside a temporary directory that
//! is removed when the node is dropped.

use anyhow::Result;
use database::{ReplicatedStore, StoreConfig};
use raft::MemoryLog;
use tempfile::TempDir;

/// Read connections per test store. Small keeps file handles down.
pub const TEST_READ_POOL_SIZE: u32 = 2;

/// One store and the directory holding its engine file.
pub struct TestNode {
    store: ReplicatedStore,
    _temp_dir: TempDir,
}

impl TestNode {
    /// Join `log` with a fresh engine in a new temporary directory.
    pub async fn join(log: &MemoryLog) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let config = StoreConfig::new(temp_dir.path().join("node.db"))
            .with_read_pool_size(TEST_READ_POOL_SIZE);
        let store = ReplicatedStore::open(config, log.join()).await?;
        Ok(Self {
            store,
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> &ReplicatedStore {
        &self.store
    }
}

/// A group of nodes observing the same total order of statements.
///
/// # Example
///
/// ```no_run
/// use testsupport::prelude::*;
///
/// # async fn example() -> anyhow::Result<()> {
/// let mut cluster = TestCluster::start(2).await?;
/// cluster.node(0).store().execute(CREATE_TABLE).await?;
///
/// // A late joiner replays the table before it opens.
/// let late = cluster.add_node().await?;
/// assert!(cluster.node(late).store().query(SELECT_ALL).await.is_ok());
/// # Ok(())
/// # }
/// ```
pub struct TestCluster {
    log: MemoryLog,
    nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Start `size` nodes on a new log.
    pub async fn start(size: usize) -> Result<Self> {
        let mut cluster = Self {
            log: MemoryLog::new(),
            nodes: Vec::with_capacity(size),
        };
        for _ in 0..size {
            cluster.add_node().await?;
        }
        Ok(cluster)
    }

    /// Join one more node and return its position.
    pub async fn add_node(&mut self) -> Result<usize> {
        self.nodes.push(TestNode::join(&self.log).await?);
        Ok(self.nodes.len() - 1)
    }

    /// The node at `index`. Panics if out of range.
    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[TestNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The shared log, for appending foreign commits or injecting failure.
    pub fn log(&self) -> &MemoryLog {
        &self.log
    }

    /// Shut every node down.
    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.store.shutdown().await;
        }
    }
}
