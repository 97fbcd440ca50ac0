//! Raft node configuration.

use crate::pipe::DEFAULT_PROPOSAL_CAPACITY;
use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Election and heartbeat timings, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftTiming {
    /// A random election timeout is drawn from `election_min..election_max`.
    pub election_min_ms: u64,
    pub election_max_ms: u64,
    pub heartbeat_ms: u64,
}

impl Default for RaftTiming {
    fn default() -> Self {
        Self {
            election_min_ms: 150,
            election_max_ms: 300,
            heartbeat_ms: 50,
        }
    }
}

/// Everything needed to start one member of a raftsql cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: NodeId,

    /// Holds `raft.log` and `raft_state.json` when storage is persistent.
    pub data_dir: PathBuf,

    /// Peer RPC address of this node, `host:port`.
    pub listen_addr: String,

    /// Peer RPC address of every other member.
    pub peers: BTreeMap<NodeId, String>,

    pub timing: RaftTiming,

    /// Keep the log on disk so a restart replays it. In-memory nodes start
    /// empty every time.
    pub persistent_storage: bool,

    /// Capacity of the proposal sink handed to the store.
    pub proposal_capacity: usize,

    /// Delay before retrying a proposal while no leader is known.
    pub propose_retry_delay_ms: u64,
}

impl NodeConfig {
    pub fn new(node_id: NodeId, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id,
            data_dir: data_dir.into(),
            listen_addr: "127.0.0.1:9021".to_string(),
            peers: BTreeMap::new(),
            timing: RaftTiming::default(),
            persistent_storage: true,
            proposal_capacity: DEFAULT_PROPOSAL_CAPACITY,
            propose_retry_delay_ms: 100,
        }
    }

    /// Build a config from the cluster's URL list, as given on the command line.
    ///
    /// `cluster` lists every member in node-id order starting at 1; the entry
    /// at `node_id` becomes this node's listen address. Returns `None` when
    /// `node_id` has no entry.
    pub fn from_cluster(
        node_id: NodeId,
        data_dir: impl Into<PathBuf>,
        cluster: &[String],
    ) -> Option<Self> {
        let mut members: BTreeMap<NodeId, String> = cluster
            .iter()
            .enumerate()
            .map(|(i, url)| (i as NodeId + 1, host_port(url)))
            .collect();
        let own = members.remove(&node_id)?;

        let mut config = Self::new(node_id, data_dir).with_listen_addr(own);
        config.peers = members;
        Some(config)
    }

    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub fn with_peer(mut self, node_id: NodeId, addr: impl Into<String>) -> Self {
        self.peers.insert(node_id, addr.into());
        self
    }

    pub fn with_timing(mut self, timing: RaftTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_persistent_storage(mut self, enabled: bool) -> Self {
        self.persistent_storage = enabled;
        self
    }

    pub fn with_proposal_capacity(mut self, capacity: usize) -> Self {
        self.proposal_capacity = capacity;
        self
    }

    /// This node and its peers, ordered by id.
    pub fn members(&self) -> Vec<(NodeId, String)> {
        let mut members = self.peers.clone();
        members.insert(self.node_id, self.listen_addr.clone());
        members.into_iter().collect()
    }

    pub fn propose_retry_delay(&self) -> Duration {
        Duration::from_millis(self.propose_retry_delay_ms)
    }

    /// The openraft settings for this node.
    ///
    /// Snapshots are never taken, so the log is never purged and a restarting
    /// node can always replay its full history.
    pub fn to_openraft_config(&self) -> openraft::Config {
        openraft::Config {
            cluster_name: "raftsql".to_string(),
            election_timeout_min: self.timing.election_min_ms,
            election_timeout_max: self.timing.election_max_ms,
            heartbeat_interval: self.timing.heartbeat_ms,
            snapshot_policy: openraft::SnapshotPolicy::Never,
            ..Default::default()
        }
    }
}

/// `http://host:port/` to `host:port`.
fn host_port(url: &str) -> String {
    let url = url.trim();
    url.strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url)
        .trim_end_matches('/')
        .to_string()
}
