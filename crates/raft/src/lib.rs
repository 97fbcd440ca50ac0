//! Consensus pipes for the replicated SQL store.
//!
//! A [`ConsensusPipe`] is the only thing the store knows about consensus: a
//! sink for proposed statement text, an ordered stream of committed statement
//! text, and a one-shot terminal error. This crate provides two producers for
//! that boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             Node                                      │
//! │  ┌────────────────┐  proposals  ┌─────────────┐   client_write        │
//! │  │ ReplicatedStore │───────────▶│  RaftPipe   │──────────────┐        │
//! │  │ (database)      │◀───────────│ (node.rs)   │              ▼        │
//! │  └────────────────┘   commits   └─────────────┘     ┌──────────────┐  │
//! │                                        ▲            │  RaftStore   │  │
//! │                                        └────────────│ (storage.rs) │  │
//! │                                      on_commit      └──────────────┘  │
//! │                                                                       │
//! │  ┌──────────────┐   /raft/append_entries, /raft/vote, /raft/propose   │
//! │  │ HTTP server  │◀──────────────────────────────────────────────────  │
//! │  │ (axum)       │                 peers (PeerNetwork, reqwest)        │
//! │  └──────────────┘                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`MemoryLog`] is the in-process alternative: one total order shared by any
//! number of joined nodes, used for tests and single-process deployments.
//!
//! # HTTP Endpoints
//!
//! Each raft node exposes:
//! - `POST /raft/append_entries` - Log replication from leader
//! - `POST /raft/vote` - Leader election votes
//! - `POST /raft/install_snapshot` - State transfer for new nodes
//! - `POST /raft/propose` - Proposals forwarded by followers
//! - `GET /health` - Node health and Raft status
//!
//! # Modules
//!
//! - [`pipe`]: the boundary type consumed by the store
//! - [`memory`]: in-process ordered log
//! - [`node`]: openraft-backed pipe
//! - [`command`]: replicated log payload
//! - [`config`]: node configuration
//! - [`http_server`]: axum endpoints for raft RPCs
//! - [`network`]: HTTP transport to other members
//! - [`storage`]: raft log and state machine storage
//! - [`type_config`]: OpenRaft type configuration

pub mod command;
pub mod config;
pub mod http_server;
pub mod memory;
pub mod network;
pub mod node;
pub mod pipe;
pub mod storage;
pub mod type_config;

pub use command::{Command, CommandResponse};
pub use config::{NodeConfig, RaftTiming};
pub use http_server::{peer_router, NodeHealth, PeerServer};
pub use memory::MemoryLog;
pub use network::{peer_client, PeerConnection, PeerError, PeerNetwork, PeerUrls};
pub use node::{NodeError, RaftPipe};
pub use pipe::{
    CommitEntry, CommitSender, ConsensusPipe, ErrorSender, PipeDriver, DEFAULT_PROPOSAL_CAPACITY,
};
pub use storage::{CommitHandler, RaftStore};
pub use type_config::TypeConfig;

use openraft::Raft;

/// The Raft consensus node type.
pub type RaftNode = Raft<TypeConfig>;

/// Node identifier type.
pub type NodeId = u64;
