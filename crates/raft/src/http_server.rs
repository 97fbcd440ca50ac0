//! Peer-facing HTTP endpoints.
//!
//! Raft RPCs arrive as JSON `POST`s and are handed straight to the local
//! [`RaftNode`]. Followers also `POST` proposals here when this node leads.

use crate::command::Command;
use crate::type_config::TypeConfig;
use crate::{NodeId, RaftNode};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use openraft::error::{ClientWriteError, RaftError};
use openraft::raft::{AppendEntriesRequest, InstallSnapshotRequest, VoteRequest};
use openraft::{BasicNode, RaftMetrics};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Route paths shared by the server and [`crate::network`].
pub mod paths {
    pub const APPEND_ENTRIES: &str = "/raft/append_entries";
    pub const VOTE: &str = "/raft/vote";
    pub const INSTALL_SNAPSHOT: &str = "/raft/install_snapshot";
    pub const PROPOSE: &str = "/raft/propose";
    pub const HEALTH: &str = "/health";
}

/// Router answering peer RPCs for `raft`.
pub fn peer_router(raft: Arc<RaftNode>) -> Router {
    Router::new()
        .route(paths::APPEND_ENTRIES, post(append_entries))
        .route(paths::VOTE, post(vote))
        .route(paths::INSTALL_SNAPSHOT, post(install_snapshot))
        .route(paths::PROPOSE, post(propose))
        .route(paths::HEALTH, get(health))
        .with_state(raft)
}

/// A running peer server.
pub struct PeerServer {
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<io::Result<()>>,
}

impl PeerServer {
    /// Bind `addr` and serve [`peer_router`] until [`PeerServer::stop`].
    pub async fn spawn(addr: SocketAddr, raft: Arc<RaftNode>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, peer_router(raft))
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                })
                .await
        });

        Ok(Self {
            local_addr,
            stop: Some(stop),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn stop(mut self) -> io::Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task
            .await
            .map_err(|e| io::Error::other(format!("peer server task failed: {e}")))?
    }
}

/// Turn an RPC outcome into a response; failures become `status` with the
/// error text as body.
fn reply<T: Serialize, E: Display>(
    rpc: &'static str,
    result: Result<T, E>,
    status: StatusCode,
) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            debug!(rpc, error = %e, "peer rpc failed");
            (status, e.to_string()).into_response()
        }
    }
}

async fn append_entries(
    State(raft): State<Arc<RaftNode>>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> Response {
    let result = raft.append_entries(req).await;
    reply("append_entries", result, StatusCode::INTERNAL_SERVER_ERROR)
}

async fn vote(State(raft): State<Arc<RaftNode>>, Json(req): Json<VoteRequest<NodeId>>) -> Response {
    let result = raft.vote(req).await;
    reply("vote", result, StatusCode::INTERNAL_SERVER_ERROR)
}

async fn install_snapshot(
    State(raft): State<Arc<RaftNode>>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Response {
    let result = raft.install_snapshot(req).await;
    reply("install_snapshot", result, StatusCode::INTERNAL_SERVER_ERROR)
}

/// 409 means this node does not lead; the sender looks up the leader again.
async fn propose(State(raft): State<Arc<RaftNode>>, Json(cmd): Json<Command>) -> Response {
    let result = raft.client_write(cmd).await;
    let status = match &result {
        Err(RaftError::APIError(ClientWriteError::ForwardToLeader(_))) => StatusCode::CONFLICT,
        Err(e) => {
            warn!(error = %e, "forwarded proposal failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Ok(_) => StatusCode::OK,
    };
    reply("propose", result.map(|r| r.data), status)
}

async fn health(State(raft): State<Arc<RaftNode>>) -> Json<NodeHealth> {
    Json(NodeHealth::from(&*raft.metrics().borrow()))
}

/// Body of `GET /health`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node_id: NodeId,
    pub state: String,
    pub current_leader: Option<NodeId>,
    pub current_term: u64,
    pub last_log_index: Option<u64>,
    pub last_applied: Option<u64>,
    /// False once the raft core has stopped or failed.
    pub running: bool,
}

impl From<&RaftMetrics<NodeId, BasicNode>> for NodeHealth {
    fn from(m: &RaftMetrics<NodeId, BasicNode>) -> Self {
        Self {
            node_id: m.id,
            state: format!("{:?}", m.state),
            current_leader: m.current_leader,
            current_term: m.current_term,
            last_log_index: m.last_log_index,
            last_applied: m.last_applied.map(|l| l.index),
            running: m.running_state.is_ok(),
        }
    }
}
