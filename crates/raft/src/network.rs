//! Reaching other cluster members over HTTP.
//!
//! Requests are JSON `POST`s to the routes in [`crate::http_server::paths`].

use crate::command::{Command, CommandResponse};
use crate::http_server::paths;
use crate::type_config::TypeConfig;
use crate::NodeId;
use openraft::error::{InstallSnapshotError, RPCError, RaftError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to one peer.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("no address for node {0}")]
    UnknownPeer(NodeId),

    #[error("{url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("{url} sent an unreadable body: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl PeerError {
    /// The peer refused a proposal because it is not the leader.
    pub fn is_not_leader(&self) -> bool {
        matches!(self, PeerError::Status { status: 409, .. })
    }
}

/// Base URL of every cluster member, keyed by node id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerUrls {
    urls: BTreeMap<NodeId, String>,
}

impl PeerUrls {
    /// Build from `(id, address)` pairs. A bare `host:port` gets `http://`.
    pub fn from_members(members: impl IntoIterator<Item = (NodeId, String)>) -> Self {
        let urls = members
            .into_iter()
            .map(|(id, addr)| (id, base_url(&addr)))
            .collect();
        Self { urls }
    }

    pub fn get(&self, node_id: NodeId) -> Option<&str> {
        self.urls.get(&node_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

fn base_url(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

/// Build the HTTP client shared by every peer connection.
pub fn peer_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(10)
        .build()
}

/// Hands openraft one [`PeerConnection`] per target.
#[derive(Clone)]
pub struct PeerNetwork {
    urls: Arc<PeerUrls>,
    client: reqwest::Client,
}

impl PeerNetwork {
    pub fn new(urls: PeerUrls, client: reqwest::Client) -> Self {
        Self {
            urls: Arc::new(urls),
            client,
        }
    }

    pub fn connect(&self, target: NodeId) -> Result<PeerConnection, PeerError> {
        let url = self.urls.get(target).ok_or(PeerError::UnknownPeer(target))?;
        Ok(PeerConnection::new(target, url.to_string(), self.client.clone()))
    }

    /// Submit a proposal to `leader`.
    pub async fn forward_proposal(
        &self,
        leader: NodeId,
        command: &Command,
    ) -> Result<CommandResponse, PeerError> {
        self.connect(leader)?.call(paths::PROPOSE, command).await
    }
}

impl std::fmt::Debug for PeerNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerNetwork").field("urls", &self.urls).finish()
    }
}

impl RaftNetworkFactory<TypeConfig> for PeerNetwork {
    type Network = PeerConnection;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> PeerConnection {
        self.connect(target).unwrap_or_else(|_| {
            PeerConnection::new(target, base_url(&node.addr), self.client.clone())
        })
    }
}

/// Raft RPCs to a single peer.
#[derive(Clone)]
pub struct PeerConnection {
    target: NodeId,
    base_url: String,
    client: reqwest::Client,
}

impl PeerConnection {
    fn new(target: NodeId, base_url: String, client: reqwest::Client) -> Self {
        Self {
            target,
            base_url,
            client,
        }
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, PeerError> {
        let url = format!("{}{}", self.base_url, path);
        let response = match self.client.post(&url).json(request).send().await {
            Ok(response) => response,
            Err(source) => return Err(PeerError::Unreachable { url, source }),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PeerError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        match response.json().await {
            Ok(body) => Ok(body),
            Err(source) => Err(PeerError::Decode { url, source }),
        }
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("target", &self.target)
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn as_unreachable<E: std::error::Error>(
    err: PeerError,
) -> RPCError<NodeId, BasicNode, RaftError<NodeId, E>> {
    RPCError::Unreachable(Unreachable::new(&err))
}

impl RaftNetwork<TypeConfig> for PeerConnection {
    async fn append_entries(
        &mut self,
        req: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.call(paths::APPEND_ENTRIES, &req).await.map_err(as_unreachable)
    }

    async fn install_snapshot(
        &mut self,
        req: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        self.call(paths::INSTALL_SNAPSHOT, &req).await.map_err(as_unreachable)
    }

    async fn vote(
        &mut self,
        req: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.call(paths::VOTE, &req).await.map_err(as_unreachable)
    }
}
