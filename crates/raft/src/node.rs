//! An openraft node driving a [`ConsensusPipe`].
//!
//! [`RaftPipe::start`] wires a [`RaftStore`] whose state machine forwards
//! applied statements into the pipe, starts the peer HTTP server, and joins
//! the cluster. Three background tasks run for the life of the node:
//!
//! - the forwarder drains the proposal sink in order and submits each
//!   statement with `client_write`, or to the leader's `/raft/propose`;
//! - the watcher turns a fatal raft error into the pipe's [`PipeError`];
//! - the HTTP server answers peer RPCs.

use crate::command::Command;
use crate::config::NodeConfig;
use crate::http_server::PeerServer;
use crate::network::{peer_client, PeerNetwork, PeerUrls};
use crate::pipe::{ConsensusPipe, ErrorSender, PipeDriver};
use crate::storage::{CommitHandler, RaftStore};
use crate::type_config::TypeConfig;
use crate::{NodeId, RaftNode};

use common::PipeError;
use openraft::error::{ClientWriteError, Fatal, InitializeError, RaftError};
use openraft::storage::Adaptor;
use openraft::{BasicNode, Raft, ServerState};
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors starting a raft node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid node config: {0}")]
    Config(String),

    #[error("raft storage: {0}")]
    Io(#[from] io::Error),

    #[error("peer transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("raft: {0}")]
    Raft(String),
}

/// A running raft node whose committed log feeds a [`ConsensusPipe`].
pub struct RaftPipe {
    node_id: NodeId,
    raft: Arc<RaftNode>,
    http: PeerServer,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RaftPipe {
    /// Start a node and return it with the store-facing end of its pipe.
    ///
    /// With persistent storage the whole committed log is re-applied while
    /// the node is constructed, so the pipe already holds the replayed
    /// history followed by the replay boundary when this returns.
    pub async fn start(config: NodeConfig) -> Result<(RaftPipe, ConsensusPipe), NodeError> {
        let raft_config = config
            .to_openraft_config()
            .validate()
            .map_err(|e| NodeError::Config(e.to_string()))?;

        let listen_addr = resolve(&config.listen_addr).await?;
        let (pipe, driver) = ConsensusPipe::channel(config.proposal_capacity);
        let PipeDriver {
            proposals,
            commits,
            errors,
        } = driver;

        let sink = commits.clone();
        let on_commit: CommitHandler = Arc::new(move |index, cmd: &Command| {
            if !sink.commit(cmd.sql.clone()) {
                debug!(index, "commit stream closed, statement not delivered");
            }
        });
        let store = if config.persistent_storage {
            RaftStore::open(&config.data_dir, Some(on_commit))?
        } else {
            RaftStore::in_memory(Some(on_commit))
        };
        let (log_store, state_machine) =
            Adaptor::<TypeConfig, Arc<RaftStore>>::new(Arc::new(store));

        let network = PeerNetwork::new(PeerUrls::from_members(config.members()), peer_client()?);
        let raft = Raft::new(
            config.node_id,
            Arc::new(raft_config),
            network.clone(),
            log_store,
            state_machine,
        )
        .await
        .map_err(|e| NodeError::Raft(e.to_string()))?;
        let raft = Arc::new(raft);

        commits.replay_complete();
        drop(commits);

        let http = PeerServer::spawn(listen_addr, raft.clone()).await?;
        info!(
            node = config.node_id,
            addr = %http.local_addr(),
            peers = config.peers.len(),
            "raft node listening"
        );

        let members: BTreeMap<NodeId, BasicNode> = config
            .members()
            .into_iter()
            .map(|(id, addr)| (id, BasicNode::new(addr)))
            .collect();
        match raft.initialize(members).await {
            Ok(()) => info!(node = config.node_id, "initialized cluster membership"),
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                debug!(node = config.node_id, "cluster already initialized")
            }
            Err(e) => return Err(NodeError::Raft(e.to_string())),
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let forwarder = Forwarder {
            node_id: config.node_id,
            raft: raft.clone(),
            network,
            retry_delay: config.propose_retry_delay(),
            shutdown: shutdown_rx.clone(),
        };
        let tasks = vec![
            tokio::spawn(forwarder.run(proposals)),
            tokio::spawn(watch_for_failure(raft.clone(), errors, shutdown_rx)),
        ];

        Ok((
            RaftPipe {
                node_id: config.node_id,
                raft,
                http,
                shutdown,
                tasks,
            },
            pipe,
        ))
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn raft(&self) -> &Arc<RaftNode> {
        &self.raft
    }

    /// Address the peer HTTP server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.http.local_addr()
    }

    pub fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().state == ServerState::Leader
    }

    /// Wait until some node is known as leader.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<NodeId, NodeError> {
        let metrics = self
            .raft
            .wait(Some(timeout))
            .metrics(|m| m.current_leader.is_some(), "leader elected")
            .await
            .map_err(|e| NodeError::Raft(e.to_string()))?;
        metrics
            .current_leader
            .ok_or_else(|| NodeError::Raft("no leader".to_string()))
    }

    /// Stop the background tasks, the raft core and the HTTP server.
    ///
    /// The commit stream closes once the raft core has stopped.
    pub async fn shutdown(mut self) -> Result<(), NodeError> {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "raft background task panicked");
            }
        }
        self.raft
            .shutdown()
            .await
            .map_err(|e| NodeError::Raft(e.to_string()))?;
        self.http.stop().await?;
        info!(node = self.node_id, "raft node stopped");
        Ok(())
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, NodeError> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| NodeError::Config(format!("listen address {addr} does not resolve")))
}

/// Submits proposals to the cluster one at a time, in sink order.
struct Forwarder {
    node_id: NodeId,
    raft: Arc<RaftNode>,
    network: PeerNetwork,
    retry_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Forwarder {
    async fn run(mut self, mut proposals: mpsc::Receiver<String>) {
        loop {
            let sql = tokio::select! {
                next = proposals.recv() => match next {
                    Some(sql) => sql,
                    None => break,
                },
                _ = self.shutdown.changed() => return,
            };
            if !self.submit(Command::new(sql)).await {
                return;
            }
        }

        // The store dropped its end of the pipe.
        info!(node = self.node_id, "proposal sink closed, stopping raft node");
        if let Err(e) = self.raft.shutdown().await {
            warn!(error = %e, "raft shutdown failed");
        }
    }

    /// Keep submitting `command` until some leader accepts it. Returns false
    /// when the node is shutting down or has failed.
    async fn submit(&mut self, command: Command) -> bool {
        loop {
            match self.raft.client_write(command.clone()).await {
                Ok(response) => {
                    debug!(index = response.log_id.index, "proposal committed");
                    return true;
                }
                Err(RaftError::APIError(ClientWriteError::ForwardToLeader(forward))) => {
                    match forward.leader_id {
                        Some(leader) if leader != self.node_id => {
                            match self.network.forward_proposal(leader, &command).await {
                                Ok(response) => {
                                    debug!(leader, index = ?response.index(), "proposal forwarded");
                                    return true;
                                }
                                Err(e) if e.is_not_leader() => {
                                    debug!(leader, "leader changed, retrying proposal")
                                }
                                Err(e) => warn!(leader, error = %e, "forwarding proposal failed"),
                            }
                        }
                        _ => debug!(node = self.node_id, "no leader known, retrying proposal"),
                    }
                }
                Err(RaftError::Fatal(fatal)) => {
                    debug!(error = %fatal, "raft stopped while proposing");
                    return false;
                }
                Err(e) => warn!(error = %e, "proposal rejected, retrying"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = self.shutdown.changed() => return false,
            }
        }
    }
}

/// Report the first fatal raft error on the pipe.
async fn watch_for_failure(
    raft: Arc<RaftNode>,
    errors: ErrorSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut metrics = raft.metrics();
    loop {
        let fatal = match &metrics.borrow_and_update().running_state {
            Ok(()) => None,
            Err(Fatal::Stopped) => return,
            Err(e) => Some(e.to_string()),
        };
        if let Some(message) = fatal {
            error!(error = %message, "raft node failed");
            errors.fail(PipeError::new(message));
            return;
        }

        tokio::select! {
            changed = metrics.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}
