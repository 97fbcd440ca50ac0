//! The replicated store: mutations through consensus, queries served locally.

use crate::applier::{CommitApplier, Counters, Phase, ReplayTap};
use crate::correlator::{Outcome, ProposalCorrelator, ProposalId};
use crate::engine::{Engine, DEFAULT_READ_POOL_SIZE};
use common::{expect_kind, PipeError, StatementKind, StoreError, StoreResult};
use raft::ConsensusPipe;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Settings for opening a [`ReplicatedStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Engine file. Recreated on every open and rebuilt from the log.
    pub engine_path: PathBuf,
    pub read_pool_size: u32,
    /// Observer of every consumed commit entry, replay boundary included.
    pub replay_tap: Option<ReplayTap>,
}

impl StoreConfig {
    pub fn new(engine_path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: engine_path.into(),
            read_pool_size: DEFAULT_READ_POOL_SIZE,
            replay_tap: None,
        }
    }

    pub fn with_read_pool_size(mut self, size: u32) -> Self {
        self.read_pool_size = size;
        self
    }

    pub fn with_replay_tap(mut self, tap: ReplayTap) -> Self {
        self.replay_tap = Some(tap);
        self
    }
}

/// How a store ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Shut down explicitly, or the commit stream ended without an error.
    Stopped,
    /// The consensus pipe failed.
    Failed(PipeError),
}

/// Observable lifecycle of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreState {
    /// Applying history committed before this node (re)joined.
    Replaying,
    Running,
    Stopped,
    Failed,
}

/// Counters kept by the commit applier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Commits that executed successfully.
    pub applied: u64,
    /// Commits the local engine rejected.
    pub failed: u64,
    /// Commits that resolved a waiting proposal.
    pub correlated: u64,
}

/// Outcome of a proposal. Resolves exactly once.
///
/// Dropping the handle does not withdraw the proposal: once sent, the
/// statement may still be committed and applied.
#[derive(Debug)]
pub struct ProposalHandle {
    id: Option<ProposalId>,
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Ready(Option<Outcome>),
    Waiting(oneshot::Receiver<Outcome>),
}

impl ProposalHandle {
    fn ready(outcome: Outcome) -> Self {
        Self {
            id: None,
            state: HandleState::Ready(Some(outcome)),
        }
    }

    fn waiting(id: ProposalId, rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            id: Some(id),
            state: HandleState::Waiting(rx),
        }
    }

    /// Registration id, if the proposal was registered at all.
    pub fn id(&self) -> Option<ProposalId> {
        self.id
    }
}

impl Future for ProposalHandle {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        match &mut self.get_mut().state {
            HandleState::Ready(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(StoreError::Closed)))
            }
            HandleState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(StoreError::Closed))),
        }
    }
}

/// A relational store whose mutations are agreed on by a cluster.
///
/// Cheap to clone; clones share one engine and one applier.
#[derive(Clone)]
pub struct ReplicatedStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    engine: Engine,
    correlator: Arc<ProposalCorrelator>,
    /// Taken on shutdown, which closes the pipe's propose sink.
    proposals: Mutex<Option<mpsc::Sender<String>>>,
    phase: watch::Receiver<Phase>,
    stop: watch::Sender<bool>,
    applier: tokio::sync::Mutex<Option<JoinHandle<Termination>>>,
    counters: Arc<Counters>,
}

impl ReplicatedStore {
    /// Open a store over `pipe` and replay its history.
    ///
    /// Returns once the replay boundary has been applied. Fails if the pipe
    /// fails or ends before that.
    pub async fn open(config: StoreConfig, pipe: ConsensusPipe) -> StoreResult<Self> {
        let engine = Engine::open(&config.engine_path, config.read_pool_size).await?;
        let ConsensusPipe {
            proposals,
            commits,
            errors,
        } = pipe;

        let correlator = Arc::new(ProposalCorrelator::new());
        let counters = Arc::new(Counters::default());
        let (phase_tx, mut phase) = watch::channel(Phase::Replaying);
        let (stop, stop_rx) = watch::channel(false);

        let applier = CommitApplier {
            engine: engine.clone(),
            correlator: correlator.clone(),
            commits,
            errors,
            tap: config.replay_tap,
            phase: phase_tx,
            counters: counters.clone(),
            stop: stop_rx,
        };
        let handle = tokio::spawn(applier.run());
        info!(engine = %config.engine_path.display(), "store opened, replaying commits");

        let replayed = phase
            .wait_for(|p| *p != Phase::Replaying)
            .await
            .map(|p| p.clone());
        match replayed {
            Ok(Phase::Running) => {}
            Ok(Phase::Done(Termination::Failed(err))) => return Err(StoreError::Pipe(err)),
            _ => return Err(StoreError::Closed),
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                engine,
                correlator,
                proposals: Mutex::new(Some(proposals)),
                phase,
                stop,
                applier: tokio::sync::Mutex::new(Some(handle)),
                counters,
            }),
        })
    }

    /// Submit a mutation for replication.
    ///
    /// A statement classified as a query is rejected at once. Otherwise a
    /// waiter is registered before the statement enters the pipe; this may
    /// wait while the pipe applies backpressure.
    pub async fn propose(&self, sql: impl Into<String>) -> ProposalHandle {
        let sql = sql.into();
        if let Err(err) = expect_kind(&sql, StatementKind::Mutation) {
            return ProposalHandle::ready(Err(err));
        }

        let (id, rx) = match self.inner.correlator.enqueue(&sql) {
            Ok(registered) => registered,
            Err(err) => return ProposalHandle::ready(Err(err)),
        };

        let sink = self.inner.sink().clone();
        let sent = match sink {
            Some(sink) => sink.send(sql.clone()).await.is_ok(),
            None => false,
        };
        if !sent {
            if self.inner.correlator.withdraw(&sql, id, Err(StoreError::Closed)) {
                debug!(proposal = id, "proposal withdrawn, pipe is closed");
            }
        } else {
            debug!(proposal = id, statement = %sql, "proposal sent");
        }
        ProposalHandle::waiting(id, rx)
    }

    /// Propose and wait for the outcome.
    pub async fn execute(&self, sql: impl Into<String>) -> StoreResult<()> {
        self.propose(sql).await.await
    }

    /// Run a query against local state.
    pub async fn query(&self, sql: impl Into<String>) -> StoreResult<String> {
        let sql = sql.into();
        expect_kind(&sql, StatementKind::Query)?;
        match self.inner.engine.query(sql).await {
            Err(StoreError::Closed) => Err(self.closed_error()),
            result => result,
        }
    }

    /// Stop applying commits and close the engine. Idempotent.
    ///
    /// Every pending proposal resolves before this returns.
    pub async fn shutdown(&self) -> Termination {
        let _ = self.inner.stop.send(true);
        drop(self.inner.sink().take());

        let handle = self.inner.applier.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "commit applier panicked");
            }
        }
        self.terminated().await
    }

    /// Wait until the store ends, by shutdown or pipe failure.
    pub async fn terminated(&self) -> Termination {
        let mut phase = self.inner.phase.clone();
        let done = phase
            .wait_for(|p| matches!(p, Phase::Done(_)))
            .await
            .map(|p| p.clone());
        match done {
            Ok(Phase::Done(termination)) => termination,
            _ => Termination::Failed(PipeError::new("commit applier exited unexpectedly")),
        }
    }

    pub fn state(&self) -> StoreState {
        match &*self.inner.phase.borrow() {
            Phase::Replaying => StoreState::Replaying,
            Phase::Running => StoreState::Running,
            Phase::Done(Termination::Stopped) => StoreState::Stopped,
            Phase::Done(Termination::Failed(_)) => StoreState::Failed,
        }
    }

    pub fn stats(&self) -> ApplyStats {
        self.inner.counters.snapshot()
    }

    /// Proposals registered but not yet resolved.
    pub fn pending(&self) -> usize {
        self.inner.correlator.pending()
    }

    pub fn engine_path(&self) -> &Path {
        self.inner.engine.path()
    }

    fn closed_error(&self) -> StoreError {
        match &*self.inner.phase.borrow() {
            Phase::Done(Termination::Failed(err)) => StoreError::Pipe(err.clone()),
            _ => StoreError::Closed,
        }
    }
}

impl StoreInner {
    fn sink(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        self.proposals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ReplicatedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedStore")
            .field("engine", &self.inner.engine)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}
