//! The single consumer of a store's commit stream.
//!
//! Each committed statement is executed under the engine's exclusive gate and
//! only then handed to the correlator; the gate is never held while a waiter
//! is notified. The applier owns the end of the store's life: it is the one
//! that closes the correlator and the engine, and it reports how the store
//! ended.

use crate::correlator::ProposalCorrelator;
use crate::engine::Engine;
use crate::store::{ApplyStats, Termination};
use common::{PipeError, StoreError};
use raft::CommitEntry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Receives a copy of every entry the applier consumes.
pub type ReplayTap = mpsc::UnboundedSender<CommitEntry>;

/// Where the applier is in the store's lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Replaying,
    Running,
    Done(Termination),
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    applied: AtomicU64,
    failed: AtomicU64,
    correlated: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> ApplyStats {
        ApplyStats {
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            correlated: self.correlated.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct CommitApplier {
    pub(crate) engine: Engine,
    pub(crate) correlator: Arc<ProposalCorrelator>,
    pub(crate) commits: mpsc::UnboundedReceiver<CommitEntry>,
    pub(crate) errors: oneshot::Receiver<PipeError>,
    pub(crate) tap: Option<ReplayTap>,
    pub(crate) phase: watch::Sender<Phase>,
    pub(crate) counters: Arc<Counters>,
    pub(crate) stop: watch::Receiver<bool>,
}

impl CommitApplier {
    pub(crate) async fn run(mut self) -> Termination {
        let mut errors_open = true;
        let termination = loop {
            tokio::select! {
                biased;

                _ = self.stop.changed() => break Termination::Stopped,

                received = &mut self.errors, if errors_open => match received {
                    Ok(err) => {
                        self.drain_committed().await;
                        break Termination::Failed(err);
                    }
                    // The pipe went away without failing.
                    Err(_) => errors_open = false,
                },

                entry = self.commits.recv() => match entry {
                    Some(entry) => self.consume(entry).await,
                    None => break self.end_of_stream(errors_open).await,
                },
            }
        };
        self.finish(termination).await
    }

    async fn consume(&self, entry: CommitEntry) {
        if let Some(tap) = &self.tap {
            let _ = tap.send(entry.clone());
        }
        match entry {
            CommitEntry::Statement(sql) => self.apply(sql).await,
            CommitEntry::ReplayComplete => self.replay_complete(),
        }
    }

    /// Entries already committed when the pipe failed are still applied.
    /// The stream is closed before the error is sent, so this ends.
    async fn drain_committed(&mut self) {
        while let Ok(entry) = self.commits.try_recv() {
            self.consume(entry).await;
        }
    }

    async fn apply(&self, sql: String) {
        let outcome = self.engine.execute(sql.as_str()).await;
        match &outcome {
            Ok(()) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                debug!(statement = %sql, "applied commit");
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    statement = %sql,
                    error = %err,
                    "committed statement failed locally; this node may now diverge from its peers"
                );
            }
        }

        if let Some(id) = self.correlator.resolve(&sql, outcome) {
            self.counters.correlated.fetch_add(1, Ordering::Relaxed);
            debug!(proposal = id, "resolved proposal");
        }
    }

    fn replay_complete(&self) {
        let replayed = self.counters.snapshot();
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Replaying {
                *phase = Phase::Running;
                true
            } else {
                false
            }
        });
        info!(
            applied = replayed.applied,
            failed = replayed.failed,
            "replay complete"
        );
    }

    /// The commit stream closed; the error channel decides how.
    async fn end_of_stream(&mut self, errors_open: bool) -> Termination {
        if !errors_open {
            return Termination::Stopped;
        }
        tokio::select! {
            received = &mut self.errors => match received {
                Ok(err) => Termination::Failed(err),
                Err(_) => Termination::Stopped,
            },
            _ = self.stop.changed() => Termination::Stopped,
        }
    }

    async fn finish(self, termination: Termination) -> Termination {
        let failed = match &termination {
            Termination::Stopped => {
                info!("commit stream stopped");
                self.correlator.close(StoreError::Closed)
            }
            Termination::Failed(err) => {
                error!(error = %err, "consensus pipe failed, store is no longer usable");
                self.correlator.close(StoreError::Pipe(err.clone()))
            }
        };
        if failed > 0 {
            debug!(pending = failed, "failed pending proposals");
        }

        self.engine.close().await;
        drop(self.tap);
        self.phase.send_replace(Phase::Done(termination.clone()));
        termination
    }
}
