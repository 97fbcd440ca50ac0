//! The boundary between a consensus layer and the store that consumes it.
//!
//! The store side holds a [`ConsensusPipe`]; the producer side holds the
//! matching [`PipeDriver`]. Committed entries travel on an unbounded channel so
//! a producer applying entries never waits on the store, while proposals use a
//! bounded channel so a slow consensus layer pushes back on proposers.

use common::PipeError;
use tokio::sync::{mpsc, oneshot};

/// Capacity of the proposal sink when none is configured.
pub const DEFAULT_PROPOSAL_CAPACITY: usize = 128;

/// One item on the committed stream.
///
/// The end of the stream is the channel closing; after that the error
/// receiver tells whether the pipe failed or was simply shut down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitEntry {
    /// A statement the cluster agreed on, in cluster order.
    Statement(String),
    /// Every entry committed before this node (re)joined has been delivered.
    ReplayComplete,
}

impl CommitEntry {
    pub fn statement(&self) -> Option<&str> {
        match self {
            CommitEntry::Statement(sql) => Some(sql),
            CommitEntry::ReplayComplete => None,
        }
    }
}

/// Store-facing half of a consensus layer.
///
/// Consumed by value when a store is opened, so a single task ever reads the
/// committed stream.
#[derive(Debug)]
pub struct ConsensusPipe {
    /// Sink for statement text to propose.
    pub proposals: mpsc::Sender<String>,
    /// Committed statements in cluster order.
    pub commits: mpsc::UnboundedReceiver<CommitEntry>,
    /// Fires at most once, when the consensus layer fails irrecoverably.
    pub errors: oneshot::Receiver<PipeError>,
}

impl ConsensusPipe {
    /// Create a connected pipe/driver pair.
    pub fn channel(capacity: usize) -> (ConsensusPipe, PipeDriver) {
        let (proposals_tx, proposals_rx) = mpsc::channel(capacity.max(1));
        let (commits_tx, commits_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = oneshot::channel();

        let pipe = ConsensusPipe {
            proposals: proposals_tx,
            commits: commits_rx,
            errors: errors_rx,
        };
        let driver = PipeDriver {
            proposals: proposals_rx,
            commits: CommitSender { tx: commits_tx },
            errors: ErrorSender { tx: errors_tx },
        };
        (pipe, driver)
    }
}

/// Producer-facing half of a consensus layer.
#[derive(Debug)]
pub struct PipeDriver {
    /// Statements submitted by the store, in submission order.
    pub proposals: mpsc::Receiver<String>,
    pub commits: CommitSender,
    pub errors: ErrorSender,
}

impl PipeDriver {
    /// Close the committed stream, then report `err`.
    pub fn fail(self, err: PipeError) {
        let PipeDriver {
            proposals,
            commits,
            errors,
        } = self;
        drop(proposals);
        drop(commits);
        errors.fail(err);
    }
}

/// Cloneable sender for committed entries.
#[derive(Clone, Debug)]
pub struct CommitSender {
    tx: mpsc::UnboundedSender<CommitEntry>,
}

impl CommitSender {
    /// Deliver a committed statement. Returns false once the store is gone.
    pub fn commit(&self, sql: impl Into<String>) -> bool {
        self.tx.send(CommitEntry::Statement(sql.into())).is_ok()
    }

    /// Mark the end of replayed history.
    pub fn replay_complete(&self) -> bool {
        self.tx.send(CommitEntry::ReplayComplete).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One-shot sender for the pipe's terminal error.
#[derive(Debug)]
pub struct ErrorSender {
    tx: oneshot::Sender<PipeError>,
}

impl ErrorSender {
    pub fn fail(self, err: PipeError) {
        let _ = self.tx.send(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commits_arrive_in_send_order() {
        let (mut pipe, driver) = ConsensusPipe::channel(4);

        assert!(driver.commits.commit("CREATE TABLE t (id int)"));
        assert!(driver.commits.replay_complete());
        assert!(driver.commits.commit("INSERT INTO t VALUES (1)"));

        assert_eq!(
            pipe.commits.recv().await,
            Some(CommitEntry::Statement("CREATE TABLE t (id int)".into()))
        );
        assert_eq!(pipe.commits.recv().await, Some(CommitEntry::ReplayComplete));
        assert_eq!(
            pipe.commits.recv().await.as_ref().and_then(|e| e.statement()),
            Some("INSERT INTO t VALUES (1)")
        );
    }

    #[tokio::test]
    async fn proposals_reach_the_driver() {
        let (pipe, mut driver) = ConsensusPipe::channel(1);
        pipe.proposals.send("DELETE FROM t".into()).await.unwrap();
        assert_eq!(driver.proposals.recv().await.as_deref(), Some("DELETE FROM t"));
    }

    #[tokio::test]
    async fn fail_closes_stream_before_reporting() {
        let (mut pipe, driver) = ConsensusPipe::channel(1);
        driver.fail(PipeError::new("boom"));

        assert_eq!(pipe.commits.recv().await, None);
        assert_eq!(pipe.errors.await.unwrap(), PipeError::new("boom"));
    }

    #[tokio::test]
    async fn commit_reports_dropped_store() {
        let (pipe, driver) = ConsensusPipe::channel(1);
        drop(pipe);
        assert!(!driver.commits.commit("INSERT INTO t VALUES (2)"));
        assert!(driver.commits.is_closed());
    }
}
