//! In-process ordered log.
//!
//! `MemoryLog` stands in for a consensus cluster inside one process: every
//! node joined to the same log observes one total order of statements. It is
//! what the store's tests run against and what the server uses when started
//! without a raft cluster.

use crate::pipe::{CommitSender, ConsensusPipe, ErrorSender, PipeDriver, DEFAULT_PROPOSAL_CAPACITY};
use common::PipeError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// A single total order of committed statements shared by joined nodes.
#[derive(Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<LogState>>,
}

#[derive(Default)]
struct LogState {
    entries: Vec<String>,
    nodes: Vec<JoinedNode>,
    failure: Option<PipeError>,
    next_node: u64,
}

struct JoinedNode {
    id: u64,
    commits: CommitSender,
    errors: ErrorSender,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a new node to the log.
    ///
    /// The returned pipe first yields every entry already in the log, then
    /// [`CommitEntry::ReplayComplete`](crate::CommitEntry::ReplayComplete),
    /// then live entries. Must be called from within a tokio runtime.
    pub fn join(&self) -> ConsensusPipe {
        self.join_with_capacity(DEFAULT_PROPOSAL_CAPACITY)
    }

    pub fn join_with_capacity(&self, capacity: usize) -> ConsensusPipe {
        let (pipe, driver) = ConsensusPipe::channel(capacity);
        let PipeDriver {
            mut proposals,
            commits,
            errors,
        } = driver;

        {
            let mut state = self.state();
            if let Some(err) = state.failure.clone() {
                drop(commits);
                errors.fail(err);
                return pipe;
            }

            for sql in &state.entries {
                commits.commit(sql.clone());
            }
            commits.replay_complete();

            let id = state.next_node;
            state.next_node += 1;
            debug!(node = id, replayed = state.entries.len(), "node joined memory log");
            state.nodes.push(JoinedNode {
                id,
                commits,
                errors,
            });
        }

        let log = self.clone();
        tokio::spawn(async move {
            while let Some(sql) = proposals.recv().await {
                if let Err(err) = log.append(sql) {
                    debug!(error = %err, "dropping proposal on failed log");
                    break;
                }
            }
        });

        pipe
    }

    /// Commit a statement and deliver it to every joined node.
    ///
    /// Also how a test simulates a statement proposed by some other node.
    /// Returns the 1-based position of the entry in the log.
    pub fn append(&self, sql: impl Into<String>) -> Result<u64, PipeError> {
        let sql = sql.into();
        let mut state = self.state();
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }

        state.entries.push(sql.clone());
        let index = state.entries.len() as u64;
        state.nodes.retain(|node| {
            let delivered = node.commits.commit(sql.clone());
            if !delivered {
                debug!(node = node.id, "node left memory log");
            }
            delivered
        });
        Ok(index)
    }

    /// Fail the log: every joined node, and every later join, observes `message`.
    pub fn fail(&self, message: impl Into<String>) {
        let err = PipeError::new(message);
        let mut state = self.state();
        if state.failure.is_some() {
            return;
        }
        warn!(error = %err, nodes = state.nodes.len(), "failing memory log");
        state.failure = Some(err.clone());
        for node in state.nodes.drain(..) {
            let JoinedNode { commits, errors, .. } = node;
            drop(commits);
            errors.fail(err.clone());
        }
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every committed entry, in order.
    pub fn entries(&self) -> Vec<String> {
        self.state().entries.clone()
    }

    pub fn is_failed(&self) -> bool {
        self.state().failure.is_some()
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommitEntry;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(pipe: &mut ConsensusPipe) -> Option<CommitEntry> {
        timeout(Duration::from_secs(5), pipe.commits.recv())
            .await
            .expect("commit stream stalled")
    }

    #[tokio::test]
    async fn fresh_join_sees_only_the_boundary() {
        let log = MemoryLog::new();
        let mut pipe = log.join();
        assert_eq!(next(&mut pipe).await, Some(CommitEntry::ReplayComplete));
    }

    #[tokio::test]
    async fn late_join_replays_history_first() {
        let log = MemoryLog::new();
        log.append("CREATE TABLE t (id int)").unwrap();
        log.append("INSERT INTO t VALUES (1)").unwrap();

        let mut pipe = log.join();
        assert_eq!(
            next(&mut pipe).await,
            Some(CommitEntry::Statement("CREATE TABLE t (id int)".into()))
        );
        assert_eq!(
            next(&mut pipe).await,
            Some(CommitEntry::Statement("INSERT INTO t VALUES (1)".into()))
        );
        assert_eq!(next(&mut pipe).await, Some(CommitEntry::ReplayComplete));

        log.append("INSERT INTO t VALUES (2)").unwrap();
        assert_eq!(
            next(&mut pipe).await,
            Some(CommitEntry::Statement("INSERT INTO t VALUES (2)".into()))
        );
    }

    #[tokio::test]
    async fn proposals_from_any_node_reach_every_node_in_one_order() {
        let log = MemoryLog::new();
        let mut a = log.join();
        let mut b = log.join();
        assert_eq!(next(&mut a).await, Some(CommitEntry::ReplayComplete));
        assert_eq!(next(&mut b).await, Some(CommitEntry::ReplayComplete));

        a.proposals.send("INSERT INTO t VALUES (1)".into()).await.unwrap();
        let first = next(&mut a).await;
        b.proposals.send("INSERT INTO t VALUES (2)".into()).await.unwrap();
        let second = next(&mut a).await;

        assert_eq!(next(&mut b).await, first);
        assert_eq!(next(&mut b).await, second);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn fail_reaches_joined_and_future_nodes() {
        let log = MemoryLog::new();
        let mut pipe = log.join();
        assert_eq!(next(&mut pipe).await, Some(CommitEntry::ReplayComplete));

        log.fail("quorum lost");
        assert_eq!(next(&mut pipe).await, None);
        assert_eq!(pipe.errors.await.unwrap().message(), "quorum lost");

        assert!(log.append("INSERT INTO t VALUES (3)").is_err());
        assert!(log.is_failed());

        let late = log.join();
        assert_eq!(late.errors.await.unwrap().message(), "quorum lost");
    }
}
