//! Matching proposals to the outcome of their commit.
//!
//! Waiters are queued per literal statement text. The applier resolves the
//! oldest waiter for a text each time that text is applied, so two identical
//! proposals resolve in submission order against successive occurrences.

use common::{StoreError, StoreResult};
use hashbrown::HashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// What a waiter eventually learns about its statement.
pub type Outcome = StoreResult<()>;

/// Identifies one registration within a store.
pub type ProposalId = u64;

#[derive(Debug)]
struct Waiter {
    id: ProposalId,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Debug, Default)]
struct CorrelationTable {
    queues: HashMap<String, VecDeque<Waiter>>,
    /// Set once; every later registration fails with it.
    closed: Option<StoreError>,
    next_id: ProposalId,
}

/// FIFO waiter queues keyed by statement text.
#[derive(Debug, Default)]
pub struct ProposalCorrelator {
    table: Mutex<CorrelationTable>,
}

impl ProposalCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `text`.
    ///
    /// Must return before `text` is handed to the pipe, so the commit can
    /// never overtake its waiter.
    pub fn enqueue(&self, text: &str) -> StoreResult<(ProposalId, oneshot::Receiver<Outcome>)> {
        let mut table = self.table();
        if let Some(err) = &table.closed {
            return Err(err.clone());
        }

        let id = table.next_id;
        table.next_id += 1;
        let (tx, rx) = oneshot::channel();
        table
            .queues
            .entry_ref(text)
            .or_default()
            .push_back(Waiter { id, tx });
        Ok((id, rx))
    }

    /// Resolve the oldest waiter for `text`, if any, with `outcome`.
    ///
    /// Returns the resolved waiter's id.
    pub fn resolve(&self, text: &str, outcome: Outcome) -> Option<ProposalId> {
        let waiter = {
            let mut table = self.table();
            let queue = table.queues.get_mut(text)?;
            let waiter = queue.pop_front();
            if queue.is_empty() {
                table.queues.remove(text);
            }
            waiter?
        };

        // A dropped handle is not an error; the statement was still applied.
        let _ = waiter.tx.send(outcome);
        Some(waiter.id)
    }

    /// Remove the waiter `id` queued under `text` and resolve it with `outcome`.
    ///
    /// Used when the statement never made it into the pipe. Returns false if
    /// the waiter was already resolved.
    pub fn withdraw(&self, text: &str, id: ProposalId, outcome: Outcome) -> bool {
        let waiter = {
            let mut table = self.table();
            let Some(queue) = table.queues.get_mut(text) else {
                return false;
            };
            let Some(pos) = queue.iter().position(|w| w.id == id) else {
                return false;
            };
            let waiter = queue.remove(pos);
            if queue.is_empty() {
                table.queues.remove(text);
            }
            waiter
        };

        match waiter {
            Some(waiter) => {
                let _ = waiter.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every pending waiter with `err` and refuse new registrations.
    ///
    /// Only the first call has an effect. Returns the number of waiters failed.
    pub fn close(&self, err: StoreError) -> usize {
        let drained: Vec<Waiter> = {
            let mut table = self.table();
            if table.closed.is_some() {
                return 0;
            }
            table.closed = Some(err.clone());
            table.queues.drain().flat_map(|(_, queue)| queue).collect()
        };

        let failed = drained.len();
        for waiter in drained {
            let _ = waiter.tx.send(Err(err.clone()));
        }
        failed
    }

    /// Number of waiters not yet resolved.
    pub fn pending(&self) -> usize {
        self.table().queues.values().map(VecDeque::len).sum()
    }

    /// Number of distinct texts with queued waiters.
    pub fn keys(&self) -> usize {
        self.table().queues.len()
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed.is_some()
    }

    fn table(&self) -> MutexGuard<'_, CorrelationTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PipeError;

    #[tokio::test]
    async fn identical_texts_resolve_in_submission_order() {
        let correlator = ProposalCorrelator::new();
        let (a, rx_a) = correlator.enqueue("INSERT INTO t VALUES (1)").unwrap();
        let (b, rx_b) = correlator.enqueue("INSERT INTO t VALUES (1)").unwrap();
        assert!(a < b);

        assert_eq!(correlator.resolve("INSERT INTO t VALUES (1)", Ok(())), Some(a));
        assert_eq!(
            correlator.resolve(
                "INSERT INTO t VALUES (1)",
                Err(StoreError::execution("UNIQUE constraint failed"))
            ),
            Some(b)
        );

        assert_eq!(rx_a.await.unwrap(), Ok(()));
        assert_eq!(
            rx_b.await.unwrap(),
            Err(StoreError::Execution("UNIQUE constraint failed".into()))
        );
    }

    #[test]
    fn empty_queues_are_removed() {
        let correlator = ProposalCorrelator::new();
        let (_, _rx) = correlator.enqueue("DELETE FROM t").unwrap();
        assert_eq!(correlator.keys(), 1);

        correlator.resolve("DELETE FROM t", Ok(()));
        assert_eq!(correlator.keys(), 0);
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn resolve_without_waiter_is_a_no_op() {
        let correlator = ProposalCorrelator::new();
        let (_, _rx) = correlator.enqueue("DELETE FROM t").unwrap();

        assert_eq!(correlator.resolve("DELETE FROM u", Ok(())), None);
        assert_eq!(correlator.pending(), 1);
    }

    #[tokio::test]
    async fn resolving_a_dropped_handle_still_pops() {
        let correlator = ProposalCorrelator::new();
        let (id, rx) = correlator.enqueue("DELETE FROM t").unwrap();
        drop(rx);
        assert_eq!(correlator.resolve("DELETE FROM t", Ok(())), Some(id));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn withdraw_only_removes_the_named_waiter() {
        let correlator = ProposalCorrelator::new();
        let (first, rx_first) = correlator.enqueue("DELETE FROM t").unwrap();
        let (second, rx_second) = correlator.enqueue("DELETE FROM t").unwrap();

        assert!(correlator.withdraw("DELETE FROM t", second, Err(StoreError::Closed)));
        assert!(!correlator.withdraw("DELETE FROM t", second, Err(StoreError::Closed)));
        assert_eq!(rx_second.await.unwrap(), Err(StoreError::Closed));

        assert_eq!(correlator.resolve("DELETE FROM t", Ok(())), Some(first));
        assert_eq!(rx_first.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn close_fails_everything_and_rejects_new_waiters() {
        let correlator = ProposalCorrelator::new();
        let (_, rx1) = correlator.enqueue("INSERT INTO t VALUES (1)").unwrap();
        let (_, rx2) = correlator.enqueue("INSERT INTO t VALUES (2)").unwrap();

        let err = StoreError::Pipe(PipeError::new("leader lost"));
        assert_eq!(correlator.close(err.clone()), 2);
        assert_eq!(correlator.close(StoreError::Closed), 0);

        assert_eq!(rx1.await.unwrap(), Err(err.clone()));
        assert_eq!(rx2.await.unwrap(), Err(err.clone()));
        assert_eq!(correlator.enqueue("INSERT INTO t VALUES (3)").unwrap_err(), err);
        assert!(correlator.is_closed());
        assert_eq!(correlator.pending(), 0);
    }
}
