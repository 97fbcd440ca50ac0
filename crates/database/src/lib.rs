//! Replicated SQL store.
//!
//! [`ReplicatedStore`] turns the ordered commit stream of a
//! [`ConsensusPipe`](raft::ConsensusPipe) into local mutations of an embedded
//! SQLite engine and into outcomes for the callers that proposed them.
//!
//! ```text
//! propose ──▶ ProposalCorrelator ──▶ pipe.proposals
//!                    ▲
//!                    │ resolve
//! pipe.commits ──▶ CommitApplier ──▶ Engine (exclusive)
//!
//! query ─────────────────────────▶ Engine (shared)
//! ```

mod applier;
pub mod correlator;
pub mod engine;
pub mod render;
pub mod store;

pub use applier::ReplayTap;
pub use correlator::{Outcome, ProposalCorrelator, ProposalId};
pub use engine::{Engine, DEFAULT_READ_POOL_SIZE};
pub use store::{
    ApplyStats, ProposalHandle, ReplicatedStore, StoreConfig, StoreState, Termination,
};
