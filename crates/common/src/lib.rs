
use serde::{Deserialize, Serialize};
use std::{fmt, io};
use thiserror::Error;

/// Leading token that routes a statement to the read path.
pub const READ_KEYWORD: &str = "SELECT";

/// Which path a statement belongs on.
/// Examples:
/// - `classify("SELECT * FROM t") == StatementKind::Query`
/// - `classify("  SELECT 1  ") == StatementKind::Query`
/// - `classify("INSERT INTO t SELECT * FROM u") == StatementKind::Mutation`
/// - `classify("select 1") == StatementKind::Mutation` (case-sensitive)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// Served locally against the engine.
    Query,
    /// Replicated through the consensus pipe before it is applied.
    Mutation,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Query => f.write_str(READ_KEYWORD),
            StatementKind::Mutation => write!(f, "non-{READ_KEYWORD}"),
        }
    }
}

/// Classify a statement by its first whitespace-delimited token.
///
/// This is a routing heuristic, not a parser: only the trimmed leading token is
/// inspected and the comparison is case-sensitive.
pub fn classify(sql: &str) -> StatementKind {
    match sql.split_whitespace().next() {
        Some(token) if token == READ_KEYWORD => StatementKind::Query,
        _ => StatementKind::Mutation,
    }
}

/// Terminal failure of the consensus layer.
///
/// At most one is produced per pipe; it is cloned to every waiter that was
/// pending when it arrived.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("consensus pipe failed: {message}")]
pub struct PipeError {
    message: String,
}

impl PipeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Canonical error type for proposals and queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Statement sent on the wrong path. Nothing was registered or executed.
    #[error("expected {expected}")]
    Classification { expected: StatementKind },
    /// The engine rejected the statement.
    #[error("exec: {0}")]
    Execution(String),
    /// The consensus layer failed; fatal for the store instance.
    #[error(transparent)]
    Pipe(#[from] PipeError),
    /// The store was shut down or its commit stream ended.
    #[error("store is closed")]
    Closed,
    #[error("io: {0}")]
    Io(String),
}

impl StoreError {
    pub fn classification(expected: StatementKind) -> Self {
        Self::Classification { expected }
    }

    pub fn execution(message: impl fmt::Display) -> Self {
        Self::Execution(message.to_string())
    }

    /// True for errors that end the store's lifetime rather than a single call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StoreError::Pipe(_) | StoreError::Closed)
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Result alias that carries a `StoreError`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Reject `sql` unless it classifies as `expected`.
pub fn expect_kind(sql: &str, expected: StatementKind) -> StoreResult<()> {
    if classify(sql) == expected {
        Ok(())
    } else {
        Err(StoreError::classification(expected))
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        classify, expect_kind, PipeError, StatementKind, StoreError, StoreResult, READ_KEYWORD,
    };
}
