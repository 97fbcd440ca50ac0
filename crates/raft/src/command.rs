//! Raft log entry payloads.
//!
//! The replicated log carries statement text verbatim; nothing about the
//! statement is interpreted before it is committed.

use serde::{Deserialize, Serialize};

/// A statement replicated through Raft consensus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub sql: String,
}

impl Command {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

/// Response from applying a log entry to the state machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResponse {
    /// The statement was handed to the commit stream at this log index.
    Committed { index: u64 },
    /// Blank or membership entry; nothing reaches the commit stream.
    Internal,
}

impl CommandResponse {
    pub fn committed(index: u64) -> Self {
        Self::Committed { index }
    }

    pub fn index(&self) -> Option<u64> {
        match self {
            CommandResponse::Committed { index } => Some(*index),
            CommandResponse::Internal => None,
        }
    }
}
