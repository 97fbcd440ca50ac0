//! OpenRaft type configuration for the replicated statement log.

use crate::{Command, CommandResponse, NodeId};
use openraft::BasicNode;
use std::io::Cursor;

openraft::declare_raft_types!(
    /// Raft type configuration for raftsql.
    pub TypeConfig:
        D = Command,
        R = CommandResponse,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
);

/// Type alias for log entries.
pub type Entry = openraft::Entry<TypeConfig>;

/// Type alias for log ID.
pub type LogId = openraft::LogId<NodeId>;

/// Type alias for vote.
pub type Vote = openraft::Vote<NodeId>;

/// Type alias for snapshot metadata.
pub type SnapshotMeta = openraft::SnapshotMeta<NodeId, BasicNode>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_config_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypeConfig>();
        assert_send_sync::<Entry>();
    }
}
