//! Test support utilities for the raftsql workspace.
//!
//! This crate provides:
//! - Clusters of stores sharing one in-process log, each in its own temp dir
//! - An in-process HTTP shim bound to a random port
//! - Statement fixtures and property-based generators
//! - Assertion helpers for outcomes and renderings
//!
//! # Example Usage
//!
//! ```no_run
//! use testsupport::prelude::*;
//!
//! #[tokio::test]
//! async fn test_shared_view() {
//!     let cluster = TestCluster::start(3).await.unwrap();
//!     cluster.node(0).store().execute(CREATE_TABLE).await.unwrap();
//!     cluster.node(1).store().execute(insert_sql(1)).await.unwrap();
//!
//!     let rendered = wait_for_rendering(cluster.node(2).store(), SELECT_ALL, "||1|\n").await;
//!     assert_eq!(rendered, "||1|\n");
//! }
//! ```

pub mod assertions;
pub mod cluster;
pub mod fixtures;
pub mod proptest_generators;
pub mod server;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::cluster::*;
    pub use crate::fixtures::*;
    pub use crate::server::*;
}
