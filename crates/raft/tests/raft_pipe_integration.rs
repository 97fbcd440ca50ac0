//! Integration tests for the openraft-backed pipe.
//!
//! Each test runs a single-node cluster bound to a free local port.

use raft::{CommitEntry, ConsensusPipe, NodeConfig, NodeHealth, RaftPipe};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn single_node(dir: &TempDir) -> NodeConfig {
    NodeConfig::new(1, dir.path().join("raft-1")).with_listen_addr(free_addr())
}

async fn next(pipe: &mut ConsensusPipe) -> Option<CommitEntry> {
    timeout(Duration::from_secs(10), pipe.commits.recv())
        .await
        .expect("commit stream stalled")
}

async fn statement(pipe: &mut ConsensusPipe) -> String {
    match next(pipe).await {
        Some(CommitEntry::Statement(sql)) => sql,
        other => panic!("expected a statement, got {other:?}"),
    }
}

#[tokio::test]
async fn proposals_come_back_as_commits() {
    let dir = TempDir::new().unwrap();
    let (node, mut pipe) = RaftPipe::start(single_node(&dir)).await.unwrap();
    assert_eq!(next(&mut pipe).await, Some(CommitEntry::ReplayComplete));

    assert_eq!(node.wait_for_leader(Duration::from_secs(10)).await.unwrap(), 1);
    assert!(node.is_leader());

    pipe.proposals
        .send("CREATE TABLE t (id int)".to_string())
        .await
        .unwrap();
    pipe.proposals
        .send("INSERT INTO t VALUES (1)".to_string())
        .await
        .unwrap();

    assert_eq!(statement(&mut pipe).await, "CREATE TABLE t (id int)");
    assert_eq!(statement(&mut pipe).await, "INSERT INTO t VALUES (1)");

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_replays_committed_history_before_boundary() {
    let dir = TempDir::new().unwrap();
    let statements = [
        "CREATE TABLE t (id int, v text)",
        "INSERT INTO t VALUES (1, 'a')",
        "INSERT INTO t VALUES (2, 'b')",
    ];

    {
        let (node, mut pipe) = RaftPipe::start(single_node(&dir)).await.unwrap();
        assert_eq!(next(&mut pipe).await, Some(CommitEntry::ReplayComplete));
        node.wait_for_leader(Duration::from_secs(10)).await.unwrap();

        for sql in statements {
            pipe.proposals.send(sql.to_string()).await.unwrap();
        }
        for sql in statements {
            assert_eq!(statement(&mut pipe).await, sql);
        }
        node.shutdown().await.unwrap();
    }

    let (node, mut pipe) = RaftPipe::start(single_node(&dir)).await.unwrap();
    for sql in statements {
        assert_eq!(statement(&mut pipe).await, sql);
    }
    assert_eq!(next(&mut pipe).await, Some(CommitEntry::ReplayComplete));
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn in_memory_node_forgets_history() {
    let dir = TempDir::new().unwrap();
    let config = single_node(&dir).with_persistent_storage(false);

    let (node, mut pipe) = RaftPipe::start(config).await.unwrap();
    assert_eq!(next(&mut pipe).await, Some(CommitEntry::ReplayComplete));
    node.wait_for_leader(Duration::from_secs(10)).await.unwrap();
    pipe.proposals
        .send("CREATE TABLE t (id int)".to_string())
        .await
        .unwrap();
    assert_eq!(statement(&mut pipe).await, "CREATE TABLE t (id int)");
    node.shutdown().await.unwrap();

    assert!(!dir.path().join("raft-1").join("raft.log").exists());
}

#[tokio::test]
async fn health_reports_leadership() {
    let dir = TempDir::new().unwrap();
    let (node, mut pipe) = RaftPipe::start(single_node(&dir)).await.unwrap();
    assert_eq!(next(&mut pipe).await, Some(CommitEntry::ReplayComplete));
    node.wait_for_leader(Duration::from_secs(10)).await.unwrap();

    let url = format!("http://{}/health", node.local_addr());
    let health: NodeHealth = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(health.node_id, 1);
    assert_eq!(health.current_leader, Some(1));
    assert!(health.running);

    node.shutdown().await.unwrap();
}
