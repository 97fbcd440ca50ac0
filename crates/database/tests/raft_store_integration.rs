//! `ReplicatedStore` over real raft clusters.

use database::{ReplicatedStore, StoreConfig, StoreState, Termination};
use raft::{CommitEntry, NodeConfig, RaftPipe};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(20);

fn free_addr() -> String {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .to_string()
}

fn node_config(dir: &TempDir) -> NodeConfig {
    NodeConfig::new(1, dir.path().join("raft-1")).with_listen_addr(free_addr())
}

/// Poll `store` until `sql` renders `expected`.
async fn await_rendering(store: &ReplicatedStore, sql: &str, expected: &str) {
    let polled = timeout(WAIT, async {
        loop {
            if let Ok(rendered) = store.query(sql).await {
                if rendered == expected {
                    return;
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    let last = store.query(sql).await;
    assert!(polled.is_ok(), "never rendered {expected:?}, last saw {last:?}");
}

/// Restarting a node rebuilds the engine from the raft log alone.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_rebuilds_engine_from_log() {
    let dir = TempDir::new().unwrap();
    let engine_path = dir.path().join("raftsql-1.db");

    {
        let (node, pipe) = RaftPipe::start(node_config(&dir)).await.unwrap();
        node.wait_for_leader(Duration::from_secs(10)).await.unwrap();
        let store = ReplicatedStore::open(StoreConfig::new(&engine_path), pipe)
            .await
            .unwrap();

        store
            .execute("CREATE TABLE t (id int, v text)")
            .await
            .unwrap();
        store
            .execute("INSERT INTO t VALUES (1,'a')")
            .await
            .unwrap();
        assert_eq!(store.query("SELECT * FROM t").await.unwrap(), "|1|a|\n");

        assert_eq!(store.shutdown().await, Termination::Stopped);
        node.shutdown().await.unwrap();
    }

    let (tap, mut observed) = mpsc::unbounded_channel();
    let (node, pipe) = RaftPipe::start(node_config(&dir)).await.unwrap();
    let store = ReplicatedStore::open(StoreConfig::new(&engine_path).with_replay_tap(tap), pipe)
        .await
        .unwrap();
    assert_eq!(store.state(), StoreState::Running);

    let mut replayed = 0;
    while let Some(CommitEntry::Statement(_)) = observed.recv().await {
        replayed += 1;
    }
    assert_eq!(replayed, 2);
    assert_eq!(store.query("SELECT * FROM t").await.unwrap(), "|1|a|\n");

    store.shutdown().await;
    node.shutdown().await.unwrap();
}

/// Three raft nodes on local ports: every node proposes one insert, leader
/// and followers alike, and every node ends up with all of them.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_nodes_converge_on_forwarded_proposals() {
    let dir = TempDir::new().unwrap();
    let cluster: Vec<String> = (0..3).map(|_| format!("http://{}", free_addr())).collect();

    let mut nodes = Vec::new();
    let mut stores = Vec::new();
    for id in 1..=3u64 {
        let config = NodeConfig::from_cluster(id, dir.path().join(format!("raft-{id}")), &cluster)
            .unwrap()
            .with_persistent_storage(false);
        let (node, pipe) = RaftPipe::start(config).await.unwrap();
        let engine = dir.path().join(format!("raftsql-{id}.db"));
        let store = ReplicatedStore::open(StoreConfig::new(engine).with_read_pool_size(2), pipe)
            .await
            .unwrap();
        nodes.push(node);
        stores.push(store);
    }

    let mut leaders = Vec::new();
    for node in &nodes {
        leaders.push(node.wait_for_leader(WAIT).await.unwrap());
    }
    assert!(leaders.windows(2).all(|w| w[0] == w[1]), "{leaders:?}");
    assert_eq!(nodes.iter().filter(|node| node.is_leader()).count(), 1);

    timeout(
        WAIT,
        stores[0].execute("CREATE TABLE main.t (id int primary key asc, nodeid text);"),
    )
    .await
    .unwrap()
    .unwrap();
    for store in &stores {
        await_rendering(store, "SELECT count(*) FROM main.t", "|0|\n").await;
    }

    for (i, store) in stores.iter().enumerate() {
        let sql = format!("INSERT INTO main.t (nodeid) VALUES ('{i}')");
        timeout(WAIT, store.execute(sql)).await.unwrap().unwrap();
    }

    for store in &stores {
        await_rendering(
            store,
            "SELECT * FROM main.t ORDER BY nodeid",
            "||0|\n||1|\n||2|\n",
        )
        .await;
        assert_eq!(store.stats().failed, 0);
    }

    for store in &stores {
        assert_eq!(store.shutdown().await, Termination::Stopped);
    }
    for node in nodes {
        node.shutdown().await.unwrap();
    }
}
