//! End-to-end tests for the HTTP shim.
//!
//! Router-level tests drive `server::router` with `tower::ServiceExt::oneshot`
//! over a store joined to an in-process log. Socket-level tests run the shim
//! through `testsupport::TestServer` and talk to it with the `client` crate.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use client::Client;
use pretty_assertions::assert_eq;
use raft::MemoryLog;
use testsupport::prelude::*;
use tower::ServiceExt;

struct Shim {
    router: Router,
    node: TestNode,
}

async fn shim() -> Shim {
    let log = MemoryLog::new();
    let node = TestNode::join(&log).await.unwrap();
    Shim {
        router: server::router(node.store().clone()),
        node,
    }
}

/// Send one request and return its status, `Allow` values, and body.
async fn send(router: &Router, method: Method, sql: &str) -> (StatusCode, Vec<String>, String) {
    let request = Request::builder()
        .method(method)
        .uri("/")
        .body(Body::from(sql.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let allow = response
        .headers()
        .get_all(header::ALLOW)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, allow, String::from_utf8(body.to_vec()).unwrap())
}

/// PUT answers 204 with an empty body once applied; GET renders rows.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn put_then_get() {
    let shim = shim().await;

    let (status, _, body) =
        send(&shim.router, Method::PUT, "CREATE TABLE t (id int, v text)").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, "");

    let (status, _, _) = send(&shim.router, Method::PUT, "INSERT INTO t VALUES (1,'a')").await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, body) = send(&shim.router, Method::GET, "SELECT * from t").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "|1|a|\n");
}

/// Any path serves the same operations.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn path_is_ignored() {
    let shim = shim().await;
    shim.node.store().execute(CREATE_TABLE).await.unwrap();

    let request = Request::builder()
        .method(Method::GET)
        .uri("/some/other/path?x=1")
        .body(Body::from(SELECT_ALL))
        .unwrap();
    let response = shim.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Querying a missing table is a 400 carrying the engine's message.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_table_is_bad_request() {
    let shim = shim().await;

    let (status, _, body) = send(&shim.router, Method::GET, "SELECT * from missing_table").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("exec: "), "{body}");
    assert!(body.contains("no such table"), "{body}");
    assert!(body.ends_with('\n'), "{body:?}");
}

/// Statements on the wrong method are rejected before touching the log.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn misrouted_statements_are_bad_requests() {
    let log = MemoryLog::new();
    let node = TestNode::join(&log).await.unwrap();
    let router = server::router(node.store().clone());

    let (status, _, body) = send(&router, Method::PUT, "SELECT * FROM t").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "expected non-SELECT\n");

    let (status, _, body) = send(&router, Method::GET, "select * from t").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "expected SELECT\n");

    assert!(log.is_empty());
}

/// A failed mutation is still committed, and reported as a 400.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_mutation_is_bad_request() {
    let shim = shim().await;

    let (status, _, body) = send(&shim.router, Method::PUT, "INSERT INTO missing VALUES (1)").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("no such table"), "{body}");
    assert_eq!(shim.node.store().stats().failed, 1);
}

/// Other methods get 405 with both allowed methods listed.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn other_methods_are_not_allowed() {
    let shim = shim().await;

    for method in [Method::POST, Method::DELETE, Method::PATCH] {
        let (status, allow, body) = send(&shim.router, method.clone(), "SELECT 1").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert_eq!(allow, vec!["PUT".to_string(), "GET".to_string()]);
        assert_eq!(body, "Method not allowed\n");
    }
}

/// A body that is not UTF-8 is a 400.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_utf8_body_is_bad_request() {
    let shim = shim().await;

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/")
        .body(Body::from(vec![0xff, 0xfe]))
        .unwrap();
    let response = shim.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// After the store shuts down every request fails.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_store_is_bad_request() {
    let shim = shim().await;
    shim.node.store().shutdown().await;

    let (status, _, body) = send(&shim.router, Method::PUT, CREATE_TABLE).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "store is closed\n");

    let (status, _, _) = send(&shim.router, Method::GET, SELECT_ALL).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// The shim served over a socket, driven by the client library.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_round_trip_over_tcp() {
    let server = TestServer::start().await.unwrap();
    let client = Client::connect(server.address()).unwrap();

    client.execute(CREATE_TABLE).await.unwrap();
    client.execute(&insert_sql(7)).await.unwrap();
    assert_eq!(client.query(SELECT_ALL).await.unwrap(), rendered_row(7));

    let err = client.query("SELECT * from missing_table").await.unwrap_err();
    assert_eq!(err.status(), Some(400));
}

/// Two shims on one log serve the same rows.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shims_on_one_log_share_state() {
    let cluster = TestCluster::start(2).await.unwrap();
    let first = server::router(cluster.node(0).store().clone());
    let second = server::router(cluster.node(1).store().clone());

    let (status, _, _) = send(&first, Method::PUT, CREATE_TABLE).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&second, Method::PUT, &insert_sql(2)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let rendered = wait_for_rendering(cluster.node(0).store(), SELECT_ALL, &rendered_row(2)).await;
    assert_eq!(rendered, "||2|\n");
    let (_, _, body) = send(&first, Method::GET, SELECT_ALL).await;
    assert_eq!(body, "||2|\n");
}
