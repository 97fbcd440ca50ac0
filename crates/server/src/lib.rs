//! HTTP shim over a [`ReplicatedStore`].
//!
//! Every path serves the same two operations, with the statement as the
//! request body:
//!
//! - `PUT` proposes a mutation: `204 No Content` once it is applied locally.
//! - `GET` runs a query: `200 OK` with the rendered rows.
//!
//! Failures are `400 Bad Request` with the error text as the body; any other
//! method is `405 Method Not Allowed` with `Allow: PUT` and `Allow: GET`.

pub mod error;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use database::ReplicatedStore;
use error::ApiError;
use std::future::Future;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub use error::map_error_to_status;

/// Longest statement prefix written to the request log.
const LOGGED_STATEMENT_LEN: usize = 100;

/// Build the shim's router.
pub fn router(store: ReplicatedStore) -> Router {
    Router::new().fallback(handle).with_state(store)
}

/// Serve the shim on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    store: ReplicatedStore,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "sql shim listening");
    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle(State(store): State<ReplicatedStore>, method: Method, body: Bytes) -> Response {
    let start = Instant::now();
    let response = match method {
        Method::PUT => propose(&store, &body).await,
        Method::GET => query(&store, &body).await,
        _ => return method_not_allowed(),
    };
    match response {
        Ok(response) => {
            debug!(%method, elapsed = ?start.elapsed(), "request completed");
            response
        }
        Err(err) => err.into_response(),
    }
}

async fn propose(store: &ReplicatedStore, body: &[u8]) -> Result<Response, ApiError> {
    let sql = std::str::from_utf8(body)?;
    log_statement("PUT", sql);
    store.execute(sql).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn query(store: &ReplicatedStore, body: &[u8]) -> Result<Response, ApiError> {
    let sql = std::str::from_utf8(body)?;
    log_statement("GET", sql);
    let rendered = store.query(sql).await?;
    Ok((StatusCode::OK, rendered).into_response())
}

fn method_not_allowed() -> Response {
    let mut response = (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n").into_response();
    let headers = response.headers_mut();
    headers.append(header::ALLOW, HeaderValue::from_static("PUT"));
    headers.append(header::ALLOW, HeaderValue::from_static("GET"));
    response
}

fn log_statement(method: &str, sql: &str) {
    let truncated = match sql.char_indices().nth(LOGGED_STATEMENT_LEN) {
        Some((end, _)) => format!("{}...", &sql[..end]),
        None => sql.to_string(),
    };
    debug!(method, statement = %truncated, "request");
}
