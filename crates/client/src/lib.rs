//! Client library for the raftsql HTTP shim.
//!
//! # Example
//!
//! ```no_run
//! use client::Client;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::connect("127.0.0.1:9121")?;
//!
//!     client.execute("CREATE TABLE users (id int, name text)").await?;
//!     client.execute("INSERT INTO users VALUES (1, 'Alice')").await?;
//!
//!     let rows = client.query_rows("SELECT * FROM users").await?;
//!     println!("Rows: {}", rows.len());
//!     Ok(())
//! }
//! ```

mod error;

pub use error::{ClientError, Result};

use reqwest::{Method, StatusCode};
use std::time::Duration;

/// Column delimiter used by the server's rendering.
pub const DELIMITER: char = '|';

/// Client for one node's SQL shim. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// Create a client for `addr` (`host:port` or a full URL).
    pub fn connect(addr: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(ClientError::Connection)?;
        Ok(Self::with_http_client(http, addr))
    }

    /// Create a client sharing an existing HTTP client.
    pub fn with_http_client(http: reqwest::Client, addr: &str) -> Self {
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Propose a mutation and wait until this node has applied it.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        self.send(Method::PUT, sql).await.map(|_| ())
    }

    /// Run a query and return the raw rendering.
    pub async fn query(&self, sql: &str) -> Result<String> {
        self.send(Method::GET, sql).await
    }

    /// Run a query and split the rendering into rows of values.
    ///
    /// A value containing the delimiter splits into several values.
    pub async fn query_rows(&self, sql: &str) -> Result<Vec<Vec<String>>> {
        Ok(parse_rows(&self.query(sql).await?))
    }

    async fn send(&self, method: Method, sql: &str) -> Result<String> {
        let response = self
            .http
            .request(method, &self.base_url)
            .body(sql.to_string())
            .send()
            .await
            .map_err(ClientError::Connection)?;

        let status = response.status();
        let body = response.text().await.map_err(ClientError::Protocol)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(rejection(status, body))
        }
    }
}

fn rejection(status: StatusCode, body: String) -> ClientError {
    ClientError::Rejected {
        status: status.as_u16(),
        message: body.trim_end_matches('\n').to_string(),
    }
}

/// Split a rendering of `|v1|v2|` lines into rows of values.
pub fn parse_rows(rendered: &str) -> Vec<Vec<String>> {
    rendered
        .lines()
        .map(|line| {
            let inner = line
                .strip_prefix(DELIMITER)
                .and_then(|rest| rest.strip_suffix(DELIMITER))
                .unwrap_or(line);
            if inner.is_empty() && line.len() <= 1 {
                Vec::new()
            } else {
                inner.split(DELIMITER).map(String::from).collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows() {
        let rows = parse_rows("|1|a|\n|2||\n");
        assert_eq!(
            rows,
            vec![
                vec!["1".to_string(), "a".to_string()],
                vec!["2".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn test_parse_rows_empty() {
        assert!(parse_rows("").is_empty());
        assert_eq!(parse_rows("|\n"), vec![Vec::<String>::new()]);
        assert_eq!(parse_rows("||\n"), vec![vec![String::new()]]);
    }

    #[test]
    fn test_base_url() {
        let client = Client::connect("127.0.0.1:9121").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9121");

        let client = Client::connect("http://node-1:9121/").unwrap();
        assert_eq!(client.base_url(), "http://node-1:9121");
    }

    #[test]
    fn test_rejection_trims_newline() {
        let err = rejection(StatusCode::BAD_REQUEST, "expected SELECT\n".to_string());
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.message(), Some("expected SELECT"));
    }
}
