//! Custom assertion helpers for testing.
//!
//! Provides assertion functions for store outcomes and for renderings that
//! become visible asynchronously as commits are applied.

use common::{StoreError, StoreResult};
use database::ReplicatedStore;
use std::time::Duration;

/// How long [`wait_for_rendering`] polls before failing.
pub const RENDER_WAIT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Assert that an operation returns an error containing a specific substring.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
/// use common::StoreError;
///
/// let result: Result<(), StoreError> = Err(StoreError::Execution("no such table: t".into()));
/// assert_error_contains(result, "no such table");
/// ```
pub fn assert_error_contains<T: std::fmt::Debug>(result: StoreResult<T>, expected_msg: &str) {
    match result {
        Ok(value) => panic!(
            "Expected error containing '{}', but got Ok({:?})",
            expected_msg, value
        ),
        Err(e) => {
            let error_string = e.to_string();
            assert!(
                error_string.contains(expected_msg),
                "Expected error to contain '{}', but got: {}",
                expected_msg,
                error_string
            );
        }
    }
}

/// Assert that an operation failed in the engine.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
/// use common::StoreError;
///
/// let result: Result<(), StoreError> = Err(StoreError::Execution("UNIQUE constraint failed".into()));
/// assert_execution_error(result, "UNIQUE");
/// ```
pub fn assert_execution_error<T: std::fmt::Debug>(result: StoreResult<T>, expected_msg: &str) {
    match result {
        Ok(value) => panic!(
            "Expected execution error '{}', but got Ok({:?})",
            expected_msg, value
        ),
        Err(StoreError::Execution(msg)) => {
            assert!(
                msg.contains(expected_msg),
                "Expected execution error to contain '{}', but got: {}",
                expected_msg,
                msg
            );
        }
        Err(other) => panic!(
            "Expected execution error '{}', but got different error: {}",
            expected_msg, other
        ),
    }
}

/// Poll `sql` on `store` until it renders `expected`, and return the last
/// rendering.
///
/// Query errors are retried, since a table may not exist on this node until
/// the statement creating it is applied. Panics after [`RENDER_WAIT`].
pub async fn wait_for_rendering(store: &ReplicatedStore, sql: &str, expected: &str) -> String {
    let deadline = tokio::time::Instant::now() + RENDER_WAIT;
    let mut last = String::new();
    loop {
        match store.query(sql).await {
            Ok(rendered) if rendered == expected => return rendered,
            Ok(rendered) => last = rendered,
            Err(e) => last = format!("error: {e}"),
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "Rendering of '{}' never matched:\nExpected: {:?}\nLast:     {:?}",
                sql, expected, last
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Assert that `rendered` holds exactly the lines in `expected`, in any order.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// assert_same_lines("||2|\n||1|\n", &["||1|", "||2|"]);
/// ```
pub fn assert_same_lines(rendered: &str, expected: &[&str]) {
    let mut actual: Vec<&str> = rendered.lines().collect();
    let mut expected = expected.to_vec();
    actual.sort_unstable();
    expected.sort_unstable();
    assert_eq!(
        actual, expected,
        "Rendered lines differ:\nExpected: {:?}\nActual:   {:?}",
        expected, actual
    );
}
