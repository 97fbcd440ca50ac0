//! Common statements used across the workspace's tests.
//!
//! The table shape follows the cluster test the shim was first exercised
//! with: `id` is declared `int primary key`, which is not a rowid alias, so
//! rows inserted with only `nodeid` render with an empty first column.

/// Creates the shared test table.
pub const CREATE_TABLE: &str = "CREATE TABLE main.t (id int primary key asc, nodeid text);";

/// Reads every row of the shared test table.
pub const SELECT_ALL: &str = "SELECT * FROM main.t";

/// Insert one row tagged with `node`.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// assert_eq!(insert_sql(3), "INSERT INTO main.t (nodeid) VALUES ('3');");
/// ```
pub fn insert_sql(node: usize) -> String {
    format!("INSERT INTO main.t (nodeid) VALUES ('{node}');")
}

/// The rendered line for a row inserted by [`insert_sql`].
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// assert_eq!(rendered_row(3), "||3|\n");
/// ```
pub fn rendered_row(node: usize) -> String {
    format!("||{node}|\n")
}

/// Statements that build a small two-column table with `count` rows.
pub fn numbered_rows(table: &str, count: usize) -> Vec<String> {
    let mut statements = Vec::with_capacity(count + 1);
    statements.push(format!("CREATE TABLE {table} (id int, v text)"));
    statements.extend((1..=count).map(|i| format!("INSERT INTO {table} VALUES ({i}, 'v{i}')")));
    statements
}

/// Expected rendering of `SELECT * FROM <table> ORDER BY id` after
/// [`numbered_rows`].
pub fn numbered_rendering(count: usize) -> String {
    (1..=count).map(|i| format!("|{i}|v{i}|\n")).collect()
}
