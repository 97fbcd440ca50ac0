//! Property-based test generators using proptest.
//!
//! Strategies for statement texts, split by the path they classify onto.

use proptest::prelude::*;

/// Strategy for SQL literal values as they appear in statement text.
pub fn arb_literal() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<i64>().prop_map(|i| i.to_string()),
        "[a-z]{0,12}".prop_map(|s| format!("'{s}'")),
        Just("NULL".to_string()),
    ]
}

/// Leading whitespace a client might send before a statement.
pub fn arb_padding() -> impl Strategy<Value = String> {
    "[ \t\n]{0,3}"
}

/// Strategy for statements that classify as queries.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_query;
///
/// proptest! {
///     #[test]
///     fn queries_start_with_select(sql in arb_query()) {
///         assert!(sql.trim_start().starts_with("SELECT"));
///     }
/// }
/// ```
pub fn arb_query() -> impl Strategy<Value = String> {
    (arb_padding(), "[a-z]{1,8}", arb_padding())
        .prop_map(|(lead, table, trail)| format!("{lead}SELECT * FROM {table}{trail}"))
}

/// Strategy for statements that classify as mutations.
///
/// Includes statements containing `SELECT` after the first token and
/// lowercase `select`, both of which take the mutation path.
pub fn arb_mutation() -> impl Strategy<Value = String> {
    let table = "[a-z]{1,8}";
    prop_oneof![
        (table, arb_literal()).prop_map(|(t, v)| format!("INSERT INTO {t} VALUES ({v})")),
        table.prop_map(|t| format!("CREATE TABLE {t} (id int, v text)")),
        table.prop_map(|t| format!("DELETE FROM {t}")),
        (table, table).prop_map(|(t, u)| format!("INSERT INTO {t} SELECT * FROM {u}")),
        table.prop_map(|t| format!("select * from {t}")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{classify, StatementKind};

    proptest! {
        #[test]
        fn generated_queries_classify_as_queries(sql in arb_query()) {
            prop_assert_eq!(classify(&sql), StatementKind::Query);
        }

        #[test]
        fn generated_mutations_classify_as_mutations(sql in arb_mutation()) {
            prop_assert_eq!(classify(&sql), StatementKind::Mutation);
        }
    }
}
