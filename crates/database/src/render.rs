//! Textual rendering of query results.
//!
//! Every row becomes one line: each value is preceded by [`DELIMITER`] and
//! the row ends with the delimiter and a newline, so a row `(1, "a")` renders
//! as `|1|a|\n`. Values are written raw. Nothing is quoted or escaped, so a
//! delimiter inside a value is indistinguishable from a column boundary.

use rusqlite::types::ValueRef;
use std::fmt::Write;

/// Column delimiter of the rendered table.
pub const DELIMITER: char = '|';

/// Append one row to `out`.
pub fn write_row<'a>(out: &mut String, values: impl IntoIterator<Item = ValueRef<'a>>) {
    for value in values {
        out.push(DELIMITER);
        write_value(out, value);
    }
    out.push(DELIMITER);
    out.push('\n');
}

/// Append the raw text of a single value.
///
/// NULL renders as nothing, integers in decimal, reals in shortest form, and
/// text or blobs as their bytes (invalid UTF-8 is replaced lossily).
pub fn write_value(out: &mut String, value: ValueRef<'_>) {
    match value {
        ValueRef::Null => {}
        ValueRef::Integer(i) => {
            let _ = write!(out, "{i}");
        }
        ValueRef::Real(f) => out.push_str(&format_float(f)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            out.push_str(&String::from_utf8_lossy(bytes));
        }
    }
}

/// Shortest round-trip rendering of a float in `%g` style.
///
/// Plain decimal notation is used when the decimal exponent is in `-4..6`;
/// otherwise the mantissa is followed by `e`, a sign, and at least two
/// exponent digits (`1e+06`, `2.5e-05`).
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }

    // `{:e}` yields the shortest digits that round-trip, e.g. "-1.2345e-7".
    let sci = format!("{f:e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let mut out = String::with_capacity(digits.len() + 8);
    out.push_str(sign);

    if !(-4..6).contains(&exp) {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let exp_sign = if exp < 0 { '-' } else { '+' };
        let _ = write!(out, "e{exp_sign}{:02}", exp.unsigned_abs());
        return out;
    }

    if exp < 0 {
        out.push_str("0.");
        for _ in 0..(-exp - 1) {
            out.push('0');
        }
        out.push_str(&digits);
        return out;
    }

    let int_len = exp as usize + 1;
    if digits.len() <= int_len {
        out.push_str(&digits);
        for _ in digits.len()..int_len {
            out.push('0');
        }
    } else {
        out.push_str(&digits[..int_len]);
        out.push('.');
        out.push_str(&digits[int_len..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn render(rows: &[Vec<ValueRef<'_>>]) -> String {
        let mut out = String::new();
        for row in rows {
            write_row(&mut out, row.iter().copied());
        }
        out
    }

    #[test]
    fn rows_are_delimited_on_both_sides() {
        let rows = vec![
            vec![ValueRef::Integer(1), ValueRef::Text(b"a")],
            vec![ValueRef::Integer(2), ValueRef::Text(b"b")],
        ];
        assert_eq!(render(&rows), "|1|a|\n|2|b|\n");
    }

    #[test]
    fn null_renders_empty() {
        let rows = vec![vec![ValueRef::Null, ValueRef::Integer(0)]];
        assert_eq!(render(&rows), "||0|\n");
    }

    #[test]
    fn delimiter_inside_value_is_not_escaped() {
        let rows = vec![vec![ValueRef::Text(b"x|y")]];
        assert_eq!(render(&rows), "|x|y|\n");
    }

    #[test]
    fn blobs_render_raw() {
        let rows = vec![vec![ValueRef::Blob(b"raw"), ValueRef::Blob(&[0xff])]];
        assert_eq!(render(&rows), "|raw|\u{fffd}|\n");
    }

    #[test]
    fn no_rows_renders_nothing() {
        assert_eq!(render(&[]), "");
    }

    #[test]
    fn zero_column_row() {
        assert_eq!(render(&[vec![]]), "|\n");
    }

    #[test]
    fn floats_use_shortest_g_form() {
        let cases = [
            (1.5, "1.5"),
            (3.14, "3.14"),
            (100.0, "100"),
            (0.0, "0"),
            (-0.0, "-0"),
            (-2.5, "-2.5"),
            (123456.0, "123456"),
            (123456.7, "123456.7"),
            (1e6, "1e+06"),
            (1234567.0, "1.234567e+06"),
            (1e21, "1e+21"),
            (0.0001, "0.0001"),
            (0.00012, "0.00012"),
            (0.00001, "1e-05"),
            (2.5e-5, "2.5e-05"),
            (1e-100, "1e-100"),
            (f64::INFINITY, "+Inf"),
            (f64::NEG_INFINITY, "-Inf"),
            (f64::NAN, "NaN"),
        ];
        for (value, expected) in cases {
            assert_eq!(format_float(value), expected, "rendering {value:?}");
        }
    }

    proptest! {
        #[test]
        fn float_rendering_round_trips(f in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
            let rendered = format_float(f);
            prop_assert_eq!(rendered.parse::<f64>().unwrap(), f);
        }

        #[test]
        fn integers_render_in_decimal(i in any::<i64>()) {
            let mut out = String::new();
            write_value(&mut out, ValueRef::Integer(i));
            prop_assert_eq!(out, i.to_string());
        }
    }
}
