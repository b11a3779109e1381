//! Template substitution.
//!
//! Two placeholder forms are recognised, both matched case-insensitively:
//!
//! | Form     | Replaced with                    | Bound? |
//! |----------|----------------------------------|--------|
//! | `$$name` | the value's raw string form      | no     |
//! | `$name`  | a positional marker `$1`, `$2`.. | yes    |
//!
//! Literal splices are not escaped. They exist for dynamic identifiers and
//! SQL fragments and must never carry untrusted input.
//!
//! Keys are processed in reverse lexicographic order so that `$id2` is
//! consumed before `$id` can match its prefix.

use crate::error::{SqlqError, SqlqResult};
use crate::value::{Params, SqlqValue};
use regex::{NoExpand, Regex, RegexBuilder};

/// Final query text plus the values for its positional markers.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub binds: Vec<SqlqValue>,
}

fn placeholder(prefix: &str, key: &str) -> SqlqResult<Regex> {
    RegexBuilder::new(&format!("{}{}", regex::escape(prefix), regex::escape(key)))
        .case_insensitive(true)
        .build()
        .map_err(|e| SqlqError::Config(format!("placeholder pattern for '{}': {}", key, e)))
}

/// Substitute `params` into `raw`.
pub fn render(raw: &str, params: &Params) -> SqlqResult<Rendered> {
    let mut sql = raw.to_string();
    let mut binds = Vec::new();

    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort_unstable_by(|a, b| b.cmp(a));

    for key in keys {
        let value = &params[key];

        let literal = placeholder("$$", key)?;
        if literal.is_match(&sql) {
            let text = value.to_string();
            sql = literal.replace_all(&sql, NoExpand(&text)).into_owned();
            continue;
        }

        let bound = placeholder("$", key)?;
        if bound.is_match(&sql) {
            let marker = format!("${}", binds.len() + 1);
            sql = bound.replace_all(&sql, NoExpand(&marker)).into_owned();
            binds.push(value.clone());
        }
    }

    Ok(Rendered { sql, binds })
}

/// `$identifier` tokens still present in rendered text.
///
/// Positional markers (`$1`), dollar-quote delimiters (`$$`) and tagged
/// dollar quotes (`$tag$`) are not placeholders and are skipped.
pub fn unresolved_placeholders(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut found: Vec<String> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        if i > 0 && bytes[i - 1] == b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
        let ident = &sql[start..end];
        let tagged_quote = end < bytes.len() && bytes[end] == b'$';
        let starts_ident = ident
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);

        if starts_ident && !tagged_quote {
            let token = format!("${}", ident);
            if !found.contains(&token) {
                found.push(token);
            }
        }
        i = end.max(i + 1);
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, SqlqValue)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_bound_substitution() {
        let r = render(
            "select * from states where code = $code",
            &params(&[("code", "AZ".into())]),
        )
        .unwrap();
        assert_eq!(r.sql, "select * from states where code = $1");
        assert_eq!(r.binds, vec![SqlqValue::from("AZ")]);
    }

    #[test]
    fn test_literal_splice_is_verbatim() {
        let r = render(
            "select * from $$table order by $$column",
            &params(&[("table", "states".into()), ("column", "name desc".into())]),
        )
        .unwrap();
        assert_eq!(r.sql, "select * from states order by name desc");
        assert!(r.binds.is_empty());
    }

    #[test]
    fn test_reverse_order_protects_prefixed_keys() {
        let r = render(
            "select $id, $id2",
            &params(&[("id", 1.into()), ("id2", 2.into())]),
        )
        .unwrap();
        // id2 sorts first in reverse order, so it takes $1.
        assert_eq!(r.sql, "select $2, $1");
        assert_eq!(r.binds, vec![SqlqValue::Int(2), SqlqValue::Int(1)]);
    }

    #[test]
    fn test_repeated_placeholder_binds_once() {
        let r = render(
            "select * from t where a = $term or b = $TERM",
            &params(&[("term", "x".into())]),
        )
        .unwrap();
        assert_eq!(r.sql, "select * from t where a = $1 or b = $1");
        assert_eq!(r.binds.len(), 1);
    }

    #[test]
    fn test_literal_wins_over_bound() {
        let r = render(
            "select $$col from t where $col = 1",
            &params(&[("col", "name".into())]),
        )
        .unwrap();
        // $$col matched, so every case-insensitive "$$col" is spliced; the
        // lone "$col" is left untouched for this key.
        assert_eq!(r.sql, "select name from t where $col = 1");
        assert!(r.binds.is_empty());
    }

    #[test]
    fn test_literal_detection_ignores_case() {
        let r = render(
            "select $$COL from t where x = $col",
            &params(&[("col", "name".into())]),
        )
        .unwrap();
        // An upper-case splice marker still counts as the literal form.
        assert_eq!(r.sql, "select name from t where x = $col");
        assert!(r.binds.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let r = render("select 1", &params(&[("_", 123.into()), ("q", "x".into())])).unwrap();
        assert_eq!(r.sql, "select 1");
        assert!(r.binds.is_empty());
    }

    #[test]
    fn test_replacement_text_is_not_expanded() {
        let r = render("select '$$v'", &params(&[("v", "$1 ${x}".into())])).unwrap();
        assert_eq!(r.sql, "select '$1 ${x}'");
    }

    #[test]
    fn test_render_is_deterministic() {
        let p = params(&[
            ("a", 1.into()),
            ("b", 2.into()),
            ("c", 3.into()),
            ("d", "x".into()),
        ]);
        let raw = "select $a, $b, $c, $$d";
        let first = render(raw, &p).unwrap();
        for _ in 0..10 {
            assert_eq!(render(raw, &p).unwrap(), first);
        }
    }

    #[test]
    fn test_unresolved_placeholders() {
        assert_eq!(
            unresolved_placeholders("select * from t where a = $1 and b = $name and c = $Name"),
            vec!["$name".to_string(), "$Name".to_string()]
        );
        assert!(unresolved_placeholders("select $1, $2").is_empty());
        assert!(unresolved_placeholders("do $$ begin null; end $$").is_empty());
        assert!(unresolved_placeholders("select $body$ text $body$").is_empty());
    }
}
