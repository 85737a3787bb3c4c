use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,.]+").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// One spreadsheet row: column name -> cell value (strings as they came in).
pub type Row = Map<String, Value>;

/// Join `parts` into a lowercase, hyphenated, punctuation-free identifier.
/// Total: any input produces a slug, possibly the empty string.
pub fn slugify(parts: &[&str]) -> String {
    let joined = parts.join("-").to_lowercase();
    let stripped = PUNCT_RE.replace_all(&joined, "");
    let hyphenated = SPACE_RE.replace_all(&stripped, "-");
    hyphenated.trim_matches('-').to_string()
}

/// Flatten a two-column key/value row set into a single mapping.
/// Rows with an empty `value` are dropped; later duplicate keys win.
pub fn flatten_kv(rows: &[Row]) -> Map<String, Value> {
    let mut out = Map::new();
    for row in rows {
        let key = str_field(row, "key");
        let value = str_field(row, "value");
        if value.is_empty() {
            continue;
        }
        out.insert(key, Value::String(value));
    }
    out
}

/// Index rows by the value of `key`. Later duplicates overwrite earlier ones;
/// collisions are the caller's problem to notice.
pub fn index_by<'a>(rows: &'a [Row], key: &str) -> HashMap<String, &'a Row> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        index.insert(str_field(row, key), row);
    }
    index
}

/// String value of a row cell, or "" when the column is absent or non-string.
pub fn str_field(row: &Row, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify(&["Jane Doe"]), "jane-doe");
        assert_eq!(slugify(&["Bob, Jr."]), "bob-jr");
    }

    #[test]
    fn slugify_multiple_parts() {
        assert_eq!(slugify(&["economy", "Jane Doe"]), "economy-jane-doe");
    }

    #[test]
    fn slugify_idempotent() {
        for input in ["Jane Doe", "Bob, Jr.", "  Spaced   Out  ", "already-slug"] {
            let once = slugify(&[input]);
            assert_eq!(slugify(&[&once]), once);
        }
    }

    #[test]
    fn slugify_never_leaves_hyphen_edges_or_uppercase() {
        for input in [" leading", "trailing ", "-edge-", "MiXeD Case."] {
            let slug = slugify(&[input]);
            assert!(!slug.starts_with('-'), "leading hyphen in {:?}", slug);
            assert!(!slug.ends_with('-'), "trailing hyphen in {:?}", slug);
            assert!(slug.chars().all(|c| !c.is_uppercase()));
        }
    }

    #[test]
    fn flatten_kv_drops_empty_values() {
        let rows = vec![row(&[("key", "a"), ("value", "1")]), row(&[("key", "b"), ("value", "")])];
        let flat = flatten_kv(&rows);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat["a"], json!("1"));
    }

    #[test]
    fn flatten_kv_last_duplicate_wins() {
        let rows = vec![row(&[("key", "a"), ("value", "1")]), row(&[("key", "a"), ("value", "2")])];
        assert_eq!(flatten_kv(&rows)["a"], json!("2"));
    }

    #[test]
    fn index_by_last_duplicate_wins() {
        let rows = vec![row(&[("id", "x"), ("n", "1")]), row(&[("id", "x"), ("n", "2")])];
        let index = index_by(&rows, "id");
        assert_eq!(index.len(), 1);
        assert_eq!(str_field(index["x"], "n"), "2");
    }
}
