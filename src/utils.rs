use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Reason, Result};

/// Identifier shape accepted for collection names and path segments before
/// they are interpolated into SQL text or SQL/JSON path expressions.
static IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

pub(crate) fn validate_ident(name: &str, what: &str) -> Result<(), Error> {
    if IDENT.is_match(name) {
        Ok(())
    } else {
        Err(Error::new(Reason::Simple(format!(
            "{what} `{name}` is not a valid identifier"
        ))))
    }
}

pub(crate) fn validate_field_path(path: &str, what: &str) -> Result<(), Error> {
    if !path.is_empty() && path.split('.').all(|seg| IDENT.is_match(seg)) {
        Ok(())
    } else {
        Err(Error::new(Reason::Simple(format!(
            "{what} `{path}` is not a valid field path"
        ))))
    }
}

/// A SQL string literal with embedded quotes doubled.
pub(crate) fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Oracle reserved words that appear as output field names in the wild,
/// remapped to fixed safe aliases so emitted SQL never needs quoting.
const RESERVED_ALIASES: &[(&str, &str)] = &[
    ("count", "cnt"),
    ("order", "ord"),
    ("group", "grp"),
    ("select", "sel"),
    ("from", "frm"),
    ("where", "whr"),
    ("number", "num"),
    ("date", "dt"),
    ("level", "lvl"),
    ("size", "sz"),
    ("desc", "dsc"),
    ("mode", "md"),
    ("comment", "cmt"),
];

/// Deterministic SQL alias for an output field name. The group key keeps
/// its conventional `grp_id` column name.
pub(crate) fn sanitize_alias(field: &str) -> String {
    if field == "_id" {
        return "grp_id".to_string();
    }
    for (reserved, replacement) in RESERVED_ALIASES {
        if field.eq_ignore_ascii_case(reserved) {
            return (*replacement).to_string();
        }
    }
    let mut alias: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if alias.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        alias.insert(0, '_');
    }
    alias
}

/// Alias for an unnested array: the last path segment, singularized the
/// naive English way so `items` unnests as `item`.
pub(crate) fn unnest_alias(segment: &str) -> String {
    let base = segment
        .strip_suffix('s')
        .filter(|rest| rest.len() > 1)
        .unwrap_or(segment);
    sanitize_alias(base)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ident_validation() {
        assert!(validate_ident("sales", "collection").is_ok());
        assert!(validate_ident("sales; DROP TABLE x", "collection").is_err());
        assert!(validate_field_path("items.qty", "field").is_ok());
        assert!(validate_field_path("items..qty", "field").is_err());
        assert!(validate_field_path("a'b", "field").is_err());
    }

    #[test]
    fn string_quoting() {
        assert_eq!(sql_string("it's"), "'it''s'");
    }

    #[test]
    fn aliases() {
        assert_eq!(sanitize_alias("count"), "cnt");
        assert_eq!(sanitize_alias("totalQuantity"), "totalQuantity");
        assert_eq!(sanitize_alias("a.b"), "a_b");
        assert_eq!(unnest_alias("items"), "item");
        assert_eq!(unnest_alias("s"), "s");
    }
}
