//! The compilation context threaded through expression lowering.
//!
//! The context is explicit and passed by value down the expression tree:
//! variable bindings live in a stack-shaped mapping here, never in
//! process-wide state.

use crate::ast::FieldPath;
use crate::error::{Error, Reason, Result};

/// What the caller intends to do with a field it is about to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Demand {
    /// A scalar value; `numeric` appends `RETURNING NUMBER`.
    Scalar { numeric: bool },
    /// The raw JSON of an object or array field.
    Json,
    /// An existence test.
    Exists,
}

impl Demand {
    pub(crate) const TEXT: Demand = Demand::Scalar { numeric: false };
    pub(crate) const NUMBER: Demand = Demand::Scalar { numeric: true };
}

/// Result type a compiled fragment declares to its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ty {
    Number,
    Text,
    Bool,
    Json,
    Unknown,
}

/// A compiled SQL fragment, parenthesized enough to be embedded anywhere an
/// operand is legal.
#[derive(Debug, Clone)]
pub(crate) struct Fragment {
    pub sql: String,
    pub ty: Ty,
}

impl Fragment {
    pub fn number<S: Into<String>>(sql: S) -> Self {
        Fragment {
            sql: sql.into(),
            ty: Ty::Number,
        }
    }

    pub fn text<S: Into<String>>(sql: S) -> Self {
        Fragment {
            sql: sql.into(),
            ty: Ty::Text,
        }
    }

    pub fn boolean<S: Into<String>>(sql: S) -> Self {
        Fragment {
            sql: sql.into(),
            ty: Ty::Bool,
        }
    }

    pub fn json<S: Into<String>>(sql: S) -> Self {
        Fragment {
            sql: sql.into(),
            ty: Ty::Json,
        }
    }

    pub fn unknown<S: Into<String>>(sql: S) -> Self {
        Fragment {
            sql: sql.into(),
            ty: Ty::Unknown,
        }
    }

    /// The fragment as a selectable value. Predicates become the canonical
    /// `'true'`/`'false'` text so computed booleans compare equal to
    /// `JSON_VALUE` reads of stored booleans.
    pub fn into_value(self) -> String {
        match self.ty {
            Ty::Bool => format!("CASE WHEN {} THEN 'true' ELSE 'false' END", self.sql),
            _ => self.sql,
        }
    }

    /// The fragment as a WHERE-position condition, with document truthiness
    /// coercion for non-boolean values.
    pub fn into_predicate(self) -> String {
        match self.ty {
            Ty::Bool => self.sql,
            Ty::Number => format!("({} <> 0)", self.sql),
            Ty::Text | Ty::Unknown => {
                format!("({0} IS NOT NULL AND {0} NOT IN ('false', '0'))", self.sql)
            }
            Ty::Json => format!("({} IS NOT NULL)", self.sql),
        }
    }
}

/// A `$$name` binding introduced by `$filter`/`$map`/`$reduce`; the SQL is a
/// JSON-valued reference to the element row.
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub sql: String,
}

/// Where field references currently land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    /// Raw document rows; paths extract from the `data` column.
    Document,
    /// Outputs of a projecting stage. `has_data` is true when the document
    /// column is passed through (`$addFields`, `$replaceRoot`).
    Columns { has_data: bool },
}

#[derive(Debug, Clone)]
pub(crate) enum Route {
    /// An active `$unwind`: paths under `prefix` read typed `JSON_TABLE`
    /// columns of `alias`.
    Unnest {
        prefix: String,
        alias: String,
        /// `(sub-path, column name, numeric)` triples declared up front.
        columns: Vec<(String, String, bool)>,
        /// Column holding the whole element as JSON, when demanded.
        whole: Option<String>,
        /// `includeArrayIndex` output: `(field, column name)`.
        index_field: Option<(String, String)>,
    },
    /// A `$lookup` degenerated to a join: paths under `prefix` read the
    /// joined row's document column.
    Foreign { prefix: String, alias: String },
    /// A named output column of the current plan head.
    Column {
        field: String,
        sqlref: String,
        ty: Ty,
        /// The column already holds `COUNT(*)` of the array this field
        /// names, so `$size` collapses to the column itself.
        is_size: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub kind: ScopeKind,
    /// Base row qualifier; `None` while the query has a single source.
    pub qualifier: Option<String>,
    pub routes: Vec<Route>,
    pub bindings: Vec<(String, Binding)>,
}

impl Scope {
    pub fn document(qualifier: Option<String>) -> Self {
        Scope {
            kind: ScopeKind::Document,
            qualifier,
            routes: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn columns(routes: Vec<Route>, has_data: bool) -> Self {
        Scope {
            kind: ScopeKind::Columns { has_data },
            qualifier: None,
            routes,
            bindings: Vec::new(),
        }
    }

    pub fn with_binding(&self, name: &str, sql: String) -> Self {
        let mut scope = self.clone();
        scope.bindings.push((name.to_string(), Binding { sql }));
        scope
    }

    pub fn lookup_binding(&self, name: &str) -> Option<&Binding> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
    }

    /// The document column reference, qualified when the query has more
    /// than one source.
    pub fn data_ref(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{q}.data"),
            None => "data".to_string(),
        }
    }

    pub fn id_ref(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{q}.id"),
            None => "id".to_string(),
        }
    }

    fn has_document(&self) -> bool {
        matches!(
            self.kind,
            ScopeKind::Document | ScopeKind::Columns { has_data: true }
        )
    }

    /// Resolve a field path to a SQL fragment under `demand`.
    pub fn resolve(&self, path: &FieldPath, demand: Demand) -> Result<Fragment, Error> {
        // Latest route wins; routes are pushed as stages introduce them.
        for route in self.routes.iter().rev() {
            match route {
                Route::Unnest {
                    prefix,
                    alias,
                    columns,
                    whole,
                    index_field,
                } => {
                    if let Some((field, col)) = index_field {
                        if path.0 == *field {
                            // FOR ORDINALITY is 1-based; documents count from 0.
                            return Ok(Fragment::number(format!("({alias}.{col} - 1)")));
                        }
                    }
                    if let Some(rest) = path.strip_prefix(prefix) {
                        return resolve_unnest(alias, columns, whole.as_deref(), rest, demand);
                    }
                }
                Route::Foreign { prefix, alias } => {
                    if let Some(rest) = path.strip_prefix(prefix) {
                        let source = format!("{alias}.data");
                        return Ok(if rest.is_empty() {
                            Fragment::json(source)
                        } else {
                            extract(&source, &format!("$.{rest}"), demand)
                        });
                    }
                }
                Route::Column {
                    field,
                    sqlref,
                    ty,
                    is_size: _,
                } => {
                    if path.0 == *field {
                        return Ok(Fragment {
                            sql: sqlref.clone(),
                            ty: *ty,
                        });
                    }
                    if let Some(rest) = path.strip_prefix(field) {
                        return Ok(extract(sqlref, &format!("$.{rest}"), demand));
                    }
                }
            }
        }

        if self.has_document() {
            // The surrogate id column stands in for `_id`.
            if path.0 == "_id" {
                return Ok(Fragment::number(self.id_ref()));
            }
            return Ok(extract(&self.data_ref(), &path.json_path(), demand));
        }

        // Projected scope without the document column: an unknown field is
        // absent from every row, which JSON extraction models as NULL.
        Ok(Fragment::unknown("NULL"))
    }

    /// Where `path` can be read as a SQL/JSON locator: a JSON source
    /// operand plus a path expression inside it. `None` when the path is
    /// routed to a typed relational column (or nowhere).
    pub fn locate(&self, path: &FieldPath) -> Option<(String, String)> {
        for route in self.routes.iter().rev() {
            match route {
                Route::Unnest {
                    prefix,
                    alias,
                    whole,
                    ..
                } => {
                    if let Some(rest) = path.strip_prefix(prefix) {
                        let col = whole.as_deref()?;
                        let json_path = if rest.is_empty() {
                            "$".to_string()
                        } else {
                            format!("$.{rest}")
                        };
                        return Some((format!("{alias}.{col}"), json_path));
                    }
                }
                Route::Foreign { prefix, alias } => {
                    if let Some(rest) = path.strip_prefix(prefix) {
                        let json_path = if rest.is_empty() {
                            "$".to_string()
                        } else {
                            format!("$.{rest}")
                        };
                        return Some((format!("{alias}.data"), json_path));
                    }
                }
                Route::Column { field, sqlref, .. } => {
                    if path.0 == *field {
                        return Some((sqlref.clone(), "$".to_string()));
                    }
                    if let Some(rest) = path.strip_prefix(field) {
                        return Some((sqlref.clone(), format!("$.{rest}")));
                    }
                }
            }
        }
        if self.has_document() {
            return Some((self.data_ref(), path.json_path()));
        }
        None
    }

    /// The `$size`-peephole column for `path`, if one is in scope.
    pub fn size_column(&self, path: &FieldPath) -> Option<Fragment> {
        self.routes.iter().rev().find_map(|route| match route {
            Route::Column {
                field,
                sqlref,
                is_size: true,
                ..
            } if *field == path.0 => Some(Fragment::number(sqlref.clone())),
            _ => None,
        })
    }
}

fn resolve_unnest(
    alias: &str,
    columns: &[(String, String, bool)],
    whole: Option<&str>,
    rest: &str,
    demand: Demand,
) -> Result<Fragment, Error> {
    if rest.is_empty() {
        let col = whole.ok_or_else(|| {
            Error::new(Reason::Simple(format!(
                "unnested alias `{alias}` has no element column"
            )))
        })?;
        return Ok(Fragment::json(format!("{alias}.{col}")));
    }
    if demand == Demand::Json {
        // Array- or object-valued sub-fields are declared as JSON columns.
        if let Some((_, col, _)) = columns.iter().find(|(sub, _, _)| sub == rest) {
            return Ok(Fragment::json(format!("{alias}.{col}")));
        }
    }
    if let Some((_, col, numeric)) = columns.iter().find(|(sub, _, _)| sub == rest) {
        let frag = format!("{alias}.{col}");
        return Ok(match demand {
            Demand::Exists => Fragment::boolean(format!("{frag} IS NOT NULL")),
            _ if *numeric => Fragment::number(frag),
            _ => Fragment::text(frag),
        });
    }
    Err(Error::new(Reason::Simple(format!(
        "field `{rest}` was not prepared as a column of unnested alias `{alias}`"
    ))))
}

/// The path-extraction policy: scalar reads use `JSON_VALUE`, object and
/// array reads use `JSON_QUERY`, existence tests use `JSON_EXISTS`.
pub(crate) fn extract(source: &str, json_path: &str, demand: Demand) -> Fragment {
    match demand {
        Demand::Scalar { numeric: true } => Fragment::number(format!(
            "JSON_VALUE({source}, '{json_path}' RETURNING NUMBER)"
        )),
        Demand::Scalar { numeric: false } => {
            Fragment::text(format!("JSON_VALUE({source}, '{json_path}')"))
        }
        Demand::Json => Fragment::json(format!("JSON_QUERY({source}, '{json_path}')")),
        Demand::Exists => Fragment::boolean(format!("JSON_EXISTS({source}, '{json_path}')")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn items_route() -> Route {
        Route::Unnest {
            prefix: "items".to_string(),
            alias: "item".to_string(),
            columns: vec![
                ("product".to_string(), "product".to_string(), false),
                ("qty".to_string(), "qty".to_string(), true),
            ],
            whole: Some("val".to_string()),
            index_field: None,
        }
    }

    #[test]
    fn document_scope_extracts_by_path() {
        let scope = Scope::document(None);
        let frag = scope
            .resolve(&FieldPath::new("status"), Demand::TEXT)
            .unwrap();
        assert_eq!(frag.sql, "JSON_VALUE(data, '$.status')");

        let frag = scope
            .resolve(&FieldPath::new("total"), Demand::NUMBER)
            .unwrap();
        assert_eq!(frag.sql, "JSON_VALUE(data, '$.total' RETURNING NUMBER)");
    }

    #[test]
    fn qualified_document_scope() {
        let scope = Scope::document(Some("sales".to_string()));
        let frag = scope
            .resolve(&FieldPath::new("status"), Demand::Json)
            .unwrap();
        assert_eq!(frag.sql, "JSON_QUERY(sales.data, '$.status')");
    }

    #[test]
    fn unnest_route_resolves_columns() {
        let mut scope = Scope::document(Some("sales".to_string()));
        scope.routes.push(items_route());

        let frag = scope
            .resolve(&FieldPath::new("items.qty"), Demand::NUMBER)
            .unwrap();
        assert_eq!(frag.sql, "item.qty");
        assert_eq!(frag.ty, Ty::Number);

        let frag = scope.resolve(&FieldPath::new("items"), Demand::Json).unwrap();
        assert_eq!(frag.sql, "item.val");

        // paths outside the unnest still hit the base document
        let frag = scope
            .resolve(&FieldPath::new("status"), Demand::TEXT)
            .unwrap();
        assert_eq!(frag.sql, "JSON_VALUE(sales.data, '$.status')");
    }

    #[test]
    fn column_scope_without_document_yields_null() {
        let scope = Scope::columns(
            vec![Route::Column {
                field: "_id".to_string(),
                sqlref: "grp_id".to_string(),
                ty: Ty::Text,
                is_size: false,
            }],
            false,
        );
        let frag = scope.resolve(&FieldPath::new("_id"), Demand::TEXT).unwrap();
        assert_eq!(frag.sql, "grp_id");
        let frag = scope
            .resolve(&FieldPath::new("missing"), Demand::TEXT)
            .unwrap();
        assert_eq!(frag.sql, "NULL");
    }

    #[test]
    fn bool_fragment_as_value_is_canonical_text() {
        let frag = Fragment::boolean("a = b");
        assert_eq!(
            frag.into_value(),
            "CASE WHEN a = b THEN 'true' ELSE 'false' END"
        );
    }
}
