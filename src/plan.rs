//! Relational plan
//!
//! Strictly typed intermediate representation the stage compilers build
//! bottom-up and the emitter renders as a single Oracle SQL statement.
//! All expressions are already-compiled SQL fragments; the plan owns no
//! references back into the pipeline AST.

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum Plan {
    Scan {
        collection: String,
    },
    Filter {
        input: Box<Plan>,
        predicate: String,
    },
    Project {
        input: Box<Plan>,
        columns: Vec<OutputColumn>,
        distinct: bool,
    },
    Aggregate {
        input: Box<Plan>,
        /// GROUP BY expressions; empty for a whole-input aggregation.
        group_keys: Vec<String>,
        columns: Vec<OutputColumn>,
    },
    Sort {
        input: Box<Plan>,
        keys: Vec<SortSpec>,
    },
    LimitOffset {
        input: Box<Plan>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    /// A `$lookup`-style join against another collection-backed table.
    Join {
        input: Box<Plan>,
        kind: JoinKind,
        table: String,
        alias: String,
        on: String,
        /// Alias the emitter must give the left side when it is forced into
        /// an inline view, so correlated references keep resolving.
        left_qualifier: Option<String>,
    },
    /// Relational flattening of a JSON array, compiled to `JSON_TABLE`.
    Unnest {
        input: Box<Plan>,
        /// The JSON source operand, e.g. `sales.data`.
        source: String,
        /// SQL/JSON row path, e.g. `$.items[*]`.
        path: String,
        alias: String,
        columns: Vec<UnnestColumn>,
        /// Preserve rows with null or empty arrays (left-outer semantics).
        outer: bool,
        left_qualifier: Option<String>,
    },
    /// Window computations appended to the pass-through row.
    Window {
        input: Box<Plan>,
        columns: Vec<OutputColumn>,
    },
    /// UNION ALL of column-aligned inputs.
    SetOp {
        inputs: Vec<Plan>,
    },
    /// Named sub-pipelines emitted as one `JSON_OBJECT` row of scalar
    /// subqueries. Each facet owns its subplan independently.
    Facet {
        facets: Vec<(String, Plan)>,
    },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputColumn {
    /// SQL alias; already sanitized by the stage compiler.
    pub name: String,
    /// JSON field name in wrapped contexts (`$facet` output objects);
    /// usually the original document field.
    pub key: String,
    pub expr: String,
}

impl OutputColumn {
    pub fn new<N: Into<String>, E: Into<String>>(name: N, expr: E) -> Self {
        let name = name.into();
        OutputColumn {
            key: name.clone(),
            name,
            expr: expr.into(),
        }
    }

    pub fn keyed<K: Into<String>, N: Into<String>, E: Into<String>>(
        key: K,
        name: N,
        expr: E,
    ) -> Self {
        OutputColumn {
            key: key.into(),
            name: name.into(),
            expr: expr.into(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    pub expr: String,
    pub descending: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct UnnestColumn {
    pub name: String,
    /// Path relative to the unnested element, e.g. `$.qty`; ignored for
    /// ordinality columns.
    pub path: String,
    pub typ: UnnestColType,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum UnnestColType {
    Number,
    Varchar,
    /// The element itself (or an array-valued sub-field), kept as JSON text.
    Json,
    Ordinality,
}

impl Plan {
    /// Column names this plan exposes, outermost projection first.
    /// `None` means raw document rows (`id`, `data`).
    pub fn output_names(&self) -> Option<Vec<String>> {
        match self {
            Plan::Scan { .. } => None,
            Plan::Project { columns, .. } | Plan::Aggregate { columns, .. } => {
                Some(columns.iter().map(|c| c.name.clone()).collect())
            }
            Plan::Window { input, columns } => {
                let mut names = input
                    .output_names()
                    .unwrap_or_else(|| vec!["id".to_string(), "data".to_string()]);
                names.extend(columns.iter().map(|c| c.name.clone()));
                Some(names)
            }
            Plan::Filter { input, .. }
            | Plan::Sort { input, .. }
            | Plan::LimitOffset { input, .. }
            | Plan::Join { input, .. }
            | Plan::Unnest { input, .. } => input.output_names(),
            Plan::SetOp { inputs } => inputs.first().and_then(|p| p.output_names()),
            Plan::Facet { .. } => Some(vec!["data".to_string()]),
        }
    }

    /// Output columns with their JSON keys, for contexts that wrap rows
    /// back into JSON objects.
    pub fn output_columns(&self) -> Option<&[OutputColumn]> {
        match self {
            Plan::Project { columns, .. }
            | Plan::Aggregate { columns, .. }
            | Plan::Window { columns, .. } => Some(columns),
            Plan::Filter { input, .. }
            | Plan::Sort { input, .. }
            | Plan::LimitOffset { input, .. }
            | Plan::Join { input, .. }
            | Plan::Unnest { input, .. } => input.output_columns(),
            Plan::SetOp { inputs } => inputs.first().and_then(|p| p.output_columns()),
            Plan::Scan { .. } | Plan::Facet { .. } => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn output_names_pass_through_non_projecting_nodes() {
        let plan = Plan::Sort {
            input: Box::new(Plan::Aggregate {
                input: Box::new(Plan::Scan {
                    collection: "sales".to_string(),
                }),
                group_keys: vec!["JSON_VALUE(data, '$.status')".to_string()],
                columns: vec![
                    OutputColumn::new("grp_id", "JSON_VALUE(data, '$.status')"),
                    OutputColumn::new("cnt", "COUNT(*)"),
                ],
            }),
            keys: vec![SortSpec {
                expr: "JSON_VALUE(data, '$.status')".to_string(),
                descending: false,
            }],
        };
        assert_eq!(plan.output_names().unwrap(), ["grp_id", "cnt"]);
    }

    #[test]
    fn scan_exposes_raw_rows() {
        let plan = Plan::Scan {
            collection: "sales".to_string(),
        };
        assert_eq!(plan.output_names(), None);
    }
}
