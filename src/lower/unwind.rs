//! `$unwind` compiles to a `JSON_TABLE` unnest.
//!
//! `JSON_TABLE` columns must be declared up front, so the compiler scans the
//! remaining stages for every field read under the unwound path and prepares
//! one typed column per sub-path (NUMBER when any use is arithmetic, JSON
//! when the raw element or an array-valued sub-field is demanded).

use anyhow::Result;

use crate::ast::{AccOp, Expr, Literal, Predicate, Stage, Unwind, WindowFunc};
use crate::error::{Error, Reason};
use crate::plan::{Plan, UnnestColType, UnnestColumn};
use crate::utils;

use super::context::{Route, Scope, ScopeKind};
use super::Lowerer;

pub(crate) fn lower_unwind(
    lowerer: &mut Lowerer,
    plan: Plan,
    mut scope: Scope,
    unwind: &Unwind,
    rest: &[Stage],
    base: &str,
) -> Result<(Plan, Scope)> {
    let mut discovery = Discovery::default();
    scan_stages(rest, &unwind.path.0, &mut discovery);

    // Establish how the base row is addressed once the FROM list grows.
    let left_qualifier = match scope.kind {
        ScopeKind::Document => {
            if scope.qualifier.is_none() {
                scope.qualifier = Some(base.to_string());
            }
            None
        }
        ScopeKind::Columns { .. } => {
            let alias = lowerer.unique_alias("base");
            scope.qualifier = Some(alias.clone());
            Some(alias)
        }
    };

    let (source, json_path) = scope.locate(&unwind.path).ok_or_else(|| {
        Error::new(Reason::StageArg {
            stage: "$unwind".to_string(),
            detail: format!(
                "`{}` is not reachable in the current projection",
                unwind.path
            ),
        })
    })?;
    let row_path = if json_path == "$" {
        "$[*]".to_string()
    } else {
        format!("{json_path}[*]")
    };

    let alias = lowerer.unique_alias(&utils::unnest_alias(unwind.path.last_segment()));

    let mut columns = Vec::new();
    let mut route_cols = Vec::new();
    let mut taken: Vec<String> = vec!["id".to_string(), "data".to_string()];

    let index_field = match &unwind.include_array_index {
        Some(field) => {
            let col = claim_name(&utils::sanitize_alias(field), &mut taken);
            columns.push(UnnestColumn {
                name: col.clone(),
                path: String::new(),
                typ: UnnestColType::Ordinality,
            });
            Some((field.clone(), col))
        }
        None => None,
    };

    let whole = if discovery.whole {
        let col = claim_name("val", &mut taken);
        columns.push(UnnestColumn {
            name: col.clone(),
            path: "$".to_string(),
            typ: UnnestColType::Json,
        });
        Some(col)
    } else {
        None
    };

    for (sub, class) in &discovery.subs {
        let col = claim_name(&utils::sanitize_alias(&sub.replace('.', "_")), &mut taken);
        columns.push(UnnestColumn {
            name: col.clone(),
            path: format!("$.{sub}"),
            typ: match class {
                Class::Number => UnnestColType::Number,
                Class::Json => UnnestColType::Json,
                Class::Text => UnnestColType::Varchar,
            },
        });
        route_cols.push((sub.clone(), col, *class == Class::Number));
    }

    // JSON_TABLE requires a COLUMNS clause; an untouched unnest (e.g.
    // straight into $count) still needs one column to change cardinality.
    if columns.is_empty() {
        columns.push(UnnestColumn {
            name: "n".to_string(),
            path: String::new(),
            typ: UnnestColType::Ordinality,
        });
    }

    scope.routes.push(Route::Unnest {
        prefix: unwind.path.0.clone(),
        alias: alias.clone(),
        columns: route_cols,
        whole,
        index_field,
    });

    let plan = Plan::Unnest {
        input: Box::new(plan),
        source,
        path: row_path,
        alias,
        columns,
        outer: unwind.preserve_null_and_empty,
        left_qualifier,
    };
    Ok((plan, scope))
}

fn claim_name(wanted: &str, taken: &mut Vec<String>) -> String {
    let mut name = wanted.to_string();
    while taken.iter().any(|t| t == &name) {
        name.push('_');
    }
    taken.push(name.clone());
    name
}

#[derive(Debug, Default)]
struct Discovery {
    /// `(sub-path, class)` in first-use order.
    subs: Vec<(String, Class)>,
    /// The element itself (or a locator-style probe over it) is demanded.
    whole: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Text,
    Number,
    Json,
}

impl Discovery {
    fn add(&mut self, sub: &str, class: Class) {
        if sub.is_empty() {
            self.whole = true;
            return;
        }
        if let Some(slot) = self.subs.iter_mut().find(|(s, _)| s == sub) {
            // JSON wins over NUMBER wins over TEXT.
            slot.1 = match (slot.1, class) {
                (Class::Json, _) | (_, Class::Json) => Class::Json,
                (Class::Number, _) | (_, Class::Number) => Class::Number,
                _ => Class::Text,
            };
        } else {
            self.subs.push((sub.to_string(), class));
        }
    }
}

/// Operators whose arguments are read as NUMBER.
const NUMERIC_OPS: &[&str] = &[
    "$add",
    "$subtract",
    "$multiply",
    "$divide",
    "$mod",
    "$abs",
    "$ceil",
    "$floor",
    "$round",
    "$trunc",
];

/// Operators that address their field argument through a SQL/JSON locator,
/// requiring the raw element column.
const LOCATE_OPS: &[&str] = &["$size", "$isArray", "$type", "$arrayElemAt", "$first", "$last"];

/// Operators that read their field arguments as raw JSON.
const JSON_OPS: &[&str] = &["$setUnion", "$setIntersection", "$reverseArray"];

fn scan_stages(stages: &[Stage], prefix: &str, out: &mut Discovery) {
    for stage in stages {
        match stage {
            Stage::Match(p) => scan_predicate(p, prefix, out),
            Stage::Project(items) => {
                for item in items {
                    match &item.value {
                        crate::ast::ProjectValue::Include => scan_path(&item.field, prefix, Class::Text, out),
                        crate::ast::ProjectValue::Computed(e) => scan_expr(e, prefix, false, out),
                        crate::ast::ProjectValue::Exclude => {}
                    }
                }
            }
            Stage::AddFields(fields) => {
                for (_, e) in fields {
                    scan_expr(e, prefix, false, out);
                }
            }
            Stage::Group(g) => {
                scan_expr(&g.id, prefix, false, out);
                for acc in &g.accumulators {
                    let numeric = matches!(acc.op, AccOp::Sum | AccOp::Avg);
                    scan_expr(&acc.arg, prefix, numeric, out);
                }
            }
            Stage::Sort(keys) => {
                for key in keys {
                    scan_path(&key.field, prefix, Class::Text, out);
                }
            }
            Stage::Unwind(u) => {
                if u.path.is_under(prefix) {
                    out.whole = true;
                }
            }
            Stage::Lookup(l) => scan_path(&l.local_field.0, prefix, Class::Text, out),
            Stage::GraphLookup(g) => scan_expr(&g.start_with, prefix, false, out),
            Stage::Facet(facets) => {
                for (_, sub) in facets {
                    scan_stages(&sub.stages, prefix, out);
                }
            }
            Stage::Bucket(b) => {
                let numeric = b
                    .boundaries
                    .iter()
                    .all(|l| matches!(l, Literal::Integer(_) | Literal::Float(_)));
                scan_expr(&b.group_by, prefix, numeric, out);
                for acc in &b.output {
                    let numeric = matches!(acc.op, AccOp::Sum | AccOp::Avg);
                    scan_expr(&acc.arg, prefix, numeric, out);
                }
            }
            Stage::BucketAuto(b) => {
                scan_expr(&b.group_by, prefix, false, out);
                for acc in &b.output {
                    let numeric = matches!(acc.op, AccOp::Sum | AccOp::Avg);
                    scan_expr(&acc.arg, prefix, numeric, out);
                }
            }
            Stage::ReplaceRoot(e) | Stage::Redact(e) => scan_expr(e, prefix, false, out),
            Stage::SetWindowFields(w) => {
                if let Some(p) = &w.partition_by {
                    scan_expr(p, prefix, false, out);
                }
                for key in &w.sort_by {
                    scan_path(&key.field, prefix, Class::Text, out);
                }
                for output in &w.output {
                    if let WindowFunc::Agg { op, arg } = &output.func {
                        let numeric = matches!(op, AccOp::Sum | AccOp::Avg);
                        scan_expr(arg, prefix, numeric, out);
                    }
                }
            }
            Stage::Limit(_) | Stage::Skip(_) | Stage::Sample(_) | Stage::Count(_) => {}
            Stage::UnionWith { .. } => {}
        }
        // Stages that replace the row shape cut field visibility; anything
        // beyond them resolves against their outputs, not this unnest.
        if matches!(
            stage,
            Stage::Project(_)
                | Stage::AddFields(_)
                | Stage::Group(_)
                | Stage::Bucket(_)
                | Stage::BucketAuto(_)
                | Stage::ReplaceRoot(_)
                | Stage::Count(_)
                | Stage::Facet(_)
                | Stage::UnionWith { .. }
        ) {
            break;
        }
    }
}

fn scan_path(path: &str, prefix: &str, class: Class, out: &mut Discovery) {
    let path = crate::ast::FieldPath::new(path.to_string());
    if let Some(rest) = path.strip_prefix(prefix) {
        out.add(rest, class);
    }
}

fn scan_predicate(predicate: &Predicate, prefix: &str, out: &mut Discovery) {
    match predicate {
        Predicate::And(inner) | Predicate::Or(inner) | Predicate::Nor(inner) => {
            for p in inner {
                scan_predicate(p, prefix, out);
            }
        }
        Predicate::Not(inner) => scan_predicate(inner, prefix, out),
        Predicate::Cmp { path, value, .. } => {
            let numeric = matches!(value, Literal::Integer(_) | Literal::Float(_));
            scan_path(
                &path.0,
                prefix,
                if numeric { Class::Number } else { Class::Text },
                out,
            );
        }
        Predicate::In { path, values, .. } => {
            let numeric = values
                .iter()
                .all(|v| matches!(v, Literal::Integer(_) | Literal::Float(_)));
            scan_path(
                &path.0,
                prefix,
                if numeric { Class::Number } else { Class::Text },
                out,
            );
        }
        Predicate::Exists { path, .. } => {
            if path.is_under(prefix) {
                out.whole = true;
            }
        }
        Predicate::Regex { path, .. } => scan_path(&path.0, prefix, Class::Text, out),
        Predicate::Expr(e) => scan_expr(e, prefix, false, out),
    }
}

fn scan_expr(expr: &Expr, prefix: &str, numeric: bool, out: &mut Discovery) {
    match expr {
        Expr::FieldRef(path) => {
            if let Some(rest) = path.strip_prefix(prefix) {
                out.add(rest, if numeric { Class::Number } else { Class::Text });
            }
        }
        Expr::Literal(_) | Expr::VarRef(_) => {}
        Expr::Call { op, args } => {
            if LOCATE_OPS.contains(&op.as_str()) {
                if let Some(Expr::FieldRef(path)) = args.first() {
                    if path.is_under(prefix) {
                        out.whole = true;
                    }
                }
                for arg in args.iter().skip(1) {
                    scan_expr(arg, prefix, false, out);
                }
                return;
            }
            if JSON_OPS.contains(&op.as_str()) {
                for arg in args {
                    if let Expr::FieldRef(path) = arg {
                        if let Some(rest) = path.strip_prefix(prefix) {
                            out.add(rest, Class::Json);
                            continue;
                        }
                    }
                    scan_expr(arg, prefix, false, out);
                }
                return;
            }
            let arg_numeric = NUMERIC_OPS.contains(&op.as_str())
                || args.iter().any(|a| {
                    matches!(a, Expr::Literal(Literal::Integer(_) | Literal::Float(_)))
                }) && matches!(op.as_str(), "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte");
            for arg in args {
                scan_expr(arg, prefix, arg_numeric, out);
            }
        }
        Expr::Filter { input, cond, .. } => {
            scan_json_input(input, prefix, out);
            scan_expr(cond, prefix, false, out);
        }
        Expr::Map { input, inner, .. } => {
            scan_json_input(input, prefix, out);
            scan_expr(inner, prefix, false, out);
        }
        Expr::Reduce {
            input,
            initial,
            inner,
        } => {
            scan_json_input(input, prefix, out);
            scan_expr(initial, prefix, false, out);
            scan_expr(inner, prefix, false, out);
        }
        Expr::Cond {
            cond,
            then,
            otherwise,
        } => {
            scan_expr(cond, prefix, false, out);
            scan_expr(then, prefix, numeric, out);
            scan_expr(otherwise, prefix, numeric, out);
        }
        Expr::Switch { branches, default } => {
            for branch in branches {
                scan_expr(&branch.case, prefix, false, out);
                scan_expr(&branch.then, prefix, numeric, out);
            }
            if let Some(default) = default {
                scan_expr(default, prefix, numeric, out);
            }
        }
        Expr::Object(fields) => {
            for (_, value) in fields {
                scan_expr(value, prefix, false, out);
            }
        }
        Expr::Array(items) => {
            for item in items {
                scan_expr(item, prefix, false, out);
            }
        }
    }
}

fn scan_json_input(input: &Expr, prefix: &str, out: &mut Discovery) {
    if let Expr::FieldRef(path) = input {
        if let Some(rest) = path.strip_prefix(prefix) {
            out.add(rest, Class::Json);
            return;
        }
    }
    scan_expr(input, prefix, false, out);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser;

    fn discover(pipeline: serde_json::Value, prefix: &str) -> Discovery {
        let pipeline = parser::parse(&pipeline).unwrap();
        let mut out = Discovery::default();
        scan_stages(&pipeline.stages, prefix, &mut out);
        out
    }

    #[test]
    fn numeric_use_wins_over_text() {
        let d = discover(
            serde_json::json!([
                {"$match": {"items.qty": {"$gt": 2}}},
                {"$group": {
                    "_id": "$items.product",
                    "total": {"$sum": {"$multiply": ["$items.qty", "$items.price"]}}
                }}
            ]),
            "items",
        );
        assert_eq!(
            d.subs,
            vec![
                ("qty".to_string(), Class::Number),
                ("product".to_string(), Class::Text),
                ("price".to_string(), Class::Number),
            ]
        );
        assert!(!d.whole);
    }

    #[test]
    fn whole_element_demanded_by_group_key() {
        let d = discover(
            serde_json::json!([{"$group": {"_id": "$tags", "n": {"$sum": 1}}}]),
            "tags",
        );
        assert!(d.whole);
    }

    #[test]
    fn scan_stops_at_row_replacing_stage() {
        let d = discover(
            serde_json::json!([
                {"$project": {"qty": "$items.qty"}},
                {"$match": {"items.price": {"$gt": 10}}}
            ]),
            "items",
        );
        // items.price is read after $project replaced the row shape.
        assert_eq!(d.subs, vec![("qty".to_string(), Class::Text)]);
    }
}
