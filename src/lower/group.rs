//! `$group`, `$bucket` and `$bucketAuto` compile to [Plan::Aggregate].

use std::collections::HashSet;

use anyhow::Result;

use crate::ast::{AccOp, Accumulator, Bucket, BucketAuto, Expr, FieldPath, Group, Literal, SortKey};
use crate::plan::{OutputColumn, Plan};
use crate::utils;

use super::context::{Demand, Route, Scope, Ty};
use super::expr::{compile_expr, num_arg, text_arg};
use super::{push_filter, Lowerer};

pub(crate) fn lower_group(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    group: &Group,
) -> Result<(Plan, Scope)> {
    if let [only] = group.accumulators.as_slice() {
        if only.op == AccOp::AddToSet {
            return lower_group_add_to_set(lowerer, plan, scope, group, only);
        }
    }

    let (group_keys, grp_col) = compile_group_id(lowerer, &scope, &group.id)?;
    let mut columns = Vec::new();
    let mut routes = Vec::new();
    if let Some(expr) = grp_col {
        columns.push(OutputColumn::keyed("_id", "grp_id", expr));
        routes.push(column_route("_id", "grp_id", Ty::Unknown));
    }
    for acc in &group.accumulators {
        let (sql, ty) = compile_accumulator(lowerer, &scope, acc, None)?;
        let alias = utils::sanitize_alias(&acc.field);
        columns.push(OutputColumn::keyed(acc.field.clone(), alias.clone(), sql));
        routes.push(column_route(&acc.field, &alias, ty));
    }

    let plan = Plan::Aggregate {
        input: Box::new(plan),
        group_keys,
        columns,
    };
    Ok((plan, Scope::columns(routes, false)))
}

/// `$sort` immediately before a `$first`/`$last` group: the sort spec is
/// consumed into `KEEP (DENSE_RANK FIRST|LAST ORDER BY …)` over a subquery
/// projecting the fields the aggregation needs.
pub(crate) fn lower_group_keep(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    sort_keys: &[SortKey],
    group: &Group,
) -> Result<(Plan, Scope)> {
    let mut refs: Vec<&FieldPath> = Vec::new();
    group.collect_field_refs(&mut refs);
    let sort_paths: Vec<FieldPath> = sort_keys
        .iter()
        .map(|k| FieldPath::new(k.field.clone()))
        .collect();

    let mut inner_cols: Vec<OutputColumn> = Vec::new();
    let mut inner_routes: Vec<Route> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    {
        let mut add_field = |path: &FieldPath| -> Result<()> {
            if !seen.insert(path.0.clone()) {
                return Ok(());
            }
            let name = utils::sanitize_alias(&path.0.replace('.', "_"));
            let frag = scope.resolve(path, Demand::TEXT)?;
            inner_cols.push(OutputColumn::new(name.clone(), frag.sql));
            inner_routes.push(column_route(&path.0, &name, frag.ty));
            Ok(())
        };
        for path in refs {
            add_field(path)?;
        }
        for path in &sort_paths {
            add_field(path)?;
        }
    }
    let inner_scope = Scope::columns(inner_routes, false);

    let order = sort_keys
        .iter()
        .map(|key| {
            let frag =
                inner_scope.resolve(&FieldPath::new(key.field.clone()), Demand::TEXT)?;
            Ok(if key.descending {
                format!("{} DESC", frag.sql)
            } else {
                frag.sql
            })
        })
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let (group_keys, grp_col) = compile_group_id(lowerer, &inner_scope, &group.id)?;
    let mut columns = Vec::new();
    let mut routes = Vec::new();
    if let Some(expr) = grp_col {
        columns.push(OutputColumn::keyed("_id", "grp_id", expr));
        routes.push(column_route("_id", "grp_id", Ty::Unknown));
    }
    for acc in &group.accumulators {
        let (sql, ty) = compile_accumulator(lowerer, &inner_scope, acc, Some(order.as_str()))?;
        let alias = utils::sanitize_alias(&acc.field);
        columns.push(OutputColumn::keyed(acc.field.clone(), alias.clone(), sql));
        routes.push(column_route(&acc.field, &alias, ty));
    }

    let plan = Plan::Aggregate {
        input: Box::new(Plan::Project {
            input: Box::new(plan),
            columns: inner_cols,
            distinct: false,
        }),
        group_keys,
        columns,
    };
    Ok((plan, Scope::columns(routes, false)))
}

/// `$addToSet` as the only accumulator: `JSON_ARRAYAGG` over a DISTINCT
/// subquery. Mixed with other accumulators it is unsupported (the DISTINCT
/// projection would distort them).
fn lower_group_add_to_set(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    group: &Group,
    acc: &Accumulator,
) -> Result<(Plan, Scope)> {
    let (_, grp_col) = compile_group_id(lowerer, &scope, &group.id)?;
    let value = text_arg(lowerer, &scope, &acc.arg)?;

    let mut inner_cols = Vec::new();
    let mut group_keys = Vec::new();
    if let Some(expr) = &grp_col {
        inner_cols.push(OutputColumn::new("grp_id", expr.clone()));
        group_keys.push("grp_id".to_string());
    }
    inner_cols.push(OutputColumn::new("val", value));

    let alias = utils::sanitize_alias(&acc.field);
    let mut columns = Vec::new();
    let mut routes = Vec::new();
    if grp_col.is_some() {
        columns.push(OutputColumn::keyed("_id", "grp_id", "grp_id"));
        routes.push(column_route("_id", "grp_id", Ty::Unknown));
    }
    columns.push(OutputColumn::keyed(
        acc.field.clone(),
        alias.clone(),
        "JSON_ARRAYAGG(val)",
    ));
    routes.push(column_route(&acc.field, &alias, Ty::Json));

    let plan = Plan::Aggregate {
        input: Box::new(Plan::Project {
            input: Box::new(plan),
            columns: inner_cols,
            distinct: true,
        }),
        group_keys,
        columns,
    };
    Ok((plan, Scope::columns(routes, false)))
}

pub(crate) fn lower_bucket(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    bucket: &Bucket,
) -> Result<(Plan, Scope)> {
    let numeric = bucket
        .boundaries
        .iter()
        .all(|b| matches!(b, Literal::Integer(_) | Literal::Float(_)));
    let g = compile_expr(lowerer, &scope, &bucket.group_by, Demand::Scalar { numeric })?
        .into_value();
    let bounds: Vec<String> = bucket
        .boundaries
        .iter()
        .map(|b| lowerer.literal_fragment(b).sql)
        .collect();

    let mut arms = Vec::with_capacity(bounds.len() - 1);
    for window in bounds.windows(2) {
        let (lo, hi) = (&window[0], &window[1]);
        arms.push(format!("WHEN {g} >= {lo} AND {g} < {hi} THEN {lo}"));
    }
    let default = match &bucket.default {
        Some(default) => format!(" ELSE {}", lowerer.literal_fragment(default).sql),
        None => String::new(),
    };
    let case = format!("CASE {}{default} END", arms.join(" "));

    // Without a default, rows outside the outermost boundaries are dropped.
    let plan = if bucket.default.is_none() {
        let (first, last) = (bounds.first().unwrap(), bounds.last().unwrap());
        push_filter(plan, format!("{g} >= {first} AND {g} < {last}"))
    } else {
        plan
    };

    let accumulators = default_count(&bucket.output);
    let mut columns = vec![OutputColumn::keyed("_id", "grp_id", case.clone())];
    let mut routes = vec![column_route("_id", "grp_id", Ty::Unknown)];
    for acc in accumulators {
        let (sql, ty) = compile_accumulator(lowerer, &scope, acc, None)?;
        let alias = utils::sanitize_alias(&acc.field);
        columns.push(OutputColumn::keyed(acc.field.clone(), alias.clone(), sql));
        routes.push(column_route(&acc.field, &alias, ty));
    }

    let plan = Plan::Aggregate {
        input: Box::new(plan),
        group_keys: vec![case],
        columns,
    };
    Ok((plan, Scope::columns(routes, false)))
}

/// `$bucketAuto`: an `NTILE` window in a subquery, grouped by the bucket id.
pub(crate) fn lower_bucket_auto(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    bucket: &BucketAuto,
) -> Result<(Plan, Scope)> {
    let g = compile_expr(lowerer, &scope, &bucket.group_by, Demand::TEXT)?.into_value();
    let windowed = Plan::Window {
        input: Box::new(plan),
        columns: vec![OutputColumn::new(
            "bucket_id",
            format!("NTILE({}) OVER (ORDER BY {g})", bucket.buckets),
        )],
    };

    let accumulators = default_count(&bucket.output);
    let mut columns = vec![OutputColumn::keyed("_id", "grp_id", "bucket_id")];
    let mut routes = vec![column_route("_id", "grp_id", Ty::Number)];
    for acc in accumulators {
        let (sql, ty) = compile_accumulator(lowerer, &scope, acc, None)?;
        let alias = utils::sanitize_alias(&acc.field);
        columns.push(OutputColumn::keyed(acc.field.clone(), alias.clone(), sql));
        routes.push(column_route(&acc.field, &alias, ty));
    }

    let plan = Plan::Aggregate {
        input: Box::new(windowed),
        group_keys: vec!["bucket_id".to_string()],
        columns,
    };
    Ok((plan, Scope::columns(routes, false)))
}

static COUNT_OUTPUT: once_cell::sync::Lazy<Vec<Accumulator>> = once_cell::sync::Lazy::new(|| {
    vec![Accumulator {
        field: "count".to_string(),
        op: AccOp::Sum,
        arg: Expr::int(1),
    }]
});

fn default_count(output: &[Accumulator]) -> &[Accumulator] {
    if output.is_empty() {
        &COUNT_OUTPUT
    } else {
        output
    }
}

/// The `_id` expression compiles once: it is both the GROUP BY key(s) and
/// the `grp_id` column. An object `_id` groups by each member and rebuilds
/// the object; a null `_id` aggregates the whole input with no GROUP BY.
fn compile_group_id(
    lowerer: &mut Lowerer,
    scope: &Scope,
    id: &Expr,
) -> Result<(Vec<String>, Option<String>)> {
    match id {
        Expr::Literal(Literal::Null) => Ok((Vec::new(), None)),
        Expr::Object(fields) => {
            let mut keys = Vec::with_capacity(fields.len());
            let mut members = Vec::with_capacity(fields.len());
            for (name, expr) in fields {
                let compiled = compile_expr(lowerer, scope, expr, Demand::TEXT)?.into_value();
                members.push(format!("'{name}' VALUE {compiled}"));
                keys.push(compiled);
            }
            let grp = format!("JSON_OBJECT({})", members.join(", "));
            Ok((keys, Some(grp)))
        }
        expr => {
            let compiled = compile_expr(lowerer, scope, expr, Demand::TEXT)?.into_value();
            Ok((vec![compiled.clone()], Some(compiled)))
        }
    }
}

fn compile_accumulator(
    lowerer: &mut Lowerer,
    scope: &Scope,
    acc: &Accumulator,
    keep_order: Option<&str>,
) -> Result<(String, Ty)> {
    Ok(match acc.op {
        AccOp::Sum => {
            if matches!(acc.arg, Expr::Literal(Literal::Integer(1))) {
                ("COUNT(*)".to_string(), Ty::Number)
            } else {
                (format!("SUM({})", num_arg(lowerer, scope, &acc.arg)?), Ty::Number)
            }
        }
        AccOp::Avg => (
            format!("AVG({})", num_arg(lowerer, scope, &acc.arg)?),
            Ty::Number,
        ),
        AccOp::Min => (
            format!("MIN({})", text_arg(lowerer, scope, &acc.arg)?),
            Ty::Unknown,
        ),
        AccOp::Max => (
            format!("MAX({})", text_arg(lowerer, scope, &acc.arg)?),
            Ty::Unknown,
        ),
        AccOp::First | AccOp::Last => {
            let value = text_arg(lowerer, scope, &acc.arg)?;
            // With no consumed sort spec the surrogate id provides a
            // deterministic tie-break.
            let order = keep_order.unwrap_or("id");
            let position = if acc.op == AccOp::First { "FIRST" } else { "LAST" };
            (
                format!("MAX({value}) KEEP (DENSE_RANK {position} ORDER BY {order})"),
                Ty::Unknown,
            )
        }
        AccOp::Push => (
            format!("JSON_ARRAYAGG({})", text_arg(lowerer, scope, &acc.arg)?),
            Ty::Json,
        ),
        AccOp::AddToSet => {
            // Reached only when mixed with other accumulators; the DISTINCT
            // rewrite would distort them.
            let frag = lowerer.unsupported("$addToSet")?;
            (frag.sql, frag.ty)
        }
    })
}

fn column_route(field: &str, sqlref: &str, ty: Ty) -> Route {
    Route::Column {
        field: field.to_string(),
        sqlref: sqlref.to_string(),
        ty,
        is_size: false,
    }
}
