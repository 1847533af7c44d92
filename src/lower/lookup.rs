//! `$lookup` and `$graphLookup` against foreign collections.

use anyhow::Result;

use crate::ast::{Expr, GraphLookup, Lookup, Predicate, Stage, Unwind};
use crate::plan::{JoinKind, OutputColumn, Plan};
use crate::utils;

use super::context::{Demand, Route, Scope, ScopeKind, Ty};
use super::expr::compile_expr;
use super::{filter, pass_through_columns, passes_data, Lowerer};

/// `$lookup` not followed by `$unwind`: the joined rows stay an array,
/// produced by a correlated scalar subquery. When the only downstream use
/// is `$size`, the subquery degenerates to `COUNT(*)`.
pub(crate) fn lower_lookup(
    lowerer: &mut Lowerer,
    plan: Plan,
    mut scope: Scope,
    lookup: &Lookup,
    rest: &[Stage],
    base: &str,
) -> Result<(Plan, Scope)> {
    utils::validate_ident(&lookup.from, "collection")?;
    ensure_correlatable(&mut scope, base);

    let foreign = foreign_alias(lowerer, &lookup.from);
    let local = scope.resolve(&lookup.local_field, Demand::TEXT)?;
    let on = format!(
        "JSON_VALUE({foreign}.data, '$.{}') = {}",
        lookup.foreign_field.0, local.sql
    );

    let only_size = consumes_only_size(rest, &lookup.as_field);
    let subquery = if only_size {
        format!(
            "(SELECT COUNT(*) FROM {} {foreign} WHERE {on})",
            lookup.from
        )
    } else {
        format!(
            "(SELECT JSON_ARRAYAGG({foreign}.data) FROM {} {foreign} WHERE {on})",
            lookup.from
        )
    };

    let mut columns = pass_through_columns(&plan);
    let has_data = passes_data(&plan);
    let alias = utils::sanitize_alias(&lookup.as_field);
    columns.push(OutputColumn::keyed(
        lookup.as_field.clone(),
        alias.clone(),
        subquery,
    ));

    let mut routes: Vec<Route> = scope
        .routes
        .iter()
        .filter(|r| matches!(r, Route::Column { .. }))
        .cloned()
        .collect();
    routes.push(Route::Column {
        field: lookup.as_field.clone(),
        sqlref: alias,
        ty: if only_size { Ty::Number } else { Ty::Json },
        is_size: only_size,
    });

    let plan = Plan::Project {
        input: Box::new(plan),
        columns,
        distinct: false,
    };
    Ok((plan, Scope::columns(routes, has_data)))
}

/// `$lookup` directly followed by `$unwind` of its output: the array level
/// is never materialized, the plan joins row-to-row instead.
pub(crate) fn lower_lookup_join(
    lowerer: &mut Lowerer,
    plan: Plan,
    mut scope: Scope,
    lookup: &Lookup,
    unwind: &Unwind,
    base: &str,
) -> Result<(Plan, Scope)> {
    utils::validate_ident(&lookup.from, "collection")?;
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

    let foreign = foreign_alias(lowerer, &lookup.from);
    let local = scope.resolve(&lookup.local_field, Demand::TEXT)?;
    let on = format!(
        "JSON_VALUE({foreign}.data, '$.{}') = {}",
        lookup.foreign_field.0, local.sql
    );

    let plan = Plan::Join {
        input: Box::new(plan),
        kind: if unwind.preserve_null_and_empty {
            JoinKind::Left
        } else {
            JoinKind::Inner
        },
        table: lookup.from.clone(),
        alias: foreign.clone(),
        on,
        left_qualifier,
    };

    scope.routes.push(Route::Foreign {
        prefix: lookup.as_field.clone(),
        alias: foreign,
    });
    Ok((plan, scope))
}

/// A lateral subquery against the foreign collection: `connectToField`
/// matches the `startWith` seed, `restrictSearchWithMatch` adds a predicate.
/// With `maxDepth: 0` the recursion is elided to this single hop, which is
/// also the deepest traversal the target dialect expresses here.
pub(crate) fn lower_graph_lookup(
    lowerer: &mut Lowerer,
    plan: Plan,
    mut scope: Scope,
    graph: &GraphLookup,
    base: &str,
) -> Result<(Plan, Scope)> {
    utils::validate_ident(&graph.from, "collection")?;
    ensure_correlatable(&mut scope, base);

    let foreign = foreign_alias(lowerer, &graph.from);
    let seed = compile_expr(lowerer, &scope, &graph.start_with, Demand::TEXT)?.into_value();
    let mut on = format!(
        "JSON_VALUE({foreign}.data, '$.{}') = {seed}",
        graph.connect_to_field.0
    );
    if let Some(restrict) = &graph.restrict {
        let foreign_scope = Scope::document(Some(foreign.clone()));
        let extra = filter::compile_predicate(lowerer, &foreign_scope, restrict)?;
        on = format!("{on} AND {extra}");
    }

    let subquery = format!(
        "(SELECT JSON_ARRAYAGG({foreign}.data) FROM {} {foreign} WHERE {on})",
        graph.from
    );

    let mut columns = pass_through_columns(&plan);
    let has_data = passes_data(&plan);
    let alias = utils::sanitize_alias(&graph.as_field);
    columns.push(OutputColumn::keyed(
        graph.as_field.clone(),
        alias.clone(),
        subquery,
    ));

    let mut routes: Vec<Route> = scope
        .routes
        .iter()
        .filter(|r| matches!(r, Route::Column { .. }))
        .cloned()
        .collect();
    routes.push(Route::Column {
        field: graph.as_field.clone(),
        sqlref: alias,
        ty: Ty::Json,
        is_size: false,
    });

    let plan = Plan::Project {
        input: Box::new(plan),
        columns,
        distinct: false,
    };
    Ok((plan, Scope::columns(routes, has_data)))
}

/// Correlated subqueries shadow unqualified `data`; the base row must be
/// addressable by name before one is emitted.
fn ensure_correlatable(scope: &mut Scope, base: &str) {
    if scope.kind == ScopeKind::Document && scope.qualifier.is_none() {
        scope.qualifier = Some(base.to_string());
    }
}

/// Foreign aliases use the first letter of the collection name, extended
/// with an integer on conflict.
fn foreign_alias(lowerer: &mut Lowerer, collection: &str) -> String {
    let letter = collection
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .unwrap_or('f');
    lowerer.unique_alias(&letter.to_lowercase().to_string())
}

/// True when every downstream reference to `field` is exactly `$size` of it,
/// so the join can collapse to a scalar `COUNT(*)`.
fn consumes_only_size(stages: &[Stage], field: &str) -> bool {
    let mut sized = false;
    let mut other = false;
    for stage in stages {
        scan_stage(stage, field, &mut sized, &mut other);
        if other {
            return false;
        }
    }
    sized && !other
}

fn check_path(path: &str, field: &str, other: &mut bool) {
    if crate::ast::FieldPath::new(path.to_string()).is_under(field) {
        *other = true;
    }
}

fn scan_stage(stage: &Stage, field: &str, sized: &mut bool, other: &mut bool) {
    match stage {
        Stage::Match(p) => scan_predicate(p, field, sized, other),
        Stage::Project(items) => {
            for item in items {
                match &item.value {
                    crate::ast::ProjectValue::Include => check_path(&item.field, field, other),
                    crate::ast::ProjectValue::Computed(e) => scan_expr(e, field, sized, other),
                    crate::ast::ProjectValue::Exclude => {}
                }
            }
        }
        Stage::AddFields(fields) => {
            for (_, e) in fields {
                scan_expr(e, field, sized, other);
            }
        }
        Stage::Group(g) => {
            scan_expr(&g.id, field, sized, other);
            for acc in &g.accumulators {
                scan_expr(&acc.arg, field, sized, other);
            }
        }
        Stage::Sort(keys) => {
            for key in keys {
                check_path(&key.field, field, other);
            }
        }
        Stage::Unwind(u) => check_path(&u.path.0, field, other),
        Stage::Lookup(l) => check_path(&l.local_field.0, field, other),
        Stage::GraphLookup(g) => scan_expr(&g.start_with, field, sized, other),
        Stage::Facet(facets) => {
            for (_, sub) in facets {
                for stage in &sub.stages {
                    scan_stage(stage, field, sized, other);
                }
            }
        }
        Stage::Bucket(b) => {
            scan_expr(&b.group_by, field, sized, other);
            for acc in &b.output {
                scan_expr(&acc.arg, field, sized, other);
            }
        }
        Stage::BucketAuto(b) => {
            scan_expr(&b.group_by, field, sized, other);
            for acc in &b.output {
                scan_expr(&acc.arg, field, sized, other);
            }
        }
        Stage::ReplaceRoot(e) | Stage::Redact(e) => scan_expr(e, field, sized, other),
        Stage::SetWindowFields(w) => {
            if let Some(p) = &w.partition_by {
                scan_expr(p, field, sized, other);
            }
            for key in &w.sort_by {
                check_path(&key.field, field, other);
            }
            for output in &w.output {
                if let crate::ast::WindowFunc::Agg { arg, .. } = &output.func {
                    scan_expr(arg, field, sized, other);
                }
            }
        }
        Stage::UnionWith { .. }
        | Stage::Limit(_)
        | Stage::Skip(_)
        | Stage::Sample(_)
        | Stage::Count(_) => {}
    }
}

fn scan_predicate(predicate: &Predicate, field: &str, sized: &mut bool, other: &mut bool) {
    match predicate {
        Predicate::And(inner) | Predicate::Or(inner) | Predicate::Nor(inner) => {
            for p in inner {
                scan_predicate(p, field, sized, other);
            }
        }
        Predicate::Not(inner) => scan_predicate(inner, field, sized, other),
        Predicate::Cmp { path, .. }
        | Predicate::In { path, .. }
        | Predicate::Exists { path, .. }
        | Predicate::Regex { path, .. } => {
            if path.is_under(field) {
                *other = true;
            }
        }
        Predicate::Expr(e) => scan_expr(e, field, sized, other),
    }
}

fn scan_expr(expr: &Expr, field: &str, sized: &mut bool, other: &mut bool) {
    if let Expr::Call { op, args } = expr {
        if op == "$size" {
            if let [Expr::FieldRef(path)] = args.as_slice() {
                if path.0 == field {
                    *sized = true;
                    return;
                }
            }
        }
    }
    match expr {
        Expr::FieldRef(path) => {
            if path.is_under(field) {
                *other = true;
            }
        }
        _ => {
            match expr {
                Expr::Call { args, .. } => {
                    for arg in args {
                        scan_expr(arg, field, sized, other);
                    }
                }
                Expr::Filter { input, cond, .. } => {
                    scan_expr(input, field, sized, other);
                    scan_expr(cond, field, sized, other);
                }
                Expr::Map { input, inner, .. } => {
                    scan_expr(input, field, sized, other);
                    scan_expr(inner, field, sized, other);
                }
                Expr::Reduce {
                    input,
                    initial,
                    inner,
                } => {
                    scan_expr(input, field, sized, other);
                    scan_expr(initial, field, sized, other);
                    scan_expr(inner, field, sized, other);
                }
                Expr::Cond {
                    cond,
                    then,
                    otherwise,
                } => {
                    scan_expr(cond, field, sized, other);
                    scan_expr(then, field, sized, other);
                    scan_expr(otherwise, field, sized, other);
                }
                Expr::Switch { branches, default } => {
                    for branch in branches {
                        scan_expr(&branch.case, field, sized, other);
                        scan_expr(&branch.then, field, sized, other);
                    }
                    if let Some(default) = default {
                        scan_expr(default, field, sized, other);
                    }
                }
                Expr::Object(fields) => {
                    for (_, value) in fields {
                        scan_expr(value, field, sized, other);
                    }
                }
                Expr::Array(items) => {
                    for item in items {
                        scan_expr(item, field, sized, other);
                    }
                }
                Expr::Literal(_) | Expr::VarRef(_) | Expr::FieldRef(_) => {}
            }
        }
    }
}
