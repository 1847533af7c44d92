//! `$project`, `$addFields` and `$replaceRoot` build select lists.

use anyhow::Result;

use crate::ast::{Expr, FieldPath, ProjectItem, ProjectValue};
use crate::error::{Error, Reason};
use crate::plan::{OutputColumn, Plan};
use crate::utils;

use super::context::{Demand, Route, Scope, Ty};
use super::expr::compile_expr;
use super::{pass_through_columns, passes_data, Lowerer};

pub(crate) fn lower_project(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    items: &[ProjectItem],
) -> Result<(Plan, Scope)> {
    let mut columns = Vec::new();
    let mut routes = Vec::new();

    // `_id` is retained unless excluded explicitly. After $group it
    // resolves to the group key column, otherwise to the surrogate id.
    let id_excluded = items
        .iter()
        .any(|item| item.field == "_id" && item.value.is_exclude());
    if !id_excluded {
        let frag = scope.resolve(&FieldPath::new("_id"), Demand::TEXT)?;
        let name = if frag.sql.ends_with("grp_id") {
            "grp_id"
        } else {
            "id"
        };
        routes.push(Route::Column {
            field: "_id".to_string(),
            sqlref: name.to_string(),
            ty: frag.ty,
            is_size: false,
        });
        columns.push(OutputColumn::keyed("_id", name, frag.sql));
    }

    for item in items {
        if item.field == "_id" {
            continue;
        }
        let (expr, ty) = match &item.value {
            ProjectValue::Include => {
                let frag = scope.resolve(&FieldPath::new(item.field.clone()), Demand::TEXT)?;
                (frag.sql, frag.ty)
            }
            ProjectValue::Computed(expr) => {
                let frag = compile_expr(lowerer, &scope, expr, Demand::TEXT)?;
                let ty = frag.ty;
                (frag.into_value(), ty)
            }
            // The parser only lets `_id` through as an exclusion.
            ProjectValue::Exclude => {
                return Err(Error::new(Reason::StageArg {
                    stage: "$project".to_string(),
                    detail: format!("cannot exclude `{}`", item.field),
                })
                .into())
            }
        };
        let alias = utils::sanitize_alias(&item.field);
        columns.push(OutputColumn::keyed(item.field.clone(), alias.clone(), expr));
        routes.push(Route::Column {
            field: item.field.clone(),
            sqlref: alias,
            ty,
            is_size: false,
        });
    }

    let plan = Plan::Project {
        input: Box::new(plan),
        columns,
        distinct: false,
    };
    Ok((plan, Scope::columns(routes, false)))
}

/// A projection that preserves the existing row shape and appends computed
/// fields.
pub(crate) fn lower_add_fields(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    fields: &[(String, Expr)],
) -> Result<(Plan, Scope)> {
    let mut columns = pass_through_columns(&plan);
    let has_data = passes_data(&plan);

    let mut routes: Vec<Route> = scope
        .routes
        .iter()
        .filter(|r| matches!(r, Route::Column { .. }))
        .cloned()
        .collect();
    for (field, expr) in fields {
        let frag = compile_expr(lowerer, &scope, expr, Demand::TEXT)?;
        let ty = frag.ty;
        let alias = utils::sanitize_alias(field);
        columns.push(OutputColumn::keyed(field.clone(), alias.clone(), frag.into_value()));
        routes.push(Route::Column {
            field: field.clone(),
            sqlref: alias,
            ty,
            is_size: false,
        });
    }

    let plan = Plan::Project {
        input: Box::new(plan),
        columns,
        distinct: false,
    };
    Ok((plan, Scope::columns(routes, has_data)))
}

/// `$replaceRoot` replaces the select list with the fields of `newRoot`.
pub(crate) fn lower_replace_root(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    new_root: &Expr,
) -> Result<(Plan, Scope)> {
    match new_root {
        // Promoting a sub-document: the extracted object becomes `data`.
        Expr::FieldRef(path) => {
            let frag = scope.resolve(path, Demand::Json)?;
            let columns = vec![
                OutputColumn::new("id", scope.id_ref()),
                OutputColumn::keyed("data", "data", frag.sql),
            ];
            let plan = Plan::Project {
                input: Box::new(plan),
                columns,
                distinct: false,
            };
            Ok((plan, Scope::columns(Vec::new(), true)))
        }
        // An object literal compiles each field independently; $mergeObjects
        // flattens its object operands into the same select list.
        Expr::Object(_) => {
            let fields = flatten_new_root(new_root)?;
            lower_root_fields(lowerer, plan, &scope, fields)
        }
        Expr::Call { op, .. } if op == "$mergeObjects" => {
            let fields = flatten_new_root(new_root)?;
            lower_root_fields(lowerer, plan, &scope, fields)
        }
        _ => Err(Error::new(Reason::StageArg {
            stage: "$replaceRoot".to_string(),
            detail: "newRoot must be an object, a field path, or $mergeObjects of objects"
                .to_string(),
        })
        .into()),
    }
}

fn lower_root_fields(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: &Scope,
    fields: Vec<(&String, &Expr)>,
) -> Result<(Plan, Scope)> {
    let mut columns = Vec::new();
    let mut routes = Vec::new();
    for (field, expr) in fields {
        let frag = compile_expr(lowerer, scope, expr, Demand::TEXT)?;
        let ty = frag.ty;
        let alias = utils::sanitize_alias(field);
        columns.push(OutputColumn::keyed(
            field.clone(),
            alias.clone(),
            frag.into_value(),
        ));
        routes.push(Route::Column {
            field: field.clone(),
            sqlref: alias,
            ty,
            is_size: false,
        });
    }
    let plan = Plan::Project {
        input: Box::new(plan),
        columns,
        distinct: false,
    };
    Ok((plan, Scope::columns(routes, false)))
}

/// The flattened `(field, expr)` list of a `newRoot`, with later
/// `$mergeObjects` operands overriding earlier keys.
fn flatten_new_root(new_root: &Expr) -> Result<Vec<(&String, &Expr)>> {
    let operands: Vec<&Expr> = match new_root {
        Expr::Object(_) => vec![new_root],
        Expr::Call { op, args } if op == "$mergeObjects" => args.iter().collect(),
        _ => Vec::new(),
    };
    let mut fields: Vec<(&String, &Expr)> = Vec::new();
    for operand in operands {
        let Expr::Object(pairs) = operand else {
            return Err(Error::new(Reason::StageArg {
                stage: "$replaceRoot".to_string(),
                detail: "$mergeObjects operands in newRoot must be object literals".to_string(),
            })
            .into());
        };
        for (key, value) in pairs {
            if let Some(slot) = fields.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
            } else {
                fields.push((key, value));
            }
        }
    }
    Ok(fields)
}
