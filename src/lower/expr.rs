//! Compiles expression AST nodes to SQL fragments.
//!
//! Dispatch for plain operator calls lives in [super::operators]; this
//! module handles the structured forms (literals, references, binders,
//! conditionals, object and array construction).

use anyhow::Result;

use crate::ast::{Expr, VarRef};
use crate::error::{Error, Reason};

use super::context::{extract, Demand, Fragment, Scope, Ty};
use super::{operators, Lowerer};

pub(crate) fn compile_expr(
    lowerer: &mut Lowerer,
    scope: &Scope,
    expr: &Expr,
    demand: Demand,
) -> Result<Fragment> {
    Ok(match expr {
        Expr::Literal(literal) => lowerer.literal_fragment(literal),
        Expr::FieldRef(path) => scope.resolve(path, demand)?,
        Expr::VarRef(var) => compile_var(scope, var, demand)?,
        Expr::Call { op, args } => {
            let def = operators::lookup(op).ok_or_else(|| {
                Error::new(Reason::UnknownOperator {
                    name: op.to_string(),
                })
            })?;
            def.compile(lowerer, scope, op, args)?
        }
        Expr::Filter { input, var, cond } => {
            let array = json_arg(lowerer, scope, input)?;
            let t = lowerer.unique_alias("t");
            let inner = scope.with_binding(var, format!("{t}.val"));
            let cond = compile_expr(lowerer, &inner, cond, Demand::TEXT)?.into_predicate();
            Fragment::json(format!(
                "(SELECT JSON_ARRAYAGG({t}.val ORDER BY {t}.n) FROM JSON_TABLE({array}, '$[*]' COLUMNS (n FOR ORDINALITY, val VARCHAR2(4000) FORMAT JSON PATH '$')) {t} WHERE {cond})"
            ))
        }
        Expr::Map { input, var, inner } => {
            let array = json_arg(lowerer, scope, input)?;
            let t = lowerer.unique_alias("t");
            let element = scope.with_binding(var, format!("{t}.val"));
            let projected = compile_expr(lowerer, &element, inner, Demand::TEXT)?.into_value();
            Fragment::json(format!(
                "(SELECT JSON_ARRAYAGG({projected} ORDER BY {t}.n) FROM JSON_TABLE({array}, '$[*]' COLUMNS (n FOR ORDINALITY, val VARCHAR2(4000) FORMAT JSON PATH '$')) {t})"
            ))
        }
        Expr::Reduce { .. } => lowerer.unsupported("$reduce")?,
        Expr::Cond {
            cond,
            then,
            otherwise,
        } => {
            let predicate = compile_expr(lowerer, scope, cond, Demand::TEXT)?.into_predicate();
            let then = compile_expr(lowerer, scope, then, demand)?;
            let otherwise = compile_expr(lowerer, scope, otherwise, demand)?;
            let ty = if then.ty == otherwise.ty {
                then.ty
            } else {
                Ty::Unknown
            };
            Fragment {
                sql: format!(
                    "CASE WHEN {predicate} THEN {} ELSE {} END",
                    then.into_value(),
                    otherwise.into_value()
                ),
                ty,
            }
        }
        Expr::Switch { branches, default } => {
            let mut arms = Vec::with_capacity(branches.len());
            for branch in branches {
                let when = compile_expr(lowerer, scope, &branch.case, Demand::TEXT)?
                    .into_predicate();
                let then = compile_expr(lowerer, scope, &branch.then, demand)?.into_value();
                arms.push(format!("WHEN {when} THEN {then}"));
            }
            let default = match default {
                Some(default) => {
                    let value = compile_expr(lowerer, scope, default, demand)?.into_value();
                    format!(" ELSE {value}")
                }
                None => String::new(),
            };
            Fragment::unknown(format!("CASE {}{} END", arms.join(" "), default))
        }
        Expr::Object(fields) => {
            let body = fields
                .iter()
                .map(|(key, value)| {
                    let value = compile_expr(lowerer, scope, value, Demand::TEXT)?.into_value();
                    Ok(format!("'{key}' VALUE {value}"))
                })
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            Fragment::json(format!("JSON_OBJECT({body})"))
        }
        Expr::Array(items) => {
            let body = items
                .iter()
                .map(|item| {
                    Ok(compile_expr(lowerer, scope, item, Demand::TEXT)?.into_value())
                })
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            Fragment::json(format!("JSON_ARRAY({body})"))
        }
    })
}

/// `$$`-variables: the `$redact` verdicts compile to their names as text,
/// `$$ROOT`/`$$CURRENT` address the whole document, anything else must be
/// bound by an enclosing `$filter`/`$map`/`$reduce`.
fn compile_var(scope: &Scope, var: &VarRef, demand: Demand) -> Result<Fragment> {
    match var.name.as_str() {
        "KEEP" | "PRUNE" | "DESCEND" if var.path.is_none() => {
            return Ok(Fragment::text(format!("'{}'", var.name)));
        }
        "ROOT" | "CURRENT" => {
            let source = scope.data_ref();
            return Ok(match &var.path {
                Some(path) => extract(&source, &format!("$.{path}"), demand),
                None => Fragment::json(source),
            });
        }
        _ => {}
    }
    let binding = scope.lookup_binding(&var.name).ok_or_else(|| {
        Error::new(Reason::Simple(format!(
            "variable `$${}` is not bound here",
            var.name
        )))
    })?;
    Ok(match &var.path {
        Some(path) => extract(&binding.sql, &format!("$.{path}"), demand),
        None => Fragment::json(binding.sql.clone()),
    })
}

pub(crate) fn num_arg(lowerer: &mut Lowerer, scope: &Scope, expr: &Expr) -> Result<String> {
    Ok(compile_expr(lowerer, scope, expr, Demand::NUMBER)?.sql)
}

pub(crate) fn text_arg(lowerer: &mut Lowerer, scope: &Scope, expr: &Expr) -> Result<String> {
    Ok(compile_expr(lowerer, scope, expr, Demand::TEXT)?.into_value())
}

pub(crate) fn json_arg(lowerer: &mut Lowerer, scope: &Scope, expr: &Expr) -> Result<String> {
    Ok(compile_expr(lowerer, scope, expr, Demand::Json)?.sql)
}
