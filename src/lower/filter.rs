//! Compiles the `$match` query language into boolean SQL.
//!
//! This is a separate language from the expression language: `{field: v}` is
//! implicit equality, `{field: {$op: …}}` compares, logical operators nest,
//! and `$expr` escapes into the expression compiler. Literals in comparison
//! position are the bind-variable sites when parameterized output is on.

use anyhow::Result;

use crate::ast::{CmpOp, Literal, Predicate};

use super::context::{Demand, Scope};
use super::expr::compile_expr;
use super::Lowerer;

pub(crate) fn compile_predicate(
    lowerer: &mut Lowerer,
    scope: &Scope,
    predicate: &Predicate,
) -> Result<String> {
    Ok(match predicate {
        Predicate::And(inner) => {
            let parts = compile_all(lowerer, scope, inner)?;
            match parts.len() {
                0 => "1 = 1".to_string(),
                1 => parts.into_iter().next().unwrap(),
                _ => parts.join(" AND "),
            }
        }
        Predicate::Or(inner) => {
            let parts = compile_all(lowerer, scope, inner)?;
            match parts.len() {
                0 => "1 = 0".to_string(),
                1 => parts.into_iter().next().unwrap(),
                _ => format!("({})", parts.join(" OR ")),
            }
        }
        Predicate::Nor(inner) => {
            let parts = compile_all(lowerer, scope, inner)?;
            if parts.is_empty() {
                "1 = 1".to_string()
            } else {
                format!("NOT ({})", parts.join(" OR "))
            }
        }
        Predicate::Not(inner) => {
            let inner = compile_predicate(lowerer, scope, inner)?;
            format!("NOT ({inner})")
        }
        Predicate::Cmp { path, op, value } => {
            // Null comparisons change syntax rather than binding a value.
            if matches!(value, Literal::Null) {
                let field = scope.resolve(path, Demand::TEXT)?;
                return Ok(match op {
                    CmpOp::Eq => format!("{} IS NULL", field.sql),
                    CmpOp::Ne => format!("{} IS NOT NULL", field.sql),
                    _ => format!("{} {} NULL", field.sql, op.sql()),
                });
            }
            let numeric = matches!(value, Literal::Integer(_) | Literal::Float(_));
            let field = scope.resolve(path, Demand::Scalar { numeric })?;
            let value = lowerer.match_literal(value);
            format!("{} {} {}", field.sql, op.sql(), value)
        }
        Predicate::In {
            path,
            values,
            negated,
        } => {
            if values.is_empty() {
                // IN () is not legal SQL; an empty set matches nothing.
                return Ok(if *negated { "1 = 1" } else { "1 = 0" }.to_string());
            }
            let numeric = values
                .iter()
                .all(|v| matches!(v, Literal::Integer(_) | Literal::Float(_)));
            let field = scope.resolve(path, Demand::Scalar { numeric })?;
            let list = values
                .iter()
                .map(|v| lowerer.match_literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            let keyword = if *negated { "NOT IN" } else { "IN" };
            format!("{} {keyword} ({list})", field.sql)
        }
        Predicate::Exists { path, exists } => match scope.locate(path) {
            Some((source, json_path)) => {
                let not = if *exists { "" } else { "NOT " };
                format!("{not}JSON_EXISTS({source}, '{json_path}')")
            }
            None => {
                let field = scope.resolve(path, Demand::TEXT)?;
                if *exists {
                    format!("{} IS NOT NULL", field.sql)
                } else {
                    format!("{} IS NULL", field.sql)
                }
            }
        },
        Predicate::Regex {
            path,
            pattern,
            options,
        } => {
            let field = scope.resolve(path, Demand::TEXT)?;
            let pattern = lowerer.match_literal(&Literal::String(pattern.clone()));
            match options {
                Some(options) => {
                    let options = lowerer.match_literal(&Literal::String(options.clone()));
                    format!("REGEXP_LIKE({}, {pattern}, {options})", field.sql)
                }
                None => format!("REGEXP_LIKE({}, {pattern})", field.sql),
            }
        }
        Predicate::Expr(expr) => compile_expr(lowerer, scope, expr, Demand::TEXT)?.into_predicate(),
    })
}

fn compile_all(
    lowerer: &mut Lowerer,
    scope: &Scope,
    predicates: &[Predicate],
) -> Result<Vec<String>> {
    predicates
        .iter()
        .map(|p| compile_predicate(lowerer, scope, p))
        .collect()
}
