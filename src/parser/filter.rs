//! Parses `$match` documents into the predicate AST.

use anyhow::Result;
use serde_json::Value;

use crate::ast::{CmpOp, FieldPath, Literal, Predicate};
use crate::error::{Error, Reason};
use crate::utils;

use super::expr::parse_expr;

pub(crate) fn parse_predicate(doc: &Value) -> Result<Predicate> {
    let object = doc.as_object().ok_or_else(|| {
        Error::new(Reason::StageArg {
            stage: "$match".to_string(),
            detail: "expected a query document".to_string(),
        })
    })?;

    let mut predicates = Vec::with_capacity(object.len());
    for (key, value) in object {
        predicates.push(match key.as_str() {
            "$and" => Predicate::And(parse_predicate_list(key, value)?),
            "$or" => Predicate::Or(parse_predicate_list(key, value)?),
            "$nor" => Predicate::Nor(parse_predicate_list(key, value)?),
            "$expr" => Predicate::Expr(parse_expr(value)?),
            name if name.starts_with('$') => {
                return Err(Error::new(Reason::UnknownOperator {
                    name: name.to_string(),
                })
                .into())
            }
            field => {
                utils::validate_field_path(field, "match field")?;
                parse_field_condition(field, value)?
            }
        });
    }
    Ok(match predicates.len() {
        1 => predicates.into_iter().next().unwrap(),
        _ => Predicate::And(predicates),
    })
}

fn parse_predicate_list(op: &str, value: &Value) -> Result<Vec<Predicate>> {
    let items = value.as_array().ok_or_else(|| {
        Error::new(Reason::StageArg {
            stage: "$match".to_string(),
            detail: format!("{op} takes an array of query documents"),
        })
    })?;
    items.iter().map(parse_predicate).collect()
}

/// `{field: value}` is implicit equality; `{field: {$op: …}}` compares.
fn parse_field_condition(field: &str, value: &Value) -> Result<Predicate> {
    let path = FieldPath::new(field);
    let Some(object) = value.as_object() else {
        return Ok(Predicate::Cmp {
            path,
            op: CmpOp::Eq,
            value: parse_match_literal(value)?,
        });
    };
    if !object.keys().all(|k| k.starts_with('$')) {
        return Err(Error::new(Reason::StageArg {
            stage: "$match".to_string(),
            detail: format!("matching `{field}` against a sub-document is not supported"),
        })
        .into());
    }

    let mut conditions = Vec::with_capacity(object.len());
    let mut regex_options: Option<String> = object
        .get("$options")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    for (op, operand) in object {
        let condition = match op.as_str() {
            "$eq" => cmp(&path, CmpOp::Eq, operand)?,
            "$ne" => cmp(&path, CmpOp::Ne, operand)?,
            "$gt" => cmp(&path, CmpOp::Gt, operand)?,
            "$gte" => cmp(&path, CmpOp::Gte, operand)?,
            "$lt" => cmp(&path, CmpOp::Lt, operand)?,
            "$lte" => cmp(&path, CmpOp::Lte, operand)?,
            "$in" => in_list(&path, operand, false)?,
            "$nin" => in_list(&path, operand, true)?,
            "$exists" => Predicate::Exists {
                path: path.clone(),
                exists: operand.as_bool().unwrap_or(false),
            },
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| {
                    Error::new(Reason::StageArg {
                        stage: "$match".to_string(),
                        detail: "$regex takes a string pattern".to_string(),
                    })
                })?;
                Predicate::Regex {
                    path: path.clone(),
                    pattern: pattern.to_string(),
                    options: regex_options.take(),
                }
            }
            "$options" => continue,
            "$not" => Predicate::Not(Box::new(parse_field_condition(field, operand)?)),
            name => {
                return Err(Error::new(Reason::UnknownOperator {
                    name: name.to_string(),
                })
                .into())
            }
        };
        conditions.push(condition);
    }
    Ok(match conditions.len() {
        1 => conditions.into_iter().next().unwrap(),
        _ => Predicate::And(conditions),
    })
}

fn cmp(path: &FieldPath, op: CmpOp, operand: &Value) -> Result<Predicate> {
    Ok(Predicate::Cmp {
        path: path.clone(),
        op,
        value: parse_match_literal(operand)?,
    })
}

fn in_list(path: &FieldPath, operand: &Value, negated: bool) -> Result<Predicate> {
    let items = operand.as_array().ok_or_else(|| {
        Error::new(Reason::StageArg {
            stage: "$match".to_string(),
            detail: "$in/$nin take an array of values".to_string(),
        })
    })?;
    Ok(Predicate::In {
        path: path.clone(),
        values: items
            .iter()
            .map(parse_match_literal)
            .collect::<Result<Vec<_>>>()?,
        negated,
    })
}

fn parse_match_literal(value: &Value) -> Result<Literal> {
    Ok(match value {
        Value::Null => Literal::Null,
        Value::Bool(b) => Literal::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Literal::Integer(i)
            } else {
                Literal::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Literal::String(s.clone()),
        _ => {
            return Err(Error::new(Reason::StageArg {
                stage: "$match".to_string(),
                detail: "comparison values must be scalars".to_string(),
            })
            .into())
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn implicit_equality_and_operators() {
        let p = parse_predicate(&json!({"status": "done", "total": {"$gte": 10}})).unwrap();
        let Predicate::And(parts) = p else {
            panic!("expected a conjunction");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(
            &parts[0],
            Predicate::Cmp { op: CmpOp::Eq, value: Literal::String(s), .. } if s == "done"
        ));
        assert!(matches!(&parts[1], Predicate::Cmp { op: CmpOp::Gte, .. }));
    }

    #[test]
    fn regex_picks_up_options() {
        let p = parse_predicate(&json!({"name": {"$regex": "^a", "$options": "i"}})).unwrap();
        assert!(matches!(
            p,
            Predicate::Regex { options: Some(ref o), .. } if o == "i"
        ));
    }

    #[test]
    fn multiple_ops_on_one_field_conjoin() {
        let p = parse_predicate(&json!({"qty": {"$gte": 1, "$lt": 10}})).unwrap();
        assert!(matches!(p, Predicate::And(ref parts) if parts.len() == 2));
    }

    #[test]
    fn unknown_match_operator_is_rejected() {
        let err = parse_predicate(&json!({"loc": {"$near": [0, 0]}})).unwrap_err();
        assert!(err.to_string().contains("unknown operator"));
    }
}
