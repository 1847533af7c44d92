//! Parses JSON values into expression AST nodes.

use anyhow::Result;
use serde_json::Value;

use crate::ast::{Expr, FieldPath, Literal, SwitchBranch, VarRef};
use crate::error::{Error, Reason};
use crate::lower::operators;
use crate::utils;

pub(crate) fn parse_expr(value: &Value) -> Result<Expr> {
    Ok(match value {
        Value::Null => Expr::Literal(Literal::Null),
        Value::Bool(b) => Expr::Literal(Literal::Boolean(*b)),
        Value::Number(n) => Expr::Literal(parse_number(n)),
        Value::String(s) => parse_string(s)?,
        Value::Array(items) => {
            Expr::Array(items.iter().map(parse_expr).collect::<Result<Vec<_>>>()?)
        }
        Value::Object(map) => {
            if let Some((key, payload)) = single_dollar_key(map) {
                parse_operator(key, payload)?
            } else {
                let mut fields = Vec::with_capacity(map.len());
                for (key, value) in map {
                    if key.starts_with('$') {
                        return Err(Error::new(Reason::TypeMismatch {
                            detail: format!(
                                "operator `{key}` mixed with plain fields in one object"
                            ),
                        })
                        .into());
                    }
                    if key.contains('\'') {
                        return Err(Error::new(Reason::TypeMismatch {
                            detail: format!("object key `{key}` contains a quote"),
                        })
                        .into());
                    }
                    fields.push((key.clone(), parse_expr(value)?));
                }
                Expr::Object(fields)
            }
        }
    })
}

fn parse_number(n: &serde_json::Number) -> Literal {
    if let Some(i) = n.as_i64() {
        Literal::Integer(i)
    } else {
        Literal::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn parse_string(s: &str) -> Result<Expr> {
    if let Some(var) = s.strip_prefix("$$") {
        let (name, path) = match var.split_once('.') {
            Some((name, path)) => (name.to_string(), Some(path.to_string())),
            None => (var.to_string(), None),
        };
        if let Some(path) = &path {
            utils::validate_field_path(path, "variable path")?;
        }
        return Ok(Expr::VarRef(VarRef { name, path }));
    }
    if let Some(path) = s.strip_prefix('$') {
        utils::validate_field_path(path, "field path")?;
        return Ok(Expr::FieldRef(FieldPath::new(path)));
    }
    Ok(Expr::Literal(Literal::String(s.to_string())))
}

fn single_dollar_key(map: &serde_json::Map<String, Value>) -> Option<(&str, &Value)> {
    if map.len() == 1 {
        let (key, value) = map.iter().next().unwrap();
        if key.starts_with('$') {
            return Some((key.as_str(), value));
        }
    }
    None
}

fn parse_operator(op: &str, payload: &Value) -> Result<Expr> {
    // Structured forms first; they carry named arguments or bindings.
    match op {
        "$cond" => return parse_cond(payload),
        "$switch" => return parse_switch(payload),
        "$filter" => {
            let (input, var, body) = parse_binder(op, payload, "cond")?;
            return Ok(Expr::Filter {
                input: Box::new(input),
                var,
                cond: Box::new(body),
            });
        }
        "$map" => {
            let (input, var, body) = parse_binder(op, payload, "in")?;
            return Ok(Expr::Map {
                input: Box::new(input),
                var,
                inner: Box::new(body),
            });
        }
        "$reduce" => {
            let object = named_args(op, payload)?;
            let input = parse_expr(required(op, object, "input")?)?;
            let initial = parse_expr(required(op, object, "initialValue")?)?;
            let inner = parse_expr(required(op, object, "in")?)?;
            return Ok(Expr::Reduce {
                input: Box::new(input),
                initial: Box::new(initial),
                inner: Box::new(inner),
            });
        }
        "$literal" => {
            return match payload {
                Value::Null => Ok(Expr::Literal(Literal::Null)),
                Value::Bool(b) => Ok(Expr::Literal(Literal::Boolean(*b))),
                Value::Number(n) => Ok(Expr::Literal(parse_number(n))),
                Value::String(s) => Ok(Expr::Literal(Literal::String(s.clone()))),
                _ => Err(Error::new(Reason::TypeMismatch {
                    detail: "$literal only supports scalar values".to_string(),
                })
                .into()),
            };
        }
        "$regexMatch" => {
            let object = named_args(op, payload)?;
            let mut args = vec![
                parse_expr(required(op, object, "input")?)?,
                parse_expr(required(op, object, "regex")?)?,
            ];
            if let Some(options) = object.get("options") {
                args.push(parse_expr(options)?);
            }
            return Ok(Expr::Call {
                op: op.to_string(),
                args,
            });
        }
        "$trim" | "$ltrim" | "$rtrim" => {
            let object = named_args(op, payload)?;
            let mut args = vec![parse_expr(required(op, object, "input")?)?];
            if let Some(chars) = object.get("chars") {
                args.push(parse_expr(chars)?);
            }
            return Ok(Expr::Call {
                op: op.to_string(),
                args,
            });
        }
        "$replaceOne" | "$replaceAll" => {
            let object = named_args(op, payload)?;
            let args = vec![
                parse_expr(required(op, object, "input")?)?,
                parse_expr(required(op, object, "find")?)?,
                parse_expr(required(op, object, "replacement")?)?,
            ];
            return Ok(Expr::Call {
                op: op.to_string(),
                args,
            });
        }
        _ => {}
    }

    let def = operators::lookup(op).ok_or_else(|| {
        Error::new(Reason::UnknownOperator {
            name: op.to_string(),
        })
    })?;
    let args = match payload {
        Value::Array(items) => items.iter().map(parse_expr).collect::<Result<Vec<_>>>()?,
        single => vec![parse_expr(single)?],
    };
    if !def.arity_ok(args.len()) {
        return Err(Error::new(Reason::OperatorArity {
            name: op.to_string(),
            got: args.len(),
            expected: def.describe_arity(),
        })
        .into());
    }
    Ok(Expr::Call {
        op: op.to_string(),
        args,
    })
}

fn parse_cond(payload: &Value) -> Result<Expr> {
    let (cond, then, otherwise) = match payload {
        Value::Array(items) => {
            if items.len() != 3 {
                return Err(Error::new(Reason::OperatorArity {
                    name: "$cond".to_string(),
                    got: items.len(),
                    expected: "3".to_string(),
                })
                .into());
            }
            (
                parse_expr(&items[0])?,
                parse_expr(&items[1])?,
                parse_expr(&items[2])?,
            )
        }
        Value::Object(object) => (
            parse_expr(required("$cond", object, "if")?)?,
            parse_expr(required("$cond", object, "then")?)?,
            parse_expr(required("$cond", object, "else")?)?,
        ),
        _ => {
            return Err(Error::new(Reason::TypeMismatch {
                detail: "$cond takes an array or an {if, then, else} object".to_string(),
            })
            .into())
        }
    };
    Ok(Expr::Cond {
        cond: Box::new(cond),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    })
}

fn parse_switch(payload: &Value) -> Result<Expr> {
    let object = named_args("$switch", payload)?;
    let branches_json = required("$switch", object, "branches")?
        .as_array()
        .ok_or_else(|| {
            Error::new(Reason::TypeMismatch {
                detail: "$switch branches must be an array".to_string(),
            })
        })?;
    let mut branches = Vec::with_capacity(branches_json.len());
    for branch in branches_json {
        let object = named_args("$switch", branch)?;
        branches.push(SwitchBranch {
            case: parse_expr(required("$switch", object, "case")?)?,
            then: parse_expr(required("$switch", object, "then")?)?,
        });
    }
    let default = object
        .get("default")
        .map(parse_expr)
        .transpose()?
        .map(Box::new);
    Ok(Expr::Switch { branches, default })
}

fn parse_binder(op: &str, payload: &Value, body_key: &str) -> Result<(Expr, String, Expr)> {
    let object = named_args(op, payload)?;
    let input = parse_expr(required(op, object, "input")?)?;
    let var = match object.get("as") {
        Some(Value::String(name)) => {
            utils::validate_ident(name, "binding name")?;
            name.clone()
        }
        Some(_) => {
            return Err(Error::new(Reason::TypeMismatch {
                detail: format!("{op} `as` must be a string"),
            })
            .into())
        }
        None => "this".to_string(),
    };
    let body = parse_expr(required(op, object, body_key)?)?;
    Ok((input, var, body))
}

fn named_args<'a>(op: &str, payload: &'a Value) -> Result<&'a serde_json::Map<String, Value>> {
    payload.as_object().ok_or_else(|| {
        Error::new(Reason::TypeMismatch {
            detail: format!("{op} takes named arguments"),
        })
        .into()
    })
}

fn required<'a>(
    op: &str,
    object: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<&'a Value> {
    object.get(key).ok_or_else(|| {
        Error::new(Reason::TypeMismatch {
            detail: format!("{op} requires `{key}`"),
        })
        .into()
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_parse_into_refs_and_literals() {
        assert_eq!(parse_expr(&json!("$a.b")).unwrap(), Expr::field("a.b"));
        assert_eq!(
            parse_expr(&json!("$$item.price")).unwrap(),
            Expr::VarRef(VarRef {
                name: "item".to_string(),
                path: Some("price".to_string()),
            })
        );
        assert_eq!(
            parse_expr(&json!("plain")).unwrap(),
            Expr::Literal(Literal::String("plain".to_string()))
        );
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = parse_expr(&json!({"$frobnicate": [1, 2]})).unwrap_err();
        assert!(err.to_string().contains("unknown operator"));
    }

    #[test]
    fn arity_is_checked_at_parse_time() {
        let err = parse_expr(&json!({"$divide": [1, 2, 3]})).unwrap_err();
        assert!(err.to_string().contains("expects 2 arguments, but found 3"));
    }

    #[test]
    fn single_argument_shorthand() {
        let expr = parse_expr(&json!({"$toUpper": "$name"})).unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                op: "$toUpper".to_string(),
                args: vec![Expr::field("name")],
            }
        );
    }

    #[test]
    fn cond_accepts_both_forms() {
        let positional = parse_expr(&json!({"$cond": [{"$gt": ["$a", 1]}, "big", "small"]}));
        let named = parse_expr(
            &json!({"$cond": {"if": {"$gt": ["$a", 1]}, "then": "big", "else": "small"}}),
        );
        assert_eq!(positional.unwrap(), named.unwrap());
    }

    #[test]
    fn filter_defaults_binding_to_this() {
        let expr = parse_expr(&json!({
            "$filter": {"input": "$items", "cond": {"$gte": ["$$this.qty", 2]}}
        }))
        .unwrap();
        let Expr::Filter { var, .. } = expr else {
            panic!("expected $filter");
        };
        assert_eq!(var, "this");
    }

    #[test]
    fn injection_shaped_paths_are_rejected() {
        assert!(parse_expr(&json!("$a'); DROP TABLE x; --")).is_err());
    }
}
