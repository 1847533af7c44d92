//! The operator dispatch table.
//!
//! One immutable table, initialized once and read by every translation.
//! Each entry carries arity bounds (checked by the parser) and a compiler
//! that demands its arguments with the right numeric hints, emits SQL with
//! precedence-preserving parentheses, and declares its result type.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::ast::{Expr, Literal};
use crate::error::Result;

use super::context::{extract, Demand, Fragment, Scope, Ty};
use super::expr::{compile_expr, json_arg, num_arg, text_arg};
use super::Lowerer;

pub(crate) type CompileFn = fn(&mut Lowerer, &Scope, &str, &[Expr]) -> Result<Fragment>;

pub(crate) struct OpDef {
    pub min_args: usize,
    pub max_args: Option<usize>,
    compile: CompileFn,
}

impl OpDef {
    const fn new(min_args: usize, max_args: Option<usize>, compile: CompileFn) -> Self {
        OpDef {
            min_args,
            max_args,
            compile,
        }
    }

    pub fn arity_ok(&self, got: usize) -> bool {
        got >= self.min_args && self.max_args.map_or(true, |max| got <= max)
    }

    pub fn describe_arity(&self) -> String {
        match (self.min_args, self.max_args) {
            (min, Some(max)) if min == max => min.to_string(),
            (min, Some(max)) => format!("{min} to {max}"),
            (min, None) => format!("at least {min}"),
        }
    }

    pub fn compile(
        &self,
        lowerer: &mut Lowerer,
        scope: &Scope,
        op: &str,
        args: &[Expr],
    ) -> Result<Fragment> {
        (self.compile)(lowerer, scope, op, args)
    }
}

pub(crate) fn lookup(name: &str) -> Option<&'static OpDef> {
    OPERATORS.get(name)
}

pub(crate) static OPERATORS: Lazy<HashMap<&'static str, OpDef>> = Lazy::new(|| {
    let mut t = HashMap::new();

    // arithmetic
    t.insert("$add", OpDef::new(1, None, arith_nary));
    t.insert("$multiply", OpDef::new(1, None, arith_nary));
    t.insert("$subtract", OpDef::new(2, Some(2), arith_binary));
    t.insert("$divide", OpDef::new(2, Some(2), arith_binary));
    t.insert("$mod", OpDef::new(2, Some(2), modulo));
    t.insert("$abs", OpDef::new(1, Some(1), numeric_fn));
    t.insert("$ceil", OpDef::new(1, Some(1), numeric_fn));
    t.insert("$floor", OpDef::new(1, Some(1), numeric_fn));
    t.insert("$round", OpDef::new(1, Some(2), round_fn));
    t.insert("$trunc", OpDef::new(1, Some(2), round_fn));

    // comparison
    for op in ["$eq", "$ne", "$gt", "$gte", "$lt", "$lte"] {
        t.insert(op, OpDef::new(2, Some(2), comparison));
    }

    // logic
    t.insert("$and", OpDef::new(1, None, logical));
    t.insert("$or", OpDef::new(1, None, logical));
    t.insert("$nor", OpDef::new(1, None, logical));
    t.insert("$not", OpDef::new(1, Some(1), logical_not));

    // conditionals ($cond / $switch are structured AST nodes)
    t.insert("$ifNull", OpDef::new(2, Some(2), if_null));

    // strings
    t.insert("$concat", OpDef::new(1, None, concat));
    t.insert("$toLower", OpDef::new(1, Some(1), string_fn));
    t.insert("$toUpper", OpDef::new(1, Some(1), string_fn));
    t.insert("$substr", OpDef::new(3, Some(3), substr));
    t.insert("$substrCP", OpDef::new(3, Some(3), substr));
    t.insert("$strLenCP", OpDef::new(1, Some(1), str_len));
    t.insert("$trim", OpDef::new(1, Some(2), trim_fn));
    t.insert("$ltrim", OpDef::new(1, Some(2), trim_fn));
    t.insert("$rtrim", OpDef::new(1, Some(2), trim_fn));
    t.insert("$indexOfCP", OpDef::new(2, Some(2), index_of));
    t.insert("$regexMatch", OpDef::new(2, Some(3), regex_match));
    t.insert("$replaceOne", OpDef::new(3, Some(3), replace_fn));
    t.insert("$replaceAll", OpDef::new(3, Some(3), replace_fn));
    t.insert("$strcasecmp", OpDef::new(2, Some(2), strcasecmp));

    // dates
    for op in [
        "$year",
        "$month",
        "$dayOfMonth",
        "$hour",
        "$minute",
        "$second",
        "$dayOfWeek",
        "$dayOfYear",
        "$week",
    ] {
        t.insert(op, OpDef::new(1, Some(1), date_part));
    }

    // arrays
    t.insert("$arrayElemAt", OpDef::new(2, Some(2), array_elem_at));
    t.insert("$first", OpDef::new(1, Some(1), array_first_last));
    t.insert("$last", OpDef::new(1, Some(1), array_first_last));
    t.insert("$size", OpDef::new(1, Some(1), array_size));
    t.insert("$isArray", OpDef::new(1, Some(1), is_array));
    t.insert("$concatArrays", OpDef::new(1, None, sentinel));
    t.insert("$slice", OpDef::new(2, Some(3), sentinel));
    t.insert("$reverseArray", OpDef::new(1, Some(1), reverse_array));
    t.insert("$setUnion", OpDef::new(2, Some(2), set_op));
    t.insert("$setIntersection", OpDef::new(2, Some(2), set_op));

    // objects
    t.insert("$mergeObjects", OpDef::new(1, None, merge_objects));

    // type inspection and conversion
    t.insert("$type", OpDef::new(1, Some(1), type_of));
    t.insert("$toInt", OpDef::new(1, Some(1), to_number_fn));
    t.insert("$toLong", OpDef::new(1, Some(1), to_number_fn));
    t.insert("$toDouble", OpDef::new(1, Some(1), to_number_fn));
    t.insert("$toString", OpDef::new(1, Some(1), to_string_fn));
    t.insert("$toBool", OpDef::new(1, Some(1), to_bool));

    t
});

fn arith_nary(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let symbol = if op == "$add" { " + " } else { " * " };
    let parts: Vec<String> = args
        .iter()
        .map(|a| num_arg(lowerer, scope, a))
        .collect::<Result<_>>()?;
    Ok(Fragment::number(format!("({})", parts.join(symbol))))
}

fn arith_binary(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let symbol = if op == "$subtract" { "-" } else { "/" };
    let a = num_arg(lowerer, scope, &args[0])?;
    let b = num_arg(lowerer, scope, &args[1])?;
    Ok(Fragment::number(format!("({a} {symbol} {b})")))
}

fn modulo(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let a = num_arg(lowerer, scope, &args[0])?;
    let b = num_arg(lowerer, scope, &args[1])?;
    Ok(Fragment::number(format!("MOD({a}, {b})")))
}

fn numeric_fn(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let func = match op {
        "$abs" => "ABS",
        "$ceil" => "CEIL",
        _ => "FLOOR",
    };
    let a = num_arg(lowerer, scope, &args[0])?;
    Ok(Fragment::number(format!("{func}({a})")))
}

fn round_fn(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let func = if op == "$round" { "ROUND" } else { "TRUNC" };
    let a = num_arg(lowerer, scope, &args[0])?;
    if let Some(places) = args.get(1) {
        let p = num_arg(lowerer, scope, places)?;
        Ok(Fragment::number(format!("{func}({a}, {p})")))
    } else {
        Ok(Fragment::number(format!("{func}({a})")))
    }
}

/// `$eq`/`$ne` against a null literal turn into `IS [NOT] NULL`; a numeric
/// or boolean literal on either side decides the extraction hint for both.
fn comparison(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let (a, b) = (&args[0], &args[1]);

    if matches!(b, Expr::Literal(Literal::Null)) || matches!(a, Expr::Literal(Literal::Null)) {
        let operand = if matches!(a, Expr::Literal(Literal::Null)) {
            b
        } else {
            a
        };
        let frag = compile_expr(lowerer, scope, operand, Demand::TEXT)?;
        return Ok(match op {
            "$eq" => Fragment::boolean(format!("{} IS NULL", frag.sql)),
            "$ne" => Fragment::boolean(format!("{} IS NOT NULL", frag.sql)),
            _ => Fragment::boolean(format!("{} {} NULL", frag.sql, sql_cmp(op))),
        });
    }

    let numeric = is_numeric_literal(a) || is_numeric_literal(b);
    let demand = if numeric { Demand::NUMBER } else { Demand::TEXT };
    let left = compile_expr(lowerer, scope, a, demand)?.into_value();
    let right = compile_expr(lowerer, scope, b, demand)?.into_value();
    Ok(Fragment::boolean(format!(
        "{left} {} {right}",
        sql_cmp(op)
    )))
}

fn sql_cmp(op: &str) -> &'static str {
    match op {
        "$eq" => "=",
        "$ne" => "<>",
        "$gt" => ">",
        "$gte" => ">=",
        "$lt" => "<",
        _ => "<=",
    }
}

fn is_numeric_literal(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Literal(Literal::Integer(_)) | Expr::Literal(Literal::Float(_))
    )
}

fn logical(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let parts: Vec<String> = args
        .iter()
        .map(|a| Ok(compile_expr(lowerer, scope, a, Demand::TEXT)?.into_predicate()))
        .collect::<Result<_>>()?;
    Ok(match op {
        "$and" => Fragment::boolean(format!("({})", parts.join(" AND "))),
        "$or" => Fragment::boolean(format!("({})", parts.join(" OR "))),
        _ => Fragment::boolean(format!("NOT ({})", parts.join(" OR "))),
    })
}

fn logical_not(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let inner = compile_expr(lowerer, scope, &args[0], Demand::TEXT)?.into_predicate();
    Ok(Fragment::boolean(format!("NOT ({inner})")))
}

fn if_null(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let a = compile_expr(lowerer, scope, &args[0], Demand::TEXT)?;
    let b = compile_expr(lowerer, scope, &args[1], Demand::TEXT)?;
    let ty = if a.ty == b.ty { a.ty } else { Ty::Unknown };
    Ok(Fragment {
        sql: format!("NVL({}, {})", a.into_value(), b.into_value()),
        ty,
    })
}

fn concat(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let parts: Vec<String> = args
        .iter()
        .map(|a| text_arg(lowerer, scope, a))
        .collect::<Result<_>>()?;
    Ok(Fragment::text(format!("({})", parts.join(" || "))))
}

fn string_fn(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let func = if op == "$toLower" { "LOWER" } else { "UPPER" };
    let a = text_arg(lowerer, scope, &args[0])?;
    Ok(Fragment::text(format!("{func}({a})")))
}

/// MongoDB offsets are 0-based, SQL's are 1-based.
fn substr(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let s = text_arg(lowerer, scope, &args[0])?;
    let offset = match &args[1] {
        Expr::Literal(Literal::Integer(n)) => (n + 1).to_string(),
        other => format!("({} + 1)", num_arg(lowerer, scope, other)?),
    };
    let len = num_arg(lowerer, scope, &args[2])?;
    Ok(Fragment::text(format!("SUBSTR({s}, {offset}, {len})")))
}

fn str_len(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let s = text_arg(lowerer, scope, &args[0])?;
    Ok(Fragment::number(format!("LENGTH({s})")))
}

fn trim_fn(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let s = text_arg(lowerer, scope, &args[0])?;
    let chars = args
        .get(1)
        .map(|c| text_arg(lowerer, scope, c))
        .transpose()?;
    Ok(Fragment::text(match (op, chars) {
        ("$ltrim", Some(c)) => format!("LTRIM({s}, {c})"),
        ("$ltrim", None) => format!("LTRIM({s})"),
        ("$rtrim", Some(c)) => format!("RTRIM({s}, {c})"),
        ("$rtrim", None) => format!("RTRIM({s})"),
        (_, Some(c)) => format!("RTRIM(LTRIM({s}, {c}), {c})"),
        (_, None) => format!("TRIM({s})"),
    }))
}

/// `INSTR` counts from 1 and signals not-found with 0; MongoDB counts from 0
/// and signals not-found with -1, so both shift by one.
fn index_of(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let s = text_arg(lowerer, scope, &args[0])?;
    let sub = text_arg(lowerer, scope, &args[1])?;
    Ok(Fragment::number(format!("(INSTR({s}, {sub}) - 1)")))
}

fn regex_match(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let input = text_arg(lowerer, scope, &args[0])?;
    let pattern = text_arg(lowerer, scope, &args[1])?;
    Ok(Fragment::boolean(match args.get(2) {
        Some(options) => {
            let opts = text_arg(lowerer, scope, options)?;
            format!("REGEXP_LIKE({input}, {pattern}, {opts})")
        }
        None => format!("REGEXP_LIKE({input}, {pattern})"),
    }))
}

fn replace_fn(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let input = text_arg(lowerer, scope, &args[0])?;
    let find = text_arg(lowerer, scope, &args[1])?;
    let replacement = text_arg(lowerer, scope, &args[2])?;
    Ok(Fragment::text(if op == "$replaceOne" {
        format!("REGEXP_REPLACE({input}, {find}, {replacement}, 1, 1)")
    } else {
        format!("REGEXP_REPLACE({input}, {find}, {replacement})")
    }))
}

fn strcasecmp(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let a = text_arg(lowerer, scope, &args[0])?;
    let b = text_arg(lowerer, scope, &args[1])?;
    Ok(Fragment::number(format!(
        "CASE WHEN LOWER({a}) < LOWER({b}) THEN -1 WHEN LOWER({a}) > LOWER({b}) THEN 1 ELSE 0 END"
    )))
}

/// Timestamp layout stored by the JSON ingestion side.
const ISO_FORMAT: &str = r#"YYYY-MM-DD"T"HH24:MI:SS.FF3"Z""#;

fn date_part(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let value = text_arg(lowerer, scope, &args[0])?;
    let sql = match op {
        "$year" | "$month" | "$dayOfMonth" | "$hour" | "$minute" | "$second" => {
            let field = match op {
                "$year" => "YEAR",
                "$month" => "MONTH",
                "$dayOfMonth" => "DAY",
                "$hour" => "HOUR",
                "$minute" => "MINUTE",
                _ => "SECOND",
            };
            format!("EXTRACT({field} FROM TO_TIMESTAMP({value}, '{ISO_FORMAT}'))")
        }
        _ => {
            let fmt = match op {
                "$dayOfWeek" => "D",
                "$dayOfYear" => "DDD",
                _ => "IW",
            };
            format!(
                "TO_NUMBER(TO_CHAR(TO_DATE(SUBSTR({value}, 1, 10), 'YYYY-MM-DD'), '{fmt}'))"
            )
        }
    };
    Ok(Fragment::number(sql))
}

/// Constant offsets index directly in the SQL/JSON path; `last` handles the
/// tail. Dynamic offsets have no constant path and fall to the sentinel.
fn array_elem_at(
    lowerer: &mut Lowerer,
    scope: &Scope,
    op: &str,
    args: &[Expr],
) -> Result<Fragment> {
    let index = match &args[1] {
        Expr::Literal(Literal::Integer(n)) => *n,
        _ => return lowerer.unsupported(op),
    };
    element_fragment(lowerer, scope, &args[0], index)
}

fn array_first_last(
    lowerer: &mut Lowerer,
    scope: &Scope,
    op: &str,
    args: &[Expr],
) -> Result<Fragment> {
    let index = if op == "$first" { 0 } else { -1 };
    element_fragment(lowerer, scope, &args[0], index)
}

fn element_fragment(
    lowerer: &mut Lowerer,
    scope: &Scope,
    array: &Expr,
    index: i64,
) -> Result<Fragment> {
    let selector = if index >= 0 {
        format!("[{index}]")
    } else if index == -1 {
        "[last]".to_string()
    } else {
        format!("[last-{}]", -index - 1)
    };
    if let Expr::FieldRef(path) = array {
        if let Some((source, json_path)) = scope.locate(path) {
            return Ok(Fragment::text(format!(
                "JSON_VALUE({source}, '{json_path}{selector}')"
            )));
        }
    }
    let arr = json_arg(lowerer, scope, array)?;
    Ok(Fragment::text(format!("JSON_VALUE({arr}, '${selector}')")))
}

fn array_size(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    if let Expr::FieldRef(path) = &args[0] {
        if let Some(precomputed) = scope.size_column(path) {
            return Ok(precomputed);
        }
        if let Some((source, json_path)) = scope.locate(path) {
            return Ok(Fragment::number(format!(
                "JSON_VALUE({source}, '{json_path}.size()' RETURNING NUMBER)"
            )));
        }
    }
    let arr = json_arg(lowerer, scope, &args[0])?;
    Ok(Fragment::number(format!(
        "JSON_VALUE({arr}, '$.size()' RETURNING NUMBER)"
    )))
}

fn is_array(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    if let Expr::FieldRef(path) = &args[0] {
        if let Some((source, json_path)) = scope.locate(path) {
            return Ok(Fragment::boolean(format!(
                "JSON_EXISTS({source}, '{json_path}?(@.type() == \"array\")')"
            )));
        }
    }
    let arr = json_arg(lowerer, scope, &args[0])?;
    Ok(Fragment::boolean(format!(
        "JSON_EXISTS({arr}, '$?(@.type() == \"array\")')"
    )))
}

fn reverse_array(
    lowerer: &mut Lowerer,
    scope: &Scope,
    _op: &str,
    args: &[Expr],
) -> Result<Fragment> {
    let arr = json_arg(lowerer, scope, &args[0])?;
    let t = lowerer.unique_alias("t");
    Ok(Fragment::json(format!(
        "(SELECT JSON_ARRAYAGG({t}.val ORDER BY {t}.n DESC) FROM JSON_TABLE({arr}, '$[*]' COLUMNS (n FOR ORDINALITY, val VARCHAR2(4000) FORMAT JSON PATH '$')) {t})"
    )))
}

/// Set semantics over scalar elements: `UNION` / `INTERSECT` already
/// deduplicate, `JSON_ARRAYAGG` folds the result back into an array.
fn set_op(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let connector = if op == "$setUnion" {
        "UNION"
    } else {
        "INTERSECT"
    };
    let a = json_arg(lowerer, scope, &args[0])?;
    let b = json_arg(lowerer, scope, &args[1])?;
    let ta = lowerer.unique_alias("t");
    let tb = lowerer.unique_alias("t");
    Ok(Fragment::json(format!(
        "(SELECT JSON_ARRAYAGG(v) FROM (SELECT {ta}.val AS v FROM JSON_TABLE({a}, '$[*]' COLUMNS (val VARCHAR2(4000) PATH '$')) {ta} {connector} SELECT {tb}.val FROM JSON_TABLE({b}, '$[*]' COLUMNS (val VARCHAR2(4000) PATH '$')) {tb}))"
    )))
}

/// Built from known sub-paths: object-literal operands are flattened into
/// one `JSON_OBJECT`, later keys overriding earlier ones.
fn merge_objects(
    lowerer: &mut Lowerer,
    scope: &Scope,
    op: &str,
    args: &[Expr],
) -> Result<Fragment> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for arg in args {
        let Expr::Object(pairs) = arg else {
            return lowerer.unsupported(op);
        };
        for (key, value) in pairs {
            let compiled = compile_expr(lowerer, scope, value, Demand::TEXT)?.into_value();
            if let Some(slot) = fields.iter_mut().find(|(k, _)| k == key) {
                slot.1 = compiled;
            } else {
                fields.push((key.clone(), compiled));
            }
        }
    }
    let body = fields
        .iter()
        .map(|(k, v)| format!("'{k}' VALUE {v}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(Fragment::json(format!("JSON_OBJECT({body})")))
}

/// Type inference over the extracted text, via REGEXP_LIKE probes; array and
/// object shapes are probed on the JSON source when one is addressable.
fn type_of(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let scalar_probes = |v: &str| {
        format!(
            "WHEN {v} IS NULL THEN 'missing' \
             WHEN REGEXP_LIKE({v}, '^-?[0-9]+$') THEN 'int' \
             WHEN REGEXP_LIKE({v}, '^-?[0-9]*\\.[0-9]+$') THEN 'double' \
             WHEN {v} IN ('true', 'false') THEN 'bool' \
             ELSE 'string'"
        )
    };
    if let Expr::FieldRef(path) = &args[0] {
        if let Some((source, json_path)) = scope.locate(path) {
            let v = extract(&source, &json_path, Demand::TEXT).sql;
            let q = extract(&source, &json_path, Demand::Json).sql;
            return Ok(Fragment::text(format!(
                "CASE WHEN JSON_EXISTS({source}, '{json_path}?(@.type() == \"array\")') THEN 'array' \
                 WHEN {q} IS NOT NULL AND {v} IS NULL THEN 'object' {} END",
                scalar_probes(&v)
            )));
        }
    }
    let v = text_arg(lowerer, scope, &args[0])?;
    Ok(Fragment::text(format!("CASE {} END", scalar_probes(&v))))
}

fn to_number_fn(lowerer: &mut Lowerer, scope: &Scope, op: &str, args: &[Expr]) -> Result<Fragment> {
    let v = text_arg(lowerer, scope, &args[0])?;
    Ok(Fragment::number(if op == "$toDouble" {
        format!("TO_BINARY_DOUBLE({v})")
    } else {
        format!("TRUNC(TO_NUMBER({v}))")
    }))
}

fn to_string_fn(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let v = text_arg(lowerer, scope, &args[0])?;
    Ok(Fragment::text(format!("TO_CHAR({v})")))
}

fn to_bool(lowerer: &mut Lowerer, scope: &Scope, _op: &str, args: &[Expr]) -> Result<Fragment> {
    let v = text_arg(lowerer, scope, &args[0])?;
    Ok(Fragment::text(format!(
        "CASE WHEN {v} IS NULL THEN NULL WHEN {v} IN ('false', '0') THEN 'false' ELSE 'true' END"
    )))
}

fn sentinel(lowerer: &mut Lowerer, _scope: &Scope, op: &str, _args: &[Expr]) -> Result<Fragment> {
    lowerer.unsupported(op)
}
