//! Per-stage payload parsing and shorthand normalization.

use anyhow::Result;
use serde_json::Value;
use std::str::FromStr;

use crate::ast::{
    AccOp, Accumulator, Bucket, BucketAuto, DocumentsFrame, Expr, FieldPath, FrameBound,
    GraphLookup, Group, Literal, Lookup, ProjectItem, ProjectValue, SetWindowFields, SortKey,
    Stage, Unwind, WindowFunc, WindowOutput,
};
use crate::error::{Error, Reason};
use crate::utils;

use super::expr::parse_expr;
use super::filter;

fn stage_err(stage: &str, detail: impl Into<String>) -> anyhow::Error {
    Error::new(Reason::StageArg {
        stage: stage.to_string(),
        detail: detail.into(),
    })
    .into()
}

/// Parse one stage document. Normalizations may expand a single input stage
/// into more than one AST stage (`$sortByCount`).
pub(super) fn parse_stage(name: &str, payload: &Value) -> Result<Vec<Stage>> {
    Ok(match name {
        "$match" => vec![Stage::Match(filter::parse_predicate(payload)?)],
        "$project" => vec![Stage::Project(parse_project(payload)?)],
        "$addFields" | "$set" => vec![Stage::AddFields(parse_add_fields(name, payload)?)],
        "$group" => vec![Stage::Group(parse_group(payload)?)],
        "$sort" => vec![Stage::Sort(parse_sort(name, payload)?)],
        "$limit" => vec![Stage::Limit(parse_count_arg(name, payload)?)],
        "$skip" => vec![Stage::Skip(parse_count_arg(name, payload)?)],
        "$count" => vec![Stage::Count(parse_count_field(payload)?)],
        "$unwind" => vec![Stage::Unwind(parse_unwind(payload)?)],
        "$lookup" => vec![Stage::Lookup(parse_lookup(payload)?)],
        "$graphLookup" => vec![Stage::GraphLookup(parse_graph_lookup(payload)?)],
        "$unionWith" => vec![parse_union_with(payload)?],
        "$facet" => vec![parse_facet(payload)?],
        "$bucket" => vec![Stage::Bucket(parse_bucket(payload)?)],
        "$bucketAuto" => vec![Stage::BucketAuto(parse_bucket_auto(payload)?)],
        "$replaceRoot" => {
            let object = expect_object("$replaceRoot", payload)?;
            let new_root = object
                .get("newRoot")
                .ok_or_else(|| stage_err("$replaceRoot", "requires `newRoot`"))?;
            vec![Stage::ReplaceRoot(parse_expr(new_root)?)]
        }
        "$replaceWith" => vec![Stage::ReplaceRoot(parse_expr(payload)?)],
        "$redact" => vec![Stage::Redact(parse_expr(payload)?)],
        "$sample" => vec![Stage::Sample(parse_sample(payload)?)],
        "$setWindowFields" => vec![Stage::SetWindowFields(parse_set_window_fields(payload)?)],
        // Sugar for a count-descending group.
        "$sortByCount" => vec![
            Stage::Group(Group {
                id: parse_expr(payload)?,
                accumulators: vec![Accumulator {
                    field: "count".to_string(),
                    op: AccOp::Sum,
                    arg: Expr::int(1),
                }],
            }),
            Stage::Sort(vec![SortKey {
                field: "count".to_string(),
                descending: true,
            }]),
        ],
        _ => {
            return Err(Error::new(Reason::UnknownStage {
                name: name.to_string(),
            })
            .into())
        }
    })
}

fn expect_object<'a>(
    stage: &str,
    payload: &'a Value,
) -> Result<&'a serde_json::Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| stage_err(stage, "expected a document payload"))
}

fn parse_project(payload: &Value) -> Result<Vec<ProjectItem>> {
    let object = expect_object("$project", payload)?;
    if object.is_empty() {
        return Err(stage_err("$project", "must specify at least one field"));
    }
    let mut items = Vec::with_capacity(object.len());
    for (field, value) in object {
        utils::validate_field_path(field, "projected field")?;
        let value = match value {
            Value::Number(n) if n.as_f64() == Some(0.0) => ProjectValue::Exclude,
            Value::Bool(false) => ProjectValue::Exclude,
            Value::Number(_) | Value::Bool(true) => ProjectValue::Include,
            other => ProjectValue::Computed(parse_expr(other)?),
        };
        if value.is_exclude() && field != "_id" {
            return Err(stage_err(
                "$project",
                format!("exclusion is only supported for `_id`, found `{field}`"),
            ));
        }
        items.push(ProjectItem {
            field: field.clone(),
            value,
        });
    }
    Ok(items)
}

fn parse_add_fields(stage: &str, payload: &Value) -> Result<Vec<(String, Expr)>> {
    let object = expect_object(stage, payload)?;
    if object.is_empty() {
        return Err(stage_err(stage, "must specify at least one field"));
    }
    let mut fields = Vec::with_capacity(object.len());
    for (field, value) in object {
        utils::validate_field_path(field, "computed field")?;
        fields.push((field.clone(), parse_expr(value)?));
    }
    Ok(fields)
}

fn parse_group(payload: &Value) -> Result<Group> {
    let object = expect_object("$group", payload)?;
    let id = object
        .get("_id")
        .ok_or_else(|| stage_err("$group", "missing `_id`"))?;
    let mut accumulators = Vec::new();
    for (field, value) in object {
        if field == "_id" {
            continue;
        }
        utils::validate_ident(field, "accumulator field")?;
        accumulators.push(parse_accumulator(field, value)?);
    }
    Ok(Group {
        id: parse_expr(id)?,
        accumulators,
    })
}

fn parse_accumulator(field: &str, value: &Value) -> Result<Accumulator> {
    let object = expect_object("$group", value)?;
    if object.len() != 1 {
        return Err(stage_err(
            "$group",
            format!("accumulator `{field}` must be a single-operator document"),
        ));
    }
    let (op_name, arg) = object.iter().next().unwrap();
    let op = AccOp::from_str(op_name).map_err(|_| {
        Error::new(Reason::UnknownOperator {
            name: op_name.clone(),
        })
    })?;
    Ok(Accumulator {
        field: field.to_string(),
        op,
        arg: parse_expr(arg)?,
    })
}

fn parse_sort(stage: &str, payload: &Value) -> Result<Vec<SortKey>> {
    let object = expect_object(stage, payload)?;
    if object.is_empty() {
        return Err(stage_err(stage, "must specify at least one key"));
    }
    let mut keys = Vec::with_capacity(object.len());
    for (field, direction) in object {
        utils::validate_field_path(field, "sort field")?;
        let descending = match direction.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => return Err(stage_err(stage, format!("direction for `{field}` must be 1 or -1"))),
        };
        keys.push(SortKey {
            field: field.clone(),
            descending,
        });
    }
    Ok(keys)
}

/// Clamped to non-negative integers.
fn parse_count_arg(stage: &str, payload: &Value) -> Result<u64> {
    match payload {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(v)
            } else if n.as_i64().is_some() {
                Ok(0)
            } else {
                Err(stage_err(stage, "must be an integer"))
            }
        }
        _ => Err(stage_err(stage, "must be an integer")),
    }
}

fn parse_count_field(payload: &Value) -> Result<String> {
    let field = payload
        .as_str()
        .ok_or_else(|| stage_err("$count", "takes a string field name"))?;
    if field.is_empty() || field.starts_with('$') || field.contains('.') {
        return Err(stage_err(
            "$count",
            "field name must be non-empty, without `$` or `.`",
        ));
    }
    utils::validate_ident(field, "count field")?;
    Ok(field.to_string())
}

fn parse_unwind(payload: &Value) -> Result<Unwind> {
    let (path, preserve, index) = match payload {
        Value::String(path) => (path.as_str(), false, None),
        Value::Object(object) => {
            let path = object
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| stage_err("$unwind", "requires `path`"))?;
            let preserve = object
                .get("preserveNullAndEmptyArrays")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let index = object
                .get("includeArrayIndex")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            (path, preserve, index)
        }
        _ => return Err(stage_err("$unwind", "takes a path string or a document")),
    };
    let path = path
        .strip_prefix('$')
        .ok_or_else(|| stage_err("$unwind", "path must start with `$`"))?;
    utils::validate_field_path(path, "unwind path")?;
    if let Some(index) = &index {
        utils::validate_ident(index, "includeArrayIndex field")?;
    }
    Ok(Unwind {
        path: FieldPath::new(path),
        preserve_null_and_empty: preserve,
        include_array_index: index,
    })
}

fn parse_lookup(payload: &Value) -> Result<Lookup> {
    let object = expect_object("$lookup", payload)?;
    if object.contains_key("pipeline") {
        return Err(stage_err("$lookup", "the pipeline form is not supported"));
    }
    let get = |key: &str| -> Result<&str> {
        object
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| stage_err("$lookup", format!("requires string `{key}`")))
    };
    let from = get("from")?;
    utils::validate_ident(from, "collection")?;
    let local_field = get("localField")?;
    utils::validate_field_path(local_field, "localField")?;
    let foreign_field = get("foreignField")?;
    utils::validate_field_path(foreign_field, "foreignField")?;
    let as_field = get("as")?;
    utils::validate_ident(as_field, "lookup output field")?;
    Ok(Lookup {
        from: from.to_string(),
        local_field: FieldPath::new(local_field),
        foreign_field: FieldPath::new(foreign_field),
        as_field: as_field.to_string(),
    })
}

fn parse_graph_lookup(payload: &Value) -> Result<GraphLookup> {
    let object = expect_object("$graphLookup", payload)?;
    let get = |key: &str| -> Result<&str> {
        object
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| stage_err("$graphLookup", format!("requires string `{key}`")))
    };
    let from = get("from")?;
    utils::validate_ident(from, "collection")?;
    let start_with = object
        .get("startWith")
        .ok_or_else(|| stage_err("$graphLookup", "requires `startWith`"))?;
    let connect_from = get("connectFromField")?;
    utils::validate_field_path(connect_from, "connectFromField")?;
    let connect_to = get("connectToField")?;
    utils::validate_field_path(connect_to, "connectToField")?;
    let as_field = get("as")?;
    utils::validate_ident(as_field, "graphLookup output field")?;
    let restrict = object
        .get("restrictSearchWithMatch")
        .map(filter::parse_predicate)
        .transpose()?;
    Ok(GraphLookup {
        from: from.to_string(),
        start_with: parse_expr(start_with)?,
        connect_from_field: FieldPath::new(connect_from),
        connect_to_field: FieldPath::new(connect_to),
        as_field: as_field.to_string(),
        max_depth: object.get("maxDepth").and_then(|v| v.as_u64()),
        restrict,
    })
}

fn parse_union_with(payload: &Value) -> Result<Stage> {
    let (collection, pipeline) = match payload {
        Value::String(collection) => (collection.as_str(), crate::ast::Pipeline::default()),
        Value::Object(object) => {
            let collection = object
                .get("coll")
                .and_then(|v| v.as_str())
                .ok_or_else(|| stage_err("$unionWith", "requires `coll`"))?;
            let pipeline = match object.get("pipeline") {
                Some(sub) => super::parse(sub)?,
                None => crate::ast::Pipeline::default(),
            };
            (collection, pipeline)
        }
        _ => {
            return Err(stage_err(
                "$unionWith",
                "takes a collection name or a document",
            ))
        }
    };
    utils::validate_ident(collection, "collection")?;
    Ok(Stage::UnionWith {
        collection: collection.to_string(),
        pipeline,
    })
}

fn parse_facet(payload: &Value) -> Result<Stage> {
    let object = expect_object("$facet", payload)?;
    if object.is_empty() {
        return Err(stage_err("$facet", "requires at least one sub-pipeline"));
    }
    let mut facets = Vec::with_capacity(object.len());
    for (name, sub) in object {
        utils::validate_ident(name, "facet name")?;
        facets.push((name.clone(), super::parse(sub)?));
    }
    Ok(Stage::Facet(facets))
}

fn parse_bucket(payload: &Value) -> Result<Bucket> {
    let object = expect_object("$bucket", payload)?;
    let group_by = object
        .get("groupBy")
        .ok_or_else(|| stage_err("$bucket", "requires `groupBy`"))?;
    let boundaries_json = object
        .get("boundaries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| stage_err("$bucket", "requires a `boundaries` array"))?;
    if boundaries_json.len() < 2 {
        return Err(stage_err("$bucket", "requires at least 2 boundaries"));
    }
    let boundaries = boundaries_json
        .iter()
        .map(parse_bucket_literal)
        .collect::<Result<Vec<_>>>()?;
    if !strictly_ascending(&boundaries) {
        return Err(stage_err("$bucket", "boundaries must be strictly ascending"));
    }
    let default = object.get("default").map(parse_bucket_literal).transpose()?;
    let output = parse_output(object.get("output"))?;
    Ok(Bucket {
        group_by: parse_expr(group_by)?,
        boundaries,
        default,
        output,
    })
}

fn parse_bucket_auto(payload: &Value) -> Result<BucketAuto> {
    let object = expect_object("$bucketAuto", payload)?;
    let group_by = object
        .get("groupBy")
        .ok_or_else(|| stage_err("$bucketAuto", "requires `groupBy`"))?;
    let buckets = object
        .get("buckets")
        .and_then(|v| v.as_u64())
        .filter(|n| *n >= 1)
        .ok_or_else(|| stage_err("$bucketAuto", "requires `buckets` >= 1"))?;
    let output = parse_output(object.get("output"))?;
    Ok(BucketAuto {
        group_by: parse_expr(group_by)?,
        buckets,
        output,
    })
}

fn parse_output(output: Option<&Value>) -> Result<Vec<Accumulator>> {
    let Some(output) = output else {
        return Ok(Vec::new());
    };
    let object = expect_object("$bucket", output)?;
    let mut accumulators = Vec::with_capacity(object.len());
    for (field, value) in object {
        utils::validate_ident(field, "output field")?;
        accumulators.push(parse_accumulator(field, value)?);
    }
    Ok(accumulators)
}

fn parse_bucket_literal(value: &Value) -> Result<Literal> {
    match parse_expr(value)? {
        Expr::Literal(literal) => Ok(literal),
        _ => Err(stage_err("$bucket", "boundaries must be literals")),
    }
}

fn strictly_ascending(boundaries: &[Literal]) -> bool {
    boundaries.windows(2).all(|pair| match (&pair[0], &pair[1]) {
        (Literal::Integer(a), Literal::Integer(b)) => a < b,
        (Literal::Float(a), Literal::Float(b)) => a < b,
        (Literal::Integer(a), Literal::Float(b)) => (*a as f64) < *b,
        (Literal::Float(a), Literal::Integer(b)) => *a < (*b as f64),
        (Literal::String(a), Literal::String(b)) => a < b,
        _ => false,
    })
}

fn parse_sample(payload: &Value) -> Result<u64> {
    let size = match payload {
        Value::Object(object) => object.get("size").and_then(|v| v.as_u64()),
        Value::Number(n) => n.as_u64(),
        _ => None,
    };
    size.filter(|n| *n >= 1)
        .ok_or_else(|| stage_err("$sample", "requires `size` >= 1"))
}

fn parse_set_window_fields(payload: &Value) -> Result<SetWindowFields> {
    let object = expect_object("$setWindowFields", payload)?;
    let partition_by = object.get("partitionBy").map(parse_expr).transpose()?;
    let sort_by = match object.get("sortBy") {
        Some(sort) => parse_sort("$setWindowFields", sort)?,
        None => Vec::new(),
    };
    let output_json = object
        .get("output")
        .and_then(|v| v.as_object())
        .ok_or_else(|| stage_err("$setWindowFields", "requires an `output` document"))?;
    let mut output = Vec::with_capacity(output_json.len());
    for (field, spec) in output_json {
        utils::validate_ident(field, "window output field")?;
        output.push(parse_window_output(field, spec)?);
    }
    Ok(SetWindowFields {
        partition_by,
        sort_by,
        output,
    })
}

fn parse_window_output(field: &str, spec: &Value) -> Result<WindowOutput> {
    let object = expect_object("$setWindowFields", spec)?;
    let mut func = None;
    let mut frame = None;
    for (key, value) in object {
        match key.as_str() {
            "$rank" => func = Some(WindowFunc::Rank),
            "$denseRank" => func = Some(WindowFunc::DenseRank),
            "$documentNumber" => func = Some(WindowFunc::DocumentNumber),
            "$sum" | "$avg" | "$min" | "$max" => {
                func = Some(WindowFunc::Agg {
                    op: AccOp::from_str(key).unwrap(),
                    arg: parse_expr(value)?,
                });
            }
            "window" => {
                let documents = value
                    .as_object()
                    .and_then(|w| w.get("documents"))
                    .and_then(|d| d.as_array())
                    .ok_or_else(|| {
                        stage_err("$setWindowFields", "window takes {documents: [lo, hi]}")
                    })?;
                if documents.len() != 2 {
                    return Err(stage_err(
                        "$setWindowFields",
                        "window.documents takes exactly two bounds",
                    ));
                }
                frame = Some(DocumentsFrame {
                    lower: parse_frame_bound(&documents[0])?,
                    upper: parse_frame_bound(&documents[1])?,
                });
            }
            other => {
                return Err(Error::new(Reason::UnknownOperator {
                    name: other.to_string(),
                })
                .into())
            }
        }
    }
    let func = func.ok_or_else(|| {
        stage_err(
            "$setWindowFields",
            format!("output `{field}` names no window function"),
        )
    })?;
    Ok(WindowOutput {
        field: field.to_string(),
        func,
        frame,
    })
}

fn parse_frame_bound(value: &Value) -> Result<FrameBound> {
    match value {
        Value::String(s) if s == "unbounded" => Ok(FrameBound::Unbounded),
        Value::String(s) if s == "current" => Ok(FrameBound::Current),
        Value::Number(n) => n
            .as_i64()
            .map(FrameBound::Offset)
            .ok_or_else(|| stage_err("$setWindowFields", "window bounds must be integers")),
        _ => Err(stage_err(
            "$setWindowFields",
            "window bounds are `unbounded`, `current`, or an integer",
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_requires_id() {
        let err = parse_group(&json!({"total": {"$sum": "$amount"}})).unwrap_err();
        assert!(err.to_string().contains("missing `_id`"));
    }

    #[test]
    fn unknown_accumulator_is_rejected() {
        let err = parse_group(&json!({"_id": null, "x": {"$stdDevPop": "$v"}})).unwrap_err();
        assert!(err.to_string().contains("unknown operator"));
    }

    #[test]
    fn bucket_boundaries_must_ascend() {
        let err = parse_bucket(&json!({
            "groupBy": "$price",
            "boundaries": [0, 100, 50]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("strictly ascending"));
    }

    #[test]
    fn non_id_exclusion_is_rejected() {
        let err = parse_project(&json!({"secret": 0})).unwrap_err();
        assert!(err.to_string().contains("exclusion is only supported"));
    }

    #[test]
    fn negative_limit_clamps_to_zero() {
        assert_eq!(parse_count_arg("$limit", &json!(-5)).unwrap(), 0);
        assert_eq!(parse_count_arg("$limit", &json!(5)).unwrap(), 5);
    }

    #[test]
    fn count_field_shape() {
        assert!(parse_count_field(&json!("total")).is_ok());
        assert!(parse_count_field(&json!("$bad")).is_err());
        assert!(parse_count_field(&json!("a.b")).is_err());
        assert!(parse_count_field(&json!("")).is_err());
    }

    #[test]
    fn window_output_requires_a_function() {
        let err = parse_window_output("r", &json!({"window": {"documents": ["unbounded", "current"]}}))
            .unwrap_err();
        assert!(err.to_string().contains("names no window function"));
    }
}
