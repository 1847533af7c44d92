//! Parses a JSON pipeline into the AST.
//!
//! The input is expected to be an array of single-key objects whose key
//! names a stage. Shorthand is normalized here, semantics-preserving:
//! `$set` → `$addFields`, `$replaceWith` → `$replaceRoot`, scalar `$unwind`
//! → its object form, `$sortByCount` → `$group` + `$sort`.

mod expr;
mod filter;
mod stage;

use anyhow::Result;
use serde_json::Value;

use crate::ast::Pipeline;
use crate::error::{Error, Reason, WithErrorInfo};

pub fn parse(pipeline: &Value) -> Result<Pipeline> {
    let stages_json = pipeline.as_array().ok_or_else(|| {
        Error::new(Reason::MalformedPipeline {
            detail: "expected a JSON array of stage objects".to_string(),
        })
    })?;

    let mut stages = Vec::with_capacity(stages_json.len());
    for (index, stage_json) in stages_json.iter().enumerate() {
        let object = stage_json.as_object().ok_or_else(|| {
            Error::new(Reason::MalformedPipeline {
                detail: format!("stage {index} is not an object"),
            })
            .with_stage(index)
        })?;
        if object.len() != 1 {
            return Err(Error::new(Reason::MalformedPipeline {
                detail: format!(
                    "stage {index} must have exactly one key, found {}",
                    object.len()
                ),
            })
            .with_stage(index)
            .into());
        }
        let (name, payload) = object.iter().next().unwrap();
        if !name.starts_with('$') {
            return Err(Error::new(Reason::MalformedPipeline {
                detail: format!("stage name `{name}` does not start with `$`"),
            })
            .with_stage(index)
            .into());
        }
        stages.extend(stage::parse_stage(name, payload).with_stage(index)?);
    }
    log::debug!("parsed {} stage(s)", stages.len());
    Ok(Pipeline { stages })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::Stage;
    use serde_json::json;

    #[test]
    fn rejects_non_array_input() {
        let err = parse(&json!({"$match": {}})).unwrap_err();
        assert!(err.to_string().contains("malformed pipeline"));
    }

    #[test]
    fn rejects_multi_key_stage() {
        let err = parse(&json!([{"$match": {}, "$limit": 1}])).unwrap_err();
        assert!(err.to_string().contains("exactly one key"));
    }

    #[test]
    fn rejects_unknown_stage() {
        let err = parse(&json!([{"$frobnicate": 1}])).unwrap_err();
        assert!(err.to_string().contains("unknown stage"));
    }

    #[test]
    fn set_normalizes_to_add_fields() {
        let a = parse(&json!([{"$set": {"x": 1}}])).unwrap();
        let b = parse(&json!([{"$addFields": {"x": 1}}])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn scalar_unwind_normalizes_to_object_form() {
        let a = parse(&json!([{"$unwind": "$items"}])).unwrap();
        let b = parse(&json!([
            {"$unwind": {"path": "$items", "preserveNullAndEmptyArrays": false}}
        ]))
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sort_by_count_normalizes_to_group_sort() {
        let stages = parse(&json!([{"$sortByCount": "$status"}])).unwrap().stages;
        assert_eq!(stages.len(), 2);
        assert!(matches!(stages[0], Stage::Group(_)));
        assert!(matches!(stages[1], Stage::Sort(_)));
    }

    #[test]
    fn errors_carry_the_stage_index() {
        let err = parse(&json!([{"$limit": 1}, {"$bogus": 1}])).unwrap_err();
        let err = crate::error::downcast(err);
        assert_eq!(err.stage, Some(1));
    }
}
