//! `$unionWith` and `$facet`.

use anyhow::Result;

use crate::ast::Pipeline;
use crate::plan::{OutputColumn, Plan};

use super::context::Scope;
use super::Lowerer;

/// The sub-pipeline compiles against the foreign collection, both sides are
/// column-aligned, and the plans connect with UNION ALL. The left side's
/// projection schema is authoritative.
pub(crate) fn lower_union_with(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    collection: &str,
    pipeline: &Pipeline,
) -> Result<(Plan, Scope)> {
    let right = lowerer.lower_sub(collection, pipeline)?;

    let left_names = plan
        .output_names()
        .unwrap_or_else(|| vec!["id".to_string(), "data".to_string()]);
    let right_names = right
        .output_names()
        .unwrap_or_else(|| vec!["id".to_string(), "data".to_string()]);

    // The right side projects the same names in the same order.
    let right = if right_names == left_names {
        right
    } else {
        Plan::Project {
            input: Box::new(right),
            columns: left_names
                .iter()
                .map(|name| OutputColumn::new(name.clone(), name.clone()))
                .collect(),
            distinct: false,
        }
    };

    let plan = match plan {
        Plan::SetOp { mut inputs } => {
            inputs.push(right);
            Plan::SetOp { inputs }
        }
        left => Plan::SetOp {
            inputs: vec![left, right],
        },
    };
    Ok((plan, scope))
}

/// Each named sub-pipeline compiles independently against the same upstream
/// plan; the emitter wraps them into one `JSON_OBJECT` row.
pub(crate) fn lower_facet(
    lowerer: &mut Lowerer,
    plan: Plan,
    scope: Scope,
    facets: &[(String, Pipeline)],
    base: &str,
) -> Result<(Plan, Scope)> {
    let mut subplans = Vec::with_capacity(facets.len());
    for (name, pipeline) in facets {
        let (subplan, _) =
            lowerer.lower_stages(plan.clone(), scope.clone(), &pipeline.stages, base)?;
        subplans.push((name.clone(), subplan));
    }
    let plan = Plan::Facet { facets: subplans };
    Ok((plan, Scope::columns(Vec::new(), true)))
}
