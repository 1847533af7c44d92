//! `$setWindowFields` compiles each output to a window function.

use anyhow::Result;

use crate::ast::{AccOp, DocumentsFrame, FieldPath, FrameBound, SetWindowFields, WindowFunc};
use crate::error::{Error, Reason};
use crate::plan::{OutputColumn, Plan};
use crate::utils;

use super::context::{Demand, Route, Scope, Ty};
use super::expr::{compile_expr, num_arg, text_arg};
use super::Lowerer;

pub(crate) fn lower_set_window_fields(
    lowerer: &mut Lowerer,
    plan: Plan,
    mut scope: Scope,
    spec: &SetWindowFields,
) -> Result<(Plan, Scope)> {
    let partition = spec
        .partition_by
        .as_ref()
        .map(|p| Ok::<_, anyhow::Error>(compile_expr(lowerer, &scope, p, Demand::TEXT)?.into_value()))
        .transpose()?;

    let order = spec
        .sort_by
        .iter()
        .map(|key| {
            let frag = scope.resolve(&FieldPath::new(key.field.clone()), Demand::TEXT)?;
            Ok(if key.descending {
                format!("{} DESC", frag.sql)
            } else {
                frag.sql
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut columns = Vec::with_capacity(spec.output.len());
    for output in &spec.output {
        let (func, frame_allowed) = match &output.func {
            WindowFunc::Rank => ("RANK()".to_string(), false),
            WindowFunc::DenseRank => ("DENSE_RANK()".to_string(), false),
            WindowFunc::DocumentNumber => ("ROW_NUMBER()".to_string(), false),
            WindowFunc::Agg { op, arg } => (
                match op {
                    AccOp::Sum => format!("SUM({})", num_arg(lowerer, &scope, arg)?),
                    AccOp::Avg => format!("AVG({})", num_arg(lowerer, &scope, arg)?),
                    AccOp::Min => format!("MIN({})", text_arg(lowerer, &scope, arg)?),
                    AccOp::Max => format!("MAX({})", text_arg(lowerer, &scope, arg)?),
                    other => {
                        return Err(Error::new(Reason::StageArg {
                            stage: "$setWindowFields".to_string(),
                            detail: format!("`{other}` is not a window aggregate"),
                        })
                        .into())
                    }
                },
                true,
            ),
        };
        if !frame_allowed && output.frame.is_some() {
            return Err(Error::new(Reason::StageArg {
                stage: "$setWindowFields".to_string(),
                detail: format!("`{}` does not take a documents window", output.field),
            })
            .into());
        }
        if matches!(
            output.func,
            WindowFunc::Rank | WindowFunc::DenseRank | WindowFunc::DocumentNumber
        ) && order.is_empty()
        {
            return Err(Error::new(Reason::StageArg {
                stage: "$setWindowFields".to_string(),
                detail: "ranking outputs require sortBy".to_string(),
            })
            .into());
        }

        let mut over = Vec::new();
        if let Some(partition) = &partition {
            over.push(format!("PARTITION BY {partition}"));
        }
        if !order.is_empty() {
            over.push(format!("ORDER BY {}", order.join(", ")));
        }
        if let Some(frame) = &output.frame {
            over.push(render_frame(frame));
        }

        let alias = utils::sanitize_alias(&output.field);
        columns.push(OutputColumn::keyed(
            output.field.clone(),
            alias.clone(),
            format!("{func} OVER ({})", over.join(" ")),
        ));
        scope.routes.push(Route::Column {
            field: output.field.clone(),
            sqlref: alias,
            ty: Ty::Number,
            is_size: false,
        });
    }

    let plan = Plan::Window {
        input: Box::new(plan),
        columns,
    };
    Ok((plan, scope))
}

/// `window.documents` bounds to `ROWS BETWEEN … AND …`: negative offsets
/// precede, positive follow.
fn render_frame(frame: &DocumentsFrame) -> String {
    let lower = match frame.lower {
        FrameBound::Unbounded => "UNBOUNDED PRECEDING".to_string(),
        FrameBound::Current => "CURRENT ROW".to_string(),
        FrameBound::Offset(n) if n < 0 => format!("{} PRECEDING", -n),
        FrameBound::Offset(0) => "CURRENT ROW".to_string(),
        FrameBound::Offset(n) => format!("{n} FOLLOWING"),
    };
    let upper = match frame.upper {
        FrameBound::Unbounded => "UNBOUNDED FOLLOWING".to_string(),
        FrameBound::Current => "CURRENT ROW".to_string(),
        FrameBound::Offset(n) if n < 0 => format!("{} PRECEDING", -n),
        FrameBound::Offset(0) => "CURRENT ROW".to_string(),
        FrameBound::Offset(n) => format!("{n} FOLLOWING"),
    };
    format!("ROWS BETWEEN {lower} AND {upper}")
}
