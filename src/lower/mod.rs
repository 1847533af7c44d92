//! Lowers a pipeline into the relational plan.
//!
//! Each stage compiler is a function from `(Plan, Scope, StageAST)` to a new
//! `(Plan, Scope)`; the driver walks stages in order and applies the
//! conservative fusion rules (adjacent `$match`, `$sort` + `$limit`/`$skip`,
//! `$sort` consumed by positional `$group`, `$lookup` + `$unwind`). When no
//! rule clearly applies, stages stack and the emitter nests subqueries.

pub(crate) mod context;
mod expr;
mod filter;
mod group;
mod lookup;
pub(crate) mod operators;
mod project;
mod setops;
mod unwind;
mod window;

use std::collections::HashSet;

use anyhow::Result;

use crate::ast::{AccOp, Group, Literal, Pipeline, Predicate, SortKey, Stage};
use crate::error::{Error, Reason, WithErrorInfo};
use crate::plan::{OutputColumn, Plan, SortSpec};
use crate::sql::Options;
use crate::utils;

use context::{Demand, Fragment, Route, Scope, Ty};

/// Lower a parsed pipeline against `collection`, producing the plan and the
/// bind parameters collected in left-to-right order.
pub(crate) fn lower_pipeline(
    collection: &str,
    pipeline: &Pipeline,
    options: &Options,
) -> Result<(Plan, Vec<serde_json::Value>)> {
    utils::validate_ident(collection, "collection")?;
    let mut lowerer = Lowerer::new(options);
    let plan = lowerer.lower_collection(collection, pipeline)?;
    log::debug!(
        "lowered {} stage(s) against `{collection}` into a plan with {} bind parameter(s)",
        pipeline.stages.len(),
        lowerer.params.len()
    );
    Ok((plan, lowerer.params))
}

pub(crate) struct Lowerer<'a> {
    options: &'a Options,
    params: Vec<serde_json::Value>,
    used_aliases: HashSet<String>,
}

impl<'a> Lowerer<'a> {
    fn new(options: &'a Options) -> Self {
        Lowerer {
            options,
            params: Vec::new(),
            used_aliases: HashSet::new(),
        }
    }

    fn lower_collection(&mut self, collection: &str, pipeline: &Pipeline) -> Result<Plan> {
        self.used_aliases.insert(collection.to_string());
        let plan = Plan::Scan {
            collection: collection.to_string(),
        };
        let scope = Scope::document(None);
        let (plan, _) = self.lower_stages(plan, scope, &pipeline.stages, collection)?;
        Ok(plan)
    }

    fn lower_stages(
        &mut self,
        mut plan: Plan,
        mut scope: Scope,
        stages: &[Stage],
        base: &str,
    ) -> Result<(Plan, Scope)> {
        let mut i = 0;
        while i < stages.len() {
            // $sort strictly before a positional $group is consumed into
            // KEEP (DENSE_RANK FIRST|LAST ...).
            if let (Stage::Sort(keys), Some(Stage::Group(g))) = (&stages[i], stages.get(i + 1)) {
                if group_uses_positional(g) {
                    (plan, scope) = group::lower_group_keep(self, plan, scope, keys, g)
                        .with_stage(i + 1)?;
                    i += 2;
                    continue;
                }
            }
            // $unwind directly on a $lookup result degenerates to a join;
            // the array level is never materialized.
            if let (Stage::Lookup(l), Some(Stage::Unwind(u))) = (&stages[i], stages.get(i + 1)) {
                if u.path.0 == l.as_field {
                    (plan, scope) =
                        lookup::lower_lookup_join(self, plan, scope, l, u, base).with_stage(i)?;
                    i += 2;
                    continue;
                }
            }
            (plan, scope) = self
                .lower_stage(plan, scope, &stages[i], &stages[i + 1..], base)
                .with_stage(i)?;
            i += 1;
        }
        Ok((plan, scope))
    }

    fn lower_stage(
        &mut self,
        plan: Plan,
        scope: Scope,
        stage: &Stage,
        rest: &[Stage],
        base: &str,
    ) -> Result<(Plan, Scope)> {
        match stage {
            Stage::Match(predicate) => self.lower_match(plan, scope, predicate),
            Stage::Project(items) => project::lower_project(self, plan, scope, items),
            Stage::AddFields(fields) => project::lower_add_fields(self, plan, scope, fields),
            Stage::Group(g) => group::lower_group(self, plan, scope, g),
            Stage::Sort(keys) => self.lower_sort(plan, scope, keys),
            Stage::Limit(n) => Ok((lower_limit_skip(plan, Some(*n), None), scope)),
            Stage::Skip(n) => Ok((lower_limit_skip(plan, None, Some(*n)), scope)),
            Stage::Count(name) => Ok(lower_count(plan, name)),
            Stage::Unwind(u) => unwind::lower_unwind(self, plan, scope, u, rest, base),
            Stage::Lookup(l) => lookup::lower_lookup(self, plan, scope, l, rest, base),
            Stage::GraphLookup(g) => lookup::lower_graph_lookup(self, plan, scope, g, base),
            Stage::UnionWith {
                collection,
                pipeline,
            } => setops::lower_union_with(self, plan, scope, collection, pipeline),
            Stage::Facet(facets) => setops::lower_facet(self, plan, scope, facets, base),
            Stage::Bucket(b) => group::lower_bucket(self, plan, scope, b),
            Stage::BucketAuto(b) => group::lower_bucket_auto(self, plan, scope, b),
            Stage::ReplaceRoot(expr) => project::lower_replace_root(self, plan, scope, expr),
            Stage::Redact(expr) => self.lower_redact(plan, scope, expr),
            Stage::Sample(n) => Ok((lower_sample(plan, *n), scope)),
            Stage::SetWindowFields(w) => window::lower_set_window_fields(self, plan, scope, w),
        }
    }

    fn lower_match(
        &mut self,
        plan: Plan,
        scope: Scope,
        predicate: &Predicate,
    ) -> Result<(Plan, Scope)> {
        // `$match: {}` keeps every row.
        if matches!(predicate, Predicate::And(inner) if inner.is_empty()) {
            return Ok((plan, scope));
        }
        let sql = filter::compile_predicate(self, &scope, predicate)?;
        Ok((push_filter(plan, sql), scope))
    }

    fn lower_sort(&mut self, plan: Plan, scope: Scope, keys: &[SortKey]) -> Result<(Plan, Scope)> {
        let mut specs = Vec::with_capacity(keys.len());
        for key in keys {
            // Sorting on `_id` right after $group orders by the group key
            // expression(s), not the alias.
            if key.field == "_id" {
                if let Plan::Aggregate { group_keys, .. } = &plan {
                    for gk in group_keys {
                        specs.push(SortSpec {
                            expr: gk.clone(),
                            descending: key.descending,
                        });
                    }
                    continue;
                }
            }
            let frag = scope.resolve(&crate::ast::FieldPath::new(key.field.clone()), Demand::TEXT)?;
            specs.push(SortSpec {
                expr: frag.sql,
                descending: key.descending,
            });
        }
        Ok((
            Plan::Sort {
                input: Box::new(plan),
                keys: specs,
            },
            scope,
        ))
    }

    fn lower_redact(
        &mut self,
        plan: Plan,
        scope: Scope,
        expr: &crate::ast::Expr,
    ) -> Result<(Plan, Scope)> {
        // Document-level redaction: $$PRUNE drops the row, $$KEEP and
        // $$DESCEND both pass it through.
        let verdict = expr::compile_expr(self, &scope, expr, Demand::TEXT)?.into_value();
        let predicate = format!("({verdict}) <> 'PRUNE'");
        Ok((push_filter(plan, predicate), scope))
    }

    /// Deterministic, translation-unique alias generation.
    pub(crate) fn unique_alias(&mut self, base: &str) -> String {
        if self.used_aliases.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}{n}");
            if self.used_aliases.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    pub(crate) fn literal_fragment(&self, literal: &Literal) -> Fragment {
        match literal {
            Literal::Null => Fragment::unknown("NULL"),
            Literal::Boolean(true) => Fragment::text("'true'"),
            Literal::Boolean(false) => Fragment::text("'false'"),
            Literal::Integer(n) => Fragment::number(n.to_string()),
            Literal::Float(f) => Fragment::number(f.to_string()),
            Literal::String(s) => Fragment::text(utils::sql_string(s)),
        }
    }

    /// A literal in `$match` comparison position: a `:n` placeholder in
    /// parameterized mode, an inline SQL literal otherwise.
    pub(crate) fn match_literal(&mut self, literal: &Literal) -> String {
        if self.options.parameterize && !matches!(literal, Literal::Null) {
            let value = match literal {
                Literal::Boolean(b) => serde_json::Value::Bool(*b),
                Literal::Integer(n) => serde_json::Value::from(*n),
                Literal::Float(f) => serde_json::Value::from(*f),
                Literal::String(s) => serde_json::Value::from(s.clone()),
                Literal::Null => unreachable!(),
            };
            self.params.push(value);
            return format!(":{}", self.params.len());
        }
        self.literal_fragment(literal).sql
    }

    /// A recognized operator the Oracle target cannot express: raise in
    /// strict mode, surface the documented sentinel in lenient mode.
    pub(crate) fn unsupported(&mut self, op: &str) -> Result<Fragment> {
        if self.options.lenient {
            Ok(Fragment::unknown(format!(
                "/* {op} not fully supported */ NULL"
            )))
        } else {
            Err(Error::new(Reason::Unsupported { op: op.to_string() }).into())
        }
    }

    /// Recursively lower a sub-pipeline against another collection,
    /// sharing alias and bind-parameter numbering.
    pub(crate) fn lower_sub(&mut self, collection: &str, pipeline: &Pipeline) -> Result<Plan> {
        utils::validate_ident(collection, "collection")?;
        self.lower_collection(collection, pipeline)
    }
}

/// Successive filters AND-combine instead of stacking.
pub(crate) fn push_filter(plan: Plan, sql: String) -> Plan {
    match plan {
        Plan::Filter { input, predicate } => Plan::Filter {
            input,
            predicate: format!("{predicate} AND {sql}"),
        },
        other => Plan::Filter {
            input: Box::new(other),
            predicate: sql,
        },
    }
}

fn lower_limit_skip(plan: Plan, limit: Option<u64>, offset: Option<u64>) -> Plan {
    if let Plan::LimitOffset {
        input,
        limit: have_limit,
        offset: have_offset,
    } = plan
    {
        // `$limit` and `$skip` fill the two slots of one OFFSET/FETCH pair
        // in either stage order; a second occurrence of the same slot nests.
        if limit.is_some() && have_limit.is_none() {
            return Plan::LimitOffset {
                input,
                limit,
                offset: have_offset,
            };
        }
        if offset.is_some() && have_offset.is_none() {
            return Plan::LimitOffset {
                input,
                limit: have_limit,
                offset,
            };
        }
        return Plan::LimitOffset {
            input: Box::new(Plan::LimitOffset {
                input,
                limit: have_limit,
                offset: have_offset,
            }),
            limit,
            offset,
        };
    }
    Plan::LimitOffset {
        input: Box::new(plan),
        limit,
        offset,
    }
}

/// Terminal `$count: "name"` emits one JSON object row.
fn lower_count(plan: Plan, name: &str) -> (Plan, Scope) {
    let plan = Plan::Aggregate {
        input: Box::new(plan),
        group_keys: Vec::new(),
        columns: vec![OutputColumn::new(
            "data",
            format!("JSON_OBJECT('{name}' VALUE COUNT(*))"),
        )],
    };
    let scope = Scope::columns(
        vec![Route::Column {
            field: name.to_string(),
            sqlref: format!("JSON_VALUE(data, '$.{name}' RETURNING NUMBER)"),
            ty: Ty::Number,
            is_size: false,
        }],
        false,
    );
    (plan, scope)
}

fn lower_sample(plan: Plan, size: u64) -> Plan {
    Plan::LimitOffset {
        input: Box::new(Plan::Sort {
            input: Box::new(plan),
            keys: vec![SortSpec {
                expr: "DBMS_RANDOM.VALUE".to_string(),
                descending: false,
            }],
        }),
        limit: Some(size),
        offset: None,
    }
}

fn group_uses_positional(group: &Group) -> bool {
    group
        .accumulators
        .iter()
        .any(|acc| matches!(acc.op, AccOp::First | AccOp::Last))
}

/// The select list that forwards the current row shape unchanged.
pub(crate) fn pass_through_columns(plan: &Plan) -> Vec<OutputColumn> {
    match plan.output_names() {
        None => vec![
            OutputColumn::new("id", "id"),
            OutputColumn::new("data", "data"),
        ],
        Some(names) => names
            .into_iter()
            .map(|name| OutputColumn::new(name.clone(), name))
            .collect(),
    }
}

/// True when the pass-through row still carries the raw document column.
pub(crate) fn passes_data(plan: &Plan) -> bool {
    plan.output_names()
        .map_or(true, |names| names.iter().any(|n| n == "data"))
}
