use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use super::{Expr, FieldPath, Literal};

/// An ordered list of stages representing an aggregation program.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

/// A single transformation with a `$`-prefixed name.
///
/// The set is closed; parse-time normalization folds the aliases (`$set`,
/// `$replaceWith`, `$sortByCount`, scalar `$unwind`) into these variants.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner, strum::IntoStaticStr)]
pub enum Stage {
    #[strum(serialize = "$match")]
    Match(Predicate),
    #[strum(serialize = "$project")]
    Project(Vec<ProjectItem>),
    #[strum(serialize = "$addFields")]
    AddFields(Vec<(String, Expr)>),
    #[strum(serialize = "$group")]
    Group(Group),
    #[strum(serialize = "$sort")]
    Sort(Vec<SortKey>),
    #[strum(serialize = "$limit")]
    Limit(u64),
    #[strum(serialize = "$skip")]
    Skip(u64),
    #[strum(serialize = "$count")]
    Count(String),
    #[strum(serialize = "$unwind")]
    Unwind(Unwind),
    #[strum(serialize = "$lookup")]
    Lookup(Lookup),
    #[strum(serialize = "$graphLookup")]
    GraphLookup(GraphLookup),
    #[strum(serialize = "$unionWith")]
    UnionWith { collection: String, pipeline: Pipeline },
    #[strum(serialize = "$facet")]
    Facet(Vec<(String, Pipeline)>),
    #[strum(serialize = "$bucket")]
    Bucket(Bucket),
    #[strum(serialize = "$bucketAuto")]
    BucketAuto(BucketAuto),
    #[strum(serialize = "$replaceRoot")]
    ReplaceRoot(Expr),
    #[strum(serialize = "$redact")]
    Redact(Expr),
    #[strum(serialize = "$sample")]
    Sample(u64),
    #[strum(serialize = "$setWindowFields")]
    SetWindowFields(SetWindowFields),
}

impl Stage {
    /// The `$`-prefixed stage name, for error reporting.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// The `$match` query language. Distinct from the expression language:
/// `{field: value}` is implicit equality, `{field: {$op: …}}` compares, and
/// `$and`/`$or`/`$nor`/`$not` nest.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Nor(Vec<Predicate>),
    Not(Box<Predicate>),
    Cmp {
        path: FieldPath,
        op: CmpOp,
        value: Literal,
    },
    In {
        path: FieldPath,
        values: Vec<Literal>,
        negated: bool,
    },
    Exists {
        path: FieldPath,
        exists: bool,
    },
    Regex {
        path: FieldPath,
        pattern: String,
        options: Option<String>,
    },
    /// `{$expr: …}` escape hatch into the expression language.
    Expr(Expr),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ProjectItem {
    pub field: String,
    pub value: ProjectValue,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum ProjectValue {
    Include,
    Exclude,
    Computed(Expr),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Compiled once; becomes both the GROUP BY key(s) and the `grp_id`
    /// column. `Literal(Null)` groups the whole input.
    pub id: Expr,
    pub accumulators: Vec<Accumulator>,
}

/// An expression legal only inside `$group` (and bucket outputs), folding
/// across group rows.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Accumulator {
    /// Output field name.
    pub field: String,
    pub op: AccOp,
    pub arg: Expr,
}

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum AccOp {
    #[strum(serialize = "$sum")]
    Sum,
    #[strum(serialize = "$avg")]
    Avg,
    #[strum(serialize = "$min")]
    Min,
    #[strum(serialize = "$max")]
    Max,
    #[strum(serialize = "$first")]
    First,
    #[strum(serialize = "$last")]
    Last,
    #[strum(serialize = "$push")]
    Push,
    #[strum(serialize = "$addToSet")]
    AddToSet,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SortKey {
    /// A dotted document path, or an output column name of the previous
    /// stage when one is in scope.
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Unwind {
    pub path: FieldPath,
    pub preserve_null_and_empty: bool,
    pub include_array_index: Option<String>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Lookup {
    pub from: String,
    pub local_field: FieldPath,
    pub foreign_field: FieldPath,
    pub as_field: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GraphLookup {
    pub from: String,
    pub start_with: Expr,
    pub connect_from_field: FieldPath,
    pub connect_to_field: FieldPath,
    pub as_field: String,
    pub max_depth: Option<u64>,
    pub restrict: Option<Predicate>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub group_by: Expr,
    /// Strictly ascending; validated at parse time.
    pub boundaries: Vec<Literal>,
    pub default: Option<Literal>,
    pub output: Vec<Accumulator>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BucketAuto {
    pub group_by: Expr,
    pub buckets: u64,
    pub output: Vec<Accumulator>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SetWindowFields {
    pub partition_by: Option<Expr>,
    pub sort_by: Vec<SortKey>,
    pub output: Vec<WindowOutput>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct WindowOutput {
    pub field: String,
    pub func: WindowFunc,
    /// `window.documents` bounds; `None` leaves the frame implicit.
    pub frame: Option<DocumentsFrame>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum WindowFunc {
    Rank,
    DenseRank,
    DocumentNumber,
    Agg { op: AccOp, arg: Expr },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DocumentsFrame {
    pub lower: FrameBound,
    pub upper: FrameBound,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum FrameBound {
    Unbounded,
    Current,
    Offset(i64),
}

impl Group {
    /// Field paths demanded by the group key and accumulator arguments.
    pub fn collect_field_refs<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        self.id.collect_field_refs(out);
        for acc in &self.accumulators {
            acc.arg.collect_field_refs(out);
        }
    }
}

impl Predicate {
    pub fn collect_field_refs<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        match self {
            Predicate::And(inner) | Predicate::Or(inner) | Predicate::Nor(inner) => {
                for p in inner {
                    p.collect_field_refs(out);
                }
            }
            Predicate::Not(inner) => inner.collect_field_refs(out),
            Predicate::Cmp { path, .. }
            | Predicate::In { path, .. }
            | Predicate::Exists { path, .. }
            | Predicate::Regex { path, .. } => out.push(path),
            Predicate::Expr(expr) => expr.collect_field_refs(out),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stage_names() {
        let stage = Stage::Limit(3);
        assert_eq!(stage.name(), "$limit");
        let stage = Stage::Match(Predicate::And(vec![]));
        assert_eq!(stage.name(), "$match");
    }

    #[test]
    fn acc_op_parses_from_dollar_name() {
        use std::str::FromStr;
        assert_eq!(AccOp::from_str("$addToSet").unwrap(), AccOp::AddToSet);
        assert!(AccOp::from_str("$stdDevPop").is_err());
    }
}
