use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

/// A value-producing sub-AST used inside stages.
///
/// Analogous across all stages: `$project` computed fields, `$group` keys and
/// accumulator arguments, `$redact` conditions and so on all carry these.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum Expr {
    Literal(Literal),
    /// A path rooted in the current row, `$a.b.c`.
    FieldRef(FieldPath),
    /// A path rooted in a bound variable, `$$name.a.b`.
    VarRef(VarRef),
    /// An operator call with positional arguments; the recognized set lives
    /// in the operator dispatch table.
    Call { op: String, args: Vec<Expr> },
    /// `$filter {input, as, cond}` — binds `$$as` per element.
    Filter {
        input: Box<Expr>,
        var: String,
        cond: Box<Expr>,
    },
    /// `$map {input, as, in}` — binds `$$as` per element.
    Map {
        input: Box<Expr>,
        var: String,
        inner: Box<Expr>,
    },
    /// `$reduce {input, initialValue, in}` — binds `$$value` / `$$this`.
    Reduce {
        input: Box<Expr>,
        initial: Box<Expr>,
        inner: Box<Expr>,
    },
    /// `$cond` in either positional or named form.
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `$switch {branches: [{case, then}], default}`.
    Switch {
        branches: Vec<SwitchBranch>,
        default: Option<Box<Expr>>,
    },
    /// An object literal; field order is preserved.
    Object(Vec<(String, Expr)>),
    /// An array literal.
    Array(Vec<Expr>),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SwitchBranch {
    pub case: Expr,
    pub then: Expr,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// A dotted field path without the leading `$`.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Serialize, Deserialize)]
pub struct FieldPath(pub String);

impl FieldPath {
    pub fn new<S: Into<String>>(path: S) -> Self {
        FieldPath(path.into())
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn last_segment(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// The SQL/JSON path expression for this field, `$.a.b.c`.
    pub fn json_path(&self) -> String {
        format!("$.{}", self.0)
    }

    /// True when `self` is `prefix` itself or a path below it.
    pub fn is_under(&self, prefix: &str) -> bool {
        self.0 == prefix
            || (self.0.len() > prefix.len()
                && self.0.starts_with(prefix)
                && self.0.as_bytes()[prefix.len()] == b'.')
    }

    /// The remainder of the path below `prefix`, if any.
    pub fn strip_prefix(&self, prefix: &str) -> Option<&str> {
        if self.0 == prefix {
            Some("")
        } else {
            self.0
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
        }
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.0)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct VarRef {
    /// The variable name without the `$$` sigil.
    pub name: String,
    /// A path below the variable, for `$$item.price`.
    pub path: Option<String>,
}

impl Expr {
    pub fn field<S: Into<String>>(path: S) -> Self {
        Expr::FieldRef(FieldPath::new(path))
    }

    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Integer(value))
    }

    /// Collects every field path mentioned in this expression, in order.
    pub fn collect_field_refs<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        match self {
            Expr::FieldRef(path) => out.push(path),
            Expr::Literal(_) | Expr::VarRef(_) => {}
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_field_refs(out);
                }
            }
            Expr::Filter { input, cond, .. } => {
                input.collect_field_refs(out);
                cond.collect_field_refs(out);
            }
            Expr::Map { input, inner, .. } => {
                input.collect_field_refs(out);
                inner.collect_field_refs(out);
            }
            Expr::Reduce {
                input,
                initial,
                inner,
            } => {
                input.collect_field_refs(out);
                initial.collect_field_refs(out);
                inner.collect_field_refs(out);
            }
            Expr::Cond {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_field_refs(out);
                then.collect_field_refs(out);
                otherwise.collect_field_refs(out);
            }
            Expr::Switch { branches, default } => {
                for branch in branches {
                    branch.case.collect_field_refs(out);
                    branch.then.collect_field_refs(out);
                }
                if let Some(default) = default {
                    default.collect_field_refs(out);
                }
            }
            Expr::Object(fields) => {
                for (_, value) in fields {
                    value.collect_field_refs(out);
                }
            }
            Expr::Array(items) => {
                for item in items {
                    item.collect_field_refs(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_path_prefixes() {
        let path = FieldPath::new("items.product");
        assert!(path.is_under("items"));
        assert!(!path.is_under("item"));
        assert_eq!(path.strip_prefix("items"), Some("product"));
        assert_eq!(path.strip_prefix("items.product"), Some(""));
        assert_eq!(path.strip_prefix("other"), None);
        assert_eq!(path.json_path(), "$.items.product");
    }

    #[test]
    fn collects_field_refs_in_order() {
        let expr = Expr::Call {
            op: "$multiply".to_string(),
            args: vec![Expr::field("items.qty"), Expr::field("items.price")],
        };
        let mut refs = Vec::new();
        expr.collect_field_refs(&mut refs);
        assert_eq!(
            refs.iter().map(|p| p.0.as_str()).collect::<Vec<_>>(),
            ["items.qty", "items.price"]
        );
    }
}
