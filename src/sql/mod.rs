//! Backend for rendering relational plans as Oracle SQL.

mod gen_query;

use serde::{Deserialize, Serialize};

use crate::plan::Plan;

/// Translation options. One immutable value shared by a translation;
/// separate translations may use separate options concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Replace `$match`-position literals with sequential `:n` placeholders
    /// and collect them into [Translation::params].
    pub parameterize: bool,

    /// Emit `/* <op> not fully supported */ NULL` for operators the target
    /// dialect cannot express, instead of raising.
    pub lenient: bool,

    /// Pretty-print the emitted SQL. Off by default: canonical output is
    /// the single-line spacing the translation tests pin down.
    pub format: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parameterize: false,
            lenient: true,
            format: false,
        }
    }
}

impl Options {
    pub fn parameterized(mut self) -> Self {
        self.parameterize = true;
        self
    }

    pub fn strict(mut self) -> Self {
        self.lenient = false;
        self
    }

    pub fn formatted(mut self) -> Self {
        self.format = true;
        self
    }
}

/// The product of one translation.
#[derive(Debug, Clone, Serialize)]
pub struct Translation {
    pub sql: String,
    /// Bind parameters in `:1, :2, …` order; empty unless
    /// [Options::parameterize] is set.
    pub params: Vec<serde_json::Value>,
}

/// Render a plan as a single Oracle SQL statement.
pub fn compile(plan: &Plan, options: &Options) -> String {
    let sql = gen_query::translate_plan(plan);
    if options.format {
        sqlformat::format(
            &sql,
            &sqlformat::QueryParams::default(),
            sqlformat::FormatOptions::default(),
        )
    } else {
        sql
    }
}
