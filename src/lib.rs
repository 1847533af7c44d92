//! Compiler for MongoDB aggregation pipelines.
//! Targets Oracle SQL over JSON-document rows and exposes the pipeline AST
//! and the relational plan.
//!
//! You probably want to start with the [translate] wrapper function.
//!
//! For more granular access, refer to this diagram:
//! ```ascii
//!          JSON pipeline
//!
//!  (parse)      │
//!  pipeline_of_json
//!               │
//!               ▼        ast_json_of_pipeline
//!                      ────────►
//!         Pipeline AST            AST JSON
//!                      ◄────────
//!               │        pipeline_of_ast_json
//!    (lower)    │
//!  plan_of_pipeline
//!               │
//!               ▼
//!             Plan
//!               │
//!   sql_of_plan │
//!               ▼
//!
//!           Oracle SQL
//! ```
//!
//! Each document row lives in a table with an `id` column (the surrogate
//! `_id`) and a JSON `data` column; every field access in the emitted SQL
//! extracts by path (`JSON_VALUE`, `JSON_QUERY`, `JSON_EXISTS`,
//! `JSON_TABLE`) and nothing ever materializes whole documents.

pub mod ast;
mod error;
mod lower;
mod parser;
pub mod plan;
pub mod sql;
#[cfg(test)]
mod test;
mod utils;

pub use error::{Error, ErrorKind, ErrorMessage, Reason};
pub use sql::{Options, Translation};

/// Translate a pipeline against `collection` into a single Oracle SQL
/// statement, with default options.
///
/// This is a wrapper for:
/// - [pipeline_of_json] — parse and validate the JSON pipeline
/// - [plan_of_pipeline] — lower stages into the relational plan
/// - [sql_of_plan] — render the plan as SQL
pub fn translate(collection: &str, pipeline: &serde_json::Value) -> Result<String, Error> {
    translate_with(collection, pipeline, &Options::default()).map(|t| t.sql)
}

/// Translate with explicit [Options], returning the SQL together with the
/// bind parameters collected in `:1, :2, …` order.
pub fn translate_with(
    collection: &str,
    pipeline: &serde_json::Value,
    options: &Options,
) -> Result<Translation, Error> {
    parser::parse(pipeline)
        .and_then(|pipeline| lower::lower_pipeline(collection, &pipeline, options))
        .map(|(plan, params)| Translation {
            sql: sql::compile(&plan, options),
            params,
        })
        .map_err(error::downcast)
}

/// Parse a JSON pipeline into the AST.
pub fn pipeline_of_json(pipeline: &serde_json::Value) -> Result<ast::Pipeline, Error> {
    parser::parse(pipeline).map_err(error::downcast)
}

/// Lower a parsed pipeline into the relational plan plus its bind
/// parameters.
pub fn plan_of_pipeline(
    collection: &str,
    pipeline: &ast::Pipeline,
    options: &Options,
) -> Result<(plan::Plan, Vec<serde_json::Value>), Error> {
    lower::lower_pipeline(collection, pipeline, options).map_err(error::downcast)
}

/// Render a plan as SQL.
pub fn sql_of_plan(plan: &plan::Plan, options: &Options) -> String {
    sql::compile(plan, options)
}

/// JSON serialization of the AST.
pub fn ast_json_of_pipeline(pipeline: &ast::Pipeline) -> Result<String, Error> {
    serde_json::to_string(pipeline).map_err(|e| error::downcast(anyhow::anyhow!(e)))
}

/// JSON deserialization of the AST.
pub fn pipeline_of_ast_json(json: &str) -> Result<ast::Pipeline, Error> {
    serde_json::from_str(json).map_err(|e| error::downcast(anyhow::anyhow!(e)))
}
