pub use anyhow::Result;

use serde::Serialize;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};

/// An error raised while translating a pipeline.
#[derive(Debug, Clone)]
pub struct Error {
    /// Index of the pipeline stage the error originates from, if known.
    pub stage: Option<usize>,
    pub reason: Reason,
    pub help: Option<String>,
}

/// Coarse error family, as surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum ErrorKind {
    Input,
    Pipeline,
    Expression,
    Unsupported,
}

#[derive(Debug, Clone)]
pub enum Reason {
    /// The top level of the input is not an array of single-key stage objects.
    MalformedPipeline { detail: String },
    UnknownStage { name: String },
    StageArg { stage: String, detail: String },
    UnknownOperator { name: String },
    OperatorArity {
        name: String,
        got: usize,
        expected: String,
    },
    TypeMismatch { detail: String },
    /// Recognized, but not expressible in the target dialect.
    Unsupported { op: String },
    Simple(String),
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error {
            stage: None,
            reason,
            help: None,
        }
    }

    pub fn new_simple<S: Into<String>>(reason: S) -> Self {
        Error::new(Reason::Simple(reason.into()))
    }

    pub fn with_help<S: Into<String>>(mut self, help: S) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_stage(mut self, stage: usize) -> Self {
        self.stage.get_or_insert(stage);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.reason {
            Reason::MalformedPipeline { .. } => ErrorKind::Input,
            Reason::UnknownStage { .. } | Reason::StageArg { .. } => ErrorKind::Pipeline,
            Reason::UnknownOperator { .. }
            | Reason::OperatorArity { .. }
            | Reason::TypeMismatch { .. } => ErrorKind::Expression,
            Reason::Unsupported { .. } => ErrorKind::Unsupported,
            Reason::Simple(_) => ErrorKind::Pipeline,
        }
    }
}

impl Reason {
    fn message(&self) -> String {
        match self {
            Reason::MalformedPipeline { detail } => format!("malformed pipeline: {detail}"),
            Reason::UnknownStage { name } => format!("unknown stage `{name}`"),
            Reason::StageArg { stage, detail } => format!("invalid `{stage}` payload: {detail}"),
            Reason::UnknownOperator { name } => format!("unknown operator `{name}`"),
            Reason::OperatorArity {
                name,
                got,
                expected,
            } => format!("`{name}` expects {expected} arguments, but found {got}"),
            Reason::TypeMismatch { detail } => format!("type mismatch: {detail}"),
            Reason::Unsupported { op } => {
                format!("`{op}` is not fully supported by the Oracle target")
            }
            Reason::Simple(text) => text.clone(),
        }
    }
}

// Needed for anyhow
impl StdError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.reason.message())?;
        if let Some(stage) = self.stage {
            write!(f, " (stage {stage})")?;
        }
        if let Some(help) = &self.help {
            write!(f, "\nhelp: {help}")?;
        }
        Ok(())
    }
}

/// Flattened error, as exposed over serialization boundaries.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub kind: ErrorKind,
    /// Plain text of the error
    pub reason: String,
    /// A suggestion of how to fix the error
    pub hint: Option<String>,
    /// Index of the offending pipeline stage
    pub stage: Option<usize>,
}

impl From<&Error> for ErrorMessage {
    fn from(e: &Error) -> Self {
        ErrorMessage {
            kind: e.kind(),
            reason: e.reason.message(),
            hint: e.help.clone(),
            stage: e.stage,
        }
    }
}

impl Display for ErrorMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Downcast an internal [anyhow::Error] into the public [Error].
pub fn downcast(error: anyhow::Error) -> Error {
    match error.downcast::<Error>() {
        Ok(error) => error,
        // default to basic Display
        Err(error) => Error::new_simple(format!("{:#}", error)),
    }
}

pub trait WithErrorInfo {
    fn with_help<S: Into<String>>(self, help: S) -> Self;

    fn with_stage(self, stage: usize) -> Self;
}

impl<T> WithErrorInfo for Result<T, Error> {
    fn with_help<S: Into<String>>(self, help: S) -> Self {
        self.map_err(|e| e.with_help(help))
    }

    fn with_stage(self, stage: usize) -> Self {
        self.map_err(|e| e.with_stage(stage))
    }
}

impl<T> WithErrorInfo for Result<T, anyhow::Error> {
    fn with_help<S: Into<String>>(self, help: S) -> Self {
        self.map_err(|e| downcast(e).with_help(help).into())
    }

    fn with_stage(self, stage: usize) -> Self {
        self.map_err(|e| downcast(e).with_stage(stage).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_kind_classification() {
        let e = Error::new(Reason::UnknownStage {
            name: "$frobnicate".to_string(),
        });
        assert_eq!(e.kind(), ErrorKind::Pipeline);

        let e = Error::new(Reason::OperatorArity {
            name: "$divide".to_string(),
            got: 3,
            expected: "2".to_string(),
        });
        assert_eq!(e.kind(), ErrorKind::Expression);
        assert_eq!(
            e.to_string(),
            "Expression: `$divide` expects 2 arguments, but found 3"
        );
    }

    #[test]
    fn stage_is_not_overwritten() {
        let e = Error::new_simple("boom").with_stage(2).with_stage(5);
        assert_eq!(e.stage, Some(2));
    }
}
