//! Script execution error types.

use std::fmt;
use std::path::PathBuf;

/// Errors from loading or running a provider script.
///
/// Everything here is caught at the job boundary and turned into a `Failed`
/// event; a script can never crash a worker thread.
#[derive(Debug, Clone)]
pub enum ScriptError {
    /// The script file (or an include) could not be read.
    Load { path: PathBuf, message: String },

    /// The script failed to parse.
    Syntax {
        path: PathBuf,
        line: Option<usize>,
        message: String,
    },

    /// The entry function for the request kind is not defined.
    FunctionMissing { name: String },

    /// The script raised or hit an uncaught runtime error.
    Runtime {
        path: PathBuf,
        line: Option<usize>,
        message: String,
    },

    /// The script completed without producing any records on a request that
    /// expected data.
    NoData,

    /// The provider asked for a script extension the engine does not have.
    UnknownExtension { name: String },

    /// The job was cancelled while the script was running.
    Cancelled,
}

impl ScriptError {
    /// Whether this error is a cooperative cancellation, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScriptError::Cancelled)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Load { path, message } => {
                write!(f, "failed to load script {}: {message}", path.display())
            }
            ScriptError::Syntax {
                path,
                line,
                message,
            } => {
                write!(f, "syntax error in {}", path.display())?;
                if let Some(line) = line {
                    write!(f, " at line {line}")?;
                }
                write!(f, ": {message}")
            }
            ScriptError::FunctionMissing { name } => {
                write!(f, "script does not define entry function '{name}'")
            }
            ScriptError::Runtime {
                path,
                line,
                message,
            } => {
                write!(f, "runtime error in {}", path.display())?;
                if let Some(line) = line {
                    write!(f, " at line {line}")?;
                }
                write!(f, ": {message}")
            }
            ScriptError::NoData => {
                write!(f, "script produced no records (parsing failed or empty document)")
            }
            ScriptError::UnknownExtension { name } => {
                write!(f, "unknown script extension '{name}'")
            }
            ScriptError::Cancelled => write!(f, "job cancelled"),
        }
    }
}

impl std::error::Error for ScriptError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_line_numbers() {
        let err = ScriptError::Syntax {
            path: PathBuf::from("de_db.rhai"),
            line: Some(12),
            message: "unexpected token".into(),
        };
        let text = err.to_string();
        assert!(text.contains("de_db.rhai"));
        assert!(text.contains("line 12"));
        assert!(text.contains("unexpected token"));
    }

    #[test]
    fn display_without_line() {
        let err = ScriptError::Runtime {
            path: PathBuf::from("x.rhai"),
            line: None,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "runtime error in x.rhai: boom");
    }

    #[test]
    fn cancelled_is_not_a_failure() {
        assert!(ScriptError::Cancelled.is_cancelled());
        assert!(!ScriptError::NoData.is_cancelled());
    }
}
