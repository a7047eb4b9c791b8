use std::path::PathBuf;

/// Errors from the VCS runner and operator.
///
/// Follows the same shape as the interactive/background error enums: the
/// binary-missing, spawn, and non-zero-exit cases from the low-level runner,
/// plus the operator's own domain errors (conflicts, busy, validation).
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("git executable not found. Is git installed?")]
    GitNotFound,

    #[error("git command failed (exit code {code}): {stderr}")]
    CommandFailed {
        code: i32,
        stderr: String,
        command: String,
    },

    #[error("failed to spawn git process: {source}")]
    SpawnError {
        source: std::io::Error,
        command: String,
    },

    #[error("invalid UTF-8 in git output")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("failed to parse git output: {message}")]
    ParseError { message: String },

    #[error("repository not found at {path}")]
    NotARepo { path: PathBuf },

    #[error("{field} is invalid: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },

    #[error("another operation is already in progress")]
    Busy,

    #[error("conflict in {0} file(s)")]
    Conflict(Vec<String>),

    #[error("failed to parse json output: {0}")]
    Json(#[from] serde_json::Error),
}

impl serde::Serialize for VcsError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
