/// Errors surfaced by the interactive PTY runner.
///
/// Mirrors the per-subsystem error split elsewhere in this crate: callers get
/// a machine-matchable variant rather than a bare string, and the `Display`
/// impl (from `thiserror`) supplies the human message.
#[derive(Debug, thiserror::Error)]
pub enum InteractiveError {
    #[error("{field} is required")]
    Validation { field: &'static str },

    #[error("process {0} not found")]
    NotFound(String),

    #[error("process {0} has not been started yet")]
    NotStarted(String),

    #[error("process {0} has no active pty")]
    PtyUnavailable(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl serde::Serialize for InteractiveError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
