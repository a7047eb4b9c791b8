/// Errors surfaced by the background command runner.
#[derive(Debug, thiserror::Error)]
pub enum BackgroundError {
    #[error("{field} is required")]
    Validation { field: &'static str },

    #[error("process {0} not found")]
    NotFound(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl serde::Serialize for BackgroundError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
