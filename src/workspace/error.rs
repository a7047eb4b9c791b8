/// Errors surfaced by the workspace tracker (filesystem watch + VCS poll wiring).
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("{field} is required")]
    Validation { field: &'static str },

    #[error("failed to start filesystem watcher: {0}")]
    WatchFailed(String),

    #[error(transparent)]
    Vcs(#[from] crate::vcs::error::VcsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl serde::Serialize for WorkspaceError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
