//! Error types for convoy-git

/// Result type for convoy-git operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in convoy-git operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Filesystem error: {0}")]
    Fs(#[from] convoy_fs::Error),

    #[error("Remote '{name}' not found")]
    RemoteNotFound { name: String },

    #[error("Branch '{name}' not found on remote")]
    BranchNotFound { name: String },

    #[error("Push of {refname} rejected: {reason}")]
    PushRejected { refname: String, reason: String },

    #[error("Path '{path}' escapes the repository root")]
    InvalidPath { path: String },

    #[error("Marker {refname} is malformed: {reason}")]
    MarkerMalformed { refname: String, reason: String },
}
