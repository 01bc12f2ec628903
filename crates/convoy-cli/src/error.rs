//! Error types for convoy-cli

use convoy_core::ErrorKind;

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Errors that can occur in CLI operations
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Error from convoy-core
    #[error(transparent)]
    Core(#[from] convoy_core::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Interactive prompt error
    #[error("Interactive prompt error: {0}")]
    Dialoguer(#[from] dialoguer::Error),

    /// User-facing error with a message
    #[error("{message}")]
    User { message: String },
}

impl CliError {
    /// Create a new user error with the given message
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(e) => e.kind(),
            Self::User { .. } => ErrorKind::Fatal,
            Self::Io(_) | Self::Dialoguer(_) => ErrorKind::Internal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Core(e) => e.exit_code(),
            _ => 1,
        }
    }

    /// Convert into the core taxonomy, for errors crossing back into a goal.
    ///
    /// An interrupted prompt becomes [`convoy_core::Error::Interrupted`].
    pub fn into_core(self) -> convoy_core::Error {
        match self {
            Self::Core(e) => e,
            Self::Io(e) => convoy_core::Error::Io(e),
            Self::Dialoguer(dialoguer::Error::IO(e))
                if e.kind() == std::io::ErrorKind::Interrupted =>
            {
                convoy_core::Error::Interrupted {
                    at: Some("approval prompt".to_string()),
                }
            }
            Self::Dialoguer(e) => convoy_core::Error::cancelled(format!("Approval prompt failed: {e}")),
            Self::User { message } => convoy_core::Error::build(message),
        }
    }
}
