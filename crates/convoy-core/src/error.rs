//! Error types for convoy-core

/// Result type for convoy-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running release goals.
///
/// The first group is the user-facing taxonomy rendered by the CLI; the
/// transparent wrappers at the end are unexpected failures of the layers
/// below and are reported as internal errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another invocation holds the bundle
    #[error("Bundle '{bundle}' is locked by pid {pid} on {host} since {since}")]
    Locked {
        bundle: String,
        pid: u32,
        host: String,
        since: String,
    },

    /// User-actionable precondition failure
    #[error("{message}")]
    Build { message: String },

    /// Environment or settings problem
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A child operation failed
    #[error("{message} (exit status {})", status.map_or_else(|| "unknown".to_string(), |s| s.to_string()))]
    Exec {
        message: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The user aborted an interactive step
    #[error("{message}")]
    Cancelled { message: String },

    /// A cancellation signal interrupted the goal
    #[error("Interrupted{}", at.as_ref().map(|s| format!(" during {s}")).unwrap_or_default())]
    Interrupted { at: Option<String> },

    /// Settings require a different convoy version
    #[error("Settings require convoy {required}, this is {actual}")]
    Compatibility { required: String, actual: String },

    // Transparent wrappers for underlying crate errors
    /// Filesystem error from convoy-fs
    #[error(transparent)]
    Fs(#[from] convoy_fs::Error),

    /// Git error from convoy-git
    #[error(transparent)]
    Git(#[from] convoy_git::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// How the top level should present an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Usage, configuration, lock or child failure: message only
    Fatal,
    /// Interactive abort: no "fatal" framing
    Cancelled,
    /// Signal interruption
    Interrupted,
    /// Unexpected failure of a lower layer
    Internal,
}

impl Error {
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Locked { .. }
            | Self::Build { .. }
            | Self::Config { .. }
            | Self::Exec { .. }
            | Self::Compatibility { .. } => ErrorKind::Fatal,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Interrupted { .. } => ErrorKind::Interrupted,
            Self::Fs(_)
            | Self::Git(_)
            | Self::Io(_)
            | Self::Yaml(_)
            | Self::Json(_)
            | Self::Toml(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted { .. } => 130,
            Self::Compatibility { .. } => 2,
            _ => 1,
        }
    }

    /// Captured standard error of a failed child, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Exec { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }
}
