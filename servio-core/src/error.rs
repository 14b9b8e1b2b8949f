use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy of the control plane.
///
/// Every fallible operation in the daemon resolves to one of these kinds;
/// the HTTP layer maps them onto response statuses (400/404/409/500).
/// Raw driver or I/O errors never cross a component boundary: they are
/// wrapped here with a message identifying the failing caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad id, missing required field, invalid git URL.
    #[error("{0}")]
    Validation(String),

    /// The referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A uniqueness violation on `projects.name` or `(project_id, services.name)`.
    #[error("{0}")]
    Conflict(String),

    /// A pre-flight check failed before any side effect was taken:
    /// missing system user, missing executable, unusable working directory.
    #[error("{0}")]
    Preflight(String),

    /// An external command exited non-zero. Carries the combined
    /// stdout+stderr of the child.
    #[error("{command} failed: {output}")]
    Subprocess { command: String, output: String },

    /// The reverse-proxy configuration test rejected a generated site
    /// file. The offending file has already been rolled back.
    #[error("nginx config test failed: {0}")]
    ConfigInvalid(String),

    /// Store or I/O failure not otherwise classified.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Wraps an underlying failure with a caller-identifying message.
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Internal(format!("{context}: {err}"))
    }

    pub fn subprocess(command: impl Into<String>, output: impl Into<String>) -> Self {
        Error::Subprocess {
            command: command.into(),
            output: output.into(),
        }
    }
}
