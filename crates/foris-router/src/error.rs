//! Router and handler error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

/// Result of a single handler invocation
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Errors raised while building or querying the module registry
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("module not found: {0}")]
    NotFound(String),

    #[error("module '{0}' has no schema")]
    MissingSchema(String),

    #[error("invalid module manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("failed to instantiate module '{name}': {message}")]
    Instantiate { name: String, message: String },

    #[error("core error: {0}")]
    Core(#[from] foris_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a module handler.
///
/// These never reach the client verbatim; the router renders them as
/// `Internal error <Kind>('<message>')`.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Backend(String),

    #[error("'{program}' exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Core(#[from] foris_core::Error),
}

impl HandlerError {
    /// Stable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::UnknownAction(_) => "UnknownAction",
            HandlerError::InvalidArgument(_) => "InvalidArgument",
            HandlerError::Backend(_) => "BackendError",
            HandlerError::Command { .. } => "CommandError",
            HandlerError::Io(_) => "IoError",
            HandlerError::Json(_) => "JsonError",
            HandlerError::Core(_) => "CoreError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(HandlerError::UnknownAction("x".into()).kind(), "UnknownAction");
        assert_eq!(HandlerError::Backend("uci failed".into()).kind(), "BackendError");
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(HandlerError::from(io).kind(), "IoError");
    }
}
