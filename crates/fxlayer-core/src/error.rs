//! Error taxonomy shared by the engine, compilers and adapters.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FxError {
    /// The Core has no adapter yet, or was already shut down.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The call is not legal in the object's current state.
    #[error("invalid call: {0}")]
    InvalidCall(String),

    #[error("already set: {0}")]
    AlreadySet(String),

    #[error("failed to compile {name}: {}", errors.join("; "))]
    CompileFailed { name: String, errors: Vec<String> },

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("property not found: {0}")]
    PropertyNotFound(String),

    /// A native graphics call failed.
    #[error("graphics api error: {0}")]
    Api(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FxError {
    pub fn compile_failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::CompileFailed {
            name: name.into(),
            errors: vec![error.into()],
        }
    }

    /// Short stable label used in log lines and adapter error hooks.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "not_initialized",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidCall(_) => "invalid_call",
            Self::AlreadySet(_) => "already_set",
            Self::CompileFailed { .. } => "compile_failed",
            Self::InvalidProfile(_) => "invalid_profile",
            Self::FileNotFound(_) => "file_not_found",
            Self::NotImplemented(_) => "not_implemented",
            Self::PropertyNotFound(_) => "property_not_found",
            Self::Api(_) => "api",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T, E = FxError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_failed_joins_every_message() {
        let err = FxError::CompileFailed {
            name: "blur".into(),
            errors: vec!["first".into(), "second".into()],
        };
        assert_eq!(err.to_string(), "failed to compile blur: first; second");
        assert_eq!(err.kind(), "compile_failed");
    }

    #[test]
    fn io_errors_convert() {
        let err: FxError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, FxError::Io(_)));
    }
}
