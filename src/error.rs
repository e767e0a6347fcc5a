//! Error types for evalpool-rs.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for evalpool-rs operations.
pub type Result<T> = std::result::Result<T, EvalPoolError>;

/// Errors that can occur while managing or evaluating a model pool.
#[derive(Debug, Error)]
pub enum EvalPoolError {
    /// Invalid pool size or configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model artifact unreadable or device unavailable.
    #[error("Model loading failed: {0}")]
    Load(String),

    /// Tensor map inconsistent with the declared node schema.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The engine failed during the forward pass.
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// Operation attempted on a pool that is not ready.
    #[error("Pool is closed")]
    PoolClosed,

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

/// Closed classification of [`EvalPoolError`], for callers that branch on
/// the kind of failure rather than its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Load,
    SchemaMismatch,
    Evaluation,
    PoolClosed,
    Io,
}

impl EvalPoolError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a model load error.
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Create a schema mismatch error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    /// Create an evaluation error.
    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Yaml(_) => ErrorKind::Config,
            Self::Load(_) => ErrorKind::Load,
            Self::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Self::Evaluation(_) => ErrorKind::Evaluation,
            Self::PoolClosed => ErrorKind::PoolClosed,
            Self::Json(_) | Self::Io(_) | Self::FileNotFound(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EvalPoolError::load("bad artifact");
        assert_eq!(format!("{}", err), "Model loading failed: bad artifact");

        let err = EvalPoolError::config("pool size must be at least 1");
        assert_eq!(
            format!("{}", err),
            "Configuration error: pool size must be at least 1"
        );

        assert_eq!(format!("{}", EvalPoolError::PoolClosed), "Pool is closed");

        let err = EvalPoolError::FileNotFound(PathBuf::from("/path/to/input.json"));
        assert_eq!(format!("{}", err), "File not found: /path/to/input.json");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(EvalPoolError::config("x").kind(), ErrorKind::Config);
        assert_eq!(EvalPoolError::load("x").kind(), ErrorKind::Load);
        assert_eq!(EvalPoolError::schema("x").kind(), ErrorKind::SchemaMismatch);
        assert_eq!(EvalPoolError::evaluation("x").kind(), ErrorKind::Evaluation);
        assert_eq!(EvalPoolError::PoolClosed.kind(), ErrorKind::PoolClosed);

        let yaml_err = serde_yaml::from_str::<Vec<u32>>("{").unwrap_err();
        assert_eq!(EvalPoolError::from(yaml_err).kind(), ErrorKind::Config);
    }
}
