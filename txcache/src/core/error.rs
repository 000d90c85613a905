use thiserror::Error;

/// Main error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid argument `{param}`: {reason}")]
    InvalidArgument {
        param: &'static str,
        reason: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Shorthand for a required argument that was empty or missing
    pub fn missing(param: &'static str) -> Self {
        Self::InvalidArgument {
            param,
            reason: "value must not be empty",
        }
    }

    /// Name of the offending parameter, if this is an argument error
    pub fn param(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArgument { param, .. } => Some(param),
            Self::InvalidConfig(_) => None,
        }
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error returned by the caching executor.
///
/// Driver failures pass through untouched; cache errors only arise from
/// argument validation, which happens before anything is executed.
#[derive(Debug, Error)]
pub enum ExecutionError<E> {
    #[error(transparent)]
    Executor(E),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl<E> ExecutionError<E> {
    /// Unwrap the driver error, if that is what this is
    pub fn into_executor(self) -> Option<E> {
        match self {
            Self::Executor(e) => Some(e),
            Self::Cache(_) => None,
        }
    }
}
