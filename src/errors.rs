use thiserror::Error;

/// Typed error hierarchy for ratchet.
///
/// Use at module boundaries (registry execution, batch validation, pool
/// lifecycle, permission checks). Internal/leaf functions can continue using
/// `anyhow::Result` — the `Internal` variant allows seamless conversion via
/// the `?` operator.
#[derive(Debug, Error)]
pub enum RatchetError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("tool {0} not found")]
    ToolNotFound(String),

    #[error("Permission denied: {tool}({input})")]
    PermissionDenied { tool: String, input: String },

    #[error("Rate limit exceeded ({scope})")]
    RateLimited { scope: RateLimitScope },

    #[error("Execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Dependency cycle detected: {0}")]
    Cycle(String),

    #[error("Executor queue full")]
    QueueFull,

    #[error("Executor pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Which bucket family denied an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Global,
    User,
    Resource,
}

impl std::fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitScope::Global => write!(f, "global"),
            RateLimitScope::User => write!(f, "user"),
            RateLimitScope::Resource => write!(f, "resource"),
        }
    }
}

/// Convenience alias for results using RatchetError.
pub type RatchetResult<T> = std::result::Result<T, RatchetError>;

impl RatchetError {
    /// Whether the error reports a missing tool rather than a failed one.
    /// Callers branch on this to distinguish plumbing errors from
    /// tool-reported failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RatchetError::ToolNotFound(_))
    }

    /// Whether this error is retryable (rate limits, full queues).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RatchetError::RateLimited { .. } | RatchetError::QueueFull
        )
    }
}
