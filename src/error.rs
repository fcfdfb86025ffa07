//! Error types for the recommendation core.

/// Top-level error type for the recommendation core.
///
/// Every variant maps to one stable wire code (see [`CoreError::code`]) so a
/// transport shell can translate failures without matching on Rust types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input failed schema or bound checks.
    #[error("validation error: {0}")]
    Validation(String),

    /// Session or user has no state for an operation that requires it.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller identity does not match the requested user.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Catalog or persistence call exceeded the request deadline.
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Catalog or persistence failure.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Invariant violation inside the core.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Stable wire code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            Self::Upstream(_) | Self::Io(_) => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// True for catalog/persistence failures the facade degrades on
    /// (empty recommendation list) instead of surfacing to the caller.
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout(_) | Self::Upstream(_) | Self::Io(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(CoreError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(CoreError::Forbidden("x".into()).code(), "FORBIDDEN");
        assert_eq!(
            CoreError::UpstreamTimeout("x".into()).code(),
            "UPSTREAM_TIMEOUT"
        );
        assert_eq!(CoreError::Upstream("x".into()).code(), "UPSTREAM_ERROR");
        assert_eq!(CoreError::Internal("x".into()).code(), "INTERNAL");
    }

    #[test]
    fn upstream_classification() {
        assert!(CoreError::Upstream("db".into()).is_upstream());
        assert!(CoreError::UpstreamTimeout("slow".into()).is_upstream());
        assert!(!CoreError::Validation("bad".into()).is_upstream());
    }
}
