//! Component error taxonomy.

use thiserror::Error;

/// Errors a component invocation can raise.
///
/// The worker retries transient errors with backoff; everything else
/// fails the execution immediately.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// A temporary failure worth retrying (network, rate limit, …).
    #[error("{0}")]
    Transient(String),

    /// A failure that no retry can fix.
    #[error("{0}")]
    Permanent(String),

    /// A referenced credential does not exist. Never retried: the
    /// configuration is wrong, not the environment.
    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    /// The node's component type has no registered factory.
    #[error("unknown component type: {0}")]
    UnknownComponentType(String),

    /// The node's stored configuration is missing or malformed.
    #[error("invalid component config: {0}")]
    InvalidConfig(String),
}

impl ComponentError {
    /// Returns `true` if the worker should retry this attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Stable classification code for log rows.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::CredentialNotFound(_) => "credential_not_found",
            Self::UnknownComponentType(_) => "unknown_component_type",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ComponentError::Transient("timeout".into()).is_retryable());
        assert!(!ComponentError::Permanent("bad input".into()).is_retryable());
        assert!(!ComponentError::CredentialNotFound("api_key".into()).is_retryable());
        assert!(!ComponentError::UnknownComponentType("quantum".into()).is_retryable());
        assert!(!ComponentError::InvalidConfig("no rules".into()).is_retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ComponentError::Transient(String::new()).code(), "transient");
        assert_eq!(
            ComponentError::CredentialNotFound(String::new()).code(),
            "credential_not_found"
        );
    }

    #[test]
    fn credential_display() {
        let err = ComponentError::CredentialNotFound("telegram_token".into());
        assert_eq!(err.to_string(), "credential not found: telegram_token");
    }
}
