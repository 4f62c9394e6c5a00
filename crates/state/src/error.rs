//! State error types.

use thiserror::Error;

/// Errors raised while decoding or applying state.
#[derive(Debug, Error)]
pub enum StateError {
    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A component result could not be interpreted.
    #[error("malformed component result: {0}")]
    MalformedResult(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err = StateError::from(serde_err);
        assert!(err.to_string().starts_with("serialization:"));
    }

    #[test]
    fn malformed_result_display() {
        let err = StateError::MalformedResult("_delay_seconds is not a number".into());
        assert!(err.to_string().contains("_delay_seconds"));
    }
}
