/// Error types for query-suggest
///
/// This module defines all possible errors that can occur in the engine.
/// Uses thiserror for ergonomic error handling.
///
/// Note that "no signal available" conditions (empty history, unreachable
/// activity feed, no entities in a query) are NOT errors: providers return
/// empty suggestion lists for those. Errors here are reserved for genuine
/// configuration or infrastructure failures.

use thiserror::Error;

/// Main error type for query-suggest operations
#[derive(Error, Debug)]
pub enum SuggestError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O errors (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid engine settings
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Pattern detection error
    #[error("Pattern detection error: {0}")]
    PatternDetection(String),

    /// Suggestion generation error inside a provider
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

impl SuggestError {
    /// Build a provider-internal error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        SuggestError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for query-suggest operations
pub type Result<T> = std::result::Result<T, SuggestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SuggestError::InvalidSettings("max_suggestions must be positive".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Invalid settings"));
        assert!(display.contains("max_suggestions"));
    }

    #[test]
    fn test_provider_error() {
        let err = SuggestError::provider("temporal", "pattern table poisoned");
        assert!(format!("{}", err).contains("temporal"));
    }
}
